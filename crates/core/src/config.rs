use std::time::Duration;

use serde::Deserialize;

/// Process-wide pipeline settings. Supplied at startup, immutable after.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workers draining the job queue in parallel.
    pub workers: usize,
    /// Jobs allowed to wait beyond the ones already running. A full queue
    /// rejects new submissions instead of growing.
    pub queue_capacity: usize,
    /// Hard delivery ceiling in bytes. Exactly-at-limit is accepted.
    pub size_ceiling_bytes: u64,
    /// Descending video height ceilings tried until the artifact fits.
    pub video_height_ladder: Vec<u32>,
    pub metadata_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub upload_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 8,
            size_ceiling_bytes: 50 * 1024 * 1024,
            video_height_ladder: vec![720, 480],
            metadata_timeout_secs: 20,
            download_timeout_secs: 300,
            upload_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Reject settings the pipeline cannot run with. Called once at
    /// startup, before anything is built from the config.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        if self.size_ceiling_bytes == 0 {
            return Err("size_ceiling_bytes must be positive".to_string());
        }
        if self.video_height_ladder.is_empty() {
            return Err("video_height_ladder needs at least one rung".to_string());
        }
        Ok(())
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}
