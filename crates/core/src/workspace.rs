use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use uuid::Uuid;

use crate::error::Result;

/// Hands out per-job scratch directories under one root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform cache directory, falling back to /tmp.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("skachka")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the scratch directory for one job. The job id keys the path,
    /// so no two jobs ever observe the same directory.
    pub fn acquire(&self, job_id: Uuid) -> Result<Workspace> {
        let dir = self.root.join(job_id.to_string());
        fs::create_dir_all(&dir)?;
        Ok(Workspace {
            dir,
            released: false,
        })
    }
}

/// Exclusively-owned scratch directory for one job. Removed on `release`
/// and again on drop, so no exit path leaks files.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Output template for the external tool; it substitutes the real
    /// extension for `%(ext)s`.
    pub fn output_template(&self) -> PathBuf {
        self.dir.join("media.%(ext)s")
    }

    /// Fallback for when the tool picked a different extension than asked:
    /// the newest file in the scratch directory with one of the expected
    /// extensions. Asking the tool for its exact output path is the
    /// primary contract; this scan only covers the gap.
    pub fn newest_media_file(&self, extensions: &[&str]) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.dir).ok()?;
        let mut newest: Option<(SystemTime, PathBuf)> = None;

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(ext) = path.extension() else {
                continue;
            };
            let ext = ext.to_string_lossy().to_lowercase();
            if !extensions.iter().any(|e| *e == ext) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                newest = Some((modified, path));
            }
        }

        newest.map(|(_, path)| path)
    }

    /// Remove everything under the scratch directory. Idempotent; safe to
    /// call on already-cleaned state.
    pub fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("failed to clean workspace {}: {e}", self.dir.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, WorkspaceManager) {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());
        (root, manager)
    }

    #[test]
    fn release_removes_every_file_and_is_idempotent() {
        let (_root, manager) = manager();
        let mut workspace = manager.acquire(Uuid::new_v4()).unwrap();
        fs::write(workspace.dir().join("media.mp4"), b"bytes").unwrap();
        fs::write(workspace.dir().join("media.part"), b"partial").unwrap();

        workspace.release().unwrap();
        assert!(!workspace.dir().exists());
        workspace.release().unwrap();
    }

    #[test]
    fn drop_cleans_up_without_an_explicit_release() {
        let (_root, manager) = manager();
        let dir;
        {
            let workspace = manager.acquire(Uuid::new_v4()).unwrap();
            dir = workspace.dir().to_path_buf();
            fs::write(dir.join("media.mp3"), b"bytes").unwrap();
        }
        assert!(!dir.exists());
    }

    #[test]
    fn distinct_jobs_get_distinct_directories() {
        let (_root, manager) = manager();
        let a = manager.acquire(Uuid::new_v4()).unwrap();
        let b = manager.acquire(Uuid::new_v4()).unwrap();
        assert_ne!(a.dir(), b.dir());
    }

    #[test]
    fn newest_media_file_filters_by_extension() {
        let (_root, manager) = manager();
        let workspace = manager.acquire(Uuid::new_v4()).unwrap();
        fs::write(workspace.dir().join("media.part"), b"x").unwrap();
        fs::write(workspace.dir().join("notes.txt"), b"x").unwrap();
        fs::write(workspace.dir().join("media.webm"), b"x").unwrap();

        let found = workspace.newest_media_file(&["mp4", "webm"]).unwrap();
        assert_eq!(found, workspace.dir().join("media.webm"));
        assert!(workspace.newest_media_file(&["mp3"]).is_none());
    }

    #[test]
    fn newest_media_file_prefers_the_most_recent_match() {
        let (_root, manager) = manager();
        let workspace = manager.acquire(Uuid::new_v4()).unwrap();
        fs::write(workspace.dir().join("old.mp4"), b"x").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(workspace.dir().join("new.mp4"), b"x").unwrap();

        let found = workspace.newest_media_file(&["mp4"]).unwrap();
        assert_eq!(found, workspace.dir().join("new.mp4"));
    }
}
