use std::{path::PathBuf, process::Output, time::Duration};

use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::debug;

use crate::{
    config::Config,
    error::{Result, SkachkaError},
    job::{FetchAttempt, MediaInfo},
    source::{FetchTarget, MediaSource},
    workspace::Workspace,
};

/// Extractor clients that still serve media without throttling.
const PLAYER_CLIENT_ARGS: &str = "youtube:player_client=tv_embedded,android_creator";

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "opus", "webm"];

/// Extraction adapter over the `yt-dlp` binary: metadata probes and
/// single-attempt downloads into a job's workspace.
pub struct YtDlpSource {
    binary: PathBuf,
    metadata_timeout: Duration,
    download_timeout: Duration,
}

/// The slice of yt-dlp's `--dump-single-json` output the pipeline needs.
#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    duration: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

impl YtDlpSource {
    pub fn new(config: &Config) -> Self {
        Self::with_binary(config, "yt-dlp")
    }

    /// Use a specific yt-dlp executable instead of whatever is on PATH.
    pub fn with_binary(config: &Config, binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            metadata_timeout: config.metadata_timeout(),
            download_timeout: config.download_timeout(),
        }
    }

    fn video_format(height_ceiling: u32) -> String {
        format!(
            "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best[height<={h}]",
            h = height_ceiling
        )
    }

    /// Run yt-dlp with a deadline. The child is killed when the deadline
    /// passes; a timeout counts as transient.
    async fn run(&self, mut cmd: Command, limit: Duration) -> Result<Output> {
        cmd.kill_on_drop(true);
        match timeout(limit, cmd.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(SkachkaError::Transient {
                reason: format!("yt-dlp timed out after {}s", limit.as_secs()),
            }),
        }
    }

    fn first_error_line(stderr: &str) -> String {
        stderr
            .lines()
            .find(|line| line.starts_with("ERROR"))
            .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
            .unwrap_or("yt-dlp reported no error output")
            .to_string()
    }

    /// Map a failed yt-dlp run onto the failure taxonomy. Anything the
    /// tool does not explicitly report as restricted or malformed counts
    /// as transient.
    fn classify(url: &str, stderr: &str) -> SkachkaError {
        let lowered = stderr.to_lowercase();
        let restricted = [
            "private video",
            "sign in to confirm your age",
            "age-restricted",
            "age restricted",
            "video unavailable",
            "not available in your country",
            "members-only",
            "has been removed",
        ];
        if restricted.iter().any(|marker| lowered.contains(marker)) {
            return SkachkaError::Restricted {
                reason: Self::first_error_line(stderr),
            };
        }
        if lowered.contains("is not a valid url")
            || lowered.contains("unsupported url")
            || lowered.contains("incomplete youtube id")
        {
            return SkachkaError::NotFound {
                url: url.to_string(),
            };
        }
        SkachkaError::Transient {
            reason: Self::first_error_line(stderr),
        }
    }

    /// The tool prints its final path via `--print after_move:filepath`,
    /// but may have picked a different extension than the template asked
    /// for. Trust the printed path first, then fall back to scanning the
    /// workspace.
    async fn resolve_artifact(
        output: &Output,
        workspace: &Workspace,
        extensions: &[&str],
    ) -> Result<PathBuf> {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(printed) = stdout.lines().rev().find(|line| !line.trim().is_empty()) {
            let path = PathBuf::from(printed.trim());
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
            debug!(
                "yt-dlp printed {} but the file is missing, scanning workspace",
                path.display()
            );
        }
        workspace
            .newest_media_file(extensions)
            .ok_or_else(|| SkachkaError::Transient {
                reason: "yt-dlp finished but no output file was found".to_string(),
            })
    }

    async fn attempt(
        &self,
        url: &str,
        workspace: &Workspace,
        extensions: &[&str],
        format_args: &[&str],
        quality_ceiling: Option<u32>,
    ) -> Result<FetchAttempt> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(url)
            .arg("--no-warnings")
            .arg("--extractor-args")
            .arg(PLAYER_CLIENT_ARGS)
            .args(format_args)
            .arg("-o")
            .arg(workspace.output_template())
            .arg("--no-simulate")
            .arg("--print")
            .arg("after_move:filepath");

        let output = self.run(cmd, self.download_timeout).await?;
        if !output.status.success() {
            return Err(Self::classify(
                url,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        let path = Self::resolve_artifact(&output, workspace, extensions).await?;
        let byte_size = tokio::fs::metadata(&path).await?.len();
        Ok(FetchAttempt {
            quality_ceiling,
            path,
            byte_size,
        })
    }

    async fn fetch_video(
        &self,
        url: &str,
        height_ceiling: u32,
        workspace: &Workspace,
    ) -> Result<FetchAttempt> {
        let format = Self::video_format(height_ceiling);
        self.attempt(
            url,
            workspace,
            VIDEO_EXTENSIONS,
            &["-f", format.as_str(), "--recode-video", "mp4"],
            Some(height_ceiling),
        )
        .await
    }

    async fn fetch_audio(&self, url: &str, workspace: &Workspace) -> Result<FetchAttempt> {
        let transcoded = self
            .attempt(
                url,
                workspace,
                AUDIO_EXTENSIONS,
                &[
                    "-f",
                    "bestaudio/best",
                    "-x",
                    "--audio-format",
                    "mp3",
                    "--audio-quality",
                    "192K",
                ],
                None,
            )
            .await;

        match transcoded {
            Err(e) if e.is_transient() => {
                // the transcode path needs a working ffmpeg; delivering the
                // source codec untouched is better than failing outright
                debug!("mp3 transcode path failed ({e}), retrying without post-processing");
                self.attempt(url, workspace, AUDIO_EXTENSIONS, &["-f", "bestaudio/best"], None)
                    .await
            }
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl MediaSource for YtDlpSource {
    async fn probe(&self, url: &str) -> Result<MediaInfo> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(url)
            .arg("--dump-single-json")
            .arg("--no-download")
            .arg("--no-warnings")
            .arg("--extractor-args")
            .arg(PLAYER_CLIENT_ARGS);

        let output = self.run(cmd, self.metadata_timeout).await?;
        if !output.status.success() {
            return Err(Self::classify(
                url,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        let raw: RawInfo = serde_json::from_slice(&output.stdout)?;
        Ok(MediaInfo {
            title: raw.title.unwrap_or_else(|| "Downloaded media".to_string()),
            duration_seconds: raw.duration.unwrap_or(0.0).round() as u32,
            width: raw.width,
            height: raw.height,
        })
    }

    async fn fetch(
        &self,
        url: &str,
        target: FetchTarget,
        workspace: &Workspace,
    ) -> Result<FetchAttempt> {
        match target {
            FetchTarget::Video { height_ceiling } => {
                self.fetch_video(url, height_ceiling, workspace).await
            }
            FetchTarget::Audio => self.fetch_audio(url, workspace).await,
        }
    }
}
