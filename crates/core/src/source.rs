use crate::{
    error::Result,
    job::{FetchAttempt, MediaInfo},
    workspace::Workspace,
};

/// One rung of work for the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTarget {
    /// Video capped at this height.
    Video { height_ceiling: u32 },
    /// Best available audio, normalized to one delivery codec when the
    /// transcode path works.
    Audio,
}

impl FetchTarget {
    pub fn height_ceiling(&self) -> Option<u32> {
        match self {
            FetchTarget::Video { height_ceiling } => Some(*height_ceiling),
            FetchTarget::Audio => None,
        }
    }
}

/// What the pipeline needs from the external extraction-and-conversion
/// tool: one metadata probe and one single-attempt fetch. The quality
/// ladder and retry policy live in the pipeline, not here.
#[async_trait::async_trait]
pub trait MediaSource: Send + Sync {
    /// Query metadata without retrieving media bytes.
    async fn probe(&self, url: &str) -> Result<MediaInfo>;

    /// Materialize the media into `workspace` and report where it landed.
    async fn fetch(
        &self,
        url: &str,
        target: FetchTarget,
        workspace: &Workspace,
    ) -> Result<FetchAttempt>;
}
