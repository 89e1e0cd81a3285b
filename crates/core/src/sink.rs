use std::path::Path;

use crate::{
    error::Result,
    job::{Job, MediaInfo},
};

/// Capabilities the pipeline needs from the messaging layer. Wording and
/// presentation are the front end's business; the core only pushes events
/// through this seam.
#[async_trait::async_trait]
pub trait DeliverySink: Send + Sync {
    /// Update the job's status message.
    async fn send_status(&self, job: &Job, text: &str) -> Result<()>;

    /// Stream the finished artifact to the conversation as the job's media
    /// kind, with title/duration (and dimensions for video) attached.
    async fn send_media(&self, job: &Job, artifact: &Path, info: &MediaInfo) -> Result<()>;

    /// Remove the transient status message once the media is delivered.
    async fn delete_status(&self, job: &Job) -> Result<()>;
}
