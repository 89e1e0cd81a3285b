use std::{path::Path, sync::Arc, time::Duration};

use skachka_core::{DeliverySink, Job, MediaFormat, MediaInfo, SkachkaError};

use crate::telegram::TelegramClient;

/// Delivery sink over the Telegram Bot API: status text goes through
/// message edits, finished media through sendAudio/sendVideo.
pub struct TelegramSink {
    client: Arc<TelegramClient>,
    upload_timeout: Duration,
}

impl TelegramSink {
    pub fn new(client: Arc<TelegramClient>, upload_timeout: Duration) -> Self {
        Self {
            client,
            upload_timeout,
        }
    }
}

fn messaging_error(error: anyhow::Error) -> SkachkaError {
    SkachkaError::Transient {
        reason: format!("{error:#}"),
    }
}

fn upload_error(error: anyhow::Error) -> SkachkaError {
    let timed_out = error
        .chain()
        .any(|cause| {
            cause
                .downcast_ref::<reqwest::Error>()
                .is_some_and(|e| e.is_timeout())
        });
    SkachkaError::Upload {
        reason: format!("{error:#}"),
        timed_out,
    }
}

#[async_trait::async_trait]
impl DeliverySink for TelegramSink {
    async fn send_status(&self, job: &Job, text: &str) -> skachka_core::Result<()> {
        self.client
            .edit_message_text(job.conversation.0, job.status_message.0, text)
            .await
            .map_err(messaging_error)
    }

    async fn send_media(
        &self,
        job: &Job,
        artifact: &Path,
        info: &MediaInfo,
    ) -> skachka_core::Result<()> {
        let result = match job.format {
            MediaFormat::Audio => {
                self.client
                    .send_audio(
                        job.conversation.0,
                        artifact,
                        &info.title,
                        info.duration_seconds,
                        self.upload_timeout,
                    )
                    .await
            }
            MediaFormat::Video => {
                self.client
                    .send_video(
                        job.conversation.0,
                        artifact,
                        &info.title,
                        info.duration_seconds,
                        info.width,
                        info.height,
                        self.upload_timeout,
                    )
                    .await
            }
        };
        result.map_err(upload_error)
    }

    async fn delete_status(&self, job: &Job) -> skachka_core::Result<()> {
        self.client
            .delete_message(job.conversation.0, job.status_message.0)
            .await
            .map_err(messaging_error)
    }
}
