use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversation the request came from. Opaque to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationRef(pub i64);

/// Status/progress message the front end created for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Audio,
    Video,
}

impl MediaFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Audio => "audio",
            MediaFormat::Video => "video",
        }
    }
}

/// One user-initiated request to acquire and deliver a single media item.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub format: MediaFormat,
    pub conversation: ConversationRef,
    pub status_message: MessageRef,
}

impl Job {
    pub fn new(
        url: impl Into<String>,
        format: MediaFormat,
        conversation: ConversationRef,
        status_message: MessageRef,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            format,
            conversation,
            status_message,
        }
    }

    /// Key identifying the pending selection this job answers. At most one
    /// job per key may be in flight at a time.
    pub fn selection_key(&self) -> (ConversationRef, MessageRef) {
        (self.conversation, self.status_message)
    }
}

/// What the extraction adapter learned about the item without downloading
/// any media bytes. Missing duration or dimensions are not fatal; the item
/// is delivered with defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub duration_seconds: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Outcome of one download invocation of the external tool.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    /// Height ceiling the attempt was capped at; `None` for audio.
    pub quality_ceiling: Option<u32>,
    pub path: PathBuf,
    pub byte_size: u64,
}

/// Per-job pipeline state. Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    MetadataFetched,
    Downloading { ceiling: Option<u32> },
    SizeChecked,
    Delivering,
    Delivered,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Delivered | JobStatus::Failed)
    }

    /// Move to `next`. Terminal states are final.
    pub fn advance(&mut self, next: JobStatus) {
        debug_assert!(!self.is_terminal(), "no transitions leave {self:?}");
        *self = next;
    }
}
