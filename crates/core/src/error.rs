use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkachkaError {
    #[error("no media found at {url}")]
    NotFound { url: String },

    #[error("media is restricted: {reason}")]
    Restricted { reason: String },

    #[error("transient failure: {reason}")]
    Transient { reason: String },

    #[error("artifact is {size} bytes, delivery ceiling is {ceiling}")]
    TooLarge { size: u64, ceiling: u64 },

    #[error("upload failed: {reason}")]
    Upload { reason: String, timed_out: bool },

    #[error("internal fault: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SkachkaError {
    /// Transient failures get one automatic retry; everything else is
    /// surfaced as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Text reported to the requesting user when the job ends in this
    /// error.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { .. } => {
                "That doesn't look like a link I can fetch. Please check the URL and send it again."
                    .to_string()
            }
            Self::Restricted { .. } => {
                "This media can't be fetched: it appears to be private, age-restricted or otherwise unavailable."
                    .to_string()
            }
            Self::Transient { .. } => {
                "The download service had a hiccup. Please try again in a moment.".to_string()
            }
            Self::TooLarge { ceiling, .. } => format!(
                "The resulting file is over {} MiB even at the lowest quality and cannot be sent. Try a shorter video.",
                ceiling / (1024 * 1024)
            ),
            Self::Upload { timed_out: true, .. } => {
                "Uploading the file timed out. Please send the same request again.".to_string()
            }
            Self::Upload { .. } => {
                "Uploading the file failed. Please send the same request again.".to_string()
            }
            Self::Internal(_) | Self::Io(_) | Self::Json(_) => {
                "Something went wrong on my side. Please try again.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SkachkaError>;
