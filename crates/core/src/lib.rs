pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod sink;
pub mod size_guard;
pub mod source;
pub mod workspace;
pub mod ytdlp;

pub use config::Config;
pub use dispatch::{Dispatcher, JobRunner, SubmitOutcome};
pub use error::{Result, SkachkaError};
pub use job::{
    ConversationRef, FetchAttempt, Job, JobStatus, MediaFormat, MediaInfo, MessageRef,
};
pub use pipeline::Pipeline;
pub use sink::DeliverySink;
pub use size_guard::SizeCheck;
pub use source::{FetchTarget, MediaSource};
pub use workspace::{Workspace, WorkspaceManager};
pub use ytdlp::YtDlpSource;
