use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    config::Config,
    dispatch::JobRunner,
    error::{Result, SkachkaError},
    job::{FetchAttempt, Job, JobStatus, MediaFormat, MediaInfo},
    sink::DeliverySink,
    size_guard::{self, SizeCheck},
    source::{FetchTarget, MediaSource},
    workspace::{Workspace, WorkspaceManager},
};

/// Drives one job end-to-end: metadata probe, fetch ladder, size check,
/// delivery. Stages run strictly in order; the workspace is released on
/// every exit path.
pub struct Pipeline {
    source: Arc<dyn MediaSource>,
    sink: Arc<dyn DeliverySink>,
    workspaces: WorkspaceManager,
    config: Config,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MediaSource>,
        sink: Arc<dyn DeliverySink>,
        workspaces: WorkspaceManager,
        config: Config,
    ) -> Self {
        Self {
            source,
            sink,
            workspaces,
            config,
        }
    }

    /// Run `job` to a terminal state. `Ok` means the media was delivered;
    /// the caller owns reporting errors to the user.
    pub async fn run(&self, job: &Job) -> Result<()> {
        let mut status = JobStatus::Created;
        info!(
            job = %job.id,
            url = %job.url,
            format = job.format.as_str(),
            "job started"
        );

        let result = self.execute(job, &mut status).await;
        if let Err(e) = &result {
            self.transition(job, &mut status, JobStatus::Failed);
            info!(job = %job.id, "job failed: {e}");
        }
        result
    }

    async fn execute(&self, job: &Job, status: &mut JobStatus) -> Result<()> {
        self.status_best_effort(job, "Fetching media info...").await;
        let info = self.probe_with_retry(job).await?;
        self.transition(job, status, JobStatus::MetadataFetched);

        let mut workspace = self.workspaces.acquire(job.id)?;
        let result = self
            .fetch_and_deliver(job, status, &info, &workspace)
            .await;
        if let Err(e) = workspace.release() {
            warn!(job = %job.id, "workspace cleanup failed: {e}");
        }
        result
    }

    async fn fetch_and_deliver(
        &self,
        job: &Job,
        status: &mut JobStatus,
        info: &MediaInfo,
        workspace: &Workspace,
    ) -> Result<()> {
        let ceiling = self.config.size_ceiling_bytes;
        let targets = self.targets(job.format);
        let mut last_size = 0;

        for target in targets {
            self.transition(
                job,
                status,
                JobStatus::Downloading {
                    ceiling: target.height_ceiling(),
                },
            );
            self.status_best_effort(job, "Downloading...").await;

            let attempt = self.fetch_with_retry(job, target, workspace).await?;
            self.transition(job, status, JobStatus::SizeChecked);

            match size_guard::check(&attempt.path, ceiling)? {
                SizeCheck::Ok(size) => {
                    debug!(job = %job.id, size, "artifact fits the delivery ceiling");
                    self.transition(job, status, JobStatus::Delivering);
                    self.status_best_effort(job, "Uploading...").await;

                    self.sink.send_media(job, &attempt.path, info).await?;
                    if let Err(e) = self.sink.delete_status(job).await {
                        warn!(job = %job.id, "could not delete the status message: {e}");
                    }
                    self.transition(job, status, JobStatus::Delivered);
                    info!(job = %job.id, size, "job delivered");
                    return Ok(());
                }
                SizeCheck::TooLarge(size) => {
                    warn!(
                        job = %job.id,
                        size,
                        ceiling,
                        quality = ?attempt.quality_ceiling,
                        "artifact over the ceiling"
                    );
                    last_size = size;
                    // only the last attempt's artifact may stay on disk
                    if let Err(e) = tokio::fs::remove_file(&attempt.path).await {
                        warn!(job = %job.id, "could not drop oversized artifact: {e}");
                    }
                }
            }
        }

        Err(SkachkaError::TooLarge {
            size: last_size,
            ceiling,
        })
    }

    /// The fixed descending ladder for video; audio has a single target.
    fn targets(&self, format: MediaFormat) -> Vec<FetchTarget> {
        match format {
            MediaFormat::Video => self
                .config
                .video_height_ladder
                .iter()
                .map(|height| FetchTarget::Video {
                    height_ceiling: *height,
                })
                .collect(),
            MediaFormat::Audio => vec![FetchTarget::Audio],
        }
    }

    async fn probe_with_retry(&self, job: &Job) -> Result<MediaInfo> {
        match self.source.probe(&job.url).await {
            Err(e) if e.is_transient() => {
                warn!(job = %job.id, "metadata probe failed, retrying once: {e}");
                self.source.probe(&job.url).await
            }
            other => other,
        }
    }

    /// One transient retry per attempt; it repeats the same target and
    /// never consumes a ladder step.
    async fn fetch_with_retry(
        &self,
        job: &Job,
        target: FetchTarget,
        workspace: &Workspace,
    ) -> Result<FetchAttempt> {
        match self.source.fetch(&job.url, target, workspace).await {
            Err(e) if e.is_transient() => {
                warn!(job = %job.id, "fetch attempt failed, retrying once: {e}");
                self.source.fetch(&job.url, target, workspace).await
            }
            other => other,
        }
    }

    fn transition(&self, job: &Job, status: &mut JobStatus, next: JobStatus) {
        debug!(job = %job.id, from = ?status, to = ?next, "state transition");
        status.advance(next);
    }

    /// Progress text is cosmetic; a failed update never fails the job.
    async fn status_best_effort(&self, job: &Job, text: &str) {
        if let Err(e) = self.sink.send_status(job, text).await {
            warn!(job = %job.id, "status update failed: {e}");
        }
    }
}

#[async_trait::async_trait]
impl JobRunner for Pipeline {
    async fn run_job(&self, job: Job) -> Result<()> {
        self.run(&job).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        path::PathBuf,
        sync::Mutex,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::job::{ConversationRef, FetchAttempt, MessageRef};

    /// Scripted stand-in for yt-dlp: each fetch call consumes one step.
    enum FetchStep {
        /// Write an artifact of this many bytes and succeed.
        Artifact(u64),
        Transient,
        ToolError,
    }

    struct ScriptedSource {
        probe_results: Mutex<VecDeque<Result<MediaInfo>>>,
        fetch_script: Mutex<VecDeque<FetchStep>>,
        fetch_targets: Mutex<Vec<Option<u32>>>,
    }

    impl ScriptedSource {
        fn new(
            probe_results: Vec<Result<MediaInfo>>,
            fetch_script: Vec<FetchStep>,
        ) -> Self {
            Self {
                probe_results: Mutex::new(probe_results.into()),
                fetch_script: Mutex::new(fetch_script.into()),
                fetch_targets: Mutex::new(Vec::new()),
            }
        }

        fn recorded_targets(&self) -> Vec<Option<u32>> {
            self.fetch_targets.lock().unwrap().clone()
        }

        fn info() -> MediaInfo {
            MediaInfo {
                title: "Ten minute video".to_string(),
                duration_seconds: 600,
                width: Some(1280),
                height: Some(720),
            }
        }
    }

    #[async_trait::async_trait]
    impl MediaSource for ScriptedSource {
        async fn probe(&self, _url: &str) -> Result<MediaInfo> {
            self.probe_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Self::info()))
        }

        async fn fetch(
            &self,
            _url: &str,
            target: FetchTarget,
            workspace: &Workspace,
        ) -> Result<FetchAttempt> {
            self.fetch_targets
                .lock()
                .unwrap()
                .push(target.height_ceiling());
            let step = self
                .fetch_script
                .lock()
                .unwrap()
                .pop_front()
                .expect("fetch called more often than scripted");
            match step {
                FetchStep::Artifact(bytes) => {
                    let path = workspace.dir().join("media.mp4");
                    std::fs::write(&path, vec![0u8; bytes as usize]).unwrap();
                    Ok(FetchAttempt {
                        quality_ceiling: target.height_ceiling(),
                        path,
                        byte_size: bytes,
                    })
                }
                FetchStep::Transient => Err(SkachkaError::Transient {
                    reason: "scripted transient".to_string(),
                }),
                FetchStep::ToolError => Err(SkachkaError::Restricted {
                    reason: "scripted tool error".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        statuses: Mutex<Vec<String>>,
        media: Mutex<Vec<(PathBuf, MediaInfo)>>,
        deletes: AtomicUsize,
        fail_uploads: bool,
    }

    #[async_trait::async_trait]
    impl DeliverySink for RecordingSink {
        async fn send_status(&self, _job: &Job, text: &str) -> Result<()> {
            self.statuses.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_media(
            &self,
            _job: &Job,
            artifact: &std::path::Path,
            info: &MediaInfo,
        ) -> Result<()> {
            if self.fail_uploads {
                return Err(SkachkaError::Upload {
                    reason: "scripted upload failure".to_string(),
                    timed_out: true,
                });
            }
            self.media
                .lock()
                .unwrap()
                .push((artifact.to_path_buf(), info.clone()));
            Ok(())
        }

        async fn delete_status(&self, _job: &Job) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Setup {
        pipeline: Pipeline,
        source: Arc<ScriptedSource>,
        sink: Arc<RecordingSink>,
        root: tempfile::TempDir,
    }

    fn setup(source: ScriptedSource, sink: RecordingSink) -> Setup {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(source);
        let sink = Arc::new(sink);
        let config = Config {
            size_ceiling_bytes: 100,
            video_height_ladder: vec![720, 480],
            ..Config::default()
        };
        let pipeline = Pipeline::new(
            source.clone(),
            sink.clone(),
            WorkspaceManager::new(root.path()),
            config,
        );
        Setup {
            pipeline,
            source,
            sink,
            root,
        }
    }

    fn video_job() -> Job {
        Job::new(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            MediaFormat::Video,
            ConversationRef(7),
            MessageRef(42),
        )
    }

    fn workspace_is_empty(setup: &Setup, job: &Job) -> bool {
        !setup.root.path().join(job.id.to_string()).exists()
    }

    #[tokio::test]
    async fn first_ladder_step_under_ceiling_delivers_without_a_second_fetch() {
        let setup = setup(
            ScriptedSource::new(vec![], vec![FetchStep::Artifact(90)]),
            RecordingSink::default(),
        );
        let job = video_job();

        setup.pipeline.run(&job).await.unwrap();

        assert_eq!(setup.source.recorded_targets(), vec![Some(720)]);
        let media = setup.sink.media.lock().unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].1.title, "Ten minute video");
        assert_eq!(media[0].1.duration_seconds, 600);
        assert_eq!(setup.sink.deletes.load(Ordering::SeqCst), 1);
        assert!(workspace_is_empty(&setup, &job));
    }

    #[tokio::test]
    async fn oversized_video_walks_the_ladder_exactly_once_then_fails_too_large() {
        let setup = setup(
            ScriptedSource::new(
                vec![],
                vec![FetchStep::Artifact(150), FetchStep::Artifact(120)],
            ),
            RecordingSink::default(),
        );
        let job = video_job();

        let err = setup.pipeline.run(&job).await.unwrap_err();

        assert!(matches!(
            err,
            SkachkaError::TooLarge {
                size: 120,
                ceiling: 100
            }
        ));
        assert_eq!(setup.source.recorded_targets(), vec![Some(720), Some(480)]);
        assert!(setup.sink.media.lock().unwrap().is_empty());
        assert!(workspace_is_empty(&setup, &job));
    }

    #[tokio::test]
    async fn second_ladder_step_can_still_deliver() {
        let setup = setup(
            ScriptedSource::new(
                vec![],
                vec![FetchStep::Artifact(150), FetchStep::Artifact(80)],
            ),
            RecordingSink::default(),
        );
        let job = video_job();

        setup.pipeline.run(&job).await.unwrap();
        assert_eq!(setup.source.recorded_targets(), vec![Some(720), Some(480)]);
        assert_eq!(setup.sink.media.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restricted_probe_never_invokes_the_fetcher() {
        let setup = setup(
            ScriptedSource::new(
                vec![Err(SkachkaError::Restricted {
                    reason: "private".to_string(),
                })],
                vec![],
            ),
            RecordingSink::default(),
        );
        let job = video_job();

        let err = setup.pipeline.run(&job).await.unwrap_err();
        assert!(matches!(err, SkachkaError::Restricted { .. }));
        assert!(setup.source.recorded_targets().is_empty());
    }

    #[tokio::test]
    async fn transient_fetch_is_retried_once_without_consuming_a_ladder_step() {
        let setup = setup(
            ScriptedSource::new(
                vec![],
                vec![FetchStep::Transient, FetchStep::Artifact(90)],
            ),
            RecordingSink::default(),
        );
        let job = video_job();

        setup.pipeline.run(&job).await.unwrap();
        // same ceiling both times: the retry repeats the attempt
        assert_eq!(setup.source.recorded_targets(), vec![Some(720), Some(720)]);
    }

    #[tokio::test]
    async fn transient_probe_is_retried_once() {
        let setup = setup(
            ScriptedSource::new(
                vec![
                    Err(SkachkaError::Transient {
                        reason: "flaky".to_string(),
                    }),
                    Ok(ScriptedSource::info()),
                ],
                vec![FetchStep::Artifact(90)],
            ),
            RecordingSink::default(),
        );

        setup.pipeline.run(&video_job()).await.unwrap();
        assert_eq!(setup.sink.media.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_audio_has_no_ladder_and_fails_terminally() {
        let setup = setup(
            ScriptedSource::new(vec![], vec![FetchStep::Artifact(150)]),
            RecordingSink::default(),
        );
        let job = Job::new(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            MediaFormat::Audio,
            ConversationRef(7),
            MessageRef(42),
        );

        let err = setup.pipeline.run(&job).await.unwrap_err();
        assert!(matches!(err, SkachkaError::TooLarge { .. }));
        assert_eq!(setup.source.recorded_targets(), vec![None]);
        assert!(workspace_is_empty(&setup, &job));
    }

    #[tokio::test]
    async fn upload_failure_surfaces_and_still_cleans_the_workspace() {
        let setup = setup(
            ScriptedSource::new(vec![], vec![FetchStep::Artifact(90)]),
            RecordingSink {
                fail_uploads: true,
                ..RecordingSink::default()
            },
        );
        let job = video_job();

        let err = setup.pipeline.run(&job).await.unwrap_err();
        assert!(matches!(err, SkachkaError::Upload { timed_out: true, .. }));
        assert_eq!(setup.sink.deletes.load(Ordering::SeqCst), 0);
        assert!(workspace_is_empty(&setup, &job));
    }

    #[tokio::test]
    async fn tool_error_during_fetch_cleans_the_workspace() {
        let setup = setup(
            ScriptedSource::new(vec![], vec![FetchStep::ToolError]),
            RecordingSink::default(),
        );
        let job = video_job();

        let err = setup.pipeline.run(&job).await.unwrap_err();
        assert!(matches!(err, SkachkaError::Restricted { .. }));
        assert!(workspace_is_empty(&setup, &job));
    }
}
