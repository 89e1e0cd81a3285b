use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tracing::{error, info, warn};

use crate::{
    error::{Result, SkachkaError},
    job::{ConversationRef, Job, MessageRef},
    sink::DeliverySink,
};

/// Answer to a submission. The dispatcher never blocks the caller beyond
/// trivial bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// Workers and queue are full; the user should retry later.
    Busy,
    /// A job for the same pending selection is already in flight.
    Duplicate,
}

/// One job executed end-to-end on a worker.
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: Job) -> Result<()>;
}

type SelectionKey = (ConversationRef, MessageRef);

/// Bounded worker pool draining a bounded job queue. The request-serving
/// front end only calls `submit` and returns; pipeline code never runs on
/// its task.
#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::Sender<Job>,
    in_flight: Arc<Mutex<HashSet<SelectionKey>>>,
    active: Arc<AtomicUsize>,
    shutdown: broadcast::Sender<()>,
}

impl Dispatcher {
    /// Start `workers` workers over a queue of `queue_capacity` waiting
    /// slots.
    pub fn start(
        runner: Arc<dyn JobRunner>,
        sink: Arc<dyn DeliverySink>,
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        assert!(workers > 0);
        let (queue, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let (shutdown, _) = broadcast::channel(1);
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let active = Arc::new(AtomicUsize::new(0));

        for worker_id in 0..workers {
            tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&runner),
                Arc::clone(&sink),
                Arc::clone(&in_flight),
                Arc::clone(&active),
                shutdown.subscribe(),
            ));
        }

        Self {
            queue,
            in_flight,
            active,
            shutdown,
        }
    }

    /// Admit a job without blocking. Duplicate selections and a full queue
    /// are rejected, never queued twice or queued unboundedly.
    pub fn submit(&self, job: Job) -> SubmitOutcome {
        let key = job.selection_key();
        {
            let mut in_flight = self.in_flight.lock().expect("in_flight poisoned");
            if !in_flight.insert(key) {
                return SubmitOutcome::Duplicate;
            }
        }

        // counted before the send: a worker may finish the job (and
        // decrement) before this call returns
        self.active.fetch_add(1, Ordering::SeqCst);
        match self.queue.try_send(job) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(_) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.in_flight
                    .lock()
                    .expect("in_flight poisoned")
                    .remove(&key);
                SubmitOutcome::Busy
            }
        }
    }

    /// Jobs admitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop the workers. Queued jobs are dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    runner: Arc<dyn JobRunner>,
    sink: Arc<dyn DeliverySink>,
    in_flight: Arc<Mutex<HashSet<SelectionKey>>>,
    active: Arc<AtomicUsize>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.recv() => return,
            job = recv_next(&queue) => match job {
                Some(job) => job,
                None => return,
            },
        };

        let key = job.selection_key();
        let job_id = job.id;

        // the job runs on its own task so that a panic anywhere inside the
        // pipeline is contained here instead of taking the worker down
        let handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            let job = job.clone();
            async move { runner.run_job(job).await }
        });

        let outcome = match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                error!(job = %job_id, worker = worker_id, "job task panicked: {join_err}");
                Err(SkachkaError::Internal(format!(
                    "job task panicked: {join_err}"
                )))
            }
        };

        // terminal failure is reported exactly once, from here; success
        // already reported itself through the delivery
        if let Err(e) = &outcome {
            if let Err(send_err) = sink.send_status(&job, &e.user_message()).await {
                warn!(job = %job_id, "could not report the failure to the user: {send_err}");
            }
        }

        in_flight
            .lock()
            .expect("in_flight poisoned")
            .remove(&key);
        active.fetch_sub(1, Ordering::SeqCst);
        info!(job = %job_id, worker = worker_id, ok = outcome.is_ok(), "job finished");
    }
}

async fn recv_next(queue: &AsyncMutex<mpsc::Receiver<Job>>) -> Option<Job> {
    queue.lock().await.recv().await
}
