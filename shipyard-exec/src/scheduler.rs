//! Fixed-size worker pool over an unbounded job queue.
//!
//! Each job runs in its own task so a panic is contained to that job; the
//! worker logs the failure and takes the next one. Jobs that carry a key are
//! serialized per key: while a job for key `k` is running, later `k` jobs wait
//! in that key's lane and run in submission order once it finishes, without
//! occupying another worker.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::ExecError;

pub type JobResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type JobFuture = Pin<Box<dyn Future<Output = JobResult> + Send>>;

/// A unit of pipeline work.
pub struct Job {
    pub label: String,
    pub key: Option<String>,
    future: JobFuture,
}

impl Job {
    pub fn new<F>(label: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = JobResult> + Send + 'static,
    {
        Self {
            label: label.into(),
            key: None,
            future: Box::pin(future),
        }
    }

    /// Serialize this job with every other job carrying the same key.
    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("label", &self.label)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

struct Shared {
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>,
    /// Keys with a running job, each with the jobs waiting behind it.
    lanes: Mutex<HashMap<String, VecDeque<Job>>>,
    pending: AtomicUsize,
    idle: Notify,
    /// Set once shutdown begins; workers stop draining lanes.
    stopping: AtomicBool,
}

impl Shared {
    fn lanes(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Job>>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Enqueue a job. Never blocks.
    pub fn schedule(&self, job: Job) -> Result<(), ExecError> {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let label = job.label.clone();
        if self.tx.send(job).is_err() {
            self.shared.finish();
            return Err(ExecError::SchedulerClosed { job: label });
        }
        debug!(job = %label, "job scheduled");
        Ok(())
    }

    /// Jobs submitted but not yet finished, including those waiting in a lane.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Resolve once every submitted job, including jobs those jobs submit,
    /// has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("pending", &self.pending())
            .finish()
    }
}

pub struct Scheduler {
    handle: SchedulerHandle,
    pool_size: usize,
    shutdown: broadcast::Sender<()>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn `pool_size` workers on the current runtime.
    pub fn start(pool_size: usize) -> Result<Self, ExecError> {
        if pool_size == 0 {
            return Err(ExecError::EmptyPool);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            queue: tokio::sync::Mutex::new(rx),
            lanes: Mutex::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            stopping: AtomicBool::new(false),
        });

        let workers = (0..pool_size)
            .map(|id| tokio::spawn(worker(id, shared.clone(), shutdown.subscribe())))
            .collect();
        info!(workers = pool_size, "scheduler started");

        Ok(Self {
            handle: SchedulerHandle { tx, shared },
            pool_size,
            shutdown,
            workers,
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Stop the workers. Running jobs finish; queued jobs are dropped and
    /// later submissions fail with [`ExecError::SchedulerClosed`].
    ///
    /// Dropped jobs count as finished, so `wait_idle` callers are released.
    pub async fn shutdown(self) {
        let shared = &self.handle.shared;
        shared.stopping.store(true, Ordering::Release);
        let _ = self.shutdown.send(());
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!(error = %err, "scheduler worker exited abnormally");
            }
        }

        let mut dropped = 0;
        {
            let mut queue = shared.queue.lock().await;
            queue.close();
            while queue.try_recv().is_ok() {
                dropped += 1;
            }
        }
        let lanes: Vec<_> = shared.lanes().drain().collect();
        for (_, lane) in lanes {
            dropped += lane.len();
        }
        for _ in 0..dropped {
            shared.finish();
        }
        info!(dropped, "scheduler stopped");
    }
}

async fn worker(id: usize, shared: Arc<Shared>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            job = async { shared.queue.lock().await.recv().await } => job,
        };
        let Some(job) = next else { break };

        let Some(key) = job.key.clone() else {
            run_job(id, job).await;
            shared.finish();
            continue;
        };

        {
            let mut lanes = shared.lanes();
            if let Some(lane) = lanes.get_mut(&key) {
                lane.push_back(job);
                continue;
            }
            lanes.insert(key.clone(), VecDeque::new());
        }

        // Drain the lane this worker now owns.
        let mut current = job;
        loop {
            run_job(id, current).await;
            shared.finish();
            if shared.stopping.load(Ordering::Acquire) {
                break;
            }
            let mut lanes = shared.lanes();
            match lanes.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(next) => current = next,
                None => {
                    lanes.remove(&key);
                    break;
                }
            }
        }
    }
    debug!(worker = id, "worker exiting");
}

async fn run_job(worker: usize, job: Job) {
    let Job { label, future, .. } = job;
    debug!(worker, job = %label, "job started");
    match tokio::spawn(future).await {
        Ok(Ok(())) => debug!(worker, job = %label, "job finished"),
        Ok(Err(err)) => error!(worker, job = %label, error = %err, "job failed"),
        Err(err) if err.is_panic() => error!(worker, job = %label, "job panicked"),
        Err(err) => error!(worker, job = %label, error = %err, "job cancelled"),
    }
}
