//! Job queue - dispatches batch runs to a single background worker
//!
//! Triggers enqueue a job and get its id back immediately. One worker drains
//! the queue, so runs never write the sinks concurrently. Each job carries a
//! `watch` channel with its status:
//!
//! `queued -> running -> completed(report) | failed(error)`
//!
//! Callers can await a [`JobHandle`] or look the job up later by id. The
//! registry keeps every pending job plus the most recent finished ones.

use crate::domain::types::RunMode;
use crate::infra::metrics::Metrics;
use crate::services::pipeline::{Pipeline, RunReport};
use crate::services::run_guard::{RunGuard, RunPermit};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

/// Finished jobs kept for status lookups
pub const MAX_FINISHED_JOBS: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed { report: RunReport },
    Failed { error: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed { .. } => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

/// Why a trigger was not dispatched
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("a run for the window starting {0} is already queued or running")]
    AlreadyRunning(DateTime<Utc>),

    #[error("job queue is full")]
    QueueFull,

    #[error("job worker has stopped")]
    Closed,
}

/// A run waiting for the worker
#[derive(Debug)]
struct Job {
    id: Uuid,
    mode: RunMode,
    since: DateTime<Utc>,
    permit: RunPermit,
    status_tx: watch::Sender<JobStatus>,
    enqueued_at: Instant,
}

/// Caller's view of a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    status_rx: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status_rx.borrow().clone()
    }

    /// Wait until the job completes or fails
    pub async fn wait(mut self) -> JobStatus {
        loop {
            let status = self.status_rx.borrow_and_update().clone();
            if status.is_finished() {
                return status;
            }
            if self.status_rx.changed().await.is_err() {
                // Worker dropped the job without reporting
                let last = self.status_rx.borrow().clone();
                if last.is_finished() {
                    return last;
                }
                return JobStatus::Failed { error: "job dropped before completion".to_string() };
            }
        }
    }
}

/// Submission side of the queue; cheap to clone
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    guard: RunGuard,
    registry: Arc<Mutex<BTreeMap<Uuid, watch::Receiver<JobStatus>>>>,
    metrics: Arc<Metrics>,
}

impl JobQueue {
    /// Enqueue a run over the window starting at `since`
    pub fn submit(&self, mode: RunMode, since: DateTime<Utc>) -> Result<JobHandle, DispatchError> {
        let Some(permit) = self.guard.try_acquire(since) else {
            self.metrics.record_run_rejected();
            warn!(mode = %mode.as_str(), since = %since, "job_rejected_duplicate");
            return Err(DispatchError::AlreadyRunning(since));
        };

        let id = Uuid::now_v7();
        let (status_tx, status_rx) = watch::channel(JobStatus::Queued);
        let job = Job { id, mode, since, permit, status_tx, enqueued_at: Instant::now() };

        // A rejected job is dropped here, releasing its permit
        if let Err(e) = self.tx.try_send(job) {
            let err = match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            };
            warn!(mode = %mode.as_str(), since = %since, error = %err, "job_not_dispatched");
            return Err(err);
        }

        {
            let mut registry = self.registry.lock();
            registry.insert(id, status_rx.clone());
            prune_finished(&mut registry, MAX_FINISHED_JOBS);
        }

        info!(job_id = %id, mode = %mode.as_str(), since = %since, "job_queued");
        Ok(JobHandle { id, status_rx })
    }

    /// Current status of a known job
    pub fn status(&self, id: &Uuid) -> Option<JobStatus> {
        self.registry.lock().get(id).map(|rx| rx.borrow().clone())
    }

    /// Jobs queued or running right now
    pub fn pending(&self) -> usize {
        self.registry.lock().values().filter(|rx| !rx.borrow().is_finished()).count()
    }

    /// Run windows currently claimed by a queued or running job
    pub fn windows_held(&self) -> usize {
        self.guard.held()
    }
}

/// Drop the oldest finished jobs beyond `keep`; ids are time-ordered (UUIDv7)
fn prune_finished(registry: &mut BTreeMap<Uuid, watch::Receiver<JobStatus>>, keep: usize) {
    let finished: Vec<Uuid> = registry
        .iter()
        .filter(|(_, rx)| rx.borrow().is_finished())
        .map(|(id, _)| *id)
        .collect();

    if finished.len() > keep {
        for id in &finished[..finished.len() - keep] {
            registry.remove(id);
        }
    }
}

/// Worker that runs queued jobs one at a time
pub struct JobWorker {
    pipeline: Arc<Pipeline>,
    rx: mpsc::Receiver<Job>,
}

impl JobWorker {
    /// Run the worker until shutdown is signalled or every queue handle is dropped
    ///
    /// A run in progress is finished first. Jobs still queued at shutdown are
    /// failed and the queue is closed to new submissions.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(sinks = ?self.pipeline.sink_names(), "job_worker_started");

        loop {
            let job = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.process(job).await;
        }

        self.abandon_queued();
        info!("job_worker_stopped");
    }

    async fn process(&self, job: Job) {
        let Job { id, mode, since, permit, status_tx, enqueued_at } = job;
        let queue_delay_ms = enqueued_at.elapsed().as_millis() as u64;

        status_tx.send_replace(JobStatus::Running);
        info!(job_id = %id, mode = %mode.as_str(), queue_delay_ms = %queue_delay_ms, "job_started");

        let status = match self.pipeline.run_with_id(id, mode, since).await {
            Ok(report) => JobStatus::Completed { report },
            Err(e) => JobStatus::Failed { error: e.to_string() },
        };

        // Free the window before announcing completion so a waiter can resubmit it
        drop(permit);
        info!(job_id = %id, status = %status.as_str(), "job_finished");
        status_tx.send_replace(status);
    }

    fn abandon_queued(&mut self) {
        self.rx.close();
        while let Ok(job) = self.rx.try_recv() {
            warn!(job_id = %job.id, mode = %job.mode.as_str(), since = %job.since, "job_abandoned");
            job.status_tx.send_replace(JobStatus::Failed {
                error: "worker shut down before the job started".to_string(),
            });
        }
    }
}

/// Create a job queue and its worker
///
/// Returns the queue (for triggers) and the worker (to be spawned)
pub fn create_job_queue(
    pipeline: Arc<Pipeline>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (JobQueue, JobWorker) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let queue = JobQueue {
        tx,
        guard: RunGuard::new(),
        registry: Arc::new(Mutex::new(BTreeMap::new())),
        metrics,
    };
    (queue, JobWorker { pipeline, rx })
}
