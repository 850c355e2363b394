//! Process pool
//!
//! Runs each task in a separate, non-daemonic worker process. Capacity is a
//! fixed number of slots; each slot keeps at most one live worker and runs
//! one task at a time, taking submissions from a shared FIFO queue.
//!
//! ```text
//! submit() ──► [FIFO queue] ──► slot 0 ──► worker process (pgid = pid)
//!                          ├──► slot 1 ──► worker process
//!                          └──► slot N ──► ...
//! ```
//!
//! Shutdown is two-phased: [`ProcessPool::stop`] closes the queue and tells
//! every slot to terminate its worker; [`ProcessPool::join`] waits until every
//! worker has been reaped.

mod config;
mod platform;
mod process;
mod slot;

pub use config::{PoolConfig, WorkerCommand};
pub use platform::process_alive;

use crate::job::{JobArgs, JobRef};
use crate::protocol::WorkerRequest;
use crate::task::{CancelRequest, TaskHandle, TaskId};
use dashdeep_foundation::{Error, Result};
use serde::Serialize;
use slot::Slot;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub(crate) struct Submission {
    pub(crate) handle: TaskHandle,
    pub(crate) request: WorkerRequest,
}

pub(crate) struct PoolShared {
    pub(crate) queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Submission>>,
    pub(crate) stop_rx: watch::Receiver<bool>,
    pub(crate) config: PoolConfig,
}

impl PoolShared {
    pub(crate) fn is_stopping(&self) -> bool {
        *self.stop_rx.borrow()
    }
}

struct SubmitSide {
    sender: Option<mpsc::UnboundedSender<Submission>>,
    next_id: u64,
}

/// Summary of a completed pool shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Worker processes started over the pool's lifetime
    pub workers_spawned: usize,

    /// Tasks moved to `Cancelled` because the pool stopped
    pub cancelled_on_shutdown: usize,

    /// Workers that ignored SIGTERM and were killed
    pub force_killed: usize,

    /// Workers that could not be confirmed dead
    pub timed_out: Vec<u32>,
}

impl ShutdownReport {
    /// Every worker was confirmed dead
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }

    fn merge(&mut self, other: ShutdownReport) {
        self.workers_spawned += other.workers_spawned;
        self.cancelled_on_shutdown += other.cancelled_on_shutdown;
        self.force_killed += other.force_killed;
        self.timed_out.extend(other.timed_out);
    }
}

/// Pool of worker processes, one task per worker at a time
pub struct ProcessPool {
    submit: parking_lot::Mutex<SubmitSide>,
    stop_tx: watch::Sender<bool>,
    slots: parking_lot::Mutex<Vec<JoinHandle<ShutdownReport>>>,
    joined: OnceCell<ShutdownReport>,
    config: PoolConfig,
}

impl ProcessPool {
    /// Create a pool and start its slots. Must be called inside a Tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("Process pool needs a Tokio runtime: {}", e)))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::new(PoolShared {
            queue: tokio::sync::Mutex::new(receiver),
            stop_rx,
            config: config.clone(),
        });

        let slots = (0..config.max_workers)
            .map(|index| runtime.spawn(Slot::new(index, shared.clone()).run()))
            .collect();

        info!(
            max_workers = config.max_workers,
            tasks_per_worker = config.tasks_per_worker_before_restart,
            "Process pool started"
        );

        Ok(Self {
            submit: parking_lot::Mutex::new(SubmitSide {
                sender: Some(sender),
                next_id: 0,
            }),
            stop_tx,
            slots: parking_lot::Mutex::new(slots),
            joined: OnceCell::new(),
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether `submit` still accepts work
    pub fn is_accepting(&self) -> bool {
        self.submit.lock().sender.is_some()
    }

    /// Enqueue a job. Ids are assigned in submission order.
    pub fn submit(&self, job: &JobRef, args: JobArgs) -> Result<TaskHandle> {
        let mut side = self.submit.lock();
        let sender = side
            .sender
            .as_ref()
            .ok_or_else(|| Error::scheduling("process pool is shut down"))?;

        let id = TaskId(side.next_id);
        let handle = TaskHandle::new(id, job.name());
        let submission = Submission {
            handle: handle.clone(),
            request: WorkerRequest {
                task_id: id.0,
                job: job.name().to_string(),
                args,
            },
        };

        sender
            .send(submission)
            .map_err(|_| Error::scheduling("process pool is shut down"))?;
        side.next_id += 1;

        debug!(task = %id, job = %job, "Task queued");
        Ok(handle)
    }

    /// Cancel a task of this pool; see [`TaskHandle::request_cancel`]
    pub fn cancel(&self, handle: &TaskHandle) -> Result<CancelRequest> {
        handle.request_cancel()
    }

    /// Stop accepting work and tell every slot to wind down. Returns at once.
    pub fn stop(&self) {
        if self.submit.lock().sender.take().is_some() {
            info!("Process pool stopping");
        }
        self.stop_tx.send_replace(true);
    }

    /// Stop the pool if still accepting, then wait until every slot finished
    /// and every worker was reaped.
    /// Safe to call repeatedly and concurrently; later calls get the same report.
    pub async fn join(&self) -> ShutdownReport {
        // Slots only exit once the queue closes
        self.stop();
        self.joined
            .get_or_init(|| async {
                let slots = std::mem::take(&mut *self.slots.lock());
                let mut report = ShutdownReport::default();

                for result in futures::future::join_all(slots).await {
                    match result {
                        Ok(slot_report) => report.merge(slot_report),
                        Err(e) => error!("Pool slot failed: {}", e),
                    }
                }

                info!(
                    workers = report.workers_spawned,
                    cancelled = report.cancelled_on_shutdown,
                    killed = report.force_killed,
                    "Process pool joined"
                );
                report
            })
            .await
            .clone()
    }

    /// Same as `join`
    pub async fn shutdown(&self) -> ShutdownReport {
        self.join().await
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPool")
            .field("max_workers", &self.config.max_workers)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
