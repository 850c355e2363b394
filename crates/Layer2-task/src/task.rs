//! Task handle: identity, state and outcome of one scheduled job
//!
//! A handle is shared between the pool (sole writer) and any number of
//! readers. Reads never block; `wait` is the only way to suspend on a task.

use crate::state::{TaskFailure, TaskState};
use chrono::{DateTime, Utc};
use dashdeep_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::debug;

/// Identifier of a task, assigned in submission order starting at 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time copy of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,

    /// Job name the task runs
    pub job: String,

    /// Current state
    pub state: TaskState,

    /// Worker process assigned to the task, once started
    pub pid: Option<u32>,

    /// Set once a cancel was requested for a running task
    pub cancel_requested: bool,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,

    /// When a worker picked the task up
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Get execution duration if task has started
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }
}

/// What a cancel request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    /// Task had not started; it is now cancelled and will never run
    Dequeued,
    /// Task is running; its worker will be terminated
    Signalled,
}

struct HandleInner {
    id: TaskId,
    job: String,
    state: watch::Sender<TaskSnapshot>,
    cancel: Notify,
}

/// Shared handle to a scheduled task
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, job: impl Into<String>) -> Self {
        let job = job.into();
        let (state, _) = watch::channel(TaskSnapshot {
            id,
            job: job.clone(),
            state: TaskState::Pending,
            pid: None,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        });

        Self {
            inner: Arc::new(HandleInner {
                id,
                job,
                state,
                cancel: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn job(&self) -> &str {
        &self.inner.job
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn state(&self) -> TaskState {
        self.inner.state.borrow().state.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.state.borrow().state.is_terminal()
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.state.borrow().pid
    }

    /// Result value if the task finished. Never blocks.
    pub fn result(&self) -> Option<serde_json::Value> {
        self.inner.state.borrow().state.result().cloned()
    }

    /// Captured failure if the task failed. Never blocks.
    pub fn failure(&self) -> Option<TaskFailure> {
        self.inner.state.borrow().state.failure().cloned()
    }

    /// Wait until the task reaches a terminal state
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.inner.state.subscribe();
        let state = match rx.wait_for(|snapshot| snapshot.state.is_terminal()).await {
            Ok(snapshot) => snapshot.state.clone(),
            // The sender lives as long as `self`, so this is unreachable in practice
            Err(_) => self.state(),
        };
        state
    }

    /// Request cancellation.
    ///
    /// A pending task becomes `Cancelled` immediately. A running task is
    /// flagged and its worker is terminated by the pool. A terminal task is
    /// left untouched and an `InvalidState` error is returned.
    pub fn request_cancel(&self) -> Result<CancelRequest> {
        let mut outcome = Err(Error::invalid_state(format!(
            "task {} is already terminal",
            self.inner.id
        )));

        self.inner.state.send_if_modified(|snapshot| match snapshot.state {
            TaskState::Pending => {
                snapshot.state = TaskState::Cancelled;
                snapshot.completed_at = Some(Utc::now());
                outcome = Ok(CancelRequest::Dequeued);
                true
            }
            TaskState::Running => {
                outcome = Ok(CancelRequest::Signalled);
                if snapshot.cancel_requested {
                    false
                } else {
                    snapshot.cancel_requested = true;
                    true
                }
            }
            _ => false,
        });

        if let Ok(CancelRequest::Signalled) = outcome {
            self.inner.cancel.notify_one();
        }
        outcome
    }

    /// Resolves once cancellation of the running task was requested
    pub(crate) async fn cancellation(&self) {
        self.inner.cancel.notified().await
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.inner.state.borrow().cancel_requested
    }

    /// Mark the task as running on `pid`. Fails if the task left `Pending`.
    pub(crate) fn start(&self, pid: Option<u32>) -> bool {
        self.transition(TaskState::Running, pid)
    }

    /// Move the task to a terminal state. Fails if it is already terminal.
    pub(crate) fn finish(&self, state: TaskState) -> bool {
        debug_assert!(state.is_terminal());
        self.transition(state, None)
    }

    fn transition(&self, next: TaskState, pid: Option<u32>) -> bool {
        let id = self.inner.id;
        self.inner.state.send_if_modified(|snapshot| {
            if !snapshot.state.can_transition_to(&next) {
                debug!(task = %id, from = %snapshot.state, to = %next, "Ignoring transition");
                return false;
            }

            let now = Utc::now();
            if next.is_running() {
                snapshot.started_at = Some(now);
                snapshot.pid = pid;
            } else {
                snapshot.completed_at = Some(now);
            }
            snapshot.state = next;
            true
        })
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.state.borrow();
        f.debug_struct("TaskHandle")
            .field("id", &snapshot.id)
            .field("job", &snapshot.job)
            .field("state", &snapshot.state)
            .field("pid", &snapshot.pid)
            .finish()
    }
}
