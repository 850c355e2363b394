//! Task Manager - schedules jobs onto the process pool and tracks every handle
//!
//! Features:
//! - Task lifecycle management (schedule, cancel, wait)
//! - Ordered registry of all handles for status display
//! - Idempotent shutdown that leaves no worker process behind

use crate::job::{JobArgs, JobRef, JobRegistry};
use crate::pool::{PoolConfig, ProcessPool, ShutdownReport};
use crate::projection::{self, TaskRecord};
use crate::state::TaskState;
use crate::task::{CancelRequest, TaskHandle, TaskId};
use dashdeep_foundation::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for task manager
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Process pool settings
    pub pool: PoolConfig,

    /// Jobs known to the workers. When set, scheduling an unknown job
    /// fails up front instead of inside the worker.
    pub jobs: Option<JobRegistry>,
}

impl TaskManagerConfig {
    pub fn new(pool: PoolConfig) -> Self {
        Self { pool, jobs: None }
    }

    pub fn with_jobs(mut self, jobs: JobRegistry) -> Self {
        self.jobs = Some(jobs);
        self
    }
}

/// Task Manager - handles task lifecycle and execution
#[derive(Clone)]
pub struct TaskManager {
    /// Worker processes
    pool: Arc<ProcessPool>,

    /// All tasks by ID, in submission order
    tasks: Arc<RwLock<BTreeMap<TaskId, TaskHandle>>>,

    /// Jobs accepted by `schedule`
    jobs: Option<Arc<JobRegistry>>,

    /// Set once shutdown started
    shut_down: Arc<AtomicBool>,
}

impl TaskManager {
    /// Create a new task manager. Must be called inside a Tokio runtime.
    pub fn new(config: TaskManagerConfig) -> Result<Self> {
        let pool = ProcessPool::new(config.pool)?;

        Ok(Self {
            pool: Arc::new(pool),
            tasks: Arc::new(RwLock::new(BTreeMap::new())),
            jobs: config.jobs.map(Arc::new),
            shut_down: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Schedule `job` with `args`. Returns at once with a pending handle.
    pub fn schedule(&self, job: impl Into<JobRef>, args: JobArgs) -> Result<TaskHandle> {
        let job = job.into();

        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::scheduling("task manager is shut down"));
        }

        if let Some(jobs) = &self.jobs {
            if !jobs.contains(job.name()) {
                return Err(Error::scheduling(format!("unknown job '{}'", job)));
            }
        }

        // Registry lock spans the submit so registry order equals id order
        let mut tasks = self.tasks.write();
        let handle = self.pool.submit(&job, args)?;
        tasks.insert(handle.id(), handle.clone());

        info!(task = %handle.id(), job = %job, "Task scheduled");
        Ok(handle)
    }

    /// Cancel a task.
    ///
    /// A pending task is cancelled without ever starting; a running task's
    /// worker is terminated. Cancelling a terminal task changes nothing and
    /// returns `InvalidState`.
    pub fn cancel(&self, task_id: TaskId) -> Result<CancelRequest> {
        let handle = self
            .get(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;

        match self.pool.cancel(&handle) {
            Ok(request) => {
                info!(task = %task_id, ?request, "Cancel requested");
                Ok(request)
            }
            Err(e) => {
                warn!(task = %task_id, "Cannot cancel: {}", e);
                Err(e)
            }
        }
    }

    /// Stop accepting work, cancel queued tasks, terminate running workers
    /// and wait until every worker process exited.
    ///
    /// Idempotent: repeated or concurrent calls return the same report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!("Shutting down task manager");
        }

        let report = self.pool.shutdown().await;
        if !report.is_clean() {
            warn!(pids = ?report.timed_out, "Some workers could not be confirmed dead");
        }
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Get a task handle by ID
    pub fn get(&self, task_id: TaskId) -> Option<TaskHandle> {
        self.tasks.read().get(&task_id).cloned()
    }

    /// All handles in submission order
    pub fn handles(&self) -> Vec<TaskHandle> {
        self.tasks.read().values().cloned().collect()
    }

    /// Status records for display, recomputed on every call
    pub fn records(&self) -> Vec<TaskRecord> {
        let handles = self.handles();
        projection::project(&handles).collect()
    }

    /// Wait for a task to reach a terminal state
    pub async fn wait(&self, task_id: TaskId) -> Result<TaskState> {
        let handle = self
            .get(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        Ok(handle.wait().await)
    }

    /// Wait for every task scheduled so far
    pub async fn wait_all(&self) -> Vec<TaskState> {
        let handles = self.handles();
        futures::future::join_all(handles.iter().map(|h| h.wait())).await
    }

    pub fn running_count(&self) -> usize {
        self.count(TaskState::is_running)
    }

    pub fn pending_count(&self) -> usize {
        self.count(TaskState::is_pending)
    }

    fn count(&self, pred: impl Fn(&TaskState) -> bool) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|handle| pred(&handle.state()))
            .count()
    }

    /// Task counts per state
    pub fn stats(&self) -> TaskStats {
        let tasks = self.tasks.read();
        let mut stats = TaskStats {
            total: tasks.len(),
            ..Default::default()
        };

        for handle in tasks.values() {
            match handle.state() {
                TaskState::Pending => stats.pending += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Finished(_) => stats.finished += 1,
                TaskState::Failed(_) => stats.failed += 1,
                TaskState::Cancelled => stats.cancelled += 1,
            }
        }

        stats
    }

    // ========== Resource Cleanup ==========

    /// 완료된 태스크 정리 (최근 N개만 유지)
    ///
    /// 오래된 완료/실패/취소된 태스크를 레지스트리에서 제거합니다.
    /// 실행 중이거나 대기 중인 태스크는 건드리지 않습니다.
    ///
    /// # Arguments
    /// * `keep` - 유지할 종료된 태스크 수
    pub fn prune_terminal(&self, keep: usize) -> usize {
        let mut tasks = self.tasks.write();

        let terminal: Vec<TaskId> = tasks
            .iter()
            .filter(|(_, handle)| handle.is_terminal())
            .map(|(id, _)| *id)
            .collect();

        let excess = terminal.len().saturating_sub(keep);
        // ID 순서 = 제출 순서, 오래된 것 먼저 제거
        for id in &terminal[..excess] {
            tasks.remove(id);
        }

        if excess > 0 {
            debug!("Pruned {} terminal tasks", excess);
        }
        excess
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("pool", &self.pool)
            .field("tasks", &self.tasks.read().len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// 태스크 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// 총 태스크 수
    pub total: usize,
    /// 대기 중인 태스크
    pub pending: usize,
    /// 실행 중인 태스크
    pub running: usize,
    /// 완료된 태스크
    pub finished: usize,
    /// 실패한 태스크
    pub failed: usize,
    /// 취소된 태스크
    pub cancelled: usize,
}

impl TaskStats {
    /// 모든 태스크가 종료 상태인지
    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pool::WorkerCommand;
    use serde_json::json;
    use std::time::Duration;

    fn manager(script: &str, jobs: Option<JobRegistry>) -> TaskManager {
        let pool = PoolConfig::new(WorkerCommand::new("sh").args(["-c", script]))
            .with_max_workers(1)
            .with_grace_period(Duration::from_millis(500));
        let mut config = TaskManagerConfig::new(pool);
        config.jobs = jobs;
        TaskManager::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_task_manager_creation() {
        let manager = manager("exit 0", None);
        assert_eq!(manager.running_count(), 0);
        assert_eq!(manager.pending_count(), 0);
        assert!(manager.records().is_empty());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_job_is_rejected() {
        let mut jobs = JobRegistry::new();
        jobs.register_fn("sleep", "", |_| Ok(json!(null)));
        let manager = manager("exit 0", Some(jobs));

        let err = manager.schedule("nope", json!({})).unwrap_err();
        assert!(matches!(err, Error::Scheduling(_)));
        assert!(manager.handles().is_empty());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_id() {
        let manager = manager("exit 0", None);
        let err = manager.cancel(TaskId(42)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_task() {
        let manager = manager("exec sleep 30", None);
        let first = manager.schedule("sleep", json!(null)).unwrap();
        let second = manager.schedule("sleep", json!(null)).unwrap();

        // Capacity 1: the second task cannot have started
        assert_eq!(manager.cancel(second.id()).unwrap(), CancelRequest::Dequeued);
        assert!(second.state().is_cancelled());
        assert!(second.pid().is_none());

        manager.shutdown().await;
        assert!(first.is_terminal());
        assert!(second.pid().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let manager = manager("exec sleep 30", None);
        manager.schedule("sleep", json!(null)).unwrap();

        let (a, b) = tokio::join!(manager.shutdown(), manager.shutdown());
        assert_eq!(a, b);
        assert_eq!(manager.shutdown().await, a);

        let err = manager.schedule("sleep", json!(null)).unwrap_err();
        assert!(matches!(err, Error::Scheduling(_)));
        assert!(manager.stats().all_terminal());
    }

    #[tokio::test]
    async fn test_prune_keeps_recent_terminal() {
        let manager = manager("exec sleep 30", None);
        for _ in 0..4 {
            manager.schedule("sleep", json!(null)).unwrap();
        }
        manager.shutdown().await;
        assert_eq!(manager.stats().cancelled, 4);

        assert_eq!(manager.prune_terminal(1), 3);
        let ids: Vec<_> = manager.handles().iter().map(|h| h.id()).collect();
        assert_eq!(ids, vec![TaskId(3)]);
        assert_eq!(manager.prune_terminal(1), 0);
    }
}
