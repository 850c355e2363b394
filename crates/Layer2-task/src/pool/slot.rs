//! Worker slot: one dispatch loop per unit of pool capacity
//!
//! A slot owns at most one worker process at a time, which bounds the number
//! of live workers by the number of slots. Slots pull submissions from the
//! shared FIFO queue one at a time.

use super::process::{Termination, WorkerProcess};
use super::{PoolShared, ShutdownReport, Submission};
use crate::state::{FailureKind, TaskFailure, TaskState};
use crate::task::TaskHandle;
use dashdeep_foundation::{Error, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

enum Exchange {
    Reply(Result<Option<crate::protocol::WorkerReply>>),
    Cancelled,
    Stopped,
}

/// Wait for whichever comes first: the reply, a cancel, or pool shutdown.
/// A reply that is already in wins over a concurrent cancel or stop.
async fn await_exchange(
    worker: &mut WorkerProcess,
    handle: &TaskHandle,
    stop: &mut watch::Receiver<bool>,
) -> Exchange {
    tokio::select! {
        biased;
        reply = worker.next_reply() => Exchange::Reply(reply),
        _ = handle.cancellation() => Exchange::Cancelled,
        _ = stop.wait_for(|stopping| *stopping) => Exchange::Stopped,
    }
}

pub(crate) struct Slot {
    index: usize,
    shared: Arc<PoolShared>,
    worker: Option<WorkerProcess>,
    report: ShutdownReport,
}

impl Slot {
    pub(crate) fn new(index: usize, shared: Arc<PoolShared>) -> Self {
        Self {
            index,
            shared,
            worker: None,
            report: ShutdownReport::default(),
        }
    }

    pub(crate) async fn run(mut self) -> ShutdownReport {
        loop {
            let submission = {
                let mut queue = self.shared.queue.lock().await;
                queue.recv().await
            };

            let Some(submission) = submission else {
                break;
            };

            if self.shared.is_stopping() {
                if submission.handle.finish(TaskState::Cancelled) {
                    debug!(task = %submission.handle.id(), "Cancelled queued task on shutdown");
                    self.report.cancelled_on_shutdown += 1;
                }
                continue;
            }

            if submission.handle.is_terminal() {
                debug!(task = %submission.handle.id(), "Skipping task cancelled while queued");
                continue;
            }

            self.execute(submission).await;
        }

        if let Some(mut worker) = self.worker.take() {
            let outcome = worker
                .retire(self.shared.config.grace_period, self.shared.config.kill_wait)
                .await;
            self.record_termination(worker.pid(), outcome);
        }

        debug!(slot = self.index, "Slot finished");
        self.report
    }

    async fn execute(&mut self, submission: Submission) {
        let Submission { handle, request } = submission;

        let mut worker = match self.take_worker() {
            Ok(worker) => worker,
            Err(e) => {
                error!(task = %handle.id(), "Failed to start worker: {}", e);
                handle.finish(TaskState::Failed(TaskFailure::new(
                    FailureKind::Spawn,
                    e.to_string(),
                )));
                return;
            }
        };

        if !handle.start(Some(worker.pid())) {
            // Cancelled between dequeue and start; the worker is still unused
            self.worker = Some(worker);
            return;
        }
        info!(task = %handle.id(), job = %handle.job(), pid = worker.pid(), "Task started");

        if let Err(e) = worker.send(&request).await {
            warn!(task = %handle.id(), "{}", e);
            let failure = TaskFailure::new(FailureKind::Crashed, e.to_string());
            self.discard(worker, &handle, failure).await;
            return;
        }

        let mut stop = self.shared.stop_rx.clone();
        let exchange = await_exchange(&mut worker, &handle, &mut stop).await;

        match exchange {
            Exchange::Reply(Ok(Some(reply))) if reply.task_id == request.task_id => {
                let state = reply.outcome.into_state();
                match &state {
                    TaskState::Failed(failure) => {
                        info!(task = %handle.id(), "Task failed: {}", failure)
                    }
                    _ => info!(task = %handle.id(), "Task finished"),
                }
                handle.finish(state);
                self.recycle(worker).await;
            }
            Exchange::Reply(Ok(Some(reply))) => {
                let failure = TaskFailure::new(
                    FailureKind::Protocol,
                    format!(
                        "worker replied for task {} while running task {}",
                        reply.task_id, request.task_id
                    ),
                );
                self.abort(worker, &handle, TaskState::Failed(failure)).await;
            }
            Exchange::Reply(Ok(None)) => {
                let failure = TaskFailure::new(
                    FailureKind::Crashed,
                    format!("worker {} exited without a reply", worker.pid()),
                );
                self.discard(worker, &handle, failure).await;
            }
            Exchange::Reply(Err(e)) => {
                let failure = TaskFailure::new(FailureKind::Protocol, e.to_string());
                self.abort(worker, &handle, TaskState::Failed(failure)).await;
            }
            Exchange::Cancelled => {
                info!(task = %handle.id(), pid = worker.pid(), "Cancelling task");
                self.abort(worker, &handle, TaskState::Cancelled).await;
            }
            Exchange::Stopped => {
                info!(task = %handle.id(), pid = worker.pid(), "Stopping task on shutdown");
                self.abort(worker, &handle, TaskState::Cancelled).await;
                self.report.cancelled_on_shutdown += 1;
            }
        }
    }

    /// Reuse the idle worker or spawn a fresh one
    fn take_worker(&mut self) -> Result<WorkerProcess> {
        if let Some(worker) = self.worker.take() {
            return Ok(worker);
        }

        let config = &self.shared.config;
        let worker = WorkerProcess::spawn(&config.worker, config.kill_process_group)?;
        self.report.workers_spawned += 1;
        Ok(worker)
    }

    /// Keep the worker for the next task, or retire it once it used its quota
    async fn recycle(&mut self, mut worker: WorkerProcess) {
        let quota = self.shared.config.tasks_per_worker_before_restart;
        if worker.tasks_run() < quota && !self.shared.is_stopping() {
            self.worker = Some(worker);
            return;
        }

        let outcome = worker
            .retire(self.shared.config.grace_period, self.shared.config.kill_wait)
            .await;
        self.record_termination(worker.pid(), outcome);
    }

    /// Terminate the worker, then settle the task
    async fn abort(&mut self, mut worker: WorkerProcess, handle: &TaskHandle, state: TaskState) {
        let outcome = worker
            .terminate(self.shared.config.grace_period, self.shared.config.kill_wait)
            .await;
        self.record_termination(worker.pid(), outcome);
        handle.finish(state);
    }

    /// The worker died on its own: reap it and settle the task
    async fn discard(&mut self, mut worker: WorkerProcess, handle: &TaskHandle, failure: TaskFailure) {
        match worker.reap(self.shared.config.kill_wait).await {
            Ok(status) => {
                debug!(pid = worker.pid(), %status, "Reaped crashed worker");
            }
            Err(_) => {
                let outcome = worker
                    .terminate(self.shared.config.grace_period, self.shared.config.kill_wait)
                    .await;
                self.record_termination(worker.pid(), outcome);
            }
        }

        if handle.cancel_requested() {
            handle.finish(TaskState::Cancelled);
        } else {
            warn!(task = %handle.id(), "Task failed: {}", failure);
            handle.finish(TaskState::Failed(failure));
        }
    }

    fn record_termination(&mut self, pid: u32, outcome: Result<Termination>) {
        match outcome {
            Ok(Termination::Killed) => self.report.force_killed += 1,
            Ok(_) => {}
            Err(Error::ShutdownTimeout { pid, waited }) => {
                warn!(pid, "Worker did not exit within {:?}; abandoning it", waited);
                self.report.timed_out.push(pid);
            }
            Err(e) => {
                warn!(pid, "Failed to tear down worker: {}", e);
                self.report.timed_out.push(pid);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pool::WorkerCommand;
    use crate::task::TaskId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ready_reply_beats_cancel_and_stop() {
        // Both replies go out in one write, so the second is already buffered
        let command = WorkerCommand::new("sh").args([
            "-c",
            r#"printf '@@dashdeep-reply@@ {"task_id":0,"outcome":{"status":"finished","value":1}}\n@@dashdeep-reply@@ {"task_id":1,"outcome":{"status":"finished","value":2}}\n'; exec sleep 30"#,
        ]);
        let mut worker = WorkerProcess::spawn(&command, true).unwrap();
        let first = worker.next_reply().await.unwrap().unwrap();
        assert_eq!(first.task_id, 0);

        let handle = TaskHandle::new(TaskId(1), "sleep");
        handle.start(Some(worker.pid()));
        handle.request_cancel().unwrap();
        let (_stop_tx, mut stop) = watch::channel(true);

        let exchange = await_exchange(&mut worker, &handle, &mut stop).await;
        assert!(
            matches!(&exchange, Exchange::Reply(Ok(Some(reply))) if reply.task_id == 1),
            "cancel or stop won over a buffered reply"
        );

        let outcome = worker
            .terminate(Duration::from_millis(500), Duration::from_secs(2))
            .await;
        assert!(outcome.is_ok());
    }
}
