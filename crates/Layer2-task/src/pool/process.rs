//! Worker process: spawn, talk to, and tear down one OS process
//!
//! Termination always escalates SIGTERM -> grace period -> SIGKILL -> bounded
//! wait, and finishes with a SIGKILL sweep of the worker's process group so
//! that children spawned by the job do not outlive it.

use super::config::WorkerCommand;
use super::platform::Signal;
use crate::protocol::{self, WorkerReply, WorkerRequest};
use dashdeep_foundation::{Error, Result};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, warn};

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    /// Exited on its own (stdin closed, or it had already died)
    Exited,
    /// Exited after SIGTERM
    Terminated,
    /// Needed SIGKILL
    Killed,
}

pub(crate) struct WorkerProcess {
    child: Child,
    pid: u32,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// Bytes of the line being read; survives a dropped `next_reply`
    line_buf: Vec<u8>,
    tasks_run: usize,
    kill_process_group: bool,
    reaped: bool,
}

impl WorkerProcess {
    pub(crate) fn spawn(command: &WorkerCommand, kill_process_group: bool) -> Result<Self> {
        let mut cmd = command.build();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        if kill_process_group {
            super::platform::isolate(&mut cmd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Worker(format!(
                "Failed to spawn worker {}: {}",
                command.program().display(),
                e
            ))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Worker("Worker exited before reporting a pid".to_string()))?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Worker("Worker stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            // Keep draining until EOF so job writes to stderr never hit a closed pipe
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            debug!(target: "dashdeep::worker", pid, "{}", line.trim_end());
                        }
                        Err(e) => {
                            debug!(pid, "Worker stderr closed: {}", e);
                            break;
                        }
                    }
                }
            });
        }

        debug!(pid, program = %command.program().display(), "Spawned worker");

        Ok(Self {
            child,
            pid,
            stdin,
            stdout: BufReader::new(stdout),
            line_buf: Vec::new(),
            tasks_run: 0,
            kill_process_group,
            reaped: false,
        })
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn tasks_run(&self) -> usize {
        self.tasks_run
    }

    /// Hand a task to the worker
    pub(crate) async fn send(&mut self, request: &WorkerRequest) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Worker(format!("Worker {} input is closed", self.pid)))?;

        let mut line = protocol::encode_request(request)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Worker(format!("Failed to write to worker {}: {}", self.pid, e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Worker(format!("Failed to write to worker {}: {}", self.pid, e)))?;

        self.tasks_run += 1;
        Ok(())
    }

    /// Next reply from the worker; `None` once its stdout is closed.
    /// Cancel-safe: no line is lost if the future is dropped.
    ///
    /// Job output is arbitrary bytes, so lines are decoded lossily.
    pub(crate) async fn next_reply(&mut self) -> Result<Option<WorkerReply>> {
        loop {
            let read = self.stdout.read_until(b'\n', &mut self.line_buf).await?;
            if read == 0 && self.line_buf.is_empty() {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&self.line_buf).into_owned();
            self.line_buf.clear();

            match protocol::parse_reply_line(&line) {
                Some(reply) => return reply.map(Some),
                None if line.trim().is_empty() => {}
                None => debug!(target: "dashdeep::worker", pid = self.pid, "{}", line),
            }
        }
    }

    /// Reap a worker that already closed its output
    pub(crate) async fn reap(&mut self, wait: Duration) -> Result<ExitStatus> {
        self.stdin = None;
        match tokio::time::timeout(wait, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.mark_reaped();
                Ok(status)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(Error::ShutdownTimeout {
                pid: self.pid,
                waited: wait,
            }),
        }
    }

    /// Retire an idle worker: close its input and let it exit, escalating if
    /// it does not leave within `grace_period`
    pub(crate) async fn retire(
        &mut self,
        grace_period: Duration,
        kill_wait: Duration,
    ) -> Result<Termination> {
        if self.reaped {
            return Ok(Termination::Exited);
        }

        self.stdin = None;
        if let Ok(Ok(status)) = tokio::time::timeout(grace_period, self.child.wait()).await {
            debug!(pid = self.pid, %status, tasks = self.tasks_run, "Worker retired");
            self.mark_reaped();
            return Ok(Termination::Exited);
        }

        warn!(pid = self.pid, "Worker ignored closed input, terminating");
        self.terminate(grace_period, kill_wait).await
    }

    /// Terminate the worker: SIGTERM, wait `grace_period`, SIGKILL, wait
    /// `kill_wait`. Gives up with `ShutdownTimeout` instead of hanging.
    pub(crate) async fn terminate(
        &mut self,
        grace_period: Duration,
        kill_wait: Duration,
    ) -> Result<Termination> {
        if self.reaped {
            return Ok(Termination::Exited);
        }

        self.stdin = None;
        if let Ok(Some(_)) = self.child.try_wait() {
            self.mark_reaped();
            return Ok(Termination::Exited);
        }

        self.signal(Signal::Terminate);
        if let Ok(Ok(status)) = tokio::time::timeout(grace_period, self.child.wait()).await {
            debug!(pid = self.pid, %status, "Worker terminated");
            self.mark_reaped();
            return Ok(Termination::Terminated);
        }

        warn!(
            pid = self.pid,
            "Worker still alive after {:.1}s grace period, killing",
            grace_period.as_secs_f64()
        );
        self.signal(Signal::Kill);
        match tokio::time::timeout(kill_wait, self.child.wait()).await {
            Ok(Ok(_)) => {
                self.mark_reaped();
                Ok(Termination::Killed)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(Error::ShutdownTimeout {
                pid: self.pid,
                waited: grace_period + kill_wait,
            }),
        }
    }

    fn mark_reaped(&mut self) {
        self.reaped = true;
        // The leader is gone; anything left in its group is an orphaned child
        #[cfg(unix)]
        if self.kill_process_group {
            if let Err(e) = super::platform::send_signal(self.pid, Signal::Kill, true) {
                warn!(pid = self.pid, "Failed to sweep worker process group: {}", e);
            }
        }
    }

    fn signal(&mut self, signal: Signal) {
        #[cfg(unix)]
        {
            if let Err(e) = super::platform::send_signal(self.pid, signal, self.kill_process_group)
            {
                warn!(pid = self.pid, ?signal, "Failed to signal worker: {}", e);
            }
        }

        #[cfg(not(unix))]
        {
            // No graceful signal; the grace period simply elapses before the kill
            if signal == Signal::Kill {
                let _ = self.child.start_kill();
            }
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if !self.reaped {
            // Dropped mid-flight (runtime shutdown, panic); kill_on_drop only
            // covers the direct child
            self.signal(Signal::Kill);
        }
    }
}
