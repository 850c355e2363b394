//! Pool configuration

use dashdeep_foundation::{Error, PoolSettings, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Program (and arguments) every worker process executes
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Re-execute the current binary, e.g. `WorkerCommand::current_exe()?.arg("worker")`
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| Error::Worker(format!("Cannot locate current executable: {}", e)))?;
        Ok(Self::new(program))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub(crate) fn build(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Configuration for the process pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live worker processes
    pub max_workers: usize,

    /// Tasks a worker runs before it is torn down and replaced
    pub tasks_per_worker_before_restart: usize,

    /// Put each worker in its own process group and signal the whole group,
    /// so processes spawned by the job are reaped with the worker
    pub kill_process_group: bool,

    /// Wait between SIGTERM and SIGKILL
    pub grace_period: Duration,

    /// Wait after SIGKILL before giving up on a worker
    pub kill_wait: Duration,

    /// Worker program
    pub worker: WorkerCommand,
}

impl PoolConfig {
    pub fn new(worker: WorkerCommand) -> Self {
        Self::from_settings(&PoolSettings::default(), worker)
    }

    pub fn from_settings(settings: &PoolSettings, worker: WorkerCommand) -> Self {
        Self {
            max_workers: settings.max_workers,
            tasks_per_worker_before_restart: settings.tasks_per_worker_before_restart,
            kill_process_group: settings.kill_process_group,
            grace_period: settings.grace_period(),
            kill_wait: settings.kill_wait(),
            worker,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_tasks_per_worker(mut self, tasks: usize) -> Self {
        self.tasks_per_worker_before_restart = tasks;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_kill_wait(mut self, kill_wait: Duration) -> Self {
        self.kill_wait = kill_wait;
        self
    }

    pub fn with_kill_process_group(mut self, enabled: bool) -> Self {
        self.kill_process_group = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::InvalidInput(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.tasks_per_worker_before_restart == 0 {
            return Err(Error::InvalidInput(
                "tasks_per_worker_before_restart must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_settings() {
        let config = PoolConfig::new(WorkerCommand::new("worker"));
        assert_eq!(config.tasks_per_worker_before_restart, 1);
        assert!(config.kill_process_group);
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let worker = WorkerCommand::new("worker");
        assert!(PoolConfig::new(worker.clone())
            .with_max_workers(0)
            .validate()
            .is_err());
        assert!(PoolConfig::new(worker)
            .with_tasks_per_worker(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_worker_command_builder() {
        let cmd = WorkerCommand::new("/usr/bin/dashdeep")
            .arg("worker")
            .env("RUST_LOG", "debug");
        assert_eq!(cmd.program(), &PathBuf::from("/usr/bin/dashdeep"));
        assert_eq!(cmd.args, vec![OsString::from("worker")]);
        assert_eq!(cmd.env.len(), 1);
    }
}
