//! Jobs: the callables a task runs
//!
//! A job crosses the process boundary by name only. The parent resolves the
//! name against its registry when scheduling; the worker resolves it again
//! against its own copy and runs the job with the JSON arguments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Arguments for a job: a JSON object for keyword arguments, an array for
/// positional ones. Validation is the caller's business.
pub type JobArgs = serde_json::Value;

/// Reference to a registered job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef(String);

impl JobRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for JobRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned by a job body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Short error type name, e.g. `ValueError`
    pub kind: String,
    pub message: String,
}

impl JobError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Error without a specific type
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    /// Keep the full context chain of an `anyhow` error
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        Self::new("Error", format!("{:#}", err))
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E> From<E> for JobError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::new(short_type_name::<E>(), err.to_string())
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A job body. Runs inside a worker process and may block.
pub trait Job: Send + Sync {
    fn run(&self, args: &JobArgs) -> Result<serde_json::Value, JobError>;

    /// One-line description for listings
    fn description(&self) -> &str {
        ""
    }
}

/// Function-backed job
pub struct FnJob<F> {
    func: F,
    description: String,
}

impl<F> FnJob<F>
where
    F: Fn(&JobArgs) -> Result<serde_json::Value, JobError> + Send + Sync,
{
    pub fn new(description: impl Into<String>, func: F) -> Self {
        Self {
            func,
            description: description.into(),
        }
    }
}

impl<F> Job for FnJob<F>
where
    F: Fn(&JobArgs) -> Result<serde_json::Value, JobError> + Send + Sync,
{
    fn run(&self, args: &JobArgs) -> Result<serde_json::Value, JobError> {
        (self.func)(args)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Name → job table shared by the scheduler and the worker
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job, replacing any job with the same name
    pub fn register(&mut self, name: impl Into<String>, job: impl Job + 'static) -> &mut Self {
        self.jobs.insert(name.into(), Arc::new(job));
        self
    }

    /// Register a plain function
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        func: F,
    ) -> &mut Self
    where
        F: Fn(&JobArgs) -> Result<serde_json::Value, JobError> + Send + Sync + 'static,
    {
        self.register(name, FnJob::new(description, func))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// (name, description) pairs, sorted by name
    pub fn describe(&self) -> Vec<(String, String)> {
        self.jobs
            .iter()
            .map(|(name, job)| (name.clone(), job.description().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}
