//! Task state machine
//!
//! `Pending -> Running -> {Finished, Failed, Cancelled}`. A pending task may
//! also end directly in `Cancelled` (cancelled before it started) or `Failed`
//! (no worker could be spawned). Terminal states never change.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The job returned an error
    Raised,
    /// The job panicked inside the worker
    Panic,
    /// The worker does not know the job name
    UnknownJob,
    /// The worker process died without replying
    Crashed,
    /// No worker process could be started
    Spawn,
    /// The worker sent something that is not a valid reply
    Protocol,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Raised => "raised",
            FailureKind::Panic => "panic",
            FailureKind::UnknownJob => "unknown_job",
            FailureKind::Crashed => "crashed",
            FailureKind::Spawn => "spawn",
            FailureKind::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error captured from a task. Lives in the task's handle, never thrown into
/// the manager.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct TaskFailure {
    pub kind: FailureKind,
    /// Error type name reported by the job (`ValueError`, `ParseIntError`, ...),
    /// or the kind itself for failures outside the job body
    pub name: String,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            name: kind.as_str().to_string(),
            message: message.into(),
        }
    }

    /// Failure raised by the job body itself
    pub fn raised(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Raised,
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Possible states of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    /// Submitted, no worker assigned yet
    Pending,

    /// Executing in a worker process
    Running,

    /// Job returned a value
    Finished(serde_json::Value),

    /// Job or worker failed
    Failed(TaskFailure),

    /// Cancelled before or during execution
    Cancelled,
}

impl TaskState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished(_) | TaskState::Failed(_) | TaskState::Cancelled
        )
    }

    /// Check if task is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Running)
    }

    /// Check if task is pending (not yet started)
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::Pending)
    }

    /// Check if task completed successfully
    pub fn is_success(&self) -> bool {
        matches!(self, TaskState::Finished(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskState::Cancelled)
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: &TaskState) -> bool {
        match self {
            TaskState::Pending => !next.is_pending(),
            TaskState::Running => next.is_terminal(),
            _ => false,
        }
    }

    /// Result value, only for finished tasks
    pub fn result(&self) -> Option<&serde_json::Value> {
        match self {
            TaskState::Finished(value) => Some(value),
            _ => None,
        }
    }

    /// Captured failure, only for failed tasks
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            TaskState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Lowercase name used by status records
    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Finished(_) => "finished",
            TaskState::Failed(_) => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Running => "Running",
            TaskState::Finished(_) => "Finished",
            TaskState::Failed(_) => "Failed",
            TaskState::Cancelled => "Cancelled",
        }
    }

    /// Get a symbol for the state (for terminal tables)
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskState::Pending => "◯",
            TaskState::Running => "⟳",
            TaskState::Finished(_) => "✓",
            TaskState::Failed(_) => "✗",
            TaskState::Cancelled => "⊘",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failed() -> TaskState {
        TaskState::Failed(TaskFailure::raised("ValueError", "boom"))
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Finished(json!(1)).is_terminal());
        assert!(failed().is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_forward_transitions() {
        assert!(TaskState::Pending.can_transition_to(&TaskState::Running));
        assert!(TaskState::Pending.can_transition_to(&TaskState::Cancelled));
        assert!(TaskState::Running.can_transition_to(&TaskState::Finished(json!(null))));
        assert!(TaskState::Running.can_transition_to(&failed()));
        assert!(TaskState::Running.can_transition_to(&TaskState::Cancelled));
    }

    #[test]
    fn test_no_backward_or_terminal_transitions() {
        assert!(!TaskState::Pending.can_transition_to(&TaskState::Pending));
        assert!(!TaskState::Running.can_transition_to(&TaskState::Pending));
        assert!(!TaskState::Running.can_transition_to(&TaskState::Running));

        let terminals = [TaskState::Finished(json!("x")), failed(), TaskState::Cancelled];
        let all = [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Finished(json!("y")),
            failed(),
            TaskState::Cancelled,
        ];
        for from in &terminals {
            for to in &all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_failure_display() {
        let failure = TaskFailure::raised("ValueError", "boom");
        assert_eq!(failure.to_string(), "ValueError: boom");

        let crash = TaskFailure::new(FailureKind::Crashed, "exit status: 3");
        assert_eq!(crash.to_string(), "crashed: exit status: 3");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(TaskState::Finished(json!(7)).result(), Some(&json!(7)));
        assert!(TaskState::Cancelled.result().is_none());
        assert_eq!(failed().failure().map(|f| f.message.as_str()), Some("boom"));
        assert_eq!(failed().name(), "failed");
        assert_eq!(TaskState::Cancelled.to_string(), "Cancelled");
    }
}
