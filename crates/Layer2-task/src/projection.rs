//! Task status projection
//!
//! Read-only view of handles for the display layer. Records are rebuilt on
//! every call from the handles' current snapshots; nothing is cached and
//! nothing blocks.

use crate::state::TaskState;
use crate::task::{TaskHandle, TaskId};
use serde::Serialize;
use std::borrow::Borrow;

/// `error_description` of a task without an error
pub const NO_ERROR: &str = "None";

/// Display record of one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub job: String,
    /// `pending`, `running`, `finished`, `failed` or `cancelled`
    pub state: &'static str,
    pub pid: Option<u32>,
    /// [`NO_ERROR`] unless the task failed
    pub error_description: String,
    /// Result value of a finished task
    pub result: Option<serde_json::Value>,
}

impl TaskRecord {
    pub fn has_error(&self) -> bool {
        self.error_description != NO_ERROR
    }
}

/// Lazily project `handles`, in the order given
pub fn project<I>(handles: I) -> impl Iterator<Item = TaskRecord>
where
    I: IntoIterator,
    I::Item: Borrow<TaskHandle>,
{
    handles.into_iter().map(|handle| record_for(handle.borrow()))
}

/// Record of a single handle, taken from one consistent snapshot
pub fn record_for(handle: &TaskHandle) -> TaskRecord {
    let snapshot = handle.snapshot();

    let (error_description, result) = match &snapshot.state {
        TaskState::Failed(failure) => (failure.to_string(), None),
        TaskState::Finished(value) => (NO_ERROR.to_string(), Some(value.clone())),
        // Cancelled: the outcome is never consulted
        TaskState::Pending | TaskState::Running | TaskState::Cancelled => {
            (NO_ERROR.to_string(), None)
        }
    };

    TaskRecord {
        id: snapshot.id,
        job: snapshot.job,
        state: snapshot.state.name(),
        pid: snapshot.pid,
        error_description,
        result,
    }
}

/// Render records as a plain-text table
pub fn render_table(records: &[TaskRecord]) -> String {
    let rows: Vec<[String; 5]> = records
        .iter()
        .map(|r| {
            [
                r.id.to_string(),
                r.job.clone(),
                r.state.to_string(),
                r.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                r.error_description.clone(),
            ]
        })
        .collect();

    let header = ["ID", "JOB", "STATE", "PID", "ERROR"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };

    push_row(&header);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        push_row(&cells);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FailureKind, TaskFailure};
    use serde_json::json;

    fn handle(id: u64, state: Option<TaskState>) -> TaskHandle {
        let handle = TaskHandle::new(TaskId(id), "job");
        if let Some(state) = state {
            handle.start(Some(100 + id as u32));
            handle.finish(state);
        }
        handle
    }

    #[test]
    fn test_records_follow_handle_order() {
        let handles = vec![
            handle(0, Some(TaskState::Finished(json!("a")))),
            handle(1, None),
            handle(2, Some(TaskState::Finished(json!("c")))),
        ];

        let records: Vec<_> = project(&handles).collect();
        assert_eq!(
            records.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![TaskId(0), TaskId(1), TaskId(2)]
        );
        assert_eq!(records[0].state, "finished");
        assert_eq!(records[0].result, Some(json!("a")));
        assert_eq!(records[1].state, "pending");
        assert_eq!(records[1].pid, None);
        assert!(records.iter().all(|r| r.error_description == NO_ERROR));
    }

    #[test]
    fn test_failed_record_carries_error() {
        let failed = handle(
            0,
            Some(TaskState::Failed(TaskFailure::raised("ValueError", "boom"))),
        );
        let record = record_for(&failed);
        assert_eq!(record.state, "failed");
        assert!(record.error_description.contains("boom"));
        assert!(record.has_error());
        assert!(record.result.is_none());
    }

    #[test]
    fn test_cancelled_record_has_no_error() {
        let cancelled = handle(3, Some(TaskState::Cancelled));
        let record = record_for(&cancelled);
        assert_eq!(record.state, "cancelled");
        assert_eq!(record.error_description, NO_ERROR);
        assert!(record.result.is_none());
    }

    #[test]
    fn test_projection_is_recomputed() {
        let live = handle(0, None);
        assert_eq!(record_for(&live).state, "pending");

        live.start(Some(7));
        assert_eq!(record_for(&live).state, "running");

        live.finish(TaskState::Failed(TaskFailure::new(FailureKind::Crashed, "gone")));
        assert_eq!(record_for(&live).error_description, "crashed: gone");
    }

    #[test]
    fn test_render_table() {
        let handles = [
            handle(0, Some(TaskState::Finished(json!(1)))),
            handle(1, None),
        ];
        let records: Vec<_> = project(handles.iter()).collect();
        let table = render_table(&records);

        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("finished"));
        assert!(lines[1].contains("100"));
        assert!(lines[2].contains("pending"));
        assert!(lines[2].contains(" - "));
    }
}
