//! Worker protocol
//!
//! Line-delimited JSON over the worker's stdio. The pool writes one
//! [`WorkerRequest`] per line to stdin; the worker answers each with exactly
//! one reply line on stdout, prefixed by [`REPLY_MARKER`]. Every other stdout
//! line is output of the job itself.

use crate::state::{TaskFailure, TaskState};
use dashdeep_foundation::{Error, Result};
use serde::{Deserialize, Serialize};

/// Prefix of reply lines
pub const REPLY_MARKER: &str = "@@dashdeep-reply@@ ";

/// Run `job` with `args` for task `task_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task_id: u64,
    pub job: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Outcome reported by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyOutcome {
    Finished { value: serde_json::Value },
    Failed(TaskFailure),
}

impl ReplyOutcome {
    pub fn into_state(self) -> TaskState {
        match self {
            ReplyOutcome::Finished { value } => TaskState::Finished(value),
            ReplyOutcome::Failed(failure) => TaskState::Failed(failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub task_id: u64,
    pub outcome: ReplyOutcome,
}

/// Encode a request as a single line (without the newline)
pub fn encode_request(request: &WorkerRequest) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

pub fn decode_request(line: &str) -> Result<WorkerRequest> {
    serde_json::from_str(line.trim())
        .map_err(|e| Error::Protocol(format!("Malformed request: {}", e)))
}

/// Encode a reply as a single marker-prefixed line (without the newline)
pub fn encode_reply(reply: &WorkerReply) -> Result<String> {
    Ok(format!("{}{}", REPLY_MARKER, serde_json::to_string(reply)?))
}

/// Parse a stdout line. `None` if the line is job output, not a reply.
///
/// The marker may follow unterminated job output on the same line.
pub fn parse_reply_line(line: &str) -> Option<Result<WorkerReply>> {
    let start = line.find(REPLY_MARKER)?;
    let payload = &line[start + REPLY_MARKER.len()..];
    Some(
        serde_json::from_str(payload.trim())
            .map_err(|e| Error::Protocol(format!("Malformed reply: {}", e))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailureKind;
    use serde_json::json;

    #[test]
    fn test_request_line() {
        let request = WorkerRequest {
            task_id: 4,
            job: "sleep".to_string(),
            args: json!({ "seconds": 0.1 }),
        };
        let line = encode_request(&request).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(decode_request(&line).unwrap(), request);
    }

    #[test]
    fn test_request_without_args() {
        let request = decode_request(r#"{"task_id": 1, "job": "noop"}"#).unwrap();
        assert_eq!(request.args, serde_json::Value::Null);
    }

    #[test]
    fn test_malformed_request_is_protocol_error() {
        let err = decode_request("hello").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = WorkerReply {
            task_id: 2,
            outcome: ReplyOutcome::Failed(TaskFailure::raised("ValueError", "boom")),
        };
        let line = encode_reply(&reply).unwrap();
        assert!(line.starts_with(REPLY_MARKER));

        let payload: serde_json::Value =
            serde_json::from_str(&line[REPLY_MARKER.len()..]).unwrap();
        assert_eq!(payload["outcome"]["status"], "failed");
        assert_eq!(payload["outcome"]["kind"], "raised");
        assert_eq!(payload["outcome"]["name"], "ValueError");
    }

    #[test]
    fn test_job_output_is_not_a_reply() {
        assert!(parse_reply_line("epoch=1 loss=0.42").is_none());
    }

    #[test]
    fn test_marker_after_partial_output() {
        let reply = WorkerReply {
            task_id: 0,
            outcome: ReplyOutcome::Finished { value: json!([1, 2]) },
        };
        let line = format!("progress...{}", encode_reply(&reply).unwrap());

        let parsed = parse_reply_line(&line).unwrap().unwrap();
        assert_eq!(parsed, reply);
        assert_eq!(parsed.outcome.into_state(), TaskState::Finished(json!([1, 2])));
    }

    #[test]
    fn test_garbled_reply() {
        let line = format!("{}{{not json", REPLY_MARKER);
        let err = parse_reply_line(&line).unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_failed_outcome_into_state() {
        let outcome = ReplyOutcome::Failed(TaskFailure::new(FailureKind::Panic, "oops"));
        assert_eq!(outcome.into_state().name(), "failed");
    }
}
