//! Worker runtime: the loop a worker process runs
//!
//! Reads requests from `input`, executes the named job with panic capture and
//! writes exactly one reply per request to `output`. Returns on EOF, which is
//! how the pool retires a worker.

use crate::job::JobRegistry;
use crate::protocol::{self, ReplyOutcome, WorkerReply, WorkerRequest};
use crate::state::{FailureKind, TaskFailure};
use dashdeep_foundation::Result;
use std::any::Any;
use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info};

/// Serve requests until `input` is exhausted. Returns the number served.
pub fn run_worker<R, W>(registry: &JobRegistry, input: R, mut output: W) -> Result<usize>
where
    R: BufRead,
    W: Write,
{
    let mut served = 0;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request = protocol::decode_request(&line)?;
        debug!(task = request.task_id, job = %request.job, "Worker received task");

        let reply = WorkerReply {
            task_id: request.task_id,
            outcome: execute(registry, &request),
        };

        // Leading newline terminates any partial line the job left behind
        writeln!(output)?;
        writeln!(output, "{}", protocol::encode_reply(&reply)?)?;
        output.flush()?;
        served += 1;
    }

    info!(served, "Worker input closed, exiting");
    Ok(served)
}

/// Serve requests on the process's own stdin/stdout
pub fn run_stdio_worker(registry: &JobRegistry) -> Result<usize> {
    let stdin = std::io::stdin();
    // Unlocked stdout so jobs can still print from other threads
    run_worker(registry, stdin.lock(), std::io::stdout())
}

fn execute(registry: &JobRegistry, request: &WorkerRequest) -> ReplyOutcome {
    let Some(job) = registry.get(&request.job) else {
        return ReplyOutcome::Failed(TaskFailure::new(
            FailureKind::UnknownJob,
            format!("no job named '{}'", request.job),
        ));
    };

    match panic::catch_unwind(AssertUnwindSafe(|| job.run(&request.args))) {
        Ok(Ok(value)) => ReplyOutcome::Finished { value },
        Ok(Err(err)) => ReplyOutcome::Failed(TaskFailure::raised(err.kind, err.message)),
        Err(payload) => ReplyOutcome::Failed(TaskFailure::new(
            FailureKind::Panic,
            panic_message(payload.as_ref()),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobError;
    use crate::protocol::{encode_request, parse_reply_line};
    use serde_json::json;
    use std::io::Cursor;

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry
            .register_fn("echo", "", |args| Ok(args.clone()))
            .register_fn("fail", "", |_| Err(JobError::new("ValueError", "boom")))
            .register_fn("panic", "", |_| panic!("exploded"));
        registry
    }

    fn requests(items: &[(u64, &str)]) -> String {
        items
            .iter()
            .map(|(id, job)| {
                encode_request(&WorkerRequest {
                    task_id: *id,
                    job: job.to_string(),
                    args: json!({ "id": id }),
                })
                .unwrap()
                    + "\n"
            })
            .collect()
    }

    fn replies(output: &[u8]) -> Vec<WorkerReply> {
        String::from_utf8_lossy(output)
            .lines()
            .filter_map(parse_reply_line)
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_one_reply_per_request() {
        let input = requests(&[(0, "echo"), (1, "fail"), (2, "panic"), (3, "missing")]);
        let mut output = Vec::new();

        let served = run_worker(&registry(), Cursor::new(input), &mut output).unwrap();
        assert_eq!(served, 4);

        let replies = replies(&output);
        assert_eq!(replies.len(), 4);
        assert_eq!(
            replies.iter().map(|r| r.task_id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );

        assert_eq!(
            replies[0].outcome,
            ReplyOutcome::Finished {
                value: json!({ "id": 0 })
            }
        );

        let ReplyOutcome::Failed(failure) = &replies[1].outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.to_string(), "ValueError: boom");

        let ReplyOutcome::Failed(failure) = &replies[2].outcome else {
            panic!("expected panic failure");
        };
        assert_eq!(failure.kind, FailureKind::Panic);
        assert_eq!(failure.message, "exploded");

        let ReplyOutcome::Failed(failure) = &replies[3].outcome else {
            panic!("expected unknown job");
        };
        assert_eq!(failure.kind, FailureKind::UnknownJob);
    }

    #[test]
    fn test_empty_input_exits_cleanly() {
        let mut output = Vec::new();
        let served = run_worker(&registry(), Cursor::new("\n\n"), &mut output).unwrap();
        assert_eq!(served, 0);
        assert!(output.is_empty());
    }

    #[test]
    fn test_malformed_request_stops_worker() {
        let mut output = Vec::new();
        let result = run_worker(&registry(), Cursor::new("garbage\n"), &mut output);
        assert!(result.is_err());
    }
}
