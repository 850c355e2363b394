//! Built-in jobs
//!
//! Registered identically in the parent (to validate `run`) and in the worker
//! (to execute). Arguments are a JSON object.

use dashdeep_task::{JobArgs, JobError, JobRegistry};
use rand::Rng;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Registry of every built-in job
pub fn builtin() -> JobRegistry {
    let mut jobs = JobRegistry::new();
    jobs.register_fn(
        "sleep",
        "Sleep `seconds` (default 1), then return `value` or the seconds slept",
        sleep,
    )
    .register_fn(
        "fail",
        "Fail with `kind` (default ValueError) and `message` (default boom)",
        fail,
    )
    .register_fn("panic", "Panic with `message`", panic)
    .register_fn(
        "exit",
        "Exit the worker process with `code` (default 1) without replying",
        exit,
    )
    .register_fn(
        "touch",
        "Wait `delay` seconds, then create the file at `path`",
        touch,
    )
    .register_fn("shell", "Run `command` with sh -c and return its stdout", shell)
    .register_fn(
        "spawn-children",
        "Start `count` sleeping child processes, write their pids to `pid_file` and wait",
        spawn_children,
    )
    .register_fn(
        "dummy-train",
        "Simulated training: `epochs` steps of `step` seconds, prints the loss",
        dummy_train,
    );
    jobs
}

fn f64_arg(args: &JobArgs, key: &str, default: f64) -> Result<f64, JobError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| JobError::new("TypeError", format!("'{}' must be a number", key))),
    }
}

fn u64_arg(args: &JobArgs, key: &str, default: u64) -> Result<u64, JobError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| {
            JobError::new("TypeError", format!("'{}' must be a non-negative integer", key))
        }),
    }
}

fn str_arg<'a>(args: &'a JobArgs, key: &str) -> Result<&'a str, JobError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| JobError::new("KeyError", format!("missing string argument '{}'", key)))
}

fn seconds(value: f64) -> Result<Duration, JobError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| JobError::new("ValueError", format!("invalid duration {}: {}", value, e)))
}

fn sleep(args: &JobArgs) -> Result<Value, JobError> {
    let secs = f64_arg(args, "seconds", 1.0)?;
    std::thread::sleep(seconds(secs)?);

    Ok(match args.get("value") {
        Some(value) => value.clone(),
        None => json!(secs),
    })
}

fn fail(args: &JobArgs) -> Result<Value, JobError> {
    let kind = args.get("kind").and_then(Value::as_str).unwrap_or("ValueError");
    let message = args.get("message").and_then(Value::as_str).unwrap_or("boom");
    Err(JobError::new(kind, message))
}

fn panic(args: &JobArgs) -> Result<Value, JobError> {
    let message = args
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("job panicked on purpose");
    panic!("{}", message)
}

fn exit(args: &JobArgs) -> Result<Value, JobError> {
    let code = args.get("code").and_then(Value::as_i64).unwrap_or(1);
    std::process::exit(code as i32)
}

fn touch(args: &JobArgs) -> Result<Value, JobError> {
    let path = PathBuf::from(str_arg(args, "path")?);
    std::thread::sleep(seconds(f64_arg(args, "delay", 0.0)?)?);

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    Ok(json!(path.display().to_string()))
}

fn shell(args: &JobArgs) -> Result<Value, JobError> {
    let command = str_arg(args, "command")?;
    let output = Command::new("sh").arg("-c").arg(command).output()?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(JobError::new(
            "ShellError",
            format!("`{}` exited with {}: {}", command, output.status, stderr.trim_end()),
        ));
    }
    Ok(json!(stdout))
}

fn spawn_children(args: &JobArgs) -> Result<Value, JobError> {
    let count = u64_arg(args, "count", 2)?;
    let secs = f64_arg(args, "seconds", 60.0)?;

    let mut children = Vec::new();
    for _ in 0..count {
        children.push(Command::new("sleep").arg(secs.to_string()).spawn()?);
    }
    let pids: Vec<u32> = children.iter().map(|c| c.id()).collect();

    if let Some(pid_file) = args.get("pid_file").and_then(Value::as_str) {
        let contents: Vec<String> = pids.iter().map(u32::to_string).collect();
        std::fs::write(pid_file, contents.join("\n") + "\n")?;
    }

    for mut child in children {
        child.wait()?;
    }
    Ok(json!(pids))
}

fn dummy_train(args: &JobArgs) -> Result<Value, JobError> {
    let epochs = u64_arg(args, "epochs", 5)?;
    let step = seconds(f64_arg(args, "step", 0.1)?)?;
    let lr = f64_arg(args, "lr", 0.1)?;

    let mut rng = rand::thread_rng();
    let mut loss: f64 = 1.0;
    let mut history = Vec::with_capacity(epochs as usize);

    for epoch in 1..=epochs {
        std::thread::sleep(step);
        loss = (loss * (1.0 - lr) + rng.gen_range(-0.02..0.02)).max(0.0);
        history.push(loss);
        println!("epoch={} loss={:.4}", epoch, loss);
    }

    Ok(json!({
        "epochs": epochs,
        "final_loss": loss,
        "loss_history": history,
    }))
}
