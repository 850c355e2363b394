//! # dashdeep-task
//!
//! Task lifecycle management for dashdeep.
//! Runs every scheduled job in its own worker process and tracks it through
//! `Pending -> Running -> {Finished, Failed, Cancelled}`.
//!
//! ## Features
//!
//! - Task manager with an ordered handle registry
//! - Process pool with per-task worker quarantine
//! - Cancellation that ends the worker's whole process group
//! - Idempotent shutdown that never orphans a worker
//! - Read-only status projection for display

pub mod job;
pub mod manager;
pub mod pool;
pub mod projection;
pub mod protocol;
pub mod state;
pub mod task;
pub mod worker;

// Task system
pub use manager::{TaskManager, TaskManagerConfig, TaskStats};
pub use state::{FailureKind, TaskFailure, TaskState};
pub use task::{CancelRequest, TaskHandle, TaskId, TaskSnapshot};

// Jobs
pub use job::{FnJob, Job, JobArgs, JobError, JobRef, JobRegistry};

// Process pool
pub use pool::{process_alive, PoolConfig, ProcessPool, ShutdownReport, WorkerCommand};

// Display
pub use projection::{project, record_for, render_table, TaskRecord, NO_ERROR};

// Worker side
pub use worker::{run_stdio_worker, run_worker};
