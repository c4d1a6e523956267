//! # Scanqueue
//!
//! A single-slot job manager for scan workloads: a FIFO queue, at most one
//! running job, liveness polling, and kill-by-identity.
//!
//! ## Overview
//!
//! Request handlers enqueue scan jobs; a long-lived scheduling loop runs
//! them strictly one after another. Scanqueue lets you:
//!
//! - Enqueue jobs from any thread without blocking on the loop
//! - Run each job in its own OS process or isolated tokio task
//! - Kill the running job by id, with a reason the job can persist
//! - Report every job transition to your persistence layer
//! - Shut down without orphaning the running job
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scanqueue::{KillCommand, ScanManager, ScanManagerConfig};
//! use scanqueue::jobs::ProcessJob;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ScanManager::builder()
//!         .with_config(ScanManagerConfig::from_env()?)
//!         .build()?;
//!     manager.start()?;
//!
//!     let handle = manager.put_tracked(ProcessJob::new("scan-worker").arg("--job=1"));
//!
//!     // From a cancel request:
//!     manager.kill(handle.id, KillCommand::Cancel);
//!
//!     let report = manager.stop().await;
//!     println!("{} jobs were never started", report.drained.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Core**: Job identities and states, the `Job` and `JobStatusSink` traits, errors
//! - **Manager**: Queue, execution slot, scheduling loop and configuration
//! - **Jobs**: Process-backed, task-backed and mock job implementations
//! - **Audit**: Structured `tracing` events for job transitions and heartbeats

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod audit;
pub mod core;
pub mod jobs;
pub mod manager;

// Re-export commonly used types at the crate root
pub use crate::core::{
    BoxedJob, Job, JobError, JobExit, JobId, JobState, JobStatusSink, KillCommand, ManagerError,
    TaskStatus,
};

pub use crate::jobs::{ProcessJob, TaskJob};
pub use crate::manager::{
    JobHandle, ManagerSnapshot, ScanManager, ScanManagerConfig, ShutdownReport, Tick,
};

/// Prelude module for convenient imports.
///
/// ```rust
/// use scanqueue::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        BoxedJob, Job, JobError, JobExit, JobId, JobState, JobStatusSink, KillCommand,
        ManagerError, TaskStatus,
    };
    pub use crate::jobs::{ProcessJob, TaskJob};
    pub use crate::manager::{
        JobHandle, ManagerSnapshot, ScanManager, ScanManagerConfig, ShutdownReport, Tick,
    };
}
