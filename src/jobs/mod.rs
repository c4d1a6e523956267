//! Job implementations.
//!
//! This module contains implementations of the `Job` trait for the kinds of
//! workers the manager can supervise.
//!
//! ## Available Jobs
//!
//! - [`process`] - An external program in its own OS process
//! - [`task`] - An async closure on the tokio runtime
//! - [`mock`] - A scriptable job and recording sink for testing
//!
//! ## Implementing a Custom Job
//!
//! Implement the `Job` trait. `start`, `try_exit` and `terminate` are called
//! from the scheduling loop and must return promptly:
//!
//! ```rust,ignore
//! use scanqueue::core::{Job, JobError, JobExit, JobId, KillCommand};
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! pub struct RemoteScan {
//!     id: JobId,
//!     // Your worker's state
//! }
//!
//! #[async_trait]
//! impl Job for RemoteScan {
//!     fn id(&self) -> JobId { self.id }
//!     fn label(&self) -> &str { "remote-scan" }
//!     fn start(&mut self) -> Result<(), JobError> { todo!() }
//!     fn try_exit(&mut self) -> Result<Option<JobExit>, JobError> { todo!() }
//!     fn terminate(&mut self, command: KillCommand) -> Result<(), JobError> { todo!() }
//!     async fn wait(&mut self) -> Result<JobExit, JobError> { todo!() }
//! }
//! ```

pub mod mock;
pub mod process;
pub mod task;

// Re-exports
pub use mock::{ConcurrencyGauge, MockBehavior, MockJob, MockProbe, RecordingSink};
pub use process::ProcessJob;
pub use task::TaskJob;

use std::any::Any;

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
