//! Core traits for the scanqueue library.
//!
//! This module defines the `Job` trait that every worker the manager can run
//! must implement, and the `JobStatusSink` trait through which the manager
//! reports job transitions to a persistence layer.

use crate::core::error::JobError;
use crate::core::types::{JobExit, JobId, JobState, KillCommand};

use async_trait::async_trait;
use std::fmt::Debug;

/// A unit of scan work with an underlying OS-level worker.
///
/// The manager drives a job through `start`, repeated `try_exit` polls and,
/// if it is killed, `terminate`. Everything except `wait` is called from the
/// scheduling loop while it holds the execution slot, so these calls must not
/// block.
///
/// # Implementation Notes
///
/// - Implementations must be `Send` so the manager can own them on its loop task.
/// - A job persists its own success or failure; the manager only tracks
///   whether it is still running.
/// - Panics inside these methods are caught by the manager and treated as
///   job errors, but implementations should return `JobError` instead.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use scanqueue::core::{Job, JobError, JobExit, JobId, KillCommand};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct Noop {
///     id: JobId,
///     done: bool,
/// }
///
/// #[async_trait]
/// impl Job for Noop {
///     fn id(&self) -> JobId {
///         self.id
///     }
///
///     fn label(&self) -> &str {
///         "noop"
///     }
///
///     fn start(&mut self) -> Result<(), JobError> {
///         self.done = true;
///         Ok(())
///     }
///
///     fn try_exit(&mut self) -> Result<Option<JobExit>, JobError> {
///         Ok(self.done.then_some(JobExit::Completed))
///     }
///
///     fn terminate(&mut self, _command: KillCommand) -> Result<(), JobError> {
///         Ok(())
///     }
///
///     async fn wait(&mut self) -> Result<JobExit, JobError> {
///         Ok(JobExit::Completed)
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Debug {
    /// Returns the identity used to find this job for `kill`.
    fn id(&self) -> JobId;

    /// Returns a human-readable label for logs.
    fn label(&self) -> &str;

    /// Begins executing the job's work without waiting for it.
    fn start(&mut self) -> Result<(), JobError>;

    /// Checks whether the worker has finished.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - The worker is still running.
    /// * `Ok(Some(exit))` - The worker has finished.
    /// * `Err(JobError)` - The status could not be read; the manager retries.
    fn try_exit(&mut self) -> Result<Option<JobExit>, JobError>;

    /// Forcefully stops the worker.
    ///
    /// This only delivers the signal. It must not wait for the worker to exit.
    fn terminate(&mut self, command: KillCommand) -> Result<(), JobError>;

    /// Waits for the worker to exit, typically after `terminate`.
    async fn wait(&mut self) -> Result<JobExit, JobError>;
}

/// Receives every job state transition observed by the manager.
///
/// Calls are made synchronously from inside the manager, so implementations
/// must be quick and must not call back into the manager.
pub trait JobStatusSink: Send + Sync + Debug {
    /// Records that the job identified by `id` entered `state`.
    fn record(&self, id: JobId, label: &str, state: &JobState);
}

/// A boxed job for type-erased storage.
pub type BoxedJob = Box<dyn Job>;
