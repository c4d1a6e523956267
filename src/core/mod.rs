//! Core types and traits for the scanqueue library.
//!
//! This module provides the fundamental building blocks used throughout
//! the library:
//!
//! - [`types`] - Job identities, states, exits and kill commands
//! - [`traits`] - The `Job` worker trait and the `JobStatusSink` seam
//! - [`error`] - Structured error types

pub mod error;
pub mod traits;
pub mod types;

pub use error::{JobError, KillCommandParseError, ManagerError};
pub use traits::{BoxedJob, Job, JobStatusSink};
pub use types::{JobExit, JobId, JobState, KillCommand, TaskStatus};
