//! Error types for the scanqueue library.
//!
//! Manager-level failures (start, configuration) and job-level failures
//! (spawn, liveness checks, termination) are kept apart: the former are
//! surfaced to the caller, the latter are absorbed by the scheduling loop.

use thiserror::Error;

/// Errors returned by the scan manager itself.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `start()` was called while the scheduling loop is still alive.
    #[error("scan manager is already running")]
    AlreadyRunning,

    /// No tokio runtime was available to host the scheduling loop.
    #[error("cannot start scan manager: {reason}")]
    RuntimeUnavailable {
        /// Why the loop could not be spawned.
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl ManagerError {
    /// Creates a `RuntimeUnavailable` error.
    pub fn runtime_unavailable(reason: impl Into<String>) -> Self {
        Self::RuntimeUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Errors raised by a job's underlying worker.
///
/// The manager never propagates these to its callers. A failed start
/// finishes the job; a failed liveness check is retried on the next poll.
#[derive(Debug, Error)]
pub enum JobError {
    /// The worker could not be spawned.
    #[error("failed to spawn job '{label}': {source}")]
    SpawnFailed {
        /// Label of the job.
        label: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The worker's exit status could not be read right now.
    #[error("job status unavailable: {reason}")]
    StatusUnavailable {
        /// Why the status could not be read.
        reason: String,
    },

    /// The termination signal could not be delivered.
    #[error("failed to terminate job: {reason}")]
    TerminateFailed {
        /// Why termination failed.
        reason: String,
    },

    /// The job was queried before `start()` was called.
    #[error("job has not been started")]
    NotStarted,

    /// Job code panicked while the manager was calling into it.
    #[error("job panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl JobError {
    /// Returns `true` if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StatusUnavailable { .. } | Self::Io(_))
    }

    /// Creates a `SpawnFailed` error.
    pub fn spawn_failed(label: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            label: label.into(),
            source,
        }
    }

    /// Creates a `StatusUnavailable` error.
    pub fn status_unavailable(reason: impl Into<String>) -> Self {
        Self::StatusUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a `TerminateFailed` error.
    pub fn terminate_failed(reason: impl Into<String>) -> Self {
        Self::TerminateFailed {
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Returned when a kill command string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown kill command '{0}'")]
pub struct KillCommandParseError(
    /// The rejected input.
    pub String,
);
