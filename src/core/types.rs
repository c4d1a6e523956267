//! Core types used throughout the scanqueue library.
//!
//! This module defines job identities, the per-job state machine as seen by
//! the manager, how a job left the running slot, and the kill commands
//! callers can issue.

use crate::core::error::KillCommandParseError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identity of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a job is being killed.
///
/// The manager only forwards the command to the job; the job uses it to
/// decide which terminal status to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillCommand {
    /// The user cancelled the job.
    Cancel,
    /// The user paused the job; it may be enqueued again later.
    Pause,
    /// The job exceeded the configured job timeout.
    Timeout,
    /// The manager is shutting down.
    Shutdown,
}

impl KillCommand {
    /// Returns the command as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Pause => "pause",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for KillCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KillCommand {
    type Err = KillCommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cancel" => Ok(Self::Cancel),
            "pause" => Ok(Self::Pause),
            "timeout" => Ok(Self::Timeout),
            "shutdown" => Ok(Self::Shutdown),
            _ => Err(KillCommandParseError(s.to_string())),
        }
    }
}

/// How a job left the running slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobExit {
    /// The worker finished normally.
    Completed,

    /// The worker finished with an error.
    Failed {
        /// Process exit code, if the worker was a process.
        code: Option<i32>,
        /// Error message, if the worker reported one.
        message: Option<String>,
    },

    /// The worker panicked.
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The worker was killed by the manager.
    Killed {
        /// The command that caused the kill.
        command: KillCommand,
    },

    /// The worker could not be started.
    StartFailed {
        /// Why the start failed.
        reason: String,
    },

    /// The worker's status could not be read for too many polls in a row.
    Unresponsive {
        /// The last status error.
        reason: String,
    },
}

impl JobExit {
    /// Returns `true` if the worker finished normally.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns the kill command, if the job was killed.
    pub fn kill_command(&self) -> Option<KillCommand> {
        match self {
            Self::Killed { command } => Some(*command),
            _ => None,
        }
    }

    /// Returns the scan-task status this exit maps to.
    pub fn task_status(&self) -> TaskStatus {
        match self {
            Self::Completed => TaskStatus::Completed,
            Self::Killed {
                command: KillCommand::Cancel | KillCommand::Shutdown,
            } => TaskStatus::Canceled,
            Self::Killed {
                command: KillCommand::Pause,
            } => TaskStatus::Paused,
            Self::Killed {
                command: KillCommand::Timeout,
            }
            | Self::Failed { .. }
            | Self::Panicked { .. }
            | Self::StartFailed { .. }
            | Self::Unresponsive { .. } => TaskStatus::Failed,
        }
    }
}

impl fmt::Display for JobExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed {
                code: Some(code), ..
            } => write!(f, "failed (exit code {code})"),
            Self::Failed {
                message: Some(message),
                ..
            } => write!(f, "failed: {message}"),
            Self::Failed { .. } => write!(f, "failed"),
            Self::Panicked { message } => write!(f, "panicked: {message}"),
            Self::Killed { command } => write!(f, "killed ({command})"),
            Self::StartFailed { reason } => write!(f, "start failed: {reason}"),
            Self::Unresponsive { reason } => write!(f, "unresponsive: {reason}"),
        }
    }
}

/// State of a job as observed by the manager.
///
/// Transitions only move forward: `Queued` to `Running` to `Finished`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the scan queue.
    Queued,
    /// Occupying the manager's execution slot.
    Running,
    /// Left the execution slot. Terminal.
    Finished {
        /// How the job finished.
        exit: JobExit,
    },
}

impl JobState {
    /// Returns the name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished { .. } => "finished",
        }
    }

    /// Returns `true` if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }

    /// Returns the exit, if finished.
    pub fn exit(&self) -> Option<&JobExit> {
        match self {
            Self::Finished { exit } => Some(exit),
            _ => None,
        }
    }

    /// Returns the scan-task status this state maps to.
    pub fn task_status(&self) -> TaskStatus {
        match self {
            Self::Queued => TaskStatus::Pending,
            Self::Running => TaskStatus::Running,
            Self::Finished { exit } => exit.task_status(),
        }
    }
}

/// Status vocabulary of the persisted scan task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to run.
    Pending,
    /// Currently running.
    Running,
    /// Paused by a user; may be resumed.
    Paused,
    /// Cancelled by a user or by shutdown.
    Canceled,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Canceled => write!(f, "canceled"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
