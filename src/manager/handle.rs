//! Observable handles for queued jobs.

use crate::core::{JobExit, JobId, JobState};

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A handle to a job submitted to the manager.
///
/// Clones share state, so the handle returned by `put_tracked` sees every
/// transition the manager makes.
#[derive(Debug, Clone)]
pub struct JobHandle {
    /// Identity of the job.
    pub id: JobId,
    /// Label of the job.
    pub label: String,
    status: Arc<RwLock<HandleStatus>>,
}

#[derive(Debug, Clone)]
struct HandleStatus {
    state: JobState,
    queued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobHandle {
    /// Creates a handle in the `Queued` state.
    pub(crate) fn new(id: JobId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            status: Arc::new(RwLock::new(HandleStatus {
                state: JobState::Queued,
                queued_at: Utc::now(),
                started_at: None,
                finished_at: None,
            })),
        }
    }

    /// Returns the current state of the job.
    pub fn state(&self) -> JobState {
        self.read().state
    }

    /// Returns true if the job is still waiting in the queue.
    pub fn is_queued(&self) -> bool {
        matches!(self.state(), JobState::Queued)
    }

    /// Returns true if the job occupies the running slot.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), JobState::Running)
    }

    /// Returns true if the job has left the running slot.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns how the job finished, if it has.
    pub fn exit(&self) -> Option<JobExit> {
        self.state().exit().cloned()
    }

    /// When the job was put on the queue.
    pub fn queued_at(&self) -> DateTime<Utc> {
        self.read().queued_at
    }

    /// When the job was started, if it has been.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.read().started_at
    }

    /// When the job finished, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.read().finished_at
    }

    /// Sets the status to running.
    pub(crate) fn set_running(&self) {
        let mut status = self.write();
        status.state = JobState::Running;
        status.started_at = Some(Utc::now());
    }

    /// Sets the status to finished with the given exit.
    pub(crate) fn set_finished(&self, exit: JobExit) {
        let mut status = self.write();
        status.state = JobState::Finished { exit };
        status.finished_at = Some(Utc::now());
    }

    /// Waits for the job to finish and returns its exit.
    pub async fn wait(&self) -> JobExit {
        loop {
            if let Some(exit) = self.exit() {
                return exit;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn read(&self) -> HandleStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HandleStatus> {
        self.status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::KillCommand;

    #[test]
    fn test_job_handle() {
        let handle = JobHandle::new(JobId::new(), "inventory");
        assert!(handle.is_queued());
        assert!(!handle.is_running());
        assert!(!handle.is_finished());
        assert!(handle.started_at().is_none());
    }

    #[test]
    fn test_job_handle_transitions() {
        let handle = JobHandle::new(JobId::new(), "inventory");
        let observer = handle.clone();

        handle.set_running();
        assert!(observer.is_running());
        assert!(observer.started_at().is_some());

        handle.set_finished(JobExit::Killed {
            command: KillCommand::Cancel,
        });
        assert!(observer.is_finished());
        assert_eq!(
            observer.exit(),
            Some(JobExit::Killed {
                command: KillCommand::Cancel
            })
        );
        assert!(observer.finished_at() >= observer.started_at());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_finish() {
        let handle = JobHandle::new(JobId::new(), "inventory");
        let finisher = handle.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            finisher.set_finished(JobExit::Completed);
        });

        let exit = tokio::time::timeout(Duration::from_secs(2), handle.wait())
            .await
            .unwrap();
        assert_eq!(exit, JobExit::Completed);
    }
}
