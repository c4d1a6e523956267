//! In-process jobs backed by tokio tasks.
//!
//! A panic inside the task is contained by the task boundary and reported as
//! [`JobExit::Panicked`]; it never reaches the scheduling loop.

use crate::core::{Job, JobError, JobExit, JobId, KillCommand};
use crate::jobs::panic_message;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};

type TaskOutput = Result<(), String>;
type TaskFactory = Box<dyn FnOnce() -> BoxFuture<'static, TaskOutput> + Send>;

/// A job whose work is an async closure run on the tokio runtime.
///
/// # Example
///
/// ```rust,ignore
/// use scanqueue::jobs::TaskJob;
///
/// let job = TaskJob::new("fingerprint", || async {
///     run_fingerprinting().await.map_err(|e| e.to_string())
/// });
/// manager.put(job);
/// ```
pub struct TaskJob {
    id: JobId,
    label: String,
    factory: Option<TaskFactory>,
    handle: Option<JoinHandle<TaskOutput>>,
    killed: Option<KillCommand>,
    exit: Option<JobExit>,
}

impl TaskJob {
    /// Creates a job that runs the future produced by `work` when started.
    ///
    /// An `Err` from the future finishes the job as [`JobExit::Failed`].
    pub fn new<F, Fut>(label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            id: JobId::new(),
            label: label.into(),
            factory: Some(Box::new(move || work().boxed())),
            handle: None,
            killed: None,
            exit: None,
        }
    }

    /// Sets the identity.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    fn settle(&mut self, joined: Result<TaskOutput, JoinError>) -> JobExit {
        let exit = match joined {
            Ok(Ok(())) => JobExit::Completed,
            Ok(Err(message)) => JobExit::Failed {
                code: None,
                message: Some(message),
            },
            Err(e) if e.is_panic() => JobExit::Panicked {
                message: panic_message(e.into_panic().as_ref()),
            },
            Err(_) => JobExit::Killed {
                command: self.killed.unwrap_or(KillCommand::Cancel),
            },
        };
        self.handle = None;
        self.exit = Some(exit.clone());
        exit
    }
}

impl fmt::Debug for TaskJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskJob")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("started", &self.factory.is_none())
            .field("exit", &self.exit)
            .finish()
    }
}

#[async_trait]
impl Job for TaskJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn start(&mut self) -> Result<(), JobError> {
        let factory = self
            .factory
            .take()
            .ok_or_else(|| JobError::internal(format!("job '{}' already started", self.label)))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| JobError::internal(format!("no tokio runtime: {e}")))?;
        self.handle = Some(runtime.spawn(factory()));
        Ok(())
    }

    fn try_exit(&mut self) -> Result<Option<JobExit>, JobError> {
        if let Some(exit) = &self.exit {
            return Ok(Some(exit.clone()));
        }
        let handle = self.handle.as_mut().ok_or(JobError::NotStarted)?;
        if !handle.is_finished() {
            return Ok(None);
        }
        match handle.now_or_never() {
            Some(joined) => Ok(Some(self.settle(joined))),
            None => Ok(None),
        }
    }

    fn terminate(&mut self, command: KillCommand) -> Result<(), JobError> {
        if self.exit.is_some() {
            return Ok(());
        }
        let handle = self.handle.as_ref().ok_or(JobError::NotStarted)?;
        self.killed = Some(command);
        handle.abort();
        Ok(())
    }

    async fn wait(&mut self) -> Result<JobExit, JobError> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }
        let handle = self.handle.as_mut().ok_or(JobError::NotStarted)?;
        let joined = handle.await;
        Ok(self.settle(joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn poll_exit(job: &mut TaskJob) -> JobExit {
        for _ in 0..200 {
            if let Some(exit) = job.try_exit().unwrap() {
                return exit;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task job did not finish");
    }

    #[tokio::test]
    async fn test_task_completes() {
        let mut job = TaskJob::new("ok", || async { Ok(()) });
        assert!(matches!(job.try_exit(), Err(JobError::NotStarted)));

        job.start().unwrap();
        assert_eq!(poll_exit(&mut job).await, JobExit::Completed);
        assert_eq!(job.try_exit().unwrap(), Some(JobExit::Completed));
    }

    #[tokio::test]
    async fn test_task_failure() {
        let mut job = TaskJob::new("err", || async { Err("host unreachable".to_string()) });
        job.start().unwrap();

        assert_eq!(
            poll_exit(&mut job).await,
            JobExit::Failed {
                code: None,
                message: Some("host unreachable".into())
            }
        );
    }

    #[tokio::test]
    async fn test_task_panic_is_isolated() {
        let mut job = TaskJob::new("panics", || async {
            if true {
                panic!("inspection blew up");
            }
            Ok(())
        });
        job.start().unwrap();

        assert_eq!(
            poll_exit(&mut job).await,
            JobExit::Panicked {
                message: "inspection blew up".into()
            }
        );
    }

    #[tokio::test]
    async fn test_task_terminate() {
        let mut job = TaskJob::new("forever", || async {
            std::future::pending::<()>().await;
            Ok(())
        });
        job.start().unwrap();
        assert_eq!(job.try_exit().unwrap(), None);

        job.terminate(KillCommand::Pause).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(2), job.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            exit,
            JobExit::Killed {
                command: KillCommand::Pause
            }
        );
    }

    #[tokio::test]
    async fn test_task_start_twice() {
        let mut job = TaskJob::new("once", || async { Ok(()) });
        job.start().unwrap();
        assert!(matches!(job.start(), Err(JobError::Internal { .. })));
    }
}
