//! Jobs backed by OS subprocesses.
//!
//! Each job runs in its own process, so a crash or hang in the scan work
//! cannot corrupt the manager. The child is spawned with `kill_on_drop`, which
//! means dropping an unfinished job also kills its process.

use crate::core::{Job, JobError, JobExit, JobId, KillCommand};

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// A job that runs an external program.
///
/// # Example
///
/// ```rust,ignore
/// use scanqueue::jobs::ProcessJob;
///
/// let job = ProcessJob::new("ansible-playbook")
///     .with_label("inspect 10.0.0.0/24")
///     .arg("inspect.yml")
///     .env("SCAN_JOB_ID", "42");
/// manager.put(job);
/// ```
#[derive(Debug)]
pub struct ProcessJob {
    id: JobId,
    label: String,
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    child: Option<Child>,
    killed: Option<KillCommand>,
    exit: Option<JobExit>,
}

impl ProcessJob {
    /// Creates a job that will run `program`.
    pub fn new(program: impl Into<OsString>) -> Self {
        let program = program.into();
        Self {
            id: JobId::new(),
            label: program.to_string_lossy().into_owned(),
            program,
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            child: None,
            killed: None,
            exit: None,
        }
    }

    /// Sets the identity.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Sets the label. Defaults to the program name.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Adds an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the child.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Sets the child's working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Returns the OS process id while the child is running.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn settle(&mut self, status: ExitStatus) -> JobExit {
        let exit = match self.killed {
            Some(command) => JobExit::Killed { command },
            None if status.success() => JobExit::Completed,
            None => JobExit::Failed {
                code: status.code(),
                message: None,
            },
        };
        self.exit = Some(exit.clone());
        exit
    }
}

#[async_trait]
impl Job for ProcessJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn start(&mut self) -> Result<(), JobError> {
        if self.child.is_some() {
            return Err(JobError::internal(format!(
                "job '{}' already started",
                self.label
            )));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| JobError::spawn_failed(self.label.clone(), e))?;

        tracing::debug!(
            job_id = %self.id,
            label = %self.label,
            pid = ?child.id(),
            "Spawned job process"
        );

        self.child = Some(child);
        Ok(())
    }

    fn try_exit(&mut self) -> Result<Option<JobExit>, JobError> {
        if let Some(exit) = &self.exit {
            return Ok(Some(exit.clone()));
        }
        let child = self.child.as_mut().ok_or(JobError::NotStarted)?;
        match child.try_wait()? {
            Some(status) => Ok(Some(self.settle(status))),
            None => Ok(None),
        }
    }

    fn terminate(&mut self, command: KillCommand) -> Result<(), JobError> {
        if self.exit.is_some() {
            return Ok(());
        }
        let child = self.child.as_mut().ok_or(JobError::NotStarted)?;
        match child.start_kill() {
            Ok(()) => {
                self.killed = Some(command);
                Ok(())
            }
            // Already reaped.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                self.killed = Some(command);
                Ok(())
            }
            Err(e) => Err(JobError::terminate_failed(e.to_string())),
        }
    }

    async fn wait(&mut self) -> Result<JobExit, JobError> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }
        let child = self.child.as_mut().ok_or(JobError::NotStarted)?;
        let status = child.wait().await?;
        Ok(self.settle(status))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn poll_exit(job: &mut ProcessJob) -> JobExit {
        for _ in 0..400 {
            if let Some(exit) = job.try_exit().unwrap() {
                return exit;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("process job did not finish");
    }

    #[tokio::test]
    async fn test_process_completes() {
        let mut job = ProcessJob::new("true");
        assert_eq!(job.label(), "true");
        assert!(matches!(job.try_exit(), Err(JobError::NotStarted)));

        job.start().unwrap();
        assert_eq!(poll_exit(&mut job).await, JobExit::Completed);
    }

    #[tokio::test]
    async fn test_process_exit_code() {
        let mut job = ProcessJob::new("sh").args(["-c", "exit 3"]);
        job.start().unwrap();

        assert_eq!(
            poll_exit(&mut job).await,
            JobExit::Failed {
                code: Some(3),
                message: None
            }
        );
    }

    #[tokio::test]
    async fn test_process_env() {
        let mut job = ProcessJob::new("sh")
            .args(["-c", "test \"$SCAN_TARGET\" = lab"])
            .env("SCAN_TARGET", "lab");
        job.start().unwrap();
        assert_eq!(poll_exit(&mut job).await, JobExit::Completed);
    }

    #[tokio::test]
    async fn test_process_terminate() {
        let mut job = ProcessJob::new("sleep").arg("30").with_label("sleeper");
        job.start().unwrap();
        assert!(job.pid().is_some());
        assert_eq!(job.try_exit().unwrap(), None);

        job.terminate(KillCommand::Cancel).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), job.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            exit,
            JobExit::Killed {
                command: KillCommand::Cancel
            }
        );
    }

    #[tokio::test]
    async fn test_process_spawn_failure() {
        let mut job = ProcessJob::new("/nonexistent/scan-worker");
        let err = job.start().unwrap_err();
        assert!(matches!(err, JobError::SpawnFailed { .. }));
    }
}
