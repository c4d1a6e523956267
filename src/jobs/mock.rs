//! Mock jobs for testing.
//!
//! This module provides a scriptable job that never touches the OS, a probe
//! for observing what the manager did to it, a gauge for checking how many
//! jobs ran at once, and a status sink that records every transition.

use crate::core::{Job, JobError, JobExit, JobId, JobState, JobStatusSink, KillCommand};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What a mock job does once started.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Finish once this much time has passed since `start`.
    RunFor(Duration),
    /// Keep running until terminated.
    UntilKilled,
    /// Fail in `start`.
    FailToStart,
}

/// A mock job for testing purposes.
///
/// # Examples
///
/// ```rust
/// use scanqueue::jobs::MockJob;
/// use scanqueue::core::JobExit;
/// use std::time::Duration;
///
/// // Finishes on the first status check
/// let job = MockJob::instant();
///
/// // Runs for a while, then reports a failure
/// let job = MockJob::running_for(Duration::from_millis(50))
///     .with_label("slow")
///     .with_exit(JobExit::Failed { code: Some(1), message: None });
///
/// // Runs until the manager kills it
/// let job = MockJob::until_killed();
/// let probe = job.probe();
/// assert!(!probe.is_started());
/// ```
#[derive(Debug)]
pub struct MockJob {
    id: JobId,
    label: String,
    behavior: MockBehavior,
    exit: JobExit,
    status_errors: u32,
    panic_on_status: bool,
    terminate_failures: u32,
    kill_lag: u32,
    killed: Option<KillCommand>,
    probe: MockProbe,
    gauge: Option<ConcurrencyGauge>,
    started_at: Option<Instant>,
    finished: Option<JobExit>,
}

impl MockJob {
    /// Creates a mock job with the given behavior.
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            id: JobId::new(),
            label: "mock".to_string(),
            behavior,
            exit: JobExit::Completed,
            status_errors: 0,
            panic_on_status: false,
            terminate_failures: 0,
            kill_lag: 0,
            killed: None,
            probe: MockProbe::default(),
            gauge: None,
            started_at: None,
            finished: None,
        }
    }

    /// Creates a job that finishes on its first status check.
    pub fn instant() -> Self {
        Self::new(MockBehavior::RunFor(Duration::ZERO))
    }

    /// Creates a job that finishes after `duration`.
    pub fn running_for(duration: Duration) -> Self {
        Self::new(MockBehavior::RunFor(duration))
    }

    /// Creates a job that runs until it is terminated.
    pub fn until_killed() -> Self {
        Self::new(MockBehavior::UntilKilled)
    }

    /// Creates a job whose `start` fails.
    pub fn failing_to_start() -> Self {
        Self::new(MockBehavior::FailToStart)
    }

    /// Sets the identity.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the exit reported when the job finishes on its own.
    pub fn with_exit(mut self, exit: JobExit) -> Self {
        self.exit = exit;
        self
    }

    /// Makes the next `count` status checks fail with a transient error.
    pub fn with_status_errors(mut self, count: u32) -> Self {
        self.status_errors = count;
        self
    }

    /// Makes every status check panic.
    pub fn with_panicking_status(mut self) -> Self {
        self.panic_on_status = true;
        self
    }

    /// Makes the next `count` calls to `terminate` fail.
    pub fn with_terminate_failures(mut self, count: u32) -> Self {
        self.terminate_failures = count;
        self
    }

    /// Keeps reporting the job as running for `polls` status checks after it
    /// has been terminated.
    pub fn with_kill_lag(mut self, polls: u32) -> Self {
        self.kill_lag = polls;
        self
    }

    /// Tracks this job in a shared concurrency gauge.
    pub fn with_gauge(mut self, gauge: ConcurrencyGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Returns a probe observing this job.
    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    fn finish(&mut self, exit: JobExit) -> JobExit {
        if self.finished.is_none() {
            if let Some(gauge) = &self.gauge {
                gauge.leave();
            }
            self.probe.inner.finished.store(true, Ordering::SeqCst);
            self.finished = Some(exit.clone());
        }
        exit
    }
}

#[async_trait]
impl Job for MockJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn start(&mut self) -> Result<(), JobError> {
        self.probe.inner.start_calls.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior, MockBehavior::FailToStart) {
            return Err(JobError::spawn_failed(
                self.label.clone(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "mock start failure"),
            ));
        }
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        self.started_at = Some(Instant::now());
        self.probe.inner.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn try_exit(&mut self) -> Result<Option<JobExit>, JobError> {
        self.probe.inner.status_checks.fetch_add(1, Ordering::SeqCst);
        if let Some(exit) = &self.finished {
            return Ok(Some(exit.clone()));
        }
        let Some(started_at) = self.started_at else {
            return Err(JobError::NotStarted);
        };
        if let Some(command) = self.killed {
            if self.kill_lag > 0 {
                self.kill_lag -= 1;
                return Ok(None);
            }
            return Ok(Some(self.finish(JobExit::Killed { command })));
        }
        if self.panic_on_status {
            panic!("mock status check panicked");
        }
        if self.status_errors > 0 {
            self.status_errors -= 1;
            return Err(JobError::status_unavailable("mock status error"));
        }
        match self.behavior {
            MockBehavior::RunFor(duration) if started_at.elapsed() >= duration => {
                let exit = self.exit.clone();
                Ok(Some(self.finish(exit)))
            }
            _ => Ok(None),
        }
    }

    fn terminate(&mut self, command: KillCommand) -> Result<(), JobError> {
        self.probe
            .inner
            .terminate_calls
            .fetch_add(1, Ordering::SeqCst);
        if self.terminate_failures > 0 {
            self.terminate_failures -= 1;
            return Err(JobError::terminate_failed("mock terminate failure"));
        }
        *self
            .probe
            .inner
            .terminated_with
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(command);
        if self.kill_lag == 0 {
            self.finish(JobExit::Killed { command });
        } else {
            self.killed = Some(command);
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<JobExit, JobError> {
        self.probe.inner.waited.store(true, Ordering::SeqCst);
        loop {
            match self.try_exit() {
                Ok(Some(exit)) => return Ok(exit),
                Err(JobError::NotStarted) => return Err(JobError::NotStarted),
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }
}

/// Observes what happened to a [`MockJob`] after it was handed to the manager.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    inner: Arc<ProbeInner>,
}

#[derive(Debug, Default)]
struct ProbeInner {
    started: AtomicBool,
    finished: AtomicBool,
    waited: AtomicBool,
    start_calls: AtomicU32,
    terminate_calls: AtomicU32,
    status_checks: AtomicU64,
    terminated_with: Mutex<Option<KillCommand>>,
}

impl MockProbe {
    /// Returns true once `start` succeeded.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Returns true once the job reported an exit or was terminated.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Returns true if someone awaited the job's exit.
    pub fn was_waited(&self) -> bool {
        self.inner.waited.load(Ordering::SeqCst)
    }

    /// Number of times `start` was called.
    pub fn start_calls(&self) -> u32 {
        self.inner.start_calls.load(Ordering::SeqCst)
    }

    /// Number of times `terminate` was called, including failed calls.
    pub fn terminate_calls(&self) -> u32 {
        self.inner.terminate_calls.load(Ordering::SeqCst)
    }

    /// Number of times `try_exit` was called.
    pub fn status_checks(&self) -> u64 {
        self.inner.status_checks.load(Ordering::SeqCst)
    }

    /// The command passed to `terminate`, if it was called.
    pub fn terminated_with(&self) -> Option<KillCommand> {
        *self
            .inner
            .terminated_with
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Counts how many gauged jobs are running at once.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGauge {
    inner: Arc<GaugeInner>,
}

#[derive(Debug, Default)]
struct GaugeInner {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    /// Creates a gauge at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of gauged jobs running now.
    pub fn current(&self) -> usize {
        self.inner.current.load(Ordering::SeqCst)
    }

    /// Highest number of gauged jobs ever running at once.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.inner
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |val| {
                Some(val.saturating_sub(1))
            })
            .ok();
    }
}

/// A status sink that keeps every transition in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(JobId, JobState)>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded transition in order.
    pub fn records(&self) -> Vec<(JobId, JobState)> {
        self.lock().clone()
    }

    /// Returns the states recorded for one job, in order.
    pub fn states_for(&self, id: JobId) -> Vec<JobState> {
        self.lock()
            .iter()
            .filter(|(job, _)| *job == id)
            .map(|(_, state)| state.clone())
            .collect()
    }

    /// Returns job ids in the order they entered `Running`.
    pub fn started_order(&self) -> Vec<JobId> {
        self.lock()
            .iter()
            .filter(|(_, state)| matches!(state, JobState::Running))
            .map(|(job, _)| *job)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(JobId, JobState)>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobStatusSink for RecordingSink {
    fn record(&self, id: JobId, _label: &str, state: &JobState) {
        self.lock().push((id, state.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_job() {
        let mut job = MockJob::instant();
        let probe = job.probe();

        assert!(matches!(job.try_exit(), Err(JobError::NotStarted)));
        job.start().unwrap();
        assert!(probe.is_started());
        assert_eq!(job.try_exit().unwrap(), Some(JobExit::Completed));
        assert!(probe.is_finished());
        assert_eq!(probe.status_checks(), 2);
    }

    #[test]
    fn test_until_killed_job() {
        let mut job = MockJob::until_killed();
        let probe = job.probe();

        job.start().unwrap();
        assert_eq!(job.try_exit().unwrap(), None);

        job.terminate(KillCommand::Pause).unwrap();
        assert_eq!(probe.terminated_with(), Some(KillCommand::Pause));
        assert_eq!(
            job.try_exit().unwrap(),
            Some(JobExit::Killed {
                command: KillCommand::Pause
            })
        );
    }

    #[test]
    fn test_transient_status_errors() {
        let mut job = MockJob::instant().with_status_errors(2);
        job.start().unwrap();

        assert!(job.try_exit().unwrap_err().is_transient());
        assert!(job.try_exit().unwrap_err().is_transient());
        assert_eq!(job.try_exit().unwrap(), Some(JobExit::Completed));
    }

    #[test]
    fn test_terminate_failures() {
        let mut job = MockJob::until_killed().with_terminate_failures(1);
        let probe = job.probe();
        job.start().unwrap();

        assert!(matches!(
            job.terminate(KillCommand::Cancel),
            Err(JobError::TerminateFailed { .. })
        ));
        assert_eq!(probe.terminated_with(), None);
        assert_eq!(job.try_exit().unwrap(), None);

        job.terminate(KillCommand::Cancel).unwrap();
        assert_eq!(probe.terminate_calls(), 2);
        assert!(job.try_exit().unwrap().is_some());
    }

    #[test]
    fn test_kill_lag() {
        let mut job = MockJob::until_killed().with_kill_lag(2);
        let probe = job.probe();
        job.start().unwrap();
        job.terminate(KillCommand::Timeout).unwrap();

        assert!(!probe.is_finished());
        assert_eq!(job.try_exit().unwrap(), None);
        assert_eq!(job.try_exit().unwrap(), None);
        assert_eq!(
            job.try_exit().unwrap(),
            Some(JobExit::Killed {
                command: KillCommand::Timeout
            })
        );
        assert!(probe.is_finished());
    }

    #[test]
    fn test_failing_to_start() {
        let mut job = MockJob::failing_to_start();
        let probe = job.probe();

        assert!(matches!(job.start(), Err(JobError::SpawnFailed { .. })));
        assert_eq!(probe.start_calls(), 1);
        assert!(!probe.is_started());
    }

    #[test]
    fn test_gauge_tracks_running_jobs() {
        let gauge = ConcurrencyGauge::new();
        let mut a = MockJob::until_killed().with_gauge(gauge.clone());
        let mut b = MockJob::until_killed().with_gauge(gauge.clone());

        a.start().unwrap();
        b.start().unwrap();
        assert_eq!(gauge.current(), 2);

        a.terminate(KillCommand::Cancel).unwrap();
        a.terminate(KillCommand::Cancel).unwrap();
        assert_eq!(gauge.current(), 1);
        assert_eq!(gauge.peak(), 2);
    }

    #[tokio::test]
    async fn test_wait_after_terminate() {
        let mut job = MockJob::until_killed();
        let probe = job.probe();
        job.start().unwrap();
        job.terminate(KillCommand::Shutdown).unwrap();

        let exit = job.wait().await.unwrap();
        assert_eq!(exit.kill_command(), Some(KillCommand::Shutdown));
        assert!(probe.was_waited());
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        let a = JobId::new();
        let b = JobId::new();

        sink.record(a, "a", &JobState::Queued);
        sink.record(b, "b", &JobState::Queued);
        sink.record(b, "b", &JobState::Running);
        sink.record(a, "a", &JobState::Running);

        assert_eq!(sink.started_order(), vec![b, a]);
        assert_eq!(sink.states_for(a), vec![JobState::Queued, JobState::Running]);
        assert_eq!(sink.records().len(), 4);
    }
}
