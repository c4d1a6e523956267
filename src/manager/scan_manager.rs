//! The main scan manager implementation.

use crate::audit::{self, JobAuditEvent};
use crate::core::{
    BoxedJob, Job, JobError, JobExit, JobId, JobState, JobStatusSink, KillCommand, ManagerError,
};
use crate::jobs::panic_message;
use crate::manager::config::ScanManagerConfig;
use crate::manager::handle::JobHandle;
use crate::manager::queue::{QueuedJob, ScanQueue};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Builder for creating a `ScanManager`.
#[derive(Debug, Default)]
pub struct ScanManagerBuilder {
    config: ScanManagerConfig,
    sink: Option<Arc<dyn JobStatusSink>>,
}

impl ScanManagerBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: ScanManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the sink that receives every job transition.
    ///
    /// The sink is called after the manager has released its slot lock, so
    /// a slow sink never blocks `kill()`.
    pub fn with_status_sink(mut self, sink: Arc<dyn JobStatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the scan manager. The scheduling loop is not started.
    pub fn build(self) -> Result<ScanManager, ManagerError> {
        self.config.validate()?;

        Ok(ScanManager {
            inner: Arc::new(Shared {
                config: self.config,
                queue: ScanQueue::new(),
                slot: Mutex::new(None),
                sink: self.sink,
                supervisor: Mutex::new(None),
            }),
        })
    }
}

/// What a single call to [`ScanManager::work`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing running and nothing queued.
    Idle,
    /// The head of the queue was started.
    Started(JobId),
    /// The head of the queue failed to start and was finished.
    StartFailed(JobId),
    /// The current job is still running.
    StillRunning(JobId),
    /// The current job's status could not be read; it will be checked again.
    StatusError(JobId),
    /// The current job is being terminated and has not exited yet.
    Stopping(JobId),
    /// The current job finished and the slot is free.
    Finished(JobId),
    /// The current job exceeded the job timeout and is being terminated.
    TimedOut(JobId),
}

impl Tick {
    /// Returns the job this tick acted on, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Idle => None,
            Self::Started(id)
            | Self::StartFailed(id)
            | Self::StillRunning(id)
            | Self::StatusError(id)
            | Self::Stopping(id)
            | Self::Finished(id)
            | Self::TimedOut(id) => Some(*id),
        }
    }
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    /// Whether the scheduling loop is running.
    pub alive: bool,
    /// The job occupying the running slot.
    pub current: Option<CurrentJob>,
    /// Queued job ids, head first.
    pub queued: Vec<JobId>,
}

/// The job in the running slot, as shown in a [`ManagerSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentJob {
    /// Job identity.
    pub id: JobId,
    /// Job label.
    pub label: String,
    /// When the job was started.
    pub started_at: Option<DateTime<Utc>>,
    /// Whether the job has been signalled to terminate.
    pub stopping: bool,
}

/// What `stop()` did.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// The job that was running and has been terminated.
    pub terminated: Option<JobId>,
    /// Jobs that were still queued, head first. They were never started.
    pub drained: Vec<BoxedJob>,
}

/// Runs scan jobs one at a time from a FIFO queue.
///
/// The manager is cheap to clone; clones share the same queue and slot, so
/// one instance can be handed to request handlers and signal handlers alike.
/// Dropping the last clone ends the scheduling loop and terminates the
/// running job.
///
/// # Example
///
/// ```rust,ignore
/// use scanqueue::{ScanManager, ScanManagerConfig, KillCommand};
/// use scanqueue::jobs::ProcessJob;
///
/// let manager = ScanManager::builder()
///     .with_config(ScanManagerConfig::from_env()?)
///     .build()?;
/// manager.start()?;
///
/// let handle = manager.put_tracked(ProcessJob::new("scan-worker").arg("--job=7"));
/// // later, from a cancel request:
/// manager.kill(handle.id, KillCommand::Cancel);
/// ```
#[derive(Clone)]
pub struct ScanManager {
    inner: Arc<Shared>,
}

struct Shared {
    config: ScanManagerConfig,
    queue: ScanQueue,
    slot: Mutex<Option<RunningJob>>,
    sink: Option<Arc<dyn JobStatusSink>>,
    supervisor: Mutex<Option<Supervisor>>,
}

struct RunningJob {
    job: BoxedJob,
    handle: JobHandle,
    started: Instant,
    status_errors: u32,
    stopping: Option<Stopping>,
}

/// A termination in progress. The job keeps the slot until it has exited.
struct Stopping {
    command: KillCommand,
    exit: JobExit,
    signalled: bool,
}

struct Supervisor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum Verdict {
    Running,
    StatusError,
    Exited(JobExit),
    TimedOut,
    Unresponsive(String),
}

/// A state change that has been applied to the job's handle and still has to
/// reach the status sink and the audit log.
struct Transition {
    handle: JobHandle,
    state: JobState,
    runtime: Option<Duration>,
}

impl Transition {
    fn queued(handle: JobHandle) -> Self {
        Self {
            handle,
            state: JobState::Queued,
            runtime: None,
        }
    }

    fn running(handle: JobHandle) -> Self {
        handle.set_running();
        Self {
            handle,
            state: JobState::Running,
            runtime: None,
        }
    }

    fn finished(handle: JobHandle, exit: JobExit, runtime: Option<Duration>) -> Self {
        handle.set_finished(exit.clone());
        Self {
            handle,
            state: JobState::Finished { exit },
            runtime,
        }
    }
}

impl ScanManager {
    /// Creates a new builder.
    pub fn builder() -> ScanManagerBuilder {
        ScanManagerBuilder::new()
    }

    /// Enqueues a job at the tail of the queue.
    pub fn put<J: Job + 'static>(&self, job: J) {
        self.put_boxed(Box::new(job));
    }

    /// Enqueues a job and returns a handle for observing it.
    pub fn put_tracked<J: Job + 'static>(&self, job: J) -> JobHandle {
        self.put_boxed(Box::new(job))
    }

    /// Enqueues an already boxed job, e.g. one returned by `stop()`.
    pub fn put_boxed(&self, job: BoxedJob) -> JobHandle {
        let handle = JobHandle::new(job.id(), job.label());
        // Recorded before the push so the loop can never report Running first.
        self.inner.publish(Transition::queued(handle.clone()));
        let queue_len = self.inner.queue.push(QueuedJob {
            job,
            handle: handle.clone(),
        });

        tracing::debug!(
            job_id = %handle.id,
            label = %handle.label,
            queue_len,
            "Job queued"
        );

        handle
    }

    /// Returns true while the scheduling loop is running.
    pub fn is_alive(&self) -> bool {
        self.inner
            .lock_supervisor()
            .as_ref()
            .is_some_and(|supervisor| !supervisor.task.is_finished())
    }

    /// Starts the scheduling loop on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if the loop is alive. Call `stop()` first to restart.
    /// - `RuntimeUnavailable` if called outside a tokio runtime.
    pub fn start(&self) -> Result<(), ManagerError> {
        let mut supervisor = self.inner.lock_supervisor();
        if supervisor
            .as_ref()
            .is_some_and(|existing| !existing.task.is_finished())
        {
            return Err(ManagerError::AlreadyRunning);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ManagerError::runtime_unavailable(e.to_string()))?;

        let (shutdown, signal) = watch::channel(false);
        let task = runtime.spawn(run_loop(
            Arc::downgrade(&self.inner),
            signal,
            self.inner.config.poll_interval,
            self.inner.config.heartbeat_interval,
        ));
        *supervisor = Some(Supervisor { shutdown, task });

        tracing::info!(
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            job_timeout_secs = ?self.inner.config.job_timeout.map(|t| t.as_secs()),
            queue_len = self.inner.queue.len(),
            "Scan manager started"
        );
        Ok(())
    }

    /// Runs one iteration of the scheduling loop.
    ///
    /// Either checks the running job (and frees the slot once it has exited)
    /// or, if the slot is free, starts the head of the queue. Never both.
    pub fn work(&self) -> Tick {
        self.inner.work()
    }

    /// Kills the job with the given id if it is the one currently running.
    ///
    /// Returns `true` once the termination signal has been delivered. The job
    /// keeps the running slot until the worker has actually exited, which is
    /// usually observed right away and otherwise on a later poll.
    ///
    /// Returns `false` without side effects when the job is queued, unknown
    /// or already finished, and also when the signal could not be delivered;
    /// the job then keeps running and the kill may be retried.
    pub fn kill(&self, id: JobId, command: KillCommand) -> bool {
        self.inner.kill(id, command)
    }

    /// Stops the scheduling loop and cleans up.
    ///
    /// The running job, if any, is terminated with `KillCommand::Shutdown`
    /// and awaited for up to the configured shutdown timeout. Queued jobs are
    /// removed unstarted and handed back in the report. Calling `stop()` on a
    /// manager that is not running only performs the cleanup.
    pub async fn stop(&self) -> ShutdownReport {
        let supervisor = self.inner.lock_supervisor().take();
        if let Some(supervisor) = supervisor {
            // Err means the loop already exited and dropped its receiver.
            let _ = supervisor.shutdown.send(true);
            if let Err(e) = supervisor.task.await {
                tracing::error!(error = %e, "Scan manager loop ended abnormally");
            }
        }

        let running = self.inner.lock_slot().take();
        let terminated = match running {
            Some(running) => Some(self.inner.shut_down_job(running).await),
            None => None,
        };

        let drained: Vec<BoxedJob> = self
            .inner
            .queue
            .drain()
            .into_iter()
            .map(|queued| queued.job)
            .collect();

        tracing::info!(
            terminated = ?terminated.map(|id| id.to_string()),
            drained = drained.len(),
            "Scan manager stopped"
        );

        ShutdownReport {
            terminated,
            drained,
        }
    }

    /// Returns the number of queued jobs, not counting the running one.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Returns the queued job ids, head first.
    pub fn queued_ids(&self) -> Vec<JobId> {
        self.inner.queue.ids()
    }

    /// Returns the id of the job in the running slot.
    pub fn current_job(&self) -> Option<JobId> {
        self.inner
            .lock_slot()
            .as_ref()
            .map(|running| running.handle.id)
    }

    /// Returns a point-in-time view of the manager.
    pub fn snapshot(&self) -> ManagerSnapshot {
        self.inner.snapshot(self.is_alive())
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &ScanManagerConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ScanManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanManager")
            .field("alive", &self.is_alive())
            .field("current_job", &self.current_job())
            .field("queue_len", &self.queue_len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Shared {
    fn work(&self) -> Tick {
        let (tick, transition) = {
            let mut slot = self.lock_slot();
            self.step(&mut slot)
        };
        if let Some(transition) = transition {
            self.publish(transition);
        }
        tick
    }

    fn step(&self, slot: &mut Option<RunningJob>) -> (Tick, Option<Transition>) {
        let Some(mut running) = slot.take() else {
            return match self.queue.pop() {
                Some(queued) => self.launch(queued, slot),
                None => (Tick::Idle, None),
            };
        };

        let id = running.handle.id;
        if running.stopping.is_some() {
            return match self.drive_stop(running, slot) {
                Some(transition) => (Tick::Finished(id), Some(transition)),
                None => (Tick::Stopping(id), None),
            };
        }

        match self.inspect(&mut running) {
            Verdict::Running => {
                *slot = Some(running);
                (Tick::StillRunning(id), None)
            }
            Verdict::StatusError => {
                *slot = Some(running);
                (Tick::StatusError(id), None)
            }
            Verdict::Exited(exit) => {
                let runtime = running.started.elapsed();
                tracing::info!(
                    job_id = %id,
                    label = %running.handle.label,
                    exit = %exit,
                    runtime_ms = runtime.as_millis() as u64,
                    "Job finished"
                );
                let transition = Transition::finished(running.handle, exit, Some(runtime));
                (Tick::Finished(id), Some(transition))
            }
            Verdict::TimedOut => {
                tracing::warn!(
                    job_id = %id,
                    label = %running.handle.label,
                    timeout_secs = ?self.config.job_timeout.map(|t| t.as_secs()),
                    "Job exceeded timeout, killing it"
                );
                let command = KillCommand::Timeout;
                running.stopping = Some(Stopping {
                    command,
                    exit: JobExit::Killed { command },
                    signalled: false,
                });
                (Tick::TimedOut(id), self.drive_stop(running, slot))
            }
            Verdict::Unresponsive(reason) => {
                tracing::error!(
                    job_id = %id,
                    label = %running.handle.label,
                    errors = running.status_errors,
                    reason = %reason,
                    "Job status unreadable, giving up on it"
                );
                running.stopping = Some(Stopping {
                    command: KillCommand::Timeout,
                    exit: JobExit::Unresponsive { reason },
                    signalled: false,
                });
                match self.drive_stop(running, slot) {
                    Some(transition) => (Tick::Finished(id), Some(transition)),
                    None => (Tick::Stopping(id), None),
                }
            }
        }
    }

    fn inspect(&self, running: &mut RunningJob) -> Verdict {
        match guarded(|| running.job.try_exit()) {
            Ok(Some(exit)) => Verdict::Exited(exit),
            Ok(None) => {
                running.status_errors = 0;
                match self.config.job_timeout {
                    Some(timeout) if running.started.elapsed() >= timeout => Verdict::TimedOut,
                    _ => Verdict::Running,
                }
            }
            Err(e) => {
                running.status_errors += 1;
                if !e.is_transient() || running.status_errors >= self.config.status_error_limit {
                    return Verdict::Unresponsive(e.to_string());
                }
                tracing::warn!(
                    job_id = %running.handle.id,
                    attempt = running.status_errors,
                    limit = self.config.status_error_limit,
                    error = %e,
                    "Failed to read job status, retrying next poll"
                );
                Verdict::StatusError
            }
        }
    }

    fn launch(
        &self,
        queued: QueuedJob,
        slot: &mut Option<RunningJob>,
    ) -> (Tick, Option<Transition>) {
        let QueuedJob { mut job, handle } = queued;
        let id = handle.id;

        match guarded(|| job.start()) {
            Ok(()) => {
                tracing::info!(
                    job_id = %id,
                    label = %handle.label,
                    queue_len = self.queue.len(),
                    "Job started"
                );
                let transition = Transition::running(handle.clone());
                *slot = Some(RunningJob {
                    job,
                    handle,
                    started: Instant::now(),
                    status_errors: 0,
                    stopping: None,
                });
                (Tick::Started(id), Some(transition))
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %id,
                    label = %handle.label,
                    error = %e,
                    "Job failed to start"
                );
                let exit = JobExit::StartFailed {
                    reason: e.to_string(),
                };
                (
                    Tick::StartFailed(id),
                    Some(Transition::finished(handle, exit, None)),
                )
            }
        }
    }

    /// Signals a job marked as stopping, if that has not happened yet, and
    /// finishes it once the worker reports an exit.
    ///
    /// Returns `None` with the job back in the slot while it is still alive.
    fn drive_stop(
        &self,
        mut running: RunningJob,
        slot: &mut Option<RunningJob>,
    ) -> Option<Transition> {
        let id = running.handle.id;
        let (command, signalled) = match &running.stopping {
            Some(stopping) => (stopping.command, stopping.signalled),
            None => {
                *slot = Some(running);
                return None;
            }
        };

        if !signalled {
            if let Err(e) = guarded(|| running.job.terminate(command)) {
                tracing::warn!(
                    job_id = %id,
                    command = %command,
                    error = %e,
                    "Failed to signal job termination"
                );
                *slot = Some(running);
                return None;
            }
            if let Some(stopping) = running.stopping.as_mut() {
                stopping.signalled = true;
            }
            audit::emit_job_killed(id, &running.handle.label, command);
        }

        match guarded(|| running.job.try_exit()) {
            Ok(Some(_)) => {
                let exit = running
                    .stopping
                    .take()
                    .map(|stopping| stopping.exit)
                    .unwrap_or(JobExit::Killed { command });
                let runtime = running.started.elapsed();
                Some(Transition::finished(running.handle, exit, Some(runtime)))
            }
            Ok(None) => {
                tracing::debug!(job_id = %id, "Terminated job has not exited yet");
                *slot = Some(running);
                None
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %id,
                    error = %e,
                    "Failed to read status of terminated job, keeping it in the slot"
                );
                *slot = Some(running);
                None
            }
        }
    }

    fn kill(&self, id: JobId, command: KillCommand) -> bool {
        let (killed, transition) = {
            let mut slot = self.lock_slot();
            match slot.take() {
                Some(running) if running.handle.id == id => {
                    self.kill_running(running, command, &mut slot)
                }
                other => {
                    *slot = other;
                    tracing::debug!(
                        job_id = %id,
                        command = %command,
                        "Kill ignored, job is not running"
                    );
                    (false, None)
                }
            }
        };
        if let Some(transition) = transition {
            self.publish(transition);
        }
        killed
    }

    fn kill_running(
        &self,
        mut running: RunningJob,
        command: KillCommand,
        slot: &mut Option<RunningJob>,
    ) -> (bool, Option<Transition>) {
        let fresh = running.stopping.is_none();
        if fresh {
            running.stopping = Some(Stopping {
                command,
                exit: JobExit::Killed { command },
                signalled: false,
            });
        }

        if let Some(transition) = self.drive_stop(running, slot) {
            return (true, Some(transition));
        }

        // Still in the slot: either signalled and exiting, or not signalled.
        let Some(running) = slot.as_mut() else {
            return (false, None);
        };
        let signalled = running
            .stopping
            .as_ref()
            .is_some_and(|stopping| stopping.signalled);
        if !signalled && fresh {
            // The worker never got the signal, so it keeps running as before.
            running.stopping = None;
        }
        (signalled, None)
    }

    async fn shut_down_job(&self, running: RunningJob) -> JobId {
        let RunningJob {
            mut job,
            handle,
            started,
            stopping,
            ..
        } = running;

        let exit = match stopping {
            Some(Stopping {
                exit,
                signalled: true,
                ..
            }) => exit,
            _ => {
                if let Err(e) = guarded(|| job.terminate(KillCommand::Shutdown)) {
                    tracing::warn!(
                        job_id = %handle.id,
                        error = %e,
                        "Failed to signal job termination"
                    );
                }
                audit::emit_job_killed(handle.id, &handle.label, KillCommand::Shutdown);
                JobExit::Killed {
                    command: KillCommand::Shutdown,
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, job.wait()).await {
            Ok(Ok(exit)) => {
                tracing::debug!(job_id = %handle.id, exit = %exit, "Job exited on shutdown");
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %handle.id, error = %e, "Failed to await job exit");
            }
            Err(_) => {
                tracing::warn!(
                    job_id = %handle.id,
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Job did not exit within shutdown timeout, dropping it"
                );
            }
        }
        drop(job);

        let id = handle.id;
        self.publish(Transition::finished(handle, exit, Some(started.elapsed())));
        id
    }

    /// Reports a transition to the status sink and the audit log.
    ///
    /// Must be called without the slot lock held.
    fn publish(&self, transition: Transition) {
        let Transition {
            handle,
            state,
            runtime,
        } = transition;

        if let Some(sink) = &self.sink {
            let recorded = panic::catch_unwind(AssertUnwindSafe(|| {
                sink.record(handle.id, &handle.label, &state)
            }));
            if let Err(payload) = recorded {
                tracing::error!(
                    job_id = %handle.id,
                    state = state.name(),
                    panic = %panic_message(payload.as_ref()),
                    "Status sink panicked"
                );
            }
        }

        let mut event = JobAuditEvent::new(handle.id, handle.label.clone(), state);
        if let Some(runtime) = runtime {
            event = event.with_runtime(runtime);
        }
        audit::emit_job_transition(&event);
    }

    fn snapshot(&self, alive: bool) -> ManagerSnapshot {
        let current = self.lock_slot().as_ref().map(|running| CurrentJob {
            id: running.handle.id,
            label: running.handle.label.clone(),
            started_at: running.handle.started_at(),
            stopping: running.stopping.is_some(),
        });
        ManagerSnapshot {
            alive,
            current,
            queued: self.queue.ids(),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<RunningJob>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_supervisor(&self) -> MutexGuard<'_, Option<Supervisor>> {
        self.supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let running = self
            .slot
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(running) = running else {
            return;
        };

        tracing::warn!(
            job_id = %running.handle.id,
            "Scan manager dropped with a running job, terminating it"
        );
        let RunningJob {
            mut job,
            handle,
            started,
            stopping,
            ..
        } = running;

        let exit = match stopping {
            Some(Stopping {
                exit,
                signalled: true,
                ..
            }) => exit,
            _ => {
                if let Err(e) = guarded(|| job.terminate(KillCommand::Shutdown)) {
                    tracing::warn!(
                        job_id = %handle.id,
                        error = %e,
                        "Failed to signal job termination"
                    );
                }
                audit::emit_job_killed(handle.id, &handle.label, KillCommand::Shutdown);
                JobExit::Killed {
                    command: KillCommand::Shutdown,
                }
            }
        };
        // Process jobs kill their child on drop.
        drop(job);
        self.publish(Transition::finished(handle, exit, Some(started.elapsed())));
    }
}

/// Calls into job code, turning a panic into a `JobError`.
fn guarded<T>(f: impl FnOnce() -> Result<T, JobError>) -> Result<T, JobError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(JobError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    })
}

async fn run_loop(
    shared: Weak<Shared>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
) {
    let mut last_heartbeat = Instant::now();

    loop {
        {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            shared.work();
            if last_heartbeat.elapsed() >= heartbeat_interval {
                audit::emit_heartbeat(&shared.snapshot(true));
                last_heartbeat = Instant::now();
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Scan manager loop exited");
}
