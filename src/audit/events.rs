//! Audit event types and emission functions.

use crate::core::{JobExit, JobId, JobState, KillCommand, TaskStatus};
use crate::manager::ManagerSnapshot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base trait for audit events.
pub trait AuditEvent: Serialize {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;

    /// Returns the timestamp of the event.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Serializes the event as a single JSON line.
    fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Audit event for a job state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAuditEvent {
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Job identity.
    pub job_id: JobId,

    /// Job label.
    pub label: String,

    /// The state the job entered.
    pub state: JobState,

    /// Scan-task status the state maps to.
    pub task_status: TaskStatus,

    /// Time spent in the running slot, for finished jobs that ran.
    pub runtime_ms: Option<u64>,
}

impl JobAuditEvent {
    /// Creates an event for `id` entering `state`.
    pub fn new(id: JobId, label: impl Into<String>, state: JobState) -> Self {
        Self {
            timestamp: Utc::now(),
            job_id: id,
            label: label.into(),
            task_status: state.task_status(),
            state,
            runtime_ms: None,
        }
    }

    /// Attaches the time the job spent running.
    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime_ms = Some(runtime.as_millis() as u64);
        self
    }

    fn exit(&self) -> Option<&JobExit> {
        self.state.exit()
    }
}

impl AuditEvent for JobAuditEvent {
    fn event_type(&self) -> &'static str {
        match self.state {
            JobState::Queued => "job_queued",
            JobState::Running => "job_started",
            JobState::Finished { .. } => "job_finished",
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Emits an audit event for a job transition.
pub fn emit_job_transition(event: &JobAuditEvent) {
    tracing::info!(
        target: "scanqueue::audit",
        event_type = event.event_type(),
        job_id = %event.job_id,
        label = %event.label,
        state = event.state.name(),
        task_status = %event.task_status,
        exit = ?event.exit().map(ToString::to_string),
        runtime_ms = ?event.runtime_ms,
        "Job state changed"
    );
}

/// Emits an audit event for a kill request that hit the running job.
pub fn emit_job_killed(id: JobId, label: &str, command: KillCommand) {
    tracing::info!(
        target: "scanqueue::audit",
        event_type = "job_killed",
        job_id = %id,
        label = %label,
        command = %command,
        "Job killed"
    );
}

/// Emits the periodic manager heartbeat.
pub fn emit_heartbeat(snapshot: &ManagerSnapshot) {
    tracing::info!(
        target: "scanqueue::audit",
        event_type = "manager_heartbeat",
        alive = snapshot.alive,
        current_job = ?snapshot.current.as_ref().map(|c| c.id.to_string()),
        current_label = ?snapshot.current.as_ref().map(|c| c.label.as_str()),
        queue_len = snapshot.queued.len(),
        "Scan manager heartbeat"
    );
}
