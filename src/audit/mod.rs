//! Structured audit logging for job lifecycle events.
//!
//! This module provides functions for emitting structured audit events
//! using the `tracing` crate under the `scanqueue::audit` target, so a
//! subscriber can route them separately from diagnostic logs.

mod events;

pub use events::{
    emit_heartbeat, emit_job_killed, emit_job_transition, AuditEvent, JobAuditEvent,
};
