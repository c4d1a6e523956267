//! Scan manager for running queued jobs one at a time.
//!
//! The `ScanManager` owns a FIFO queue and a single execution slot. A
//! polling loop starts the head of the queue whenever the slot is free and
//! clears the slot once the running job exits or is killed.

mod config;
mod handle;
mod queue;
mod scan_manager;

pub use config::{
    ScanManagerConfig, ENV_HEARTBEAT_SECS, ENV_JOB_TIMEOUT_SECS, ENV_POLL_INTERVAL_MS,
    ENV_SHUTDOWN_TIMEOUT_SECS, ENV_STATUS_ERROR_LIMIT,
};
pub use handle::JobHandle;
pub use scan_manager::{
    CurrentJob, ManagerSnapshot, ScanManager, ScanManagerBuilder, ShutdownReport, Tick,
};
