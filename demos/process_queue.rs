//! Process queue example demonstrating the scan manager end to end.
//!
//! This example shows how to:
//! - Build a ScanManager from environment configuration
//! - Queue process-backed and task-backed jobs
//! - Cancel the running job by id
//! - Shut down cleanly on Ctrl-C
//!
//! Run with: cargo run --example process_queue

use scanqueue::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Prints every transition, standing in for a database writer.
#[derive(Debug)]
struct PrintSink;

impl JobStatusSink for PrintSink {
    fn record(&self, id: JobId, label: &str, state: &JobState) {
        println!("  [{id}] {label}: {} ({})", state.name(), state.task_status());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Scanqueue Process Queue Example ===\n");

    let config = ScanManagerConfig::from_env()?
        .with_poll_interval(Duration::from_millis(200))
        .with_heartbeat_interval(Duration::from_secs(2));

    let manager = ScanManager::builder()
        .with_config(config)
        .with_status_sink(Arc::new(PrintSink))
        .build()?;
    manager.start()?;

    // A long-running scan we will cancel, then two that run to completion.
    let slow = manager.put_tracked(
        ProcessJob::new("sleep")
            .arg("30")
            .with_label("slow network scan"),
    );
    let quick = manager.put_tracked(
        ProcessJob::new("sh")
            .args(["-c", "echo inspecting 10.0.0.0/24; sleep 1"])
            .with_label("quick inspection"),
    );
    let in_process = manager.put_tracked(TaskJob::new("fact merge", || async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }));

    println!("Queued {} jobs\n", manager.queue_len());

    // Give the slow scan a moment to start, then cancel it.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let killed = manager.kill(slow.id, KillCommand::Cancel);
    println!("\nCancel '{}': {}\n", slow.label, if killed { "killed" } else { "not running" });

    tokio::select! {
        exit = async {
            quick.wait().await;
            in_process.wait().await
        } => {
            println!("\nAll jobs finished, last exit: {exit}");
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted");
        }
    }

    let report = manager.stop().await;
    println!(
        "\nStopped. Terminated: {:?}, never started: {}",
        report.terminated.map(|id| id.to_string()),
        report.drained.len()
    );

    Ok(())
}
