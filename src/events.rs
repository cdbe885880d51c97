//! Structured execution log — JSON lines per supervisor run.
//!
//! Every supervision decision is appended to an `events.jsonl` file:
//! attempt starts and outcomes, stall detections, cycle results, sleeps,
//! and restart triggers. Each line is a self-contained JSON object with a
//! timestamp, making the history easy to grep, stream, and post-process.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use tracing::debug;

fn now_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%z").to_string()
}

/// A structured event in the execution log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// All event types that can appear in the execution log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// The supervisor process came up.
    SupervisorStarted { session: String, worker: String },
    /// A scheduled cycle began.
    CycleStarted { cycle: u64 },
    /// A cycle was skipped before launching the worker.
    CycleSkipped { cycle: u64, reason: String },
    /// One supervised attempt was launched.
    AttemptStarted { attempt: u32 },
    /// One supervised attempt ended.
    AttemptFinished {
        attempt: u32,
        outcome: String,
        exit_code: Option<i32>,
        duration_secs: u64,
    },
    /// The worker was alive but inactive past the stall threshold.
    StallDetected { attempt: u32, duration_secs: u64 },
    /// A cycle ran to a decision.
    CycleFinished {
        cycle: u64,
        outcome: String,
        duration_secs: u64,
    },
    /// A cycle took longer than the target interval.
    CycleOverrun {
        elapsed_secs: u64,
        interval_secs: u64,
    },
    /// The scheduler is going to sleep.
    SleepScheduled { secs: u64 },
    /// The supervisor is about to re-execute itself.
    RestartTriggered { reason: String },
}

/// Writer for JSON lines execution logs.
pub struct ExecutionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl ExecutionLog {
    /// Create a new execution log, writing to the given path.
    ///
    /// Creates the file (and parent directories) if they don't exist.
    /// Appends to an existing file.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Log an event.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: now_timestamp(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "execution log");

        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    /// Log an event, downgrading write failures to a warning.
    ///
    /// The supervision loop must keep running even when the event log is
    /// unwritable (disk full is exactly when it supervises hardest).
    pub fn log_best_effort(&self, event: LogEvent) {
        if let Err(e) = self.log(event) {
            tracing::warn!(error = %e, "failed to write execution log event");
        }
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
