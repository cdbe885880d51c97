//! One supervised attempt of the worker.
//!
//! Starts the worker in its session, then polls on a fixed interval:
//! a dead session resolves to success or failure by exit code, and a live
//! session that has gone quiet past the stall threshold is killed.

use std::time::{Duration, Instant, SystemTime};

use tracing::{error, info, warn};

use crate::session::SessionController;
use crate::sink::{ActivitySink, format_duration};
use crate::tmux::SessionHost;

/// Outcome of one supervised attempt, with its wall-clock duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Worker exited 0.
    Success { duration: Duration },
    /// Worker exited non-zero, could not be started, or ended without a
    /// readable exit code.
    Failure {
        exit_code: Option<i32>,
        duration: Duration,
    },
    /// Worker was alive but produced no sink activity past the stall
    /// threshold; the session has been killed.
    Stalled { duration: Duration },
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Stalled { .. } => "stalled",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Success { duration }
            | Self::Failure { duration, .. }
            | Self::Stalled { duration } => *duration,
        }
    }
}

/// Runs single attempts against the controller's session.
pub struct AttemptExecutor<'a, H: SessionHost> {
    controller: &'a SessionController<H>,
    worker_sink: &'a ActivitySink,
    program: &'a str,
    args: &'a [String],
    poll_interval: Duration,
    stall_threshold: Duration,
}

impl<'a, H: SessionHost> AttemptExecutor<'a, H> {
    pub fn new(
        controller: &'a SessionController<H>,
        worker_sink: &'a ActivitySink,
        program: &'a str,
        args: &'a [String],
        poll_interval: Duration,
        stall_threshold: Duration,
    ) -> Self {
        Self {
            controller,
            worker_sink,
            program,
            args,
            poll_interval,
            stall_threshold,
        }
    }

    /// Run one attempt to completion.
    ///
    /// Blocks the calling thread for the poll interval between checks; this
    /// is the only suspension point inside an attempt.
    pub fn run(&self) -> AttemptOutcome {
        let started_wall = SystemTime::now();
        let started = Instant::now();

        if let Err(e) = self.controller.start(self.program, self.args) {
            error!(error = %e, "could not start worker session");
            return AttemptOutcome::Failure {
                exit_code: None,
                duration: started.elapsed(),
            };
        }

        loop {
            std::thread::sleep(self.poll_interval);

            if !self.controller.is_alive() {
                let duration = started.elapsed();
                return match self.controller.exit_code() {
                    Ok(0) => {
                        info!(
                            duration = %format_duration(duration),
                            "worker finished successfully"
                        );
                        AttemptOutcome::Success { duration }
                    }
                    Ok(code) => {
                        warn!(
                            exit_code = code,
                            duration = %format_duration(duration),
                            "worker failed"
                        );
                        AttemptOutcome::Failure {
                            exit_code: Some(code),
                            duration,
                        }
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            duration = %format_duration(duration),
                            "worker ended without a readable exit code"
                        );
                        AttemptOutcome::Failure {
                            exit_code: None,
                            duration,
                        }
                    }
                };
            }

            let staleness = self.staleness(started_wall);
            if staleness > self.stall_threshold {
                if let Err(e) = self.controller.kill() {
                    warn!(error = %e, "failed to kill stalled session");
                }
                let duration = started.elapsed();
                warn!(
                    stalled_secs = staleness.as_secs(),
                    duration = %format_duration(duration),
                    "worker stalled, session killed"
                );
                return AttemptOutcome::Stalled { duration };
            }
        }
    }

    /// Staleness relative to the newest of sink mtime and attempt start.
    ///
    /// A missing sink, or one last written before this attempt began, never
    /// counts against the worker: the clock starts at attempt start, so a
    /// slow-starting worker gets the full stall threshold.
    fn staleness(&self, started_wall: SystemTime) -> Duration {
        let last = self
            .worker_sink
            .last_activity()
            .filter(|mtime| *mtime > started_wall)
            .unwrap_or(started_wall);
        SystemTime::now().duration_since(last).unwrap_or_default()
    }
}
