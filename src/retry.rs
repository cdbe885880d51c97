//! Bounded retry loop around the attempt executor.
//!
//! Ordinary failures consume one attempt slot each and are retried after a
//! delay. A stall is never retried in place: it escalates immediately so
//! the whole supervisor can restart from a clean process.

use std::time::Duration;

use tracing::{info, warn};

use crate::attempt::AttemptOutcome;
use crate::events::{ExecutionLog, LogEvent};
use crate::sink::{ActivitySink, format_duration};

/// Aggregate result of one cycle's attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// An attempt succeeded; remaining retries were not used.
    Success,
    /// Every allotted attempt failed.
    Exhausted,
    /// A stall was detected; the whole supervisor must restart.
    TimeoutRestart,
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Exhausted => "exhausted",
            Self::TimeoutRestart => "timeout_restart",
        }
    }
}

/// Runs attempts until one succeeds, stalls, or the budget runs out.
pub struct RetryCoordinator<'a> {
    max_retries: u32,
    retry_delay: Duration,
    log: &'a ActivitySink,
    events: &'a ExecutionLog,
}

impl<'a> RetryCoordinator<'a> {
    pub fn new(
        max_retries: u32,
        retry_delay: Duration,
        log: &'a ActivitySink,
        events: &'a ExecutionLog,
    ) -> Self {
        Self {
            max_retries,
            retry_delay,
            log,
            events,
        }
    }

    /// Run one cycle of attempts.
    ///
    /// `attempt` receives the 1-based attempt number. Sleeps for the retry
    /// delay between failed attempts; this and the attempt's own polling are
    /// the cycle's only suspension points.
    pub fn run_cycle(&self, mut attempt: impl FnMut(u32) -> AttemptOutcome) -> CycleOutcome {
        for attempt_no in 1..=self.max_retries {
            self.events
                .log_best_effort(LogEvent::AttemptStarted { attempt: attempt_no });

            let outcome = attempt(attempt_no);
            let duration = outcome.duration();
            self.events.log_best_effort(LogEvent::AttemptFinished {
                attempt: attempt_no,
                outcome: outcome.label().to_string(),
                exit_code: match outcome {
                    AttemptOutcome::Failure { exit_code, .. } => exit_code,
                    AttemptOutcome::Success { .. } => Some(0),
                    AttemptOutcome::Stalled { .. } => None,
                },
                duration_secs: duration.as_secs(),
            });

            match outcome {
                AttemptOutcome::Success { duration } => {
                    info!(
                        attempt = attempt_no,
                        duration = %format_duration(duration),
                        "attempt succeeded"
                    );
                    self.append(&format!(
                        "worker finished in {} (attempt {attempt_no})",
                        format_duration(duration)
                    ));
                    return CycleOutcome::Success;
                }
                AttemptOutcome::Stalled { duration } => {
                    warn!(
                        attempt = attempt_no,
                        duration = %format_duration(duration),
                        "attempt stalled, escalating to supervisor restart"
                    );
                    self.events.log_best_effort(LogEvent::StallDetected {
                        attempt: attempt_no,
                        duration_secs: duration.as_secs(),
                    });
                    self.append(&format!(
                        "worker stalled after {} (attempt {attempt_no}), supervisor will restart",
                        format_duration(duration)
                    ));
                    return CycleOutcome::TimeoutRestart;
                }
                AttemptOutcome::Failure {
                    exit_code,
                    duration,
                } => {
                    warn!(
                        attempt = attempt_no,
                        max_retries = self.max_retries,
                        exit_code = exit_code,
                        duration = %format_duration(duration),
                        "attempt failed"
                    );
                    self.append(&format!(
                        "attempt {attempt_no}/{} failed ({}) after {}",
                        self.max_retries,
                        exit_code.map_or_else(|| "no exit code".to_string(), |c| format!("exit {c}")),
                        format_duration(duration)
                    ));

                    if attempt_no < self.max_retries {
                        info!(
                            delay_secs = self.retry_delay.as_secs(),
                            "retrying after delay"
                        );
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        warn!(
            max_retries = self.max_retries,
            "all attempts failed, waiting for next cycle"
        );
        self.append(&format!(
            "all {} attempts failed, waiting for next cycle",
            self.max_retries
        ));
        CycleOutcome::Exhausted
    }

    fn append(&self, message: &str) {
        if let Err(e) = self.log.append(message) {
            warn!(error = %e, "failed to write activity line");
        }
    }
}
