//! Fixed-interval cycle scheduler.
//!
//! Runs the retry coordinator forever on a target period, computing sleep
//! time from elapsed cycle duration. The first cycle runs immediately on
//! startup. The loop only returns when a stall escalation demands a full
//! supervisor restart; the process-level re-exec happens in `main`, keeping
//! this loop free of process identity concerns.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::attempt::AttemptExecutor;
use crate::config::{SupervisorConfig, WorkerConfig};
use crate::disk;
use crate::events::{ExecutionLog, LogEvent};
use crate::retry::{CycleOutcome, RetryCoordinator};
use crate::session::SessionController;
use crate::sink::{ActivitySink, format_duration};
use crate::tmux::SessionHost;

/// Returned by `run` when the supervisor must re-execute itself.
#[derive(Debug, PartialEq, Eq)]
pub struct Restart;

/// What the scheduler decided to do after one cycle.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleStep {
    /// Sleep this long, then start the next cycle.
    Sleep(Duration),
    /// Stall escalation: stop scheduling and restart the supervisor.
    Restart,
}

/// Sleep budget after a cycle: the remainder of the interval, or the fixed
/// cool-down when the cycle overran it (never busy-loop).
pub fn sleep_budget(elapsed: Duration, interval: Duration, cooldown: Duration) -> Duration {
    if elapsed >= interval {
        cooldown
    } else {
        interval - elapsed
    }
}

pub struct CycleScheduler<'a, H: SessionHost> {
    controller: &'a SessionController<H>,
    worker: &'a WorkerConfig,
    supervisor: &'a SupervisorConfig,
    worker_sink: &'a ActivitySink,
    log: &'a ActivitySink,
    events: &'a ExecutionLog,
    cycle: u64,
}

impl<'a, H: SessionHost> CycleScheduler<'a, H> {
    pub fn new(
        controller: &'a SessionController<H>,
        worker: &'a WorkerConfig,
        supervisor: &'a SupervisorConfig,
        worker_sink: &'a ActivitySink,
        log: &'a ActivitySink,
        events: &'a ExecutionLog,
    ) -> Self {
        Self {
            controller,
            worker,
            supervisor,
            worker_sink,
            log,
            events,
            cycle: 0,
        }
    }

    /// Run cycles until a stall demands a restart.
    pub fn run(&mut self) -> Restart {
        loop {
            match self.next_cycle() {
                CycleStep::Restart => return Restart,
                CycleStep::Sleep(duration) => {
                    info!(
                        sleep = %format_duration(duration),
                        "cycle finished, sleeping until next"
                    );
                    self.events.log_best_effort(LogEvent::SleepScheduled {
                        secs: duration.as_secs(),
                    });
                    std::thread::sleep(duration);
                }
            }
        }
    }

    /// One full cycle: disk preflight, retried attempts, sleep budget.
    pub fn next_cycle(&mut self) -> CycleStep {
        self.cycle += 1;
        let started = Instant::now();
        info!(cycle = self.cycle, "cycle started");
        self.events
            .log_best_effort(LogEvent::CycleStarted { cycle: self.cycle });

        if !self.preflight() {
            self.append(&format!(
                "cycle {} skipped: free disk below {} MB",
                self.cycle, self.supervisor.min_free_disk_mb
            ));
            self.events.log_best_effort(LogEvent::CycleSkipped {
                cycle: self.cycle,
                reason: "low disk space".to_string(),
            });
            return CycleStep::Sleep(self.supervisor.cycle_interval());
        }

        let executor = AttemptExecutor::new(
            self.controller,
            self.worker_sink,
            &self.worker.program,
            &self.worker.args,
            self.supervisor.poll_interval(),
            self.supervisor.stall_threshold(),
        );
        let coordinator = RetryCoordinator::new(
            self.supervisor.max_retries,
            self.supervisor.retry_delay(),
            self.log,
            self.events,
        );

        let outcome = coordinator.run_cycle(|_| executor.run());
        let elapsed = started.elapsed();

        self.append(&format!(
            "cycle {} finished ({}) in {}",
            self.cycle,
            outcome.label(),
            format_duration(elapsed)
        ));
        self.events.log_best_effort(LogEvent::CycleFinished {
            cycle: self.cycle,
            outcome: outcome.label().to_string(),
            duration_secs: elapsed.as_secs(),
        });

        if outcome == CycleOutcome::TimeoutRestart {
            return CycleStep::Restart;
        }

        let interval = self.supervisor.cycle_interval();
        if elapsed >= interval {
            warn!(
                elapsed = %format_duration(elapsed),
                interval = %format_duration(interval),
                "cycle overran its interval, applying cool-down"
            );
            self.events.log_best_effort(LogEvent::CycleOverrun {
                elapsed_secs: elapsed.as_secs(),
                interval_secs: interval.as_secs(),
            });
        }

        CycleStep::Sleep(sleep_budget(
            elapsed,
            interval,
            self.supervisor.overrun_cooldown(),
        ))
    }

    /// False when the logs filesystem is under the free-space floor.
    /// A failed probe is logged and treated as passing.
    fn preflight(&self) -> bool {
        let logs_dir = self
            .worker_sink
            .path()
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."));
        match disk::has_free_space(logs_dir, self.supervisor.min_free_disk_mb) {
            Ok(enough) => {
                if !enough {
                    warn!(
                        min_free_mb = self.supervisor.min_free_disk_mb,
                        "not enough free disk space, skipping cycle"
                    );
                }
                enough
            }
            Err(e) => {
                warn!(error = %e, "disk preflight failed, proceeding anyway");
                true
            }
        }
    }

    fn append(&self, message: &str) {
        if let Err(e) = self.log.append(message) {
            warn!(error = %e, "failed to write activity line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::testing::FakeHost;

    #[test]
    fn sleep_budget_is_remainder_of_interval() {
        assert_eq!(
            sleep_budget(
                Duration::from_secs(10),
                Duration::from_secs(900),
                Duration::from_secs(60)
            ),
            Duration::from_secs(890)
        );
    }

    #[test]
    fn sleep_budget_on_overrun_is_cooldown() {
        assert_eq!(
            sleep_budget(
                Duration::from_secs(950),
                Duration::from_secs(900),
                Duration::from_secs(60)
            ),
            Duration::from_secs(60)
        );
        // exactly at the interval counts as overrun
        assert_eq!(
            sleep_budget(
                Duration::from_secs(900),
                Duration::from_secs(900),
                Duration::from_secs(60)
            ),
            Duration::from_secs(60)
        );
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        worker: WorkerConfig,
        supervisor: SupervisorConfig,
        worker_sink: ActivitySink,
        log: ActivitySink,
        events: ExecutionLog,
    }

    fn fixture(supervisor: SupervisorConfig) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let worker_sink = ActivitySink::at(tmp.path().join("main.log"));
        let log = ActivitySink::at(tmp.path().join("warden.log"));
        let events = ExecutionLog::new(&tmp.path().join("events.jsonl")).unwrap();
        Fixture {
            _tmp: tmp,
            worker: WorkerConfig {
                program: "worker".to_string(),
                args: vec![],
            },
            supervisor,
            worker_sink,
            log,
            events,
        }
    }

    fn fast_supervisor() -> SupervisorConfig {
        SupervisorConfig {
            session: "warden-test".to_string(),
            poll_interval_secs: 0,
            stall_threshold_secs: 0,
            cycle_interval_secs: 300,
            max_retries: 3,
            retry_delay_secs: 0,
            overrun_cooldown_secs: 60,
            min_free_disk_mb: 0,
        }
    }

    fn scheduler<'a>(
        fx: &'a Fixture,
        controller: &'a SessionController<&'a FakeHost>,
    ) -> CycleScheduler<'a, &'a FakeHost> {
        CycleScheduler::new(
            controller,
            &fx.worker,
            &fx.supervisor,
            &fx.worker_sink,
            &fx.log,
            &fx.events,
        )
    }

    #[test]
    fn successful_cycle_sleeps_the_remainder() {
        let fx = fixture(fast_supervisor());
        let host = FakeHost::new();
        host.push_alive(false);
        host.push_exit_code(Some(0));
        let host_ref = &host;
        let controller = SessionController::new(host_ref, "warden-test");

        let step = scheduler(&fx, &controller).next_cycle();
        match step {
            CycleStep::Sleep(d) => {
                assert!(d <= Duration::from_secs(300));
                assert!(d > Duration::from_secs(299), "remainder too small: {d:?}");
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn stalled_cycle_requests_restart() {
        let mut supervisor = fast_supervisor();
        // staleness exceeds the zero threshold on the first poll
        supervisor.stall_threshold_secs = 0;
        let fx = fixture(supervisor);

        let host = FakeHost::new();
        host.set_default_alive(true);
        let host_ref = &host;
        let controller = SessionController::new(host_ref, "warden-test");

        let step = scheduler(&fx, &controller).next_cycle();
        assert_eq!(step, CycleStep::Restart);
        // the stalled session was killed before the escalation
        assert!(host.kills().len() >= 2, "kills: {:?}", host.kills());
    }

    #[test]
    fn exhausted_cycle_continues_scheduling() {
        let fx = fixture(fast_supervisor());
        let host = FakeHost::new();
        // three failing attempts
        for _ in 0..3 {
            host.push_alive(false);
            host.push_exit_code(Some(1));
        }
        let host_ref = &host;
        let controller = SessionController::new(host_ref, "warden-test");

        let step = scheduler(&fx, &controller).next_cycle();
        assert!(matches!(step, CycleStep::Sleep(_)), "got: {step:?}");
        assert_eq!(host.creates().len(), 3);
    }

    #[test]
    fn host_errors_then_success_within_budget() {
        let fx = fixture(fast_supervisor());
        let host = FakeHost::new();
        host.push_create_error("cannot create");
        host.push_create_error("cannot create");
        host.push_create_ok();
        host.push_alive(false);
        host.push_exit_code(Some(0));
        let host_ref = &host;
        let controller = SessionController::new(host_ref, "warden-test");

        let step = scheduler(&fx, &controller).next_cycle();
        assert!(matches!(step, CycleStep::Sleep(_)), "got: {step:?}");
        assert_eq!(host.creates().len(), 3);

        let content = std::fs::read_to_string(fx.log.path()).unwrap();
        assert!(content.contains("(success)"), "{content}");
    }

    #[test]
    fn low_disk_skips_cycle_without_launching() {
        let mut supervisor = fast_supervisor();
        supervisor.min_free_disk_mb = u64::MAX;
        let fx = fixture(supervisor);

        let host = FakeHost::new();
        let host_ref = &host;
        let controller = SessionController::new(host_ref, "warden-test");

        let step = scheduler(&fx, &controller).next_cycle();
        assert_eq!(step, CycleStep::Sleep(Duration::from_secs(300)));
        assert!(host.creates().is_empty());

        let content = std::fs::read_to_string(fx.log.path()).unwrap();
        assert!(content.contains("skipped"), "{content}");
    }

    #[test]
    fn cycle_counter_increments() {
        let fx = fixture(fast_supervisor());
        let host = FakeHost::new();
        for _ in 0..2 {
            host.push_alive(false);
            host.push_exit_code(Some(0));
        }
        let host_ref = &host;
        let controller = SessionController::new(host_ref, "warden-test");

        let mut scheduler = scheduler(&fx, &controller);
        let _ = scheduler.next_cycle();
        let _ = scheduler.next_cycle();

        let events = std::fs::read_to_string(fx.events.path()).unwrap();
        assert!(events.contains("\"cycle\":1"), "{events}");
        assert!(events.contains("\"cycle\":2"), "{events}");
    }
}
