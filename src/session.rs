//! Session controller — exclusive owner of the worker session.
//!
//! The supervisor runs at most one session at a time. The controller holds
//! the session name privately and is the only place it is ever passed to
//! the host, so the "at most one live session" invariant has a single
//! enforcement point.

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};

use crate::tmux::{self, SessionHost};

/// Session lifecycle errors the retry layer distinguishes.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The host could not create the session.
    #[error("failed to start session '{name}'")]
    StartFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    /// The worker ended without a readable exit code (force-killed, or the
    /// host lost the status).
    #[error("no exit code available for session '{name}'")]
    NoExitCode { name: String },
}

/// Owns the singleton worker session on a `SessionHost`.
pub struct SessionController<H: SessionHost> {
    host: H,
    name: String,
}

impl<H: SessionHost> SessionController<H> {
    /// The configured name is sanitized for tmux target syntax.
    pub fn new(host: H, name: &str) -> Self {
        Self {
            host,
            name: tmux::sanitize_session_name(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launch the worker in a fresh session.
    ///
    /// Any previous session under this name is killed first; a missing
    /// predecessor is not an error, and a failed kill is logged and ignored
    /// (creation will then surface the real problem).
    pub fn start(&self, program: &str, args: &[String]) -> Result<(), SessionError> {
        if let Err(e) = self.host.kill(&self.name) {
            warn!(session = %self.name, error = %e, "failed to clear previous session");
        }

        self.host
            .create(&self.name, program, args)
            .map_err(|source| SessionError::StartFailed {
                name: self.name.clone(),
                source,
            })?;

        info!(session = %self.name, program = program, "worker session started");
        Ok(())
    }

    /// Non-blocking liveness query; never fails.
    pub fn is_alive(&self) -> bool {
        self.host.alive(&self.name)
    }

    /// Exit code of the worker.
    ///
    /// Only meaningful once `is_alive` has returned false after a `start`.
    /// Force-killed sessions have no exit code and surface `NoExitCode`.
    pub fn exit_code(&self) -> Result<i32, SessionError> {
        match self.host.exit_code(&self.name) {
            Ok(Some(code)) => Ok(code),
            Ok(None) => Err(SessionError::NoExitCode {
                name: self.name.clone(),
            }),
            Err(e) => {
                warn!(session = %self.name, error = %e, "exit code query failed");
                Err(SessionError::NoExitCode {
                    name: self.name.clone(),
                })
            }
        }
    }

    /// Kill the session. Idempotent.
    pub fn kill(&self) -> Result<()> {
        self.host.kill(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::testing::FakeHost;

    #[test]
    fn new_sanitizes_session_name() {
        let host = FakeHost::new();
        let controller = SessionController::new(&host, "main worker.1");
        assert_eq!(controller.name(), "main-worker-1");
    }

    #[test]
    fn start_clears_previous_session_first() {
        let host = FakeHost::new();
        let controller = SessionController::new(&host, "warden-main");

        controller.start("python3", &[]).unwrap();

        assert_eq!(host.kills(), vec!["warden-main"]);
        assert_eq!(host.creates(), vec!["warden-main"]);
    }

    #[test]
    fn start_failure_is_start_failed() {
        let host = FakeHost::new();
        host.push_create_error("no server running");
        let controller = SessionController::new(&host, "warden-main");

        let err = controller.start("python3", &[]).unwrap_err();
        assert!(matches!(err, SessionError::StartFailed { .. }));
        assert!(err.to_string().contains("warden-main"));
    }

    #[test]
    fn exit_code_passes_through() {
        let host = FakeHost::new();
        host.push_exit_code(Some(7));
        let controller = SessionController::new(&host, "warden-main");

        assert_eq!(controller.exit_code().unwrap(), 7);
    }

    #[test]
    fn missing_exit_code_is_no_exit_code() {
        let host = FakeHost::new();
        let controller = SessionController::new(&host, "warden-main");

        let err = controller.exit_code().unwrap_err();
        assert!(matches!(err, SessionError::NoExitCode { .. }));
    }

    #[test]
    fn is_alive_reflects_host() {
        let host = FakeHost::new();
        host.push_alive(true);
        host.push_alive(false);
        let controller = SessionController::new(&host, "warden-main");

        assert!(controller.is_alive());
        assert!(!controller.is_alive());
    }

    #[test]
    fn kill_targets_owned_session() {
        let host = FakeHost::new();
        let controller = SessionController::new(&host, "warden-main");

        controller.kill().unwrap();
        assert_eq!(host.kills(), vec!["warden-main"]);
    }
}
