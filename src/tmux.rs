//! tmux session management for warden.
//!
//! Wraps tmux CLI commands behind the `SessionHost` trait: create a detached
//! session running the worker command, query liveness and exit status, and
//! kill. Sessions are created with `remain-on-exit` so the worker's exit
//! code stays readable from the dead pane after the process ends.

use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

/// Host abstraction over the session mechanism.
///
/// Production code uses [`TmuxHost`]; tests substitute a scripted fake.
pub trait SessionHost {
    /// Launch `program args...` inside a new detached session named `session`.
    fn create(&self, session: &str, program: &str, args: &[String]) -> Result<()>;

    /// Whether the session exists and its worker process is still running.
    /// Never fails; query errors report the session as dead.
    fn alive(&self, session: &str) -> bool;

    /// Exit code of the worker once it has terminated. `None` when the
    /// session is gone or the status is not readable (force-killed).
    fn exit_code(&self, session: &str) -> Result<Option<i32>>;

    /// Kill the session. Idempotent; a missing session is not an error.
    fn kill(&self, session: &str) -> Result<()>;
}

/// `SessionHost` backed by the tmux CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct TmuxHost;

impl SessionHost for TmuxHost {
    fn create(&self, session: &str, program: &str, args: &[String]) -> Result<()> {
        create_session(session, program, args)
    }

    fn alive(&self, session: &str) -> bool {
        session_exists(session) && !pane_dead(session).unwrap_or(true)
    }

    fn exit_code(&self, session: &str) -> Result<Option<i32>> {
        if !session_exists(session) {
            return Ok(None);
        }
        pane_dead_status(session)
    }

    fn kill(&self, session: &str) -> Result<()> {
        kill_session(session)
    }
}

/// Check that tmux is installed and reachable.
pub fn check_tmux() -> Result<String> {
    let output = Command::new("tmux").arg("-V").output().context(
        "tmux not found — install tmux (e.g., `apt install tmux` or `brew install tmux`)",
    )?;

    if !output.status.success() {
        bail!(
            "tmux -V failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(version = %version, "tmux found");
    Ok(version)
}

/// Sanitize a configured session name for tmux.
///
/// tmux target parsing treats '.' as pane separators, so session names
/// should avoid dots and other punctuation that can be interpreted.
pub fn sanitize_session_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Check if a tmux session exists.
pub fn session_exists(session: &str) -> bool {
    Command::new("tmux")
        .args(["has-session", "-t", session])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check whether the session's pane is dead (`remain-on-exit` pane).
pub fn pane_dead(session: &str) -> Result<bool> {
    let value = display_message(session, "#{pane_dead}")?;
    Ok(value == "1")
}

/// Exit status of a dead pane, or `None` while the pane is live or the
/// status is unreadable.
pub fn pane_dead_status(session: &str) -> Result<Option<i32>> {
    let value = display_message(session, "#{pane_dead_status}")?;
    if value.is_empty() {
        return Ok(None);
    }
    let code = value
        .parse::<i32>()
        .with_context(|| format!("unparseable pane_dead_status '{value}' for '{session}'"))?;
    Ok(Some(code))
}

fn display_message(session: &str, format: &str) -> Result<String> {
    let output = Command::new("tmux")
        .args(["display-message", "-p", "-t", session, format])
        .output()
        .with_context(|| format!("failed to query '{format}' for session '{session}'"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux display-message {format} failed: {stderr}");
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Create a detached tmux session running the given command.
///
/// The session is created with `new-session -d` so it starts in the
/// background, then `remain-on-exit` is enabled so the exit code survives
/// the process. Callers must ensure no session with this name is alive.
pub fn create_session(session: &str, program: &str, args: &[String]) -> Result<()> {
    if session_exists(session) {
        bail!(
            "tmux session '{session}' already exists — kill it with `tmux kill-session -t {session}`"
        );
    }

    // tmux new-session -d -s <name> <program> <args...>
    let mut cmd = Command::new("tmux");
    cmd.args(["new-session", "-d", "-s", session]);
    // Set a generous size so the PTY isn't tiny
    cmd.args(["-x", "220", "-y", "50"]);
    cmd.arg(program);
    for arg in args {
        cmd.arg(arg);
    }

    let output = cmd
        .output()
        .with_context(|| format!("failed to create tmux session '{session}'"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux new-session failed: {stderr}");
    }

    // A worker that exits within this window loses its exit status; the
    // attempt then reports a failure with no code.
    if let Err(e) = tmux_set(session, "remain-on-exit", "on") {
        warn!(
            session = session,
            error = %e,
            "failed to enable remain-on-exit; exit code may be unavailable"
        );
    }

    info!(session = session, program = program, "tmux session created");
    Ok(())
}

/// Kill a tmux session.
pub fn kill_session(session: &str) -> Result<()> {
    if !session_exists(session) {
        return Ok(()); // already gone
    }

    let output = Command::new("tmux")
        .args(["kill-session", "-t", session])
        .output()
        .with_context(|| format!("failed to kill tmux session '{session}'"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux kill-session failed: {stderr}");
    }

    info!(session = session, "tmux session killed");
    Ok(())
}

/// Attach to an existing tmux session (blocks until detach/exit).
pub fn attach(session: &str) -> Result<()> {
    if !session_exists(session) {
        bail!("tmux session '{session}' not found — is warden running? Start with `warden run`");
    }

    let status = Command::new("tmux")
        .args(["attach-session", "-t", session])
        .status()
        .with_context(|| format!("failed to attach to tmux session '{session}'"))?;

    if !status.success() {
        bail!("tmux attach exited with non-zero status");
    }

    Ok(())
}

/// Helper: run `tmux set -t <session> <option> <value>`.
fn tmux_set(session: &str, option: &str, value: &str) -> Result<()> {
    let output = Command::new("tmux")
        .args(["set", "-t", session, option, value])
        .output()
        .with_context(|| format!("failed to set tmux option '{option}' for session '{session}'"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("tmux set {option} failed: {stderr}");
    }

    Ok(())
}
