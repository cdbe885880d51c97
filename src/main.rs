mod attempt;
mod cli;
mod config;
mod disk;
mod events;
mod retry;
mod scheduler;
mod session;
mod sink;
mod tmux;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::info;

use cli::{Cli, Command};
use config::ProjectConfig;
use events::{ExecutionLog, LogEvent};
use scheduler::{CycleScheduler, Restart};
use session::SessionController;
use sink::ActivitySink;
use tmux::{SessionHost, TmuxHost};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config);

    let filter = match cli.verbose {
        0 if is_config_command => "warden=warn",
        0 => "warden=info",
        1 => "warden=debug",
        _ => "warden=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (mut config, config_path) = ProjectConfig::load(&cwd)?;
    config.apply_env_overrides()?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .warden/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Run => run_supervisor(&config),
        Command::Attach => {
            let session = tmux::sanitize_session_name(&config.supervisor.session);
            tmux::attach(&session)
        }
        Command::Config => {
            println!("{}", render_config(&config, config_path.as_deref())?);
            Ok(())
        }
    }
}

fn run_supervisor(config: &ProjectConfig) -> Result<()> {
    tmux::check_tmux()?;

    let logs_dir = &config.logs.dir;
    // The worker's sink exists before the worker ever runs, so the first
    // staleness read has a file to stat.
    let worker_sink = ActivitySink::daily(logs_dir, "main");
    worker_sink.ensure_exists()?;
    let log = ActivitySink::daily(logs_dir, "warden");
    let events = ExecutionLog::new(&logs_dir.join("events.jsonl"))?;

    let controller = SessionController::new(TmuxHost, &config.supervisor.session);

    // Ctrl-C: kill the worker session best-effort, then exit.
    {
        let session = controller.name().to_string();
        ctrlc::set_handler(move || {
            eprintln!("[warden] interrupted, killing worker session");
            if let Err(e) = TmuxHost.kill(&session) {
                eprintln!("[warden] failed to kill session on shutdown: {e:#}");
            }
            std::process::exit(130);
        })
        .context("failed to install interrupt handler")?;
    }

    info!(
        session = controller.name(),
        worker = %config.worker.command_line(),
        cycle_interval_secs = config.supervisor.cycle_interval_secs,
        "supervisor starting"
    );
    log.append(&format!(
        "supervisor started (session '{}', worker '{}')",
        controller.name(),
        config.worker.command_line()
    ))?;
    events.log(LogEvent::SupervisorStarted {
        session: controller.name().to_string(),
        worker: config.worker.command_line(),
    })?;

    let mut scheduler = CycleScheduler::new(
        &controller,
        &config.worker,
        &config.supervisor,
        &worker_sink,
        &log,
        &events,
    );
    let Restart = scheduler.run();

    log.append("stall detected, restarting supervisor process")?;
    events.log(LogEvent::RestartTriggered {
        reason: "worker stall".to_string(),
    })?;
    restart_self()
}

/// Re-execute the supervisor with its original argument vector.
///
/// On Unix this replaces the process image, so a stall recovers into a
/// completely fresh supervisor with no inherited state. Only returns on
/// failure.
fn restart_self() -> Result<()> {
    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();
    info!(exe = %exe.display(), "re-executing supervisor");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = std::process::Command::new(&exe).args(&args).exec();
        Err(err).with_context(|| format!("failed to re-execute {}", exe.display()))
    }

    #[cfg(not(unix))]
    {
        std::process::Command::new(&exe)
            .args(&args)
            .spawn()
            .with_context(|| format!("failed to re-execute {}", exe.display()))?;
        std::process::exit(0)
    }
}

fn render_config(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let payload = serde_json::json!({
        "worker": {
            "program": config.worker.program,
            "args": config.worker.args,
        },
        "supervisor": {
            "session": config.supervisor.session,
            "poll_interval_secs": config.supervisor.poll_interval_secs,
            "stall_threshold_secs": config.supervisor.stall_threshold_secs,
            "cycle_interval_secs": config.supervisor.cycle_interval_secs,
            "max_retries": config.supervisor.max_retries,
            "retry_delay_secs": config.supervisor.retry_delay_secs,
            "overrun_cooldown_secs": config.supervisor.overrun_cooldown_secs,
            "min_free_disk_mb": config.supervisor.min_free_disk_mb,
        },
        "logs": {
            "dir": config.logs.dir,
        },
        "source_path": config_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string()),
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}
