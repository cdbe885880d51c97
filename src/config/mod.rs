use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".warden";

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_program")]
    pub program: String,
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_session")]
    pub session: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_overrun_cooldown_secs")]
    pub overrun_cooldown_secs: u64,
    #[serde(default = "default_min_free_disk_mb")]
    pub min_free_disk_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_logs_dir")]
    pub dir: PathBuf,
}

fn default_worker_program() -> String {
    "python3".to_string()
}

fn default_worker_args() -> Vec<String> {
    vec!["scripts/main.py".to_string()]
}

fn default_session() -> String {
    "warden-main".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_stall_threshold_secs() -> u64 {
    60
}

fn default_cycle_interval_secs() -> u64 {
    900
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_overrun_cooldown_secs() -> u64 {
    60
}

fn default_min_free_disk_mb() -> u64 {
    1024
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: default_worker_program(),
            args: default_worker_args(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            session: default_session(),
            poll_interval_secs: default_poll_interval_secs(),
            stall_threshold_secs: default_stall_threshold_secs(),
            cycle_interval_secs: default_cycle_interval_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            overrun_cooldown_secs: default_overrun_cooldown_secs(),
            min_free_disk_mb: default_min_free_disk_mb(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: default_logs_dir(),
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn overrun_cooldown(&self) -> Duration {
        Duration::from_secs(self.overrun_cooldown_secs)
    }
}

impl WorkerConfig {
    /// Command line rendered for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.warden/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    /// Apply `WARDEN_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        env_string("WARDEN_WORKER_PROGRAM", &mut self.worker.program);
        if let Ok(raw) = std::env::var("WARDEN_WORKER_ARGS") {
            self.worker.args = raw.split_whitespace().map(str::to_string).collect();
        }
        env_string("WARDEN_SESSION", &mut self.supervisor.session);
        env_u64(
            "WARDEN_POLL_INTERVAL_SECS",
            &mut self.supervisor.poll_interval_secs,
        )?;
        env_u64(
            "WARDEN_STALL_THRESHOLD_SECS",
            &mut self.supervisor.stall_threshold_secs,
        )?;
        env_u64(
            "WARDEN_CYCLE_INTERVAL_SECS",
            &mut self.supervisor.cycle_interval_secs,
        )?;
        env_u32("WARDEN_MAX_RETRIES", &mut self.supervisor.max_retries)?;
        env_u64(
            "WARDEN_RETRY_DELAY_SECS",
            &mut self.supervisor.retry_delay_secs,
        )?;
        env_u64(
            "WARDEN_OVERRUN_COOLDOWN_SECS",
            &mut self.supervisor.overrun_cooldown_secs,
        )?;
        env_u64(
            "WARDEN_MIN_FREE_DISK_MB",
            &mut self.supervisor.min_free_disk_mb,
        )?;
        if let Ok(raw) = std::env::var("WARDEN_LOGS_DIR") {
            self.logs.dir = PathBuf::from(raw);
        }
        Ok(())
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

fn env_string(key: &str, slot: &mut String) {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw;
    }
}

fn env_u64(key: &str, slot: &mut u64) -> Result<()> {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: '{raw}'"))?;
    }
    Ok(())
}

fn env_u32(key: &str, slot: &mut u32) -> Result<()> {
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: '{raw}'"))?;
    }
    Ok(())
}
