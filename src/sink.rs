//! Daily activity sinks — plain-text append-only logs.
//!
//! Two sinks exist per run: the worker's sink (`main_<date>.log`), whose
//! modification time is the staleness signal, and the supervisor's own
//! activity log (`warden_<date>.log`). Line content is never parsed; only
//! the worker sink's mtime is load-bearing.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Local;

/// Render a duration as `1h 02m 03s`, `2m 03s`, or `45s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

/// Append-only activity sink, one file per calendar day.
pub struct ActivitySink {
    path: PathBuf,
}

impl ActivitySink {
    /// Sink for today under `logs_dir`: `<prefix>_<YYYY_MM_DD>.log`.
    pub fn daily(logs_dir: &Path, prefix: &str) -> Self {
        let name = format!("{prefix}_{}.log", Local::now().format("%Y_%m_%d"));
        Self {
            path: logs_dir.join(name),
        }
    }

    /// Sink at an explicit path.
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the sink file (and parent directories) without writing a line.
    pub fn ensure_exists(&self) -> Result<()> {
        self.open_append().map(|_| ())
    }

    /// Append `<timestamp> - <message>`, creating the file on first write.
    pub fn append(&self, message: &str) -> Result<()> {
        let mut file = self.open_append()?;
        writeln!(
            file,
            "{} - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        )
        .with_context(|| format!("failed to append to sink: {}", self.path.display()))?;
        Ok(())
    }

    /// Last modification time of the sink, or `None` when it does not exist.
    pub fn last_activity(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn open_append(&self) -> Result<std::fs::File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create sink directory: {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open sink: {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_seconds_only() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
    }

    #[test]
    fn format_duration_minutes() {
        assert_eq!(format_duration(Duration::from_secs(60)), "1m 00s");
        assert_eq!(format_duration(Duration::from_secs(123)), "2m 03s");
        assert_eq!(format_duration(Duration::from_secs(3599)), "59m 59s");
    }

    #[test]
    fn format_duration_hours() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h 00m 00s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
        assert_eq!(format_duration(Duration::from_secs(90061)), "25h 01m 01s");
    }

    #[test]
    fn daily_sink_uses_date_in_filename() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ActivitySink::daily(tmp.path(), "main");
        let name = sink.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("main_"), "unexpected name: {name}");
        assert!(name.ends_with(".log"), "unexpected name: {name}");
        // main_YYYY_MM_DD.log
        assert_eq!(name.len(), "main_0000_00_00.log".len());
    }

    #[test]
    fn append_creates_parents_and_formats_line() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ActivitySink::at(tmp.path().join("deep").join("nested").join("run.log"));

        sink.append("worker finished in 45s").unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let line = content.lines().next().unwrap();
        assert!(line.ends_with(" - worker finished in 45s"), "got: {line}");
        // timestamp prefix: YYYY-MM-DD HH:MM:SS
        assert_eq!(line.split(" - ").next().unwrap().len(), 19);
    }

    #[test]
    fn append_accumulates_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ActivitySink::at(tmp.path().join("a.log"));
        sink.append("one").unwrap();
        sink.append("two").unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn last_activity_none_for_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ActivitySink::at(tmp.path().join("missing.log"));
        assert!(sink.last_activity().is_none());
    }

    #[test]
    fn last_activity_tracks_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ActivitySink::at(tmp.path().join("a.log"));
        sink.append("hello").unwrap();
        let first = sink.last_activity().unwrap();

        // Backdate, then write again — mtime must advance past the backdate.
        filetime::set_file_mtime(sink.path(), filetime::FileTime::from_unix_time(1_000_000, 0))
            .unwrap();
        let backdated = sink.last_activity().unwrap();
        assert!(backdated < first);

        sink.append("again").unwrap();
        assert!(sink.last_activity().unwrap() > backdated);
    }

    #[test]
    fn ensure_exists_creates_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = ActivitySink::at(tmp.path().join("logs").join("main.log"));
        assert!(sink.last_activity().is_none());

        sink.ensure_exists().unwrap();
        assert!(sink.path().exists());
        assert_eq!(std::fs::read_to_string(sink.path()).unwrap(), "");
        assert!(sink.last_activity().is_some());
    }
}
