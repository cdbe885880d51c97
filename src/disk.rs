//! Free-disk preflight for the logs filesystem.
//!
//! The worker appends to its sink every cycle; launching it onto a full
//! disk produces confusing downstream failures, so the scheduler checks
//! free space first and skips the cycle when it is below the floor.

use std::path::Path;

use anyhow::Result;

/// Free bytes on the filesystem containing `path`.
///
/// The path is walked up to its nearest existing ancestor first, so a
/// not-yet-created logs directory resolves to its parent filesystem.
#[cfg(unix)]
pub fn free_bytes(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    use anyhow::{Context, bail};

    let probe = existing_ancestor(path);
    let c_path =
        CString::new(probe.as_os_str().as_bytes()).context("path contains an interior NUL byte")?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        bail!(
            "statvfs failed for {}: {}",
            probe.display(),
            std::io::Error::last_os_error()
        );
    }

    #[allow(clippy::unnecessary_cast)] // field widths differ across platforms
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn free_bytes(_path: &Path) -> Result<u64> {
    Ok(u64::MAX)
}

/// True when the filesystem holding `path` has at least `min_mb` MiB free.
pub fn has_free_space(path: &Path, min_mb: u64) -> Result<bool> {
    Ok(free_bytes(path)? >= min_mb.saturating_mul(1024 * 1024))
}

#[cfg(unix)]
fn existing_ancestor(path: &Path) -> &Path {
    let mut current = path;
    loop {
        if current.exists() {
            return current;
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return Path::new("."),
        }
    }
}
