//! Verified writes for container files.
//!
//! Every container save goes through [`write_verified`]: the bytes land in a
//! temporary sibling which is renamed over the target, and the target is
//! re-stat'ed afterwards. An empty file or an mtime older than the save start
//! means the write went missing, which is fatal for that container.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{CoreError, Result};

/// Filesystem timestamps come from a coarse clock and may trail `SystemTime::now()`.
const MTIME_SLACK: Duration = Duration::from_secs(1);

/// Atomically write `bytes` to `path` and verify the result on disk.
pub fn write_verified(path: &Path, bytes: &[u8]) -> Result<()> {
    let started = SystemTime::now();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = tmp_sibling(path);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = bytes.len(), "container written");

    verify_written(path, started)
}

/// Check that `path` is non-empty and was modified no earlier than `started`.
pub fn verify_written(path: &Path, started: SystemTime) -> Result<()> {
    let meta = fs::metadata(path)?;
    if meta.len() == 0 {
        return Err(CoreError::ZeroSizedContainer(path.to_path_buf()));
    }

    let mtime = meta.modified()?;
    if mtime + MTIME_SLACK < started {
        return Err(CoreError::ModifiedTime {
            path: path.to_path_buf(),
            mtime: epoch_secs(mtime),
            started: epoch_secs(started),
        });
    }
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
