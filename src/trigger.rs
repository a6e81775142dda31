//! Trigger files.
//!
//! A zero-byte `.trigger` under a dataset's mountpoint asks the daemon
//! to fire that dataset on its next tick. The daemon consumes the file
//! before running the sequence; `zsnapd-trigger` writes it.

use std::io;
use std::path::{Path, PathBuf};

pub const TRIGGER_FILENAME: &str = ".trigger";

pub fn trigger_path(mountpoint: &Path) -> PathBuf {
    mountpoint.join(TRIGGER_FILENAME)
}

/// True when the mountpoint is a directory holding a trigger file.
pub fn is_pending(mountpoint: Option<&Path>) -> bool {
    match mountpoint {
        Some(dir) => dir.is_dir() && trigger_path(dir).exists(),
        None => false,
    }
}

/// Consume the trigger. Returns false when there was nothing to
/// consume (the tick is then a no-op). A file that exists but cannot
/// be removed is logged and still counts as consumed.
pub fn consume(dataset: &str, mountpoint: &Path) -> bool {
    let path = trigger_path(mountpoint);
    if !path.exists() {
        return false;
    }
    tracing::info!(dataset, path = %path.display(), "trigger file found");
    if let Err(error) = std::fs::remove_file(&path) {
        tracing::warn!(dataset, path = %path.display(), %error, "cannot remove trigger file");
    }
    true
}

/// Write a trigger file. The mountpoint must be an existing directory.
pub fn write(mountpoint: &Path) -> io::Result<()> {
    if !mountpoint.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("'{}' is not a directory", mountpoint.display()),
        ));
    }
    std::fs::write(trigger_path(mountpoint), b"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_consume() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_pending(Some(dir.path())));

        write(dir.path()).unwrap();
        assert!(is_pending(Some(dir.path())));

        assert!(consume("zpool/a", dir.path()));
        assert!(!is_pending(Some(dir.path())));
        assert!(!consume("zpool/a", dir.path()));
    }

    #[test]
    fn missing_mountpoint_is_never_pending() {
        assert!(!is_pending(None));
        assert!(!is_pending(Some(Path::new("/nonexistent/zsnapd/mount"))));
        assert!(write(Path::new("/nonexistent/zsnapd/mount")).is_err());
    }
}
