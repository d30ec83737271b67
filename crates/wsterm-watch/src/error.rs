use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("io error watching {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// `ENOSPC` (watch-table exhausted) or `EMFILE` (too many open file
    /// descriptors) — unrecoverable per spec.md §4.1/§7, surfaces rather
    /// than being silently dropped.
    #[error("fatal watcher resource error at {path}: {source}")]
    Fatal { path: PathBuf, source: io::Error },
}

impl WatchError {
    pub fn from_os(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if is_fatal_os_error(&source) {
            WatchError::Fatal { path, source }
        } else {
            WatchError::Io { path, source }
        }
    }
}

#[cfg(unix)]
fn is_fatal_os_error(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENOSPC) | Some(libc::EMFILE))
}

#[cfg(not(unix))]
fn is_fatal_os_error(_e: &io::Error) -> bool {
    false
}
