use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path {0:?} escapes the workspace root")]
    PathEscapesRoot(String),

    #[error("malformed .gitignore line {line}: {reason}")]
    IgnoreRule { line: usize, reason: String },
}

impl WorkspaceError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WorkspaceError::Io {
            path: path.into(),
            source,
        }
    }
}
