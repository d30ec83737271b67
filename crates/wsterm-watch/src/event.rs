use std::path::PathBuf;

/// OS-independent filesystem change, as produced by any `WatchBackend`.
/// `ItemMoved` is only emitted when a backend can atomically correlate a
/// rename; otherwise backends fall back to a remove/create pair (spec.md
/// §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NormalizedEvent {
    DirectoryCreated(PathBuf),
    DirectoryRemoved(PathBuf),
    FileCreated(PathBuf),
    FileModified(PathBuf),
    FileRemoved(PathBuf),
    ItemMoved { from: PathBuf, to: PathBuf },
}

impl NormalizedEvent {
    /// The path the event is primarily about. For `ItemMoved` this is the
    /// destination, since that's what downstream consumers usually care
    /// about uploading.
    pub fn primary_path(&self) -> &std::path::Path {
        match self {
            NormalizedEvent::DirectoryCreated(p)
            | NormalizedEvent::DirectoryRemoved(p)
            | NormalizedEvent::FileCreated(p)
            | NormalizedEvent::FileModified(p)
            | NormalizedEvent::FileRemoved(p) => p,
            NormalizedEvent::ItemMoved { to, .. } => to,
        }
    }
}
