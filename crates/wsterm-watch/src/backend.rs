use std::path::Path;

use crate::error::WatchError;
use crate::event::NormalizedEvent;

/// One OS-specific observer of filesystem changes under a set of watched
/// roots. Implementations buffer internally so a single OS notification
/// (e.g. a directory appearing via `mkdir -p`) can synthesize several
/// `NormalizedEvent`s; `read_event` drains that internal queue before
/// blocking on the OS primitive again.
///
/// Callers run `read_event` in a loop on a dedicated thread (or
/// `spawn_blocking`) and forward results into the async world through a
/// channel — mirroring the "multi-producer single-consumer queue of
/// normalized events" design note in spec.md §9.
pub trait WatchBackend {
    /// Begins watching `absolute_path` and all of its current descendants,
    /// recursively.
    fn add_dir_watch(&mut self, absolute_path: &Path) -> Result<(), WatchError>;

    /// Blocks until the next normalized event is available.
    fn read_event(&mut self) -> Result<NormalizedEvent, WatchError>;
}
