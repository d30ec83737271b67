//! Bridges a blocking [`wsterm_watch::WatchBackend`] into the async world:
//! spec.md §9's "multi-producer single-consumer queue of normalized events",
//! fed by a dedicated thread (`spawn_blocking`) and drained by the sync
//! orchestrator. Grounded on the thread-plus-channel shape of
//! `examples/AnalyseDeCircuit-oxideterm/agent/src/watcher.rs`'s
//! `watch_thread`, which also runs a blocking OS loop on its own thread and
//! forwards through an `mpsc::Sender`.

use std::path::Path;

use tokio::sync::mpsc;
use tracing::error;

use wsterm_watch::{platform_watcher, NormalizedEvent, WatchBackend};

/// Spawns the platform watcher on a blocking thread, watching `root`
/// recursively, and returns a channel of normalized events.
pub fn spawn(root: &Path) -> Result<mpsc::Receiver<NormalizedEvent>, wsterm_watch::WatchError> {
    let mut backend = platform_watcher()?;
    backend.add_dir_watch(root)?;

    let (tx, rx) = mpsc::channel(1024);
    tokio::task::spawn_blocking(move || loop {
        match backend.read_event() {
            Ok(event) => {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "watcher backend failed, stopping watch thread");
                break;
            }
        }
    });

    Ok(rx)
}
