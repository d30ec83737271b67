//! Sync orchestrator (spec.md §4.3): initial reconciliation against the
//! server's snapshot, then live one-way propagation of local filesystem
//! events. New orchestration logic — the teacher has nothing like a
//! workspace mirror — but the delayed-write coalescing pump reuses the
//! "blocking thread feeds a channel, a loop drains it on a timer" shape
//! from `agent/src/watcher.rs`'s consumer loop, and the mutation sequencing
//! mirrors `wsterm-workspace`'s own diff-application tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use wsterm_protocol::{Command, DirEntry, FileEntry, ResponseBody, SnapshotTree};
use wsterm_workspace::{diff, Workspace};

use crate::error::ClientError;
use crate::identity::workspace_identity;
use crate::transport::ClientTransport;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Coalesce delay for a burst of modifies to the same path (spec.md §4.3).
const WRITE_COALESCE_DELAY: Duration = Duration::from_millis(500);
/// `write-file` fragment size (spec.md §4.3).
const FRAGMENT_SIZE: usize = 4 * 1024 * 1024;

pub struct SyncOrchestrator {
    workspace: Workspace,
    transport: ClientTransport,
    pending_writes: AsyncMutex<HashMap<String, Instant>>,
}

impl SyncOrchestrator {
    pub fn new(workspace: Workspace, transport: ClientTransport) -> Self {
        Self {
            workspace,
            transport,
            pending_writes: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn transport(&self) -> &ClientTransport {
        &self.transport
    }

    /// Step 1/2/3 of spec.md §4.3: identity, `sync-workspace`, diff-apply.
    pub async fn reconcile(&self) -> Result<(), ClientError> {
        let identity = workspace_identity(self.workspace.root());
        info!(workspace = %identity, "starting initial reconciliation");

        let response = self
            .transport
            .send_request(Command::SyncWorkspace { workspace: identity }, REQUEST_TIMEOUT)
            .await?;
        if !response.is_ok() {
            return Err(ClientError::ServerError(response.code, response.message));
        }
        let remote = match response.body {
            ResponseBody::Snapshot { data } => data,
            _ => SnapshotTree::default(),
        };

        let local = self.workspace.snapshot()?;
        let delta = diff(&local, &remote);
        self.apply_diff(String::new(), &delta).await
    }

    // Boxed because the walk recurses into itself for nested `dirs` trees;
    // plain `async fn` can't describe a self-referential future type.
    fn apply_diff<'a>(
        &'a self,
        prefix: String,
        tree: &'a SnapshotTree,
    ) -> futures_util::future::BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            for (name, entry) in &tree.dirs {
                let rel = join(&prefix, name);
                match entry {
                    DirEntry::Removed(_) => {
                        self.request(Command::RemoveDir { path: rel }).await?;
                    }
                    DirEntry::Tree(sub) => {
                        self.request(Command::CreateDir { path: rel.clone() }).await?;
                        self.apply_diff(rel, sub).await?;
                    }
                }
            }
            for (name, entry) in &tree.files {
                let rel = join(&prefix, name);
                match entry {
                    FileEntry::Removed(_) => {
                        self.request(Command::RemoveFile { path: rel }).await?;
                    }
                    FileEntry::Hash(_) => {
                        self.push_file(&rel).await?;
                    }
                }
            }
            Ok(())
        })
    }

    async fn request(&self, command: Command) -> Result<(), ClientError> {
        let response = self.transport.send_request(command, REQUEST_TIMEOUT).await?;
        if !response.is_ok() {
            warn!(code = response.code, message = %response.message, "mutation rejected by server");
        }
        Ok(())
    }

    /// Streams the current local content of `rel` in `FRAGMENT_SIZE`
    /// fragments, then propagates the executable bit (spec.md §4.3).
    async fn push_file(&self, rel: &str) -> Result<(), ClientError> {
        let path = self.workspace.resolve(rel)?;
        let bytes = std::fs::read(&path)?;
        self.stream_write(rel, &bytes).await?;

        if let Some(mode) = executable_mode(&path) {
            self.request(Command::SetPerm { path: rel.to_string(), perm: mode }).await?;
        }
        Ok(())
    }

    async fn stream_write(&self, rel: &str, bytes: &[u8]) -> Result<(), ClientError> {
        if bytes.is_empty() {
            self.request(Command::WriteFile {
                path: rel.to_string(),
                data: Vec::new(),
                overwrite: true,
            })
            .await?;
            return Ok(());
        }

        let mut overwrite = true;
        for chunk in bytes.chunks(FRAGMENT_SIZE) {
            self.request(Command::WriteFile {
                path: rel.to_string(),
                data: chunk.to_vec(),
                overwrite,
            })
            .await?;
            overwrite = false;
        }
        Ok(())
    }

    /// Handles one normalized filesystem event from the watcher.
    pub async fn handle_event(&self, event: wsterm_watch::NormalizedEvent) -> Result<(), ClientError> {
        use wsterm_watch::NormalizedEvent::*;

        match event {
            DirectoryCreated(path) => {
                if let Some(rel) = self.relativize(&path, true) {
                    self.request(Command::CreateDir { path: rel }).await?;
                }
            }
            DirectoryRemoved(path) => {
                if let Some(rel) = self.relativize(&path, true) {
                    self.pending_writes.lock().await.remove(&rel);
                    self.request(Command::RemoveDir { path: rel }).await?;
                }
            }
            FileCreated(path) => {
                // A following FileModified always accompanies a create
                // (spec.md §4.1); the coalescing pump handles the upload.
                let _ = self.relativize(&path, false);
            }
            FileModified(path) => {
                if let Some(rel) = self.relativize(&path, false) {
                    self.schedule_write(rel).await;
                }
            }
            FileRemoved(path) => {
                if let Some(rel) = self.relativize(&path, false) {
                    // Open-question decision (DESIGN.md #1): a removal wins
                    // over any write still coalescing for the same path.
                    self.pending_writes.lock().await.remove(&rel);
                    self.request(Command::RemoveFile { path: rel }).await?;
                }
            }
            ItemMoved { from, to } => {
                if let (Some(src), Some(dst)) = (self.relativize(&from, false), self.relativize(&to, false)) {
                    self.request(Command::MoveItem { src_path: src, dst_path: dst }).await?;
                }
            }
        }
        Ok(())
    }

    async fn schedule_write(&self, rel: String) {
        let mut pending = self.pending_writes.lock().await;
        // "subsequent modifies... reset nothing (the first scheduled
        // deadline stands)" — spec.md §4.3.
        pending.entry(rel).or_insert_with(|| Instant::now() + WRITE_COALESCE_DELAY);
    }

    /// Runs forever, flushing coalesced writes whose deadline has passed.
    /// Intended to run as its own task alongside the watcher bridge loop.
    pub async fn run_write_pump(&self) {
        let mut tick = tokio::time::interval(Duration::from_millis(50));
        loop {
            tick.tick().await;
            let due: Vec<String> = {
                let pending = self.pending_writes.lock().await;
                let now = Instant::now();
                pending
                    .iter()
                    .filter_map(|(path, deadline)| (*deadline <= now).then(|| path.clone()))
                    .collect()
            };
            for rel in due {
                self.pending_writes.lock().await.remove(&rel);
                if let Err(e) = self.push_file(&rel).await {
                    warn!(path = %rel, error = %e, "failed to push coalesced write");
                }
            }
        }
    }

    /// Converts an absolute watcher path into a `/`-separated, workspace
    /// relative path, dropping anything under a `.git` component or
    /// matching an ignore rule (spec.md §4.2/§9).
    fn relativize(&self, absolute: &Path, is_dir: bool) -> Option<String> {
        let rel_path = absolute.strip_prefix(self.workspace.root()).ok()?;
        let rel = rel_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if rel.is_empty() || rel.split('/').any(|c| c == ".git") {
            return None;
        }
        if self.workspace.ignore().is_ignored(&rel, is_dir) {
            return None;
        }
        Some(rel)
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(unix)]
fn executable_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path).ok()?.permissions().mode();
    (mode & 0o111 != 0).then_some(mode & 0o777)
}

#[cfg(not(unix))]
fn executable_mode(_path: &Path) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_empty_prefix() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", "b"), "a/b");
    }
}
