//! Server command dispatcher (spec.md §4.6/§6): routes inbound `REQUEST`
//! frames to the workspace or shell subsystem and owns the forwarding loop
//! that turns shell stdout into outbound `write-stdout` requests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;

use wsterm_protocol::{Command, ResponseBody, CODE_ERROR, CODE_OK};
use wsterm_workspace::Workspace;

use crate::error::CommandError;
use crate::registry::SessionRegistry;
use crate::shell::Shell;
use crate::transport::SharedSink;

/// Default detachable-session idle TTL when `create-shell` omits `timeout`.
/// Not specified by spec.md §6 (field is documented as optional with no
/// default given); chosen to match the reaper's one-second granularity
/// headroom while being generous for a typical edit/attach/detach cycle.
/// See DESIGN.md's open-question log.
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;

/// Caps a single forwarded stdout chunk (spec.md §4.6: "reads up to 4 KiB").
const STDOUT_CHUNK_SIZE: usize = 4096;

struct ActiveShell {
    session_id: Option<Uuid>,
    shell: Arc<Shell>,
}

/// Everything one connection needs across dispatched commands: its bound
/// workspace (set by `sync-workspace`) and its currently attached shell,
/// if any.
pub struct ConnectionState {
    pub workspace: AsyncMutex<Option<Workspace>>,
    shell: AsyncMutex<Option<ActiveShell>>,
    pub registry: Arc<SessionRegistry>,
    pub next_request_id: AtomicU64,
}

impl ConnectionState {
    pub fn new(registry: Arc<SessionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            workspace: AsyncMutex::new(None),
            shell: AsyncMutex::new(None),
            registry,
            // Server-allocated ids start at 0x10000 to keep the two
            // directions' id spaces disjoint in logs (spec.md §3).
            next_request_id: AtomicU64::new(0x10000),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Detaches (if the shell has a session id) or kills (otherwise) the
    /// connection's shell when the transport closes (spec.md §4.6).
    pub async fn on_connection_closed(&self) {
        let mut guard = self.shell.lock().await;
        if let Some(active) = guard.take() {
            match active.session_id {
                Some(id) => self.registry.mark_detached(id).await,
                None => {
                    let _ = active.shell.request_exit();
                }
            }
        }
    }
}

/// Dispatches one decoded command, returning the `(code, message, body)`
/// that the caller frames into a `RESPONSE` packet.
pub async fn dispatch(
    state: &Arc<ConnectionState>,
    sink: SharedSink,
    command: Command,
) -> (i32, String, ResponseBody) {
    match run(state, sink, command).await {
        Ok(body) => (CODE_OK, String::new(), body),
        Err(e) => (CODE_ERROR, e.0, ResponseBody::Empty {}),
    }
}

async fn run(
    state: &Arc<ConnectionState>,
    sink: SharedSink,
    command: Command,
) -> Result<ResponseBody, CommandError> {
    match command {
        Command::SyncWorkspace { workspace } => {
            let id = sanitize_workspace_id(&workspace)?;
            let root = workspace_root().join(id);
            let ws = Workspace::open(root).map_err(CommandError::from)?;
            let snapshot = ws.snapshot().map_err(CommandError::from)?;
            *state.workspace.lock().await = Some(ws);
            Ok(ResponseBody::Snapshot { data: snapshot })
        }
        Command::ListDir { .. } => Ok(ResponseBody::Empty {}),
        Command::CreateDir { path } => with_workspace(state, |ws| ws.create_directory(&path)).await,
        Command::RemoveDir { path } => with_workspace(state, |ws| ws.remove_directory(&path)).await,
        Command::WriteFile { path, data, overwrite } => {
            with_workspace(state, |ws| ws.write_file(&path, &data, overwrite)).await
        }
        Command::RemoveFile { path } => with_workspace(state, |ws| ws.remove_file(&path)).await,
        Command::MoveItem { src_path, dst_path } => {
            with_workspace(state, |ws| ws.move_item(&src_path, &dst_path)).await
        }
        Command::SetPerm { path, perm } => with_workspace(state, |ws| ws.set_perm(&path, perm)).await,
        Command::CreateShell { size, session, timeout } => {
            create_or_reattach_shell(state, sink, size, session, timeout).await
        }
        Command::WriteStdin { buffer } => {
            let guard = state.shell.lock().await;
            let active = guard.as_ref().ok_or_else(|| CommandError("no attached shell".into()))?;
            active.shell.write(&buffer).map_err(|e| CommandError(e.to_string()))?;
            Ok(ResponseBody::Empty {})
        }
        Command::ResizeShell { size } => {
            let guard = state.shell.lock().await;
            let active = guard.as_ref().ok_or_else(|| CommandError("no attached shell".into()))?;
            active.shell.resize(size).map_err(|e| CommandError(e.to_string()))?;
            Ok(ResponseBody::Empty {})
        }
        // Server-to-client-only commands received here would be a protocol
        // violation by the peer; reject rather than silently accept.
        Command::WriteStdout { .. } | Command::ExitShell {} => {
            Err(CommandError("command is server-to-client only".into()))
        }
    }
}

async fn with_workspace(
    state: &Arc<ConnectionState>,
    f: impl FnOnce(&Workspace) -> Result<(), wsterm_workspace::WorkspaceError>,
) -> Result<ResponseBody, CommandError> {
    let guard = state.workspace.lock().await;
    let ws = guard
        .as_ref()
        .ok_or_else(|| CommandError("workspace not bound; call sync-workspace first".into()))?;
    f(ws)?;
    Ok(ResponseBody::Empty {})
}

async fn create_or_reattach_shell(
    state: &Arc<ConnectionState>,
    sink: SharedSink,
    size: wsterm_protocol::ShellSize,
    session: Option<String>,
    timeout: Option<u64>,
) -> Result<ResponseBody, CommandError> {
    if let Some(session) = session {
        let id = Uuid::parse_str(&session)
            .map_err(|_| CommandError(format!("Shell session {session} not found")))?;
        let entry = state
            .registry
            .attach(id)
            .await
            .ok_or_else(|| CommandError(format!("Shell session {session} not found")))?;
        entry.shell.resize(size).map_err(|e| CommandError(e.to_string()))?;
        *state.shell.lock().await = Some(ActiveShell {
            session_id: Some(id),
            shell: entry.shell.clone(),
        });
        spawn_forwarding(state.clone(), sink, entry.shell.clone());
        return Ok(ResponseBody::ShellCreated {
            platform: std::env::consts::OS.to_string(),
            session: Some(id.to_string()),
            line_mode: None,
        });
    }

    let cwd = {
        let guard = state.workspace.lock().await;
        guard
            .as_ref()
            .ok_or_else(|| CommandError("workspace not bound; call sync-workspace first".into()))?
            .root()
            .to_path_buf()
    };
    let shell = Arc::new(Shell::spawn(&cwd, size).map_err(|e| CommandError(e.to_string()))?);

    // Every freshly spawned shell gets a detachable session id, regardless
    // of whether the caller supplied `timeout` (spec.md §6: the field is
    // optional, not a switch for whether the shell is detachable at all).
    let session_id = Uuid::new_v4();
    let ttl = Duration::from_secs(timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS));
    state.registry.insert(session_id, shell.clone(), ttl).await;

    *state.shell.lock().await = Some(ActiveShell {
        session_id: Some(session_id),
        shell: shell.clone(),
    });
    spawn_forwarding(state.clone(), sink, shell.clone());

    Ok(ResponseBody::ShellCreated {
        platform: std::env::consts::OS.to_string(),
        session: Some(session_id.to_string()),
        line_mode: None,
    })
}

/// Pumps shell stdout into `write-stdout` requests until the child exits,
/// then sends one `exit-shell` request (spec.md §4.6).
fn spawn_forwarding(state: Arc<ConnectionState>, sink: SharedSink, shell: Arc<Shell>) {
    tokio::spawn(async move {
        loop {
            let shell_for_read = shell.clone();
            let read = tokio::task::spawn_blocking(move || {
                let mut buf = vec![0u8; STDOUT_CHUNK_SIZE];
                let n = shell_for_read.read(&mut buf);
                (n, buf)
            })
            .await;

            let (n, mut buf) = match read {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "forwarding pump task panicked");
                    break;
                }
            };

            match n {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    let id = state.next_id();
                    let request = wsterm_protocol::RequestPacket::new(
                        id,
                        Command::WriteStdout { buffer: buf },
                    );
                    if crate::transport::send_frame(&sink, request.into()).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        debug!("shell forwarding loop ending, sending exit-shell");
        let id = state.next_id();
        let request = wsterm_protocol::RequestPacket::new(id, Command::ExitShell {});
        let _ = crate::transport::send_frame(&sink, request.into()).await;
    });
}

fn workspace_root() -> PathBuf {
    crate::config::default_workspace_root()
}

/// Workspace identities are a single path segment (spec.md §4.3 builds them
/// as `"<basename>-<sha1>@<hostname>"`, no separators); reject anything that
/// could escape `$WSTERM_WORKSPACE`.
fn sanitize_workspace_id(id: &str) -> Result<&str, CommandError> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(CommandError(format!("invalid workspace identity: {id:?}")));
    }
    Ok(id)
}
