//! wsterm-client: mirrors a local workspace to a wsterm server, then opens
//! an interactive shell over the same connection (spec.md §1).

mod error;
mod identity;
mod input;
mod resize;
mod sync;
mod transport;
mod watch_bridge;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wsterm_protocol::Command;
use wsterm_workspace::Workspace;

use error::ClientError;
use sync::SyncOrchestrator;
use transport::{ClientTransport, Inbound};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Delay before a reconnect attempt (spec.md §4.5/§7: auto-reconnect rebuilds
/// the transport rather than exiting; no retry interval is specified, so this
/// is a judgment call analogous to `DEFAULT_SESSION_TIMEOUT_SECS` on the
/// server).
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "wsterm-client", about = "Remote shell + workspace mirror client")]
struct Args {
    /// WebSocket URL of the wsterm server, e.g. ws://host:7681/ws.
    #[arg(long)]
    server: String,

    /// Local directory to mirror. Defaults to the current directory.
    #[arg(long, default_value = ".")]
    path: PathBuf,

    /// Shared bearer token, sent as `Authorization: Token <token>`.
    #[arg(long, env = "WSTERM_TOKEN")]
    token: Option<String>,

    /// Resume a previously detached shell session by id.
    #[arg(long)]
    session: Option<String>,

    /// Idle timeout (seconds) the server should keep the shell around for
    /// after this client disconnects.
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// On an unexpected connection loss, rebuild the transport and
    /// reattach the shell session by id instead of exiting (spec.md §4.5).
    #[arg(long)]
    auto_reconnect: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "wsterm-client exiting on error");
        std::process::exit(1);
    }
    Ok(())
}

/// Why one connection's `connect_and_serve` call ended.
enum EndReason {
    /// The remote shell exited; the client's job is done.
    ShellExited,
    /// Local stdin ended (e.g. piped input drained); nothing left to send.
    InputEnded,
    /// The transport closed (or a request timed out waiting on a dead
    /// connection) without the shell itself reporting exit.
    ConnectionLost,
}

/// Top-level loop: connects once, then (if `--auto-reconnect` is set and the
/// connection was lost rather than the shell exiting) reconnects and
/// reattaches the same shell session by id, per spec.md §4.5/§7 item 2.
async fn run(args: Args) -> Result<(), ClientError> {
    let mut session = args.session.clone();

    loop {
        match connect_and_serve(&args, session.clone()).await {
            Ok((EndReason::ShellExited | EndReason::InputEnded, _)) => return Ok(()),
            Ok((EndReason::ConnectionLost, last_session)) => {
                session = last_session.or(session);
                if !args.auto_reconnect {
                    return Ok(());
                }
                warn!(session = ?session, "connection lost, reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
            Err(e) if args.auto_reconnect && is_reconnectable(&e) => {
                warn!(error = %e, "connect attempt failed, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Errors from a connect attempt itself (as opposed to a dispatch/protocol
/// error) that auto-reconnect should retry through (spec.md §7 item 2).
fn is_reconnectable(e: &ClientError) -> bool {
    matches!(e, ClientError::WebSocket(_) | ClientError::ConnectTimeout)
}

/// Runs one connection end-to-end: connect, reconcile the workspace,
/// start the watch/sync/resize/input pumps, attach or reattach a shell,
/// and serve until the connection ends. Returns why it ended and the
/// session id last seen, so the caller can reattach after a reconnect.
async fn connect_and_serve(
    args: &Args,
    session: Option<String>,
) -> Result<(EndReason, Option<String>), ClientError> {
    let workspace = Workspace::open(&args.path)?;
    info!(root = %workspace.root().display(), "opened local workspace");

    let (transport, inbound_rx) =
        ClientTransport::connect(&args.server, args.token.as_deref(), CONNECT_TIMEOUT).await?;
    info!(server = %args.server, "connected");

    let orchestrator = Arc::new(SyncOrchestrator::new(workspace, transport));
    orchestrator.reconcile().await?;
    info!("initial reconciliation complete");

    let watch_events = watch_bridge::spawn(orchestrator.workspace().root())?;

    let pump = orchestrator.clone();
    tokio::spawn(async move { pump.run_write_pump().await });

    let watcher_orchestrator = orchestrator.clone();
    let mut watch_events = watch_events;
    tokio::spawn(async move {
        while let Some(event) = watch_events.recv().await {
            if let Err(e) = watcher_orchestrator.handle_event(event).await {
                warn!(error = %e, "failed to propagate filesystem event");
            }
        }
    });

    let size = resize::current_size();
    let response = orchestrator
        .transport()
        .send_request(
            Command::CreateShell {
                size,
                session: session.clone(),
                timeout: Some(args.timeout),
            },
            REQUEST_TIMEOUT,
        )
        .await?;
    if !response.is_ok() {
        return Err(ClientError::ServerError(response.code, response.message));
    }
    let session = match response.body {
        wsterm_protocol::ResponseBody::ShellCreated { session, .. } => session,
        _ => session,
    };
    info!(session = ?session, "shell ready");

    let resize_transport = orchestrator.transport().clone();
    tokio::spawn(async move {
        resize::run_resize_pump(|size| {
            let transport = resize_transport.clone();
            tokio::spawn(async move {
                let _ = transport
                    .send_request(Command::ResizeShell { size }, REQUEST_TIMEOUT)
                    .await;
            });
        })
        .await;
    });

    let input_transport = orchestrator.transport().clone();
    let input_task = tokio::task::spawn_blocking(move || -> Result<(), ClientError> {
        let _raw_mode = input::RawModeGuard::enable()?;
        loop {
            let bytes = input::read_stdin_bytes()?;
            let transport = input_transport.clone();
            let handle = tokio::runtime::Handle::current();
            handle.block_on(async {
                let _ = transport
                    .send_request(Command::WriteStdin { buffer: bytes }, REQUEST_TIMEOUT)
                    .await;
            });
        }
    });

    let inbound_transport = orchestrator.transport().clone();
    let mut inbound_rx = inbound_rx;
    let inbound_task = tokio::spawn(async move {
        while let Some(Inbound { id, command }) = inbound_rx.recv().await {
            match command {
                Command::WriteStdout { buffer } => {
                    let mut stdout = std::io::stdout();
                    let _ = stdout.write_all(&buffer);
                    let _ = stdout.flush();
                    let _ = inbound_transport.send_response(id, "write-stdout").await;
                }
                Command::ExitShell {} => {
                    info!("remote shell exited");
                    let _ = inbound_transport.send_response(id, "exit-shell").await;
                    return EndReason::ShellExited;
                }
                other => {
                    warn!(command = other.name(), "unexpected server-initiated command");
                }
            }
        }
        // The channel closed without an `exit-shell`: the read loop behind
        // it ended because the connection dropped.
        EndReason::ConnectionLost
    });

    let reason = tokio::select! {
        result = inbound_task => result.unwrap_or(EndReason::ConnectionLost),
        result = input_task => match result {
            Ok(Ok(())) => EndReason::InputEnded,
            Ok(Err(e)) => {
                warn!(error = %e, "input loop ended with error");
                EndReason::ConnectionLost
            }
            Err(e) => {
                warn!(error = %e, "input task panicked");
                EndReason::ConnectionLost
            }
        },
    };

    Ok((reason, session))
}
