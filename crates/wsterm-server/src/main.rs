//! wsterm-server: remote shell + one-way workspace mirror endpoint.
//!
//! Accepts WebSocket connections, authenticates the upgrade against an
//! optional shared bearer token, and serves the `sync-workspace`/shell
//! command set documented in spec.md §6.

mod auth;
mod config;
mod dispatcher;
mod error;
mod registry;
mod shell;
mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::ServerConfig;
use registry::SessionRegistry;

#[derive(Parser, Debug)]
#[command(name = "wsterm-server", about = "Remote shell + workspace mirror server")]
struct Args {
    /// Address to bind the WebSocket listener on.
    #[arg(long, default_value = "0.0.0.0:7681")]
    bind: SocketAddr,

    /// HTTP path the WebSocket upgrade must target.
    #[arg(long, default_value = "/ws")]
    path: String,

    /// Shared bearer token required on the `Authorization` header. If
    /// unset, connections are accepted without authentication (spec.md §6:
    /// "optional").
    #[arg(long, env = "WSTERM_TOKEN")]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Arc::new(ServerConfig {
        bind_addr: args.bind,
        ws_path: args.path,
        bearer_token: args.token,
        workspace_root: config::default_workspace_root(),
    });

    info!(
        bind = %config.bind_addr,
        path = %config.ws_path,
        workspace_root = %config.workspace_root.display(),
        auth = config.bearer_token.is_some(),
        "starting wsterm-server"
    );

    let registry = SessionRegistry::new();
    tokio::spawn(registry.clone().run_reaper());

    let listener = TcpListener::bind(config.bind_addr).await?;
    loop {
        let (stream, peer) = listener.accept().await?;
        let config = config.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            transport::handle_connection(stream, peer, config, registry).await;
        });
    }
}
