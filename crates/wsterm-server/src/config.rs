use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server-wide configuration, assembled once from CLI flags in [`crate::cli`]
/// and the `WSTERM_WORKSPACE` environment variable (spec.md §6
/// "Environment").
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub ws_path: String,
    pub bearer_token: Option<String>,
    pub workspace_root: PathBuf,
}

/// `$WSTERM_WORKSPACE`, falling back to the OS temp directory (`$TEMP` on
/// Windows, `/tmp` elsewhere, both of which `std::env::temp_dir` resolves).
pub fn default_workspace_root() -> PathBuf {
    env::var_os("WSTERM_WORKSPACE")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
}
