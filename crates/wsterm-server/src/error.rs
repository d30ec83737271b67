use thiserror::Error;

use wsterm_protocol::ProtocolError;
use wsterm_workspace::WorkspaceError;

/// Failures a connection handler can hit. Anything that reaches the top of
/// `handle_connection` just closes that one connection; it never brings
/// down the listener (spec.md §7: "recoverable at the component boundary").
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed")]
    Closed,
}

/// A command handler's outcome, carried into the `RESPONSE` packet's
/// `code`/`message` pair. Distinct from [`ServerError`], which represents a
/// transport-level failure rather than an application-level one.
#[derive(Debug)]
pub struct CommandError(pub String);

impl From<WorkspaceError> for CommandError {
    fn from(e: WorkspaceError) -> Self {
        CommandError(e.to_string())
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
