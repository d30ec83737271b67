use thiserror::Error;

use wsterm_protocol::ProtocolError;
use wsterm_workspace::WorkspaceError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("bearer token is not a valid header value")]
    InvalidToken,

    #[error("request timed out waiting for response to {0}")]
    ResponseTimeout(u64),

    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    #[error("server responded with an error (code {0}): {1}")]
    ServerError(i32, String),

    #[error("watcher error: {0}")]
    Watch(#[from] wsterm_watch::WatchError),
}
