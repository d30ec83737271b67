//! Per-connection transport: accepts the WebSocket upgrade, frames/unframes
//! packets via `wsterm-protocol`, and routes inbound `REQUEST`s to the
//! dispatcher (spec.md §4.5). Grounded on the accept-loop shape of
//! `examples/AnalyseDeCircuit-oxideterm/src-tauri/src/bridge/server.rs`'s
//! `handle_connection_v1`, replacing its first-message token exchange with
//! an HTTP-upgrade header check (this spec authenticates at the handshake,
//! not over the data channel).

use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use wsterm_protocol::{encode_frame, Frame, FrameDecoder};

use crate::auth::AuthCallback;
use crate::config::ServerConfig;
use crate::dispatcher::{self, ConnectionState};
use crate::error::ServerError;
use crate::registry::SessionRegistry;

pub type SharedSink = Arc<AsyncMutex<SplitSink<WebSocketStream<TcpStream>, Message>>>;

pub async fn send_frame(sink: &SharedSink, frame: Frame) -> Result<(), ServerError> {
    let bytes = encode_frame(&frame)?;
    let mut sink = sink.lock().await;
    sink.send(Message::Binary(bytes.into())).await?;
    Ok(())
}

pub async fn handle_connection(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
) {
    let callback = AuthCallback {
        ws_path: config.ws_path.clone(),
        bearer_token: config.bearer_token.clone(),
    };
    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%peer, error = %e, "websocket handshake rejected");
            return;
        }
    };
    info!(%peer, "websocket connection established");

    let (sink, mut stream) = ws_stream.split();
    let sink: SharedSink = Arc::new(AsyncMutex::new(sink));
    let state = ConnectionState::new(registry);
    let mut decoder = FrameDecoder::new();

    'read: loop {
        let message = match stream.next().await {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                debug!(%peer, error = %e, "websocket read error, closing connection");
                break;
            }
            None => break,
        };

        let bytes = match message {
            Message::Binary(b) => b,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_) => continue,
        };

        decoder.feed(&bytes);
        loop {
            match decoder.decode_next() {
                Ok(Some(Frame::Request(request))) => {
                    let state = state.clone();
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        let id = request.id;
                        let command_name = request.command.name().to_string();
                        let (code, message, body) =
                            dispatcher::dispatch(&state, sink.clone(), request.command).await;
                        let response = wsterm_protocol::ResponsePacket {
                            kind: wsterm_protocol::PACKET_TYPE_RESPONSE,
                            command: command_name,
                            id,
                            code,
                            message,
                            body,
                        };
                        let _ = send_frame(&sink, response.into()).await;
                    });
                }
                Ok(Some(Frame::Response(_))) => {
                    // The server never awaits responses to its own requests
                    // (write-stdout/exit-shell are fire-and-forget); nothing
                    // to correlate them against.
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(%peer, error = %e, "malformed frame, closing connection");
                    break 'read;
                }
            }
        }
    }

    state.on_connection_closed().await;
    info!(%peer, "connection closed");
}
