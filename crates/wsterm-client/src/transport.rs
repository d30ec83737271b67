//! Client-side transport (spec.md §4.5): connects, frames/unframes packets,
//! allocates request ids starting at 0 (the server starts at `0x10000`, per
//! spec.md §3, to keep the two id spaces disjoint in logs), and correlates
//! responses by id through a pending-request table. The teacher has no
//! Rust WebSocket *client* (its frontend is the browser); this inverts the
//! accept-side shape of
//! `examples/AnalyseDeCircuit-oxideterm/src-tauri/src/bridge/server.rs` onto
//! the connect side, and generalizes
//! `src-tauri/src/router/sequencer.rs`'s monotonic-counter idiom the same
//! way `wsterm-server`'s transport does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::warn;

use wsterm_protocol::{
    encode_frame, Command, Frame, FrameDecoder, RequestPacket, ResponseBody, ResponsePacket,
};

use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = SplitSink<WsStream, Message>;

/// An inbound `REQUEST` the peer sent us (always `write-stdout` or
/// `exit-shell` per spec.md §6), paired with the id the caller must echo
/// back in its acknowledging `RESPONSE`.
pub struct Inbound {
    pub id: u64,
    pub command: Command,
}

#[derive(Clone)]
pub struct ClientTransport {
    sink: Arc<AsyncMutex<Sink>>,
    pending: Arc<AsyncMutex<HashMap<u64, oneshot::Sender<ResponsePacket>>>>,
    next_id: Arc<AtomicU64>,
}

impl ClientTransport {
    /// Connects, authenticates via the `Authorization` header, and spawns
    /// the read loop. Returns the transport plus a channel of inbound
    /// server requests for the caller to act on.
    pub async fn connect(
        url: &str,
        token: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<Inbound>), ClientError> {
        let mut request = url
            .into_client_request()
            .map_err(ClientError::WebSocket)?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Token {token}"))
                .map_err(|_| ClientError::InvalidToken)?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws_stream, _response) = tokio::time::timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;

        let (sink, mut stream) = ws_stream.split();
        let sink = Arc::new(AsyncMutex::new(sink));
        let pending: Arc<AsyncMutex<HashMap<u64, oneshot::Sender<ResponsePacket>>>> =
            Arc::new(AsyncMutex::new(HashMap::new()));
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let pending_for_loop = pending.clone();
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            while let Some(message) = stream.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "websocket read error, ending client read loop");
                        break;
                    }
                };
                let bytes = match message {
                    Message::Binary(b) => b,
                    Message::Close(_) => break,
                    _ => continue,
                };
                decoder.feed(&bytes);
                loop {
                    match decoder.decode_next() {
                        Ok(Some(Frame::Response(response))) => {
                            if let Some(tx) = pending_for_loop.lock().await.remove(&response.id) {
                                let _ = tx.send(response);
                            }
                        }
                        Ok(Some(Frame::Request(request))) => {
                            let inbound = Inbound {
                                id: request.id,
                                command: request.command,
                            };
                            if inbound_tx.send(inbound).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "malformed frame from server, ending client read loop");
                            return;
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                sink,
                pending,
                next_id: Arc::new(AtomicU64::new(0)),
            },
            inbound_rx,
        ))
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), ClientError> {
        let bytes = encode_frame(&frame)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(bytes.into())).await?;
        Ok(())
    }

    /// Sends a request and awaits its matching response, up to `timeout`.
    pub async fn send_request(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<ResponsePacket, ClientError> {
        let id = self.alloc_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = RequestPacket::new(id, command);
        if let Err(e) = self.write_frame(request.into()).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ClientError::ResponseTimeout(id))
            }
        }
    }

    /// Acknowledges an inbound request (e.g. `write-stdout`) with a plain
    /// success response; the server never awaits these (§4.6: fire and
    /// forget) but sending one keeps the protocol symmetric per spec.md §6.
    pub async fn send_response(&self, id: u64, command: &str) -> Result<(), ClientError> {
        let response = ResponsePacket::ok(id, command, ResponseBody::Empty {});
        self.write_frame(response.into()).await
    }
}
