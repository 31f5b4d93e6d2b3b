//! WebSocket RPC server
//!
//! Accepts connections, performs the token handshake, then reads framed
//! JSON requests and dispatches them to the tool registry. Each connection
//! is an independent task; within one connection requests are processed
//! sequentially in receipt order.

pub mod startup;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{now_ms, Authenticator};
use crate::protocol::{parse_request, to_text, HandshakeReply, HandshakeRequest, ResponseFrame};
use crate::tools;

/// Bound on the wait for the client's single authentication frame.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
/// Largest accepted frame; oversized frames are malformed input.
pub const MAX_PAYLOAD_BYTES: usize = 512 * 1024;

/// A connection that has completed the handshake. Sessions are only ever
/// inserted after successful token verification, so presence in the table
/// is the `Authenticated` state; no tool dispatch happens before insertion.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub connection_id: String,
    pub client_id: String,
    pub connected_at_ms: u64,
}

/// Shared server state: the token verifier and the live session table,
/// keyed by remote `ip:port`.
pub struct ServerState {
    authenticator: Authenticator,
    sessions: Mutex<HashMap<String, ClientSession>>,
    started_at: Instant,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl ServerState {
    pub fn new(authenticator: Authenticator) -> Self {
        Self {
            authenticator,
            sessions: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn register_session(&self, peer: &str, session: ClientSession) {
        self.sessions.lock().insert(peer.to_string(), session);
    }

    fn remove_session(&self, peer: &str) {
        self.sessions.lock().remove(peer);
    }
}

/// Axum handler for the WebSocket upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, remote_addr: SocketAddr) {
    let peer = remote_addr.to_string();
    debug!(%peer, "client connected");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Single writer per connection; everything outbound flows through it.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    if let Ok(session) = perform_handshake(&mut receiver, &tx, &state, &peer).await {
        info!(%peer, client_id = %session.client_id, "client authenticated");
        run_message_loop(&mut receiver, &tx, &peer).await;
        state.remove_session(&peer);
        info!(%peer, "client disconnected");
    }

    drop(tx);
    let _ = send_task.await;
}

/// Read exactly one message expected to carry a token, verify it, and
/// register the session. Any failure sends an error frame, closes the
/// connection, and is terminal; the server offers no retry.
async fn perform_handshake(
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::UnboundedSender<Message>,
    state: &Arc<ServerState>,
    peer: &str,
) -> Result<ClientSession, ()> {
    let text = match recv_text_with_timeout(receiver, HANDSHAKE_TIMEOUT_MS).await {
        Some(text) => text,
        None => {
            debug!(%peer, "connection closed before handshake");
            return Err(());
        }
    };

    let token = serde_json::from_str::<HandshakeRequest>(&text)
        .ok()
        .map(|h| h.token)
        .filter(|t| !t.is_empty());

    let client_id = match token.map(|t| state.authenticator.verify(&t)) {
        Some(Ok(client_id)) => client_id,
        Some(Err(err)) => {
            warn!(%peer, %err, "handshake rejected");
            return reject_handshake(tx, &format!("Authentication failed: {err}"));
        }
        None => {
            warn!(%peer, "handshake rejected: missing token");
            return reject_handshake(tx, "Authentication failed: missing token");
        }
    };

    let session = ClientSession {
        connection_id: Uuid::new_v4().to_string(),
        client_id,
        connected_at_ms: now_ms(),
    };
    state.register_session(peer, session.clone());
    send_frame(tx, &HandshakeReply::authenticated());
    Ok(session)
}

fn reject_handshake(tx: &mpsc::UnboundedSender<Message>, message: &str) -> Result<ClientSession, ()> {
    send_frame(tx, &HandshakeReply::rejected(message));
    let _ = tx.send(Message::Close(None));
    Err(())
}

/// Steady-state loop: one request in, one response out, in receipt order.
/// Malformed frames get a channel-level error and the connection stays
/// open; only transport closure ends the loop.
async fn run_message_loop(
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::UnboundedSender<Message>,
    peer: &str,
) {
    while let Some(next) = receiver.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(_) => break,
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(_) => {
                send_frame(tx, &ResponseFrame::channel_error("Invalid JSON"));
                continue;
            }
            Message::Close(_) => break,
            // Protocol-level ping/pong, nothing to do.
            _ => continue,
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            send_frame(tx, &ResponseFrame::channel_error("Payload too large"));
            continue;
        }

        let request = match parse_request(text.as_str()) {
            Ok(request) => request,
            Err(reason) => {
                debug!(%peer, %reason, "malformed frame");
                send_frame(tx, &ResponseFrame::channel_error(reason));
                continue;
            }
        };

        let request_id = request.request_id;
        debug!(%peer, %request_id, tool = %request.tool, "dispatching");
        // Handler failures are caught per request; they never take down
        // the connection or the process.
        let response = match tools::dispatch(&request.tool, request.params).await {
            Ok(result) => ResponseFrame::result(request_id, result),
            Err(err) => ResponseFrame::error(request_id, err.to_string()),
        };
        send_frame(tx, &response);
    }
}

async fn recv_text_with_timeout(
    receiver: &mut SplitStream<WebSocket>,
    timeout_ms: u64,
) -> Option<String> {
    let next = tokio::time::timeout(Duration::from_millis(timeout_ms), receiver.next())
        .await
        .ok()??;
    match next.ok()? {
        Message::Text(text) => Some(text.as_str().to_string()),
        _ => None,
    }
}

fn send_frame<T: serde::Serialize>(tx: &mpsc::UnboundedSender<Message>, frame: &T) {
    let _ = tx.send(Message::Text(to_text(frame).into()));
}
