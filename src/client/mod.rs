//! WebSocket RPC client
//!
//! Opens a connection, performs the token handshake, then correlates
//! responses to in-flight requests by `request_id`. Request ids are
//! assigned monotonically and never reused within a connection, so a stale
//! late response can never resolve a newer request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::net::NetworkDetector;
use crate::protocol::{to_text, HandshakeReply, HandshakeRequest, RequestFrame, ResponseFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default per-request deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on the wait for the server's authentication reply.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("request {0} timed out")]
    Timeout(String),
}

/// Outcome delivered to a waiting caller: the remote result or the remote
/// error string.
type Outcome = Result<Value, String>;

/// Table of requests awaiting their matched response.
///
/// Insertion happens before the frame is transmitted; removal happens in
/// the receive loop or in the timeout path. Both removal paths go through
/// the same lock and the oneshot sender, so each request resolves at most
/// once: whichever path gets there first wins, the other finds the entry
/// gone.
#[derive(Default)]
struct PendingRequests {
    map: Mutex<HashMap<String, oneshot::Sender<Outcome>>>,
}

impl PendingRequests {
    fn register(&self, request_id: &str) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let previous = self.map.lock().insert(request_id.to_string(), tx);
        debug_assert!(previous.is_none(), "request id reused: {request_id}");
        rx
    }

    /// Resolve a pending request. Returns `false` when no entry matches;
    /// unmatched responses are dropped by the caller.
    fn resolve(&self, request_id: &str, outcome: Outcome) -> bool {
        let Some(tx) = self.map.lock().remove(request_id) else {
            return false;
        };
        let _ = tx.send(outcome);
        true
    }

    /// Timeout-path removal: forget the request so a late response is
    /// dropped as unmatched.
    fn abandon(&self, request_id: &str) {
        self.map.lock().remove(request_id);
    }

    /// Drop every pending entry; waiting callers observe a transport error.
    fn clear(&self) {
        self.map.lock().clear();
    }

    fn len(&self) -> usize {
        self.map.lock().len()
    }
}

/// RPC client for a single server.
pub struct Client {
    server_host: String,
    server_port: u16,
    token: String,
    detector: NetworkDetector,
    request_timeout: Duration,
    counter: AtomicU64,
    pending: Arc<PendingRequests>,
    writer: Option<Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>>,
    recv_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("connected", &self.writer.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Client {
    pub fn new(
        server_host: impl Into<String>,
        server_port: u16,
        token: impl Into<String>,
        detector: NetworkDetector,
    ) -> Self {
        Self {
            server_host: server_host.into(),
            server_port,
            token: token.into(),
            detector,
            request_timeout: REQUEST_TIMEOUT,
            counter: AtomicU64::new(0),
            pending: Arc::new(PendingRequests::default()),
            writer: None,
            recv_task: None,
        }
    }

    /// Override the per-request deadline (tests use short deadlines).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Check the network path first, then connect. Fails fast with
    /// [`ClientError::Unreachable`] before any transport work when the
    /// peer cannot be reached.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let status = self.detector.detect_status().await;
        info!(
            path = status.connection_type.as_str(),
            local_ip = ?status.local_ip,
            "network status"
        );
        if !status.can_reach_peer {
            return Err(ClientError::Unreachable(self.server_host.clone()));
        }
        self.connect_direct().await
    }

    /// Open the transport and perform the handshake, skipping the network
    /// path check.
    pub async fn connect_direct(&mut self) -> Result<(), ClientError> {
        let url = format!("ws://{}:{}", self.server_host, self.server_port);
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|err| ClientError::ConnectFailed(err.to_string()))?;
        let (mut write, mut read) = stream.split();

        let handshake = HandshakeRequest {
            token: self.token.clone(),
        };
        write
            .send(Message::Text(to_text(&handshake).into()))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        let reply = await_handshake_reply(&mut read).await?;
        if !reply.is_authenticated() {
            return Err(ClientError::AuthFailed(
                reply
                    .error
                    .unwrap_or_else(|| "authentication rejected".to_string()),
            ));
        }
        info!(server = %url, "authenticated");

        let pending = Arc::clone(&self.pending);
        self.recv_task = Some(tokio::spawn(receive_loop(read, pending)));
        self.writer = Some(Arc::new(tokio::sync::Mutex::new(write)));
        Ok(())
    }

    /// Send one request and wait for exactly one outcome: the result, the
    /// remote error, or a timeout. A timed-out request is forgotten, so
    /// its late response (if any) is dropped by the receive loop.
    pub async fn request(&self, tool: &str, params: Value) -> Result<Value, ClientError> {
        let writer = self.writer.as_ref().ok_or(ClientError::NotConnected)?;

        let request_id = format!("req_{}", self.counter.fetch_add(1, Ordering::Relaxed) + 1);
        let rx = self.pending.register(&request_id);
        let frame = RequestFrame::new(request_id.clone(), tool, params);

        if let Err(err) = writer
            .lock()
            .await
            .send(Message::Text(to_text(&frame).into()))
            .await
        {
            self.pending.abandon(&request_id);
            return Err(ClientError::Transport(err.to_string()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(remote))) => Err(ClientError::Remote(remote)),
            Ok(Err(_)) => Err(ClientError::Transport("connection closed".to_string())),
            Err(_) => {
                self.pending.abandon(&request_id);
                Err(ClientError::Timeout(request_id))
            }
        }
    }

    pub async fn list_files(&self, path: &str, recursive: bool) -> Result<Value, ClientError> {
        self.request("list_files", json!({ "path": path, "recursive": recursive }))
            .await
    }

    pub async fn read_file(&self, path: &str) -> Result<Value, ClientError> {
        self.request("read_file", json!({ "path": path })).await
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<Value, ClientError> {
        self.request("write_file", json!({ "path": path, "content": content }))
            .await
    }

    pub async fn execute_command(
        &self,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<Value, ClientError> {
        self.request("execute_command", json!({ "command": command, "cwd": cwd }))
            .await
    }

    pub async fn get_system_info(&self) -> Result<Value, ClientError> {
        self.request("get_system_info", json!({})).await
    }

    pub async fn search_files(
        &self,
        path: &str,
        pattern: &str,
        content_search: bool,
    ) -> Result<Value, ClientError> {
        self.request(
            "search_files",
            json!({ "path": path, "pattern": pattern, "content_search": content_search }),
        )
        .await
    }

    /// Close the connection. Pending requests fail with a transport error.
    pub async fn disconnect(&mut self) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.lock().await.send(Message::Close(None)).await;
        }
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        self.pending.clear();
    }
}

async fn await_handshake_reply(
    read: &mut SplitStream<WsStream>,
) -> Result<HandshakeReply, ClientError> {
    let next = tokio::time::timeout(AUTH_TIMEOUT, read.next())
        .await
        .map_err(|_| ClientError::AuthFailed("no response within handshake deadline".to_string()))?
        .ok_or_else(|| ClientError::Transport("connection closed during handshake".to_string()))?
        .map_err(|err| ClientError::Transport(err.to_string()))?;

    match next {
        Message::Text(text) => serde_json::from_str(text.as_str())
            .map_err(|_| ClientError::Transport("unparseable handshake reply".to_string())),
        other => Err(ClientError::Transport(format!(
            "unexpected handshake frame: {other:?}"
        ))),
    }
}

/// Background receive loop: resolve each inbound response against the
/// pending table; unmatched ids are dropped (a timeout already fired for
/// them client-side).
async fn receive_loop(mut read: SplitStream<WsStream>, pending: Arc<PendingRequests>) {
    while let Some(next) = read.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, "connection error");
                break;
            }
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => {
                info!("connection closed by server");
                break;
            }
            _ => continue,
        };

        let frame: ResponseFrame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(_) => {
                debug!("dropping unparseable frame");
                continue;
            }
        };
        let Some(request_id) = frame.request_id else {
            // Channel-level error; no request to resolve.
            warn!(error = ?frame.error, "server reported a channel error");
            continue;
        };

        let outcome = match frame.error {
            Some(error) => Err(error),
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };
        if !pending.resolve(&request_id, outcome) {
            debug!(%request_id, "dropping response with no pending request");
        }
    }
    // Fail any still-pending callers instead of leaving them to time out.
    pending.clear();
}
