//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] so integration tests can
//! spin up a real server on an ephemeral port, exercise it over HTTP and
//! WebSocket, and shut it down cleanly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::{ws_handler, ServerState};

/// Everything needed to start a server.
pub struct ServerConfig {
    pub state: Arc<ServerState>,
    pub bind_address: SocketAddr,
}

impl ServerConfig {
    /// Minimal config for integration tests: binds `127.0.0.1:0` so the OS
    /// assigns the port.
    pub fn for_testing(state: Arc<ServerState>) -> Self {
        Self {
            state,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

/// Handle for a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<()>,
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Signal shutdown and wait for the accept loop to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.server_task.await;
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_ms": state.uptime_ms(),
        "sessions": state.session_count(),
    }))
}

/// Start a server from a fully-assembled [`ServerConfig`].
///
/// The WebSocket endpoint is served at `/`, health at `/health`. Returns a
/// [`ServerHandle`] exposing the bound address and a clean shutdown path.
pub async fn run_server_with_config(
    config: ServerConfig,
) -> Result<ServerHandle, std::io::Error> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(config.state.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "server listening");

    let mut shutdown_watch = shutdown_rx;
    let server_task = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            loop {
                if *shutdown_watch.borrow() {
                    break;
                }
                if shutdown_watch.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        if let Err(err) = result {
            tracing::error!(%err, "server exited with error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        server_task,
        state: config.state,
    })
}
