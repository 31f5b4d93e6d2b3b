//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `serve` -- start the RPC server
//! - `token` -- issue a bearer token for a client (operator-invoked)
//! - `net` -- print the detected network path to a peer
//! - `call` -- drive a single tool call over a fresh connection

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use crate::auth::Authenticator;
use crate::client::Client;
use crate::config::Settings;
use crate::net::{policy, NetworkDetector, Subnet};
use crate::server::startup::{run_server_with_config, ServerConfig};
use crate::server::ServerState;

/// Remote operations bridge over an authenticated WebSocket channel.
#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version = env!("CARGO_PKG_VERSION"),
    about = "tether - remote operations bridge with LAN/overlay path selection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the RPC server and serve until interrupted.
    Serve {
        /// Bind host (default: from TETHER_HOST or 0.0.0.0).
        #[arg(long)]
        host: Option<String>,

        /// Bind port (default: from TETHER_PORT or 8765).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Issue a bearer token for a client id and print it.
    Token {
        /// Client identifier embedded in the token.
        client_id: String,

        /// Token lifetime in seconds (default: from TETHER_TOKEN_TTL_SECS).
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Detect and print the network path to a peer host.
    Net {
        /// Peer host to probe.
        peer: String,
    },

    /// Invoke one tool on a server and print the JSON result.
    Call {
        /// Server address as host or host:port.
        #[arg(long)]
        server: String,

        /// Bearer token (default: from TETHER_TOKEN).
        #[arg(long)]
        token: Option<String>,

        /// Tool name, e.g. list_files.
        tool: String,

        /// Tool params as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,

        /// Skip the network path check and connect directly.
        #[arg(long)]
        direct: bool,
    },
}

/// Build a detector for `peer` from the loaded settings.
fn build_detector(settings: &Settings, peer: &str) -> Result<NetworkDetector, Box<dyn std::error::Error>> {
    let subnet = Subnet::parse(&settings.network.local_subnet)?;
    Ok(NetworkDetector::new(
        subnet,
        peer,
        Duration::from_secs(settings.network.probe_timeout_secs),
    ))
}

/// `serve`: run the server until ctrl-c.
pub async fn handle_serve(
    settings: &Settings,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let secret = settings.require_secret()?.as_bytes().to_vec();
    let authenticator = Authenticator::new(
        secret,
        Duration::from_secs(settings.security.token_ttl_secs),
    );

    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);
    let bind_address = format!("{host}:{port}").parse()?;

    let config = ServerConfig {
        state: Arc::new(ServerState::new(authenticator)),
        bind_address,
    };
    let handle = run_server_with_config(config).await?;
    info!(addr = %handle.local_addr(), "serving; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

/// `token`: out-of-band operator token issuance.
pub fn handle_token(
    settings: &Settings,
    client_id: &str,
    ttl_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let secret = settings.require_secret()?.as_bytes().to_vec();
    let ttl = Duration::from_secs(ttl_secs.unwrap_or(settings.security.token_ttl_secs));
    let authenticator = Authenticator::new(secret, ttl);
    println!("{}", authenticator.issue(client_id));
    Ok(())
}

/// `net`: print the freshly detected status and the connection decision.
pub async fn handle_net(
    settings: &Settings,
    peer: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let detector = build_detector(settings, peer)?;
    let status = detector.detect_status().await;
    let decision = policy::ensure_connection(
        &detector,
        Duration::from_secs(settings.network.overlay_grace_secs),
    )
    .await;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status": status,
            "decision": decision.as_str(),
        }))?
    );
    Ok(())
}

/// `call`: one tool call over a fresh connection.
pub async fn handle_call(
    settings: &Settings,
    server: &str,
    token: Option<String>,
    tool: &str,
    params: &str,
    direct: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (host, port) = split_server_addr(server, settings.server.port)?;
    let token = token
        .or_else(|| std::env::var("TETHER_TOKEN").ok())
        .ok_or("no token: pass --token or set TETHER_TOKEN")?;
    let params: Value = serde_json::from_str(params).map_err(|err| format!("--params: {err}"))?;
    if !params.is_object() {
        return Err("--params must be a JSON object".into());
    }

    let detector = build_detector(settings, &host)?;
    let mut client = Client::new(host, port, token, detector);
    if direct {
        client.connect_direct().await?;
    } else {
        client.connect().await?;
    }

    let result = client.request(tool, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    client.disconnect().await;
    Ok(())
}

/// Split `host` or `host:port`, falling back to the configured port.
fn split_server_addr(
    server: &str,
    default_port: u16,
) -> Result<(String, u16), Box<dyn std::error::Error>> {
    match server.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .map_err(|_| format!("invalid port in {server:?}"))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((server.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_server_addr() {
        assert_eq!(
            split_server_addr("192.168.1.10:9000", 8765).unwrap(),
            ("192.168.1.10".to_string(), 9000)
        );
        assert_eq!(
            split_server_addr("192.168.1.10", 8765).unwrap(),
            ("192.168.1.10".to_string(), 8765)
        );
        assert!(split_server_addr("host:bad", 8765).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["tether", "serve", "--port", "9100"]).unwrap();
        match cli.command {
            Command::Serve { port, .. } => assert_eq!(port, Some(9100)),
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from([
            "tether", "call", "--server", "host:1", "--token", "t", "read_file", "--params",
            r#"{"path":"/etc/hosts"}"#,
        ])
        .unwrap();
        match cli.command {
            Command::Call { tool, direct, .. } => {
                assert_eq!(tool, "read_file");
                assert!(!direct);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
