//! Network path detection
//!
//! Determines whether the peer is reachable on the local subnet, only via
//! the overlay network (Tailscale), or not at all. Status is recomputed on
//! every call and never cached; network conditions are transient by nature.

pub mod policy;

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

/// Bound for the overlay agent status query.
const OVERLAY_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Routable-but-unreachable address used for local interface discovery.
/// The UDP "connect" never sends a packet; it only selects a source address.
const DISCOVERY_TARGET: &str = "10.254.254.254:1";

/// Errors from network configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("invalid subnet {0:?}")]
    InvalidSubnet(String),
}

/// Classification of the current path to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Same subnet and reachable.
    Local,
    /// Reachable, but not on the local subnet (mesh-VPN path).
    Overlay,
    /// Peer cannot be reached at all.
    Disconnected,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Local => "local",
            ConnectionType::Overlay => "overlay",
            ConnectionType::Disconnected => "disconnected",
        }
    }
}

/// Snapshot of the network path, valid only at the instant it was computed.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub is_local_network: bool,
    pub local_ip: Option<IpAddr>,
    pub can_reach_peer: bool,
    pub connection_type: ConnectionType,
}

/// An IPv4 network in CIDR notation with a pure membership test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// Parse `a.b.c.d/len`. The host bits of the address are masked off.
    pub fn parse(cidr: &str) -> Result<Self, NetError> {
        let invalid = || NetError::InvalidSubnet(cidr.to_string());
        let (addr, len) = cidr.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix_len: u8 = len.parse().map_err(|_| invalid())?;
        if prefix_len > 32 {
            return Err(invalid());
        }
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & Self::mask(prefix_len)),
            prefix_len,
        })
    }

    fn mask(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len)
        }
    }

    /// Membership test. IPv6 addresses are never members.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => {
                u32::from(v4) & Self::mask(self.prefix_len) == u32::from(self.network)
            }
            IpAddr::V6(_) => false,
        }
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Combine the membership and reachability results into a path class.
pub fn classify(is_local: bool, can_reach: bool) -> ConnectionType {
    match (is_local, can_reach) {
        (true, true) => ConnectionType::Local,
        (false, true) => ConnectionType::Overlay,
        (_, false) => ConnectionType::Disconnected,
    }
}

/// Detects the current network path to a single peer host.
#[derive(Debug, Clone)]
pub struct NetworkDetector {
    subnet: Subnet,
    peer_host: String,
    timeout: Duration,
}

impl NetworkDetector {
    pub fn new(subnet: Subnet, peer_host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            subnet,
            peer_host: peer_host.into(),
            timeout,
        }
    }

    pub fn peer_host(&self) -> &str {
        &self.peer_host
    }

    /// Best-effort local interface address discovery.
    ///
    /// Connects a datagram socket toward a routable address to let the OS
    /// pick the outbound interface; no packet is ever sent.
    pub fn local_ip(&self) -> Option<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect(DISCOVERY_TARGET).ok()?;
        socket.local_addr().ok().map(|addr| addr.ip())
    }

    /// One ICMP reachability probe, bounded by the configured timeout.
    /// Any failure (spawn error, timeout, non-zero exit) yields `false`.
    pub async fn ping_host(&self, host: &str) -> bool {
        let secs = self.timeout.as_secs().max(1).to_string();
        let child = Command::new("ping")
            .args(["-c", "1", "-W", &secs, host])
            .output();
        match tokio::time::timeout(self.timeout + Duration::from_secs(1), child).await {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(err)) => {
                debug!(%host, error = %err, "ping probe failed to run");
                false
            }
            Err(_) => {
                debug!(%host, "ping probe timed out");
                false
            }
        }
    }

    /// TCP handshake probe to a specific port. No data is exchanged.
    pub async fn probe_tcp(&self, host: &str, port: u16) -> bool {
        let target = format!("{host}:{port}");
        let addr: SocketAddr = match tokio::net::lookup_host(target.as_str()).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => return false,
            },
            Err(_) => return false,
        };
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    /// Compute a fresh [`NetworkStatus`]; results are never cached.
    pub async fn detect_status(&self) -> NetworkStatus {
        let local_ip = self.local_ip();
        let is_local = local_ip.map(|ip| self.subnet.contains(ip)).unwrap_or(false);
        let can_reach = self.ping_host(&self.peer_host).await;

        NetworkStatus {
            is_local_network: is_local,
            local_ip,
            can_reach_peer: can_reach,
            connection_type: classify(is_local, can_reach),
        }
    }

    /// Whether the overlay-network agent reports itself as running.
    /// Any failure to query yields `false`.
    pub async fn overlay_active(&self) -> bool {
        overlay_agent_active("tailscale").await
    }
}

/// Query the overlay agent CLI for liveness; exit status only.
pub async fn overlay_agent_active(cli_path: &str) -> bool {
    let child = Command::new(cli_path).arg("status").output();
    match tokio::time::timeout(OVERLAY_QUERY_TIMEOUT, child).await {
        Ok(Ok(output)) => output.status.success(),
        Ok(Err(err)) => {
            debug!(error = %err, "overlay agent query failed to run");
            false
        }
        Err(_) => {
            debug!("overlay agent query timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_parse_and_contains() {
        let subnet = Subnet::parse("192.168.1.0/24").unwrap();
        assert!(subnet.contains("192.168.1.50".parse().unwrap()));
        assert!(subnet.contains("192.168.1.1".parse().unwrap()));
        assert!(!subnet.contains("192.168.2.50".parse().unwrap()));
        assert!(!subnet.contains("10.0.0.1".parse().unwrap()));
        assert!(!subnet.contains("::1".parse().unwrap()));
    }

    #[test]
    fn test_subnet_masks_host_bits() {
        let subnet = Subnet::parse("192.168.1.77/24").unwrap();
        assert_eq!(subnet.to_string(), "192.168.1.0/24");
        assert!(subnet.contains("192.168.1.200".parse().unwrap()));
    }

    #[test]
    fn test_subnet_edge_prefixes() {
        let all = Subnet::parse("0.0.0.0/0").unwrap();
        assert!(all.contains("8.8.8.8".parse().unwrap()));

        let host = Subnet::parse("10.1.2.3/32").unwrap();
        assert!(host.contains("10.1.2.3".parse().unwrap()));
        assert!(!host.contains("10.1.2.4".parse().unwrap()));
    }

    #[test]
    fn test_subnet_rejects_invalid() {
        for bad in ["", "192.168.1.0", "192.168.1.0/33", "banana/24", "1.2.3.4/x"] {
            assert!(Subnet::parse(bad).is_err(), "subnet {bad:?}");
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(true, true), ConnectionType::Local);
        assert_eq!(classify(false, true), ConnectionType::Overlay);
        assert_eq!(classify(true, false), ConnectionType::Disconnected);
        assert_eq!(classify(false, false), ConnectionType::Disconnected);
    }

    #[tokio::test]
    async fn test_probe_tcp_refused_port_is_false() {
        let detector = NetworkDetector::new(
            Subnet::parse("192.168.1.0/24").unwrap(),
            "127.0.0.1",
            Duration::from_millis(500),
        );
        // Bind-then-drop leaves a port that refuses connections.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!detector.probe_tcp("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn test_probe_tcp_open_port_is_true() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let detector = NetworkDetector::new(
            Subnet::parse("192.168.1.0/24").unwrap(),
            "127.0.0.1",
            Duration::from_secs(1),
        );
        assert!(detector.probe_tcp("127.0.0.1", port).await);
    }
}
