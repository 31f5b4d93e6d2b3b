//! Connection policy
//!
//! Decides whether to use the direct path, wait briefly for the overlay
//! link to come up, or report failure. One bounded retry; callers that need
//! persistent retry re-invoke.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::{ConnectionType, NetworkDetector, NetworkStatus};

/// Outcome of [`ensure_connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathDecision {
    Local,
    Overlay,
    Failed,
}

impl PathDecision {
    pub fn is_success(&self) -> bool {
        !matches!(self, PathDecision::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PathDecision::Local => "local",
            PathDecision::Overlay => "overlay",
            PathDecision::Failed => "failed",
        }
    }
}

impl From<ConnectionType> for PathDecision {
    fn from(value: ConnectionType) -> Self {
        match value {
            ConnectionType::Local => PathDecision::Local,
            ConnectionType::Overlay => PathDecision::Overlay,
            ConnectionType::Disconnected => PathDecision::Failed,
        }
    }
}

/// Ensure the peer is reachable, granting the overlay agent one grace
/// period to bring its link up before the single re-check.
pub async fn ensure_connection(detector: &NetworkDetector, grace: Duration) -> PathDecision {
    ensure_connection_with(
        || detector.detect_status(),
        || detector.overlay_active(),
        grace,
    )
    .await
}

/// Decision procedure behind [`ensure_connection`], generic over the probes
/// so the retry logic is testable without a network.
pub async fn ensure_connection_with<S, SF, O, OF>(
    mut detect: S,
    overlay_active: O,
    grace: Duration,
) -> PathDecision
where
    S: FnMut() -> SF,
    SF: Future<Output = NetworkStatus>,
    O: FnOnce() -> OF,
    OF: Future<Output = bool>,
{
    let status = detect().await;
    if status.can_reach_peer {
        info!(path = status.connection_type.as_str(), "peer reachable");
        return status.connection_type.into();
    }

    if overlay_active().await {
        debug!(grace_ms = grace.as_millis() as u64, "overlay agent up, waiting for link");
        tokio::time::sleep(grace).await;
        let status = detect().await;
        if status.can_reach_peer {
            info!("peer reachable via overlay after grace period");
            return PathDecision::Overlay;
        }
    }

    info!("peer unreachable on all paths");
    PathDecision::Failed
}
