//! Configuration loading
//!
//! Settings come from environment variables with sensible defaults. Parsing
//! is split into pure helpers over `Option<String>` so it can be tested
//! without mutating the process environment.

use std::env;

use thiserror::Error;

/// Default server bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default server port.
pub const DEFAULT_PORT: u16 = 8765;
/// Default local subnet used for the direct-path membership test.
pub const DEFAULT_LOCAL_SUBNET: &str = "192.168.1.0/24";
/// Default reachability probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
/// Default grace period granted to the overlay agent before the single
/// reachability re-check, in seconds.
pub const DEFAULT_OVERLAY_GRACE_SECS: u64 = 2;
/// Default token lifetime in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },

    #[error("missing required setting {0}")]
    Missing(String),
}

/// Server bind settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Network path detection settings.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    /// CIDR notation subnet considered "local", e.g. `192.168.1.0/24`.
    pub local_subnet: String,
    /// Bound for each reachability probe.
    pub probe_timeout_secs: u64,
    /// How long to wait for the overlay link before the single re-check.
    pub overlay_grace_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            local_subnet: DEFAULT_LOCAL_SUBNET.to_string(),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            overlay_grace_secs: DEFAULT_OVERLAY_GRACE_SECS,
        }
    }
}

/// Token issuance/verification settings.
#[derive(Debug, Clone, Default)]
pub struct SecuritySettings {
    /// Shared signing secret. Empty means tokens cannot be issued or
    /// verified; `serve` and `token` refuse to start without it.
    pub token_secret: String,
    pub token_ttl_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    /// `plain` (default) or `json`.
    pub json: bool,
    /// Optional log file path; stdout when unset.
    pub file: Option<String>,
}

/// All settings, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerSettings,
    pub network: NetworkSettings,
    pub security: SecuritySettings,
    pub log: LogSettings,
}

impl Settings {
    /// Load settings from `TETHER_*` environment variables.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerSettings {
                host: string_or(env::var("TETHER_HOST").ok(), DEFAULT_HOST),
                port: parse_or("TETHER_PORT", env::var("TETHER_PORT").ok(), DEFAULT_PORT)?,
            },
            network: NetworkSettings {
                local_subnet: string_or(
                    env::var("TETHER_LOCAL_SUBNET").ok(),
                    DEFAULT_LOCAL_SUBNET,
                ),
                probe_timeout_secs: parse_or(
                    "TETHER_PROBE_TIMEOUT_SECS",
                    env::var("TETHER_PROBE_TIMEOUT_SECS").ok(),
                    DEFAULT_PROBE_TIMEOUT_SECS,
                )?,
                overlay_grace_secs: parse_or(
                    "TETHER_OVERLAY_GRACE_SECS",
                    env::var("TETHER_OVERLAY_GRACE_SECS").ok(),
                    DEFAULT_OVERLAY_GRACE_SECS,
                )?,
            },
            security: SecuritySettings {
                token_secret: env::var("TETHER_TOKEN_SECRET").unwrap_or_default(),
                token_ttl_secs: parse_or(
                    "TETHER_TOKEN_TTL_SECS",
                    env::var("TETHER_TOKEN_TTL_SECS").ok(),
                    DEFAULT_TOKEN_TTL_SECS,
                )?,
            },
            log: LogSettings {
                json: env::var("TETHER_LOG_FORMAT")
                    .map(|v| v.trim().eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
                file: env::var("TETHER_LOG_FILE")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
            },
        })
    }

    /// The signing secret, or an error if it was never configured.
    pub fn require_secret(&self) -> Result<&str, ConfigError> {
        if self.security.token_secret.trim().is_empty() {
            return Err(ConfigError::Missing("TETHER_TOKEN_SECRET".to_string()));
        }
        Ok(&self.security.token_secret)
    }
}

fn string_or(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value: raw,
            })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_or_defaults() {
        assert_eq!(string_or(None, "x"), "x");
        assert_eq!(string_or(Some("  ".into()), "x"), "x");
        assert_eq!(string_or(Some(" 10.0.0.0/8 ".into()), "x"), "10.0.0.0/8");
    }

    #[test]
    fn test_parse_or() {
        assert_eq!(parse_or("P", None, 8765u16).unwrap(), 8765);
        assert_eq!(parse_or("P", Some("9001".into()), 8765u16).unwrap(), 9001);
        assert!(parse_or("P", Some("not-a-port".into()), 8765u16).is_err());
    }

    #[test]
    fn test_require_secret() {
        let mut settings = Settings::default();
        assert!(settings.require_secret().is_err());
        settings.security.token_secret = "s3cret".into();
        assert_eq!(settings.require_secret().unwrap(), "s3cret");
    }
}
