//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (FANOUT_HOST, FANOUT_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use fanout_protocol::control::Slot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind the HTTP/WebSocket listener to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the HTTP/WebSocket listener.
    #[serde(default = "default_port")]
    pub port: u16,

    /// UDP relay configuration.
    #[serde(default)]
    pub udp: UdpSection,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Authorization service configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// UDP relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpSection {
    /// Enable the UDP relay.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address the relay socket binds to.
    #[serde(default = "default_udp_bind")]
    pub bind: SocketAddr,

    /// Largest accepted datagram in bytes.
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,

    /// Evict endpoints silent for this long, in milliseconds. 0 disables
    /// eviction.
    #[serde(default)]
    pub idle_timeout_ms: u64,

    /// How often to look for idle endpoints, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path of the control + envelope WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Path of the MessagePack pub/sub endpoint.
    #[serde(default = "default_pubsub_path")]
    pub pubsub_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Relayed frames buffered per connection before frames are dropped.
    #[serde(default = "default_peer_queue_capacity")]
    pub peer_queue_capacity: usize,
}

/// Which authorizer to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Ask the external HTTP authorization service.
    #[default]
    Http,
    /// Use the fixed tables below (local development).
    Static,
}

/// Authorization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,

    /// Base URL of the authorization service.
    #[serde(default = "default_auth_url")]
    pub base_url: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_auth_timeout")]
    pub timeout_ms: u64,

    /// Slot owners for static mode.
    #[serde(default)]
    pub slots: Vec<SlotAssignment>,

    /// Token -> uid for static mode.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

/// One static slot assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub videoroom_id: String,
    pub slot: Slot,
    pub uid: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("FANOUT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("FANOUT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000)
}

fn default_true() -> bool {
    true
}

fn default_udp_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_max_datagram_size() -> usize {
    fanout_transport::MAX_DATAGRAM_SIZE
}

fn default_sweep_interval() -> u64 {
    5_000 // 5 seconds
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_pubsub_path() -> String {
    "/pubsub".to_string()
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_peer_queue_capacity() -> usize {
    fanout_transport::DEFAULT_QUEUE_CAPACITY
}

fn default_auth_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_auth_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            udp: UdpSection::default(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for UdpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_udp_bind(),
            max_datagram_size: default_max_datagram_size(),
            idle_timeout_ms: 0,
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            pubsub_path: default_pubsub_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            peer_queue_capacity: default_peer_queue_capacity(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            base_url: default_auth_url(),
            timeout_ms: default_auth_timeout(),
            slots: Vec::new(),
            tokens: HashMap::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl UdpSection {
    /// Idle eviction timeout, `None` when eviction is disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Interval between idle sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "fanout.toml",
            "/etc/fanout/fanout.toml",
            "~/.config/fanout/fanout.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address of the HTTP/WebSocket listener.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address: {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.udp.enabled);
        assert_eq!(config.udp.bind.port(), 3000);
        assert_eq!(config.udp.idle_timeout(), None);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.transport.pubsub_path, "/pubsub");
        assert_eq!(config.limits.peer_queue_capacity, 1024);
        assert_eq!(config.auth.mode, AuthMode::Http);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "0.0.0.0".into(),
            port: 8000,
            ..Config::default()
        };
        assert_eq!(config.bind_addr().unwrap().port(), 8000);

        let config = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [udp]
            bind = "0.0.0.0:4000"
            idle_timeout_ms = 30000

            [limits]
            peer_queue_capacity = 64
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.udp.bind.port(), 4000);
        assert_eq!(config.udp.idle_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.udp.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.limits.peer_queue_capacity, 64);
        assert_eq!(config.limits.max_message_size, 1024 * 1024);
    }

    #[test]
    fn test_static_auth_tables() {
        let toml_str = r#"
            [auth]
            mode = "static"

            [[auth.slots]]
            videoroom_id = "abc"
            slot = 0
            uid = "u1"

            [[auth.slots]]
            videoroom_id = "abc"
            slot = "host"
            uid = "u2"

            [auth.tokens]
            dev-token-1 = "u1"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.auth.mode, AuthMode::Static);
        assert_eq!(config.auth.slots.len(), 2);
        assert_eq!(config.auth.slots[0].slot, Slot::Number(0));
        assert_eq!(config.auth.slots[1].slot, Slot::Text("host".into()));
        assert_eq!(config.auth.tokens["dev-token-1"], "u1");
    }
}
