//! Configuration loading and management

use crate::server::exposure::websocket::protocol::parse_heart_beat;
use crate::server::pool::PoolLimits;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Admission limits for the connection pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrently registered connections
    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Maximum number of channel memberships across all channels
    #[serde(default)]
    pub max_memberships: Option<usize>,
}

/// STOMP sub-protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StompConfig {
    /// Whether STOMP sub-protocols are offered during the handshake
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sub-protocol names offered to clients, in preference order
    #[serde(default = "default_stomp_protocols")]
    pub protocols: Vec<String>,

    /// Forward BEGIN/COMMIT/ABORT/ACK/NACK to handlers as MESSAGE events
    #[serde(default)]
    pub forward_transaction_commands: bool,

    /// Value of the `server` header in CONNECTED frames
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Server heart-beat offer, `sx,sy` in milliseconds
    ///
    /// `sx` is how often the server can send heart-beats, `sy` how often it
    /// wants to hear from the client. `0` disables a direction.
    #[serde(default = "default_heart_beat")]
    pub heart_beat: String,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocols: default_stomp_protocols(),
            forward_transaction_commands: false,
            server_name: default_server_name(),
            heart_beat: default_heart_beat(),
        }
    }
}

impl StompConfig {
    /// Whether a negotiated sub-protocol selects the STOMP interpreter
    pub fn accepts(&self, protocol: &str) -> bool {
        self.enabled && self.protocols.iter().any(|p| p.eq_ignore_ascii_case(protocol))
    }

    /// Heart-beat offer as `(sx, sy)` milliseconds, `None` if malformed
    pub fn heart_beat_millis(&self) -> Option<(u64, u64)> {
        parse_heart_beat(&self.heart_beat)
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Route under which WebSocket upgrades are accepted
    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    /// Pool admission limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Upper bound on a single handler invocation, in milliseconds
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,

    /// Request headers copied into every connection's header bag
    #[serde(default = "default_forwarded_headers")]
    pub forwarded_headers: Vec<String>,

    /// STOMP settings
    #[serde(default)]
    pub stomp: StompConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check
    pub fn validate(&self) -> Result<()> {
        if !self.mount_path.starts_with('/') {
            bail!("mount_path must start with '/', got '{}'", self.mount_path);
        }
        if self.mount_path.contains('{') {
            bail!("mount_path must not contain route captures");
        }
        if self.stomp.enabled && self.stomp.protocols.is_empty() {
            bail!("stomp.protocols must not be empty when STOMP is enabled");
        }
        if self.stomp.heart_beat_millis().is_none() {
            bail!(
                "stomp.heart_beat must be 'sx,sy' in milliseconds, got '{}'",
                self.stomp.heart_beat
            );
        }
        if self.handler_timeout_ms == Some(0) {
            bail!("handler_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Handler timeout as a duration
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    /// Pool limits derived from the configuration
    pub fn pool_limits(&self) -> PoolLimits {
        PoolLimits {
            max_connections: self.limits.max_connections,
            max_memberships: self.limits.max_memberships,
        }
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            mount_path: default_mount_path(),
            limits: LimitsConfig::default(),
            handler_timeout_ms: None,
            forwarded_headers: default_forwarded_headers(),
            stomp: StompConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

fn default_true() -> bool {
    true
}

fn default_mount_path() -> String {
    "/ws".to_string()
}

fn default_stomp_protocols() -> Vec<String> {
    vec![
        "v12.stomp".to_string(),
        "v11.stomp".to_string(),
        "v10.stomp".to_string(),
    ]
}

fn default_server_name() -> String {
    format!("this-gateway/{}", env!("CARGO_PKG_VERSION"))
}

fn default_heart_beat() -> String {
    "0,0".to_string()
}

fn default_forwarded_headers() -> Vec<String> {
    vec![
        "host".to_string(),
        "user-agent".to_string(),
        "sec-websocket-protocol".to_string(),
    ]
}
