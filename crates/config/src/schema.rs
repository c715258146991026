//! Config schema: listener, request ledger retention, connection keepalive.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedlinkConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub presence: PresenceConfig,
}

/// HTTP + WebSocket listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3001,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Active request retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Requests older than this are deleted by the sweep, whatever their status.
    pub retention_secs: u64,
    /// How often the sweep runs.
    pub sweep_interval_secs: u64,
    /// Emit `request_expired` to all hospitals for each swept request.
    pub notify_expired: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_secs: 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
            notify_expired: false,
        }
    }
}

impl LedgerConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Never zero; `tokio::time::interval` panics on a zero period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// WebSocket keepalive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub ping_interval_secs: u64,
    /// A connection silent for this long is treated as disconnected.
    pub ping_timeout_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 10,
            ping_timeout_secs: 30,
        }
    }
}

impl PresenceConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs.max(1))
    }
}
