//! Settings shared by the remote client and the live poller.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Port used when a source descriptor leaves it out.
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Credentials used when a descriptor leaves them out.
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Connect, read and write timeout for one remote session.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long a failed handshake blocks further connection attempts.
    #[serde(default = "default_reconnect_cooldown_ms")]
    pub reconnect_cooldown_ms: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,

    #[serde(default = "default_min_poll_secs")]
    pub min_poll_secs: f64,

    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: f64,

    /// Number of slices the poll sleep is cut into.
    #[serde(default = "default_poll_slices")]
    pub poll_slices: u32,
}

fn default_port() -> u16 {
    6088
}

fn default_user() -> String {
    "neutron-retrieve".to_string()
}

fn default_password() -> String {
    "IPNS".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_reconnect_cooldown_ms() -> u64 {
    1_000
}

fn default_poll_interval_secs() -> f64 {
    30.0
}

fn default_min_poll_secs() -> f64 {
    10.0
}

fn default_max_poll_secs() -> f64 {
    600.0
}

fn default_poll_slices() -> u32 {
    20
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            user: default_user(),
            password: default_password(),
            timeout_ms: default_timeout_ms(),
            reconnect_cooldown_ms: default_reconnect_cooldown_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            min_poll_secs: default_min_poll_secs(),
            max_poll_secs: default_max_poll_secs(),
            poll_slices: default_poll_slices(),
        }
    }
}

impl RetrievalConfig {
    /// Load a TOML configuration file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    /// Clamp a requested poll interval into `[min_poll_secs, max_poll_secs]`.
    pub fn clamp_poll_interval(&self, seconds: f64) -> Duration {
        let secs = if seconds.is_nan() {
            self.min_poll_secs
        } else {
            seconds.min(self.max_poll_secs).max(self.min_poll_secs)
        };
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: RetrievalConfig = toml::from_str("default_port = 7000\nmin_poll_secs = 1.0").unwrap();
        assert_eq!(cfg.default_port, 7000);
        assert_eq!(cfg.min_poll_secs, 1.0);
        assert_eq!(cfg.max_poll_secs, 600.0);
        assert_eq!(cfg.password, "IPNS");
    }

    #[test]
    fn poll_interval_is_clamped() {
        let cfg = RetrievalConfig::default();
        assert_eq!(cfg.clamp_poll_interval(1.0), Duration::from_secs(10));
        assert_eq!(cfg.clamp_poll_interval(5000.0), Duration::from_secs(600));
        assert_eq!(cfg.clamp_poll_interval(42.0), Duration::from_secs(42));
    }
}
