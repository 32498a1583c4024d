use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, ensure};
use tracing::trace;

use crate::util;

/// Top-level configuration of the hub binary
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Address the HTTP/WebSocket server binds to
    #[serde(default = "crate::util::get_default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// HS256 secret used to verify identity tokens at handshake.
    ///
    /// Without a secret every connection gets an anonymous identity.
    pub jwt_secret: Option<String>,

    /// Enable permissive CORS for browser dashboards
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    /// Hub and connection tuning
    #[serde(default)]
    pub hub: HubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: util::get_default_bind_addr(),
            jwt_secret: None,
            enable_cors: default_enable_cors(),
            hub: HubConfig::default(),
        }
    }
}

impl Config {
    /// Apply `HUB_*` environment overrides on top of the file values
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(addr) = util::get_bind_addr() {
            self.bind_addr = addr;
        }
        if let Some(secret) = util::get_jwt_secret() {
            self.jwt_secret = Some(secret);
        }
        self
    }
}

/// Tuning for the hub and every client connection it manages
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct HubConfig {
    /// Capacity of each client's outbound mailbox
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Capacity of the hub's command queue
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    /// Interval between keepalive pings sent by the writer loop
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Idle window after which a silent connection is considered dead
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Upper bound for a single transport write
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Maximum size of an inbound frame in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            command_capacity: default_command_capacity(),
            ping_interval_secs: default_ping_interval_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl HubConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Reject settings the connection lifecycle cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.mailbox_capacity > 0, "mailbox_capacity must be at least 1");
        ensure!(self.command_capacity > 0, "command_capacity must be at least 1");
        ensure!(self.ping_interval_secs > 0, "ping_interval_secs must be at least 1");
        ensure!(self.write_timeout_secs > 0, "write_timeout_secs must be at least 1");
        ensure!(
            self.read_timeout_secs > self.ping_interval_secs,
            "read_timeout_secs ({}) must be greater than ping_interval_secs ({})",
            self.read_timeout_secs,
            self.ping_interval_secs
        );
        Ok(())
    }
}

fn default_enable_cors() -> bool {
    true
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_command_capacity() -> usize {
    1024
}

fn default_ping_interval_secs() -> u64 {
    54
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_write_timeout_secs() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    64 * 1024
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config {path}"))?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.hub.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
