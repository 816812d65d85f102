// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Supports both programmatic and file-based configuration.

use crate::backoff::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge name (for identification).
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Connect bound for sinks that do not declare their own (milliseconds).
    #[serde(default = "default_sink_timeout_ms")]
    pub default_sink_timeout_ms: u64,

    /// Statistics reporting interval (seconds), 0 disables periodic reports.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upstream source.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Downstream sinks, in registration order.
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

fn default_bridge_name() -> String {
    "spectator-bridge".to_string()
}

fn default_sink_timeout_ms() -> u64 {
    3000
}

fn default_stats_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            upstream: UpstreamConfig::default(),
            default_sink_timeout_ms: default_sink_timeout_ms(),
            stats_interval_secs: default_stats_interval(),
            log_level: default_log_level(),
            sinks: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it.
    ///
    /// For callers that merge further settings before [`BridgeConfig::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Single relay sink with default settings.
    pub fn relay(url: impl Into<String>) -> Self {
        Self {
            sinks: vec![SinkConfig::Relay(RelaySinkConfig::new("relay", url))],
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sinks.is_empty() {
            return Err(ConfigError::Invalid("No sinks configured".into()));
        }

        if self.upstream.address.is_empty() {
            return Err(ConfigError::Invalid("Upstream address is empty".into()));
        }
        if self.upstream.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Upstream connect timeout must be positive".into(),
            ));
        }
        if self.default_sink_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Default sink timeout must be positive".into(),
            ));
        }

        let mut names = HashSet::new();
        for sink in &self.sinks {
            let name = sink.name();
            if name.is_empty() {
                return Err(ConfigError::Invalid("Sink with empty name".into()));
            }
            if !names.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate sink name '{}'",
                    name
                )));
            }

            match sink {
                SinkConfig::Relay(relay) => relay.validate()?,
                SinkConfig::Server(server) => {
                    server.bind_addr()?;
                }
                SinkConfig::Log(_) => {}
            }
        }

        Ok(())
    }

    /// Add a sink.
    pub fn add_sink(&mut self, sink: SinkConfig) {
        self.sinks.push(sink);
    }

    pub fn default_sink_timeout(&self) -> Duration {
        Duration::from_millis(self.default_sink_timeout_ms)
    }
}

/// Upstream source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Host or IP address.
    #[serde(default = "default_upstream_address")]
    pub address: String,

    /// TCP port.
    #[serde(default = "default_upstream_port")]
    pub port: u16,

    /// Connect bound (milliseconds).
    #[serde(default = "default_upstream_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_upstream_address() -> String {
    "127.0.0.1".to_string()
}

fn default_upstream_port() -> u16 {
    51441
}

fn default_upstream_timeout_ms() -> u64 {
    3000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: default_upstream_address(),
            port: default_upstream_port(),
            connect_timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

impl UpstreamConfig {
    /// Parse `host:port`; a bare host keeps the default port.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let (address, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConfigError::Invalid(format!("Invalid upstream port '{}'", port))
                })?;
                (host, port)
            }
            None => (s, default_upstream_port()),
        };

        if address.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Invalid upstream address '{}'",
                s
            )));
        }

        Ok(Self {
            address: address.to_string(),
            port,
            ..Default::default()
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Configuration for a single sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Remote relay over WebSocket.
    Relay(RelaySinkConfig),
    /// Local WebSocket server for spectator clients.
    Server(ServerSinkConfig),
    /// In-process consumer logging session boundaries.
    Log(LogSinkConfig),
}

impl SinkConfig {
    pub fn name(&self) -> &str {
        match self {
            SinkConfig::Relay(relay) => &relay.name,
            SinkConfig::Server(server) => &server.name,
            SinkConfig::Log(log) => &log.name,
        }
    }
}

/// Relay sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySinkConfig {
    pub name: String,

    /// `ws://` or `wss://` endpoint.
    pub url: String,

    /// Bound for opening the transport and completing the handshake
    /// (milliseconds).
    #[serde(default = "default_relay_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Automatic reconnection.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_relay_timeout_ms() -> u64 {
    8000
}

impl RelaySinkConfig {
    /// Create a relay sink with default settings.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            connect_timeout_ms: default_relay_timeout_ms(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Set the connect timeout.
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set the reconnect policy.
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Parse and check the endpoint URL.
    pub fn parsed_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::Invalid(format!(
                "Sink '{}' has unsupported URL scheme '{}'",
                self.name, other
            ))),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_url()?;

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "Sink '{}' has a zero connect timeout",
                self.name
            )));
        }
        if self.reconnect.multiplier == 0 {
            return Err(ConfigError::Invalid(format!(
                "Sink '{}' has a zero backoff multiplier",
                self.name
            )));
        }

        Ok(())
    }
}

/// Spectator server sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSinkConfig {
    pub name: String,

    /// Listen address (`ip:port`).
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_bind() -> String {
    "0.0.0.0:9090".to_string()
}

impl ServerSinkConfig {
    pub fn new(name: impl Into<String>, bind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind: bind.into(),
        }
    }

    /// Parse the listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "Sink '{}' has invalid bind address '{}'",
                self.name, self.bind
            ))
        })
    }
}

/// Log sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSinkConfig {
    pub name: String,
}

impl LogSinkConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bridge_config_relay() {
        let config = BridgeConfig::relay("ws://localhost:8080/bridge");
        assert_eq!(config.sinks.len(), 1);
        assert_eq!(config.sinks[0].name(), "relay");
        assert_eq!(config.upstream.port, 51441);
        assert_eq!(config.default_sink_timeout(), Duration::from_millis(3000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bridge_config_validation() {
        // Empty config should fail
        let config = BridgeConfig::default();
        assert!(config.validate().is_err());

        // Duplicate names should fail
        let mut config = BridgeConfig::relay("ws://localhost:8080");
        config.add_sink(SinkConfig::Log(LogSinkConfig::new("relay")));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // Unsupported scheme should fail
        let config = BridgeConfig::relay("http://localhost:8080");
        assert!(config.validate().is_err());

        // Unparseable URL should fail
        let config = BridgeConfig::relay("not a url");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

        // Zero timeouts should fail
        let mut config = BridgeConfig::relay("wss://relay.example.com");
        config.default_sink_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_multiplier_rejected() {
        let mut policy = ReconnectPolicy::default();
        policy.multiplier = 0;
        let config = BridgeConfig {
            sinks: vec![SinkConfig::Relay(
                RelaySinkConfig::new("relay", "ws://localhost").reconnect(policy),
            )],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upstream_parse() {
        let upstream = UpstreamConfig::parse("192.168.1.20:51442").expect("parse");
        assert_eq!(upstream.address, "192.168.1.20");
        assert_eq!(upstream.port, 51442);

        let upstream = UpstreamConfig::parse("dolphin.local").expect("parse");
        assert_eq!(upstream.port, 51441);

        assert!(UpstreamConfig::parse("host:notaport").is_err());
        assert!(UpstreamConfig::parse(":51441").is_err());
    }

    #[test]
    fn test_config_parsing() {
        let toml = r#"
            name = "console-1"
            default_sink_timeout_ms = 2500

            [upstream]
            address = "10.0.0.5"

            [[sinks]]
            type = "relay"
            name = "spectate"
            url = "wss://spectate.example.com/bridge"

            [sinks.reconnect]
            max_attempts = 8

            [[sinks]]
            type = "log"
            name = "console"

            [[sinks]]
            type = "server"
            name = "browsers"
        "#;

        let config: BridgeConfig = toml::from_str(toml).expect("parse");
        assert_eq!(config.name, "console-1");
        assert_eq!(config.upstream.address, "10.0.0.5");
        assert_eq!(config.upstream.port, 51441);
        assert_eq!(config.default_sink_timeout_ms, 2500);
        assert_eq!(config.sinks.len(), 3);

        match &config.sinks[0] {
            SinkConfig::Relay(relay) => {
                assert_eq!(relay.connect_timeout_ms, 8000);
                assert_eq!(relay.reconnect.max_attempts, 8);
                assert_eq!(relay.reconnect.base_delay_ms, 500);
            }
            other => panic!("expected relay sink, got {:?}", other),
        }
        assert!(matches!(&config.sinks[1], SinkConfig::Log(log) if log.name == "console"));
        assert!(matches!(
            &config.sinks[2],
            SinkConfig::Server(server) if server.bind == "0.0.0.0:9090"
        ));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_bind_validation() {
        let mut config = BridgeConfig::default();
        config.add_sink(SinkConfig::Server(ServerSinkConfig::new(
            "browsers",
            "127.0.0.1:9090",
        )));
        assert!(config.validate().is_ok());

        config.sinks[0] = SinkConfig::Server(ServerSinkConfig::new("browsers", "localhost"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_skips_validation() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"name = \"no-sinks\"\n").expect("write");

        let loaded = BridgeConfig::load(file.path()).expect("load");
        assert_eq!(loaded.name, "no-sinks");
        assert!(loaded.sinks.is_empty());

        assert!(BridgeConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let mut config = BridgeConfig::relay("ws://127.0.0.1:9000/bridge");
        config.add_sink(SinkConfig::Log(LogSinkConfig::new("console")));

        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(config.to_toml().expect("serialize").as_bytes())
            .expect("write");

        let loaded = BridgeConfig::from_file(file.path()).expect("load");
        assert_eq!(loaded.sinks.len(), 2);
        assert_eq!(loaded.sinks[1].name(), "console");
        assert_eq!(loaded.upstream, config.upstream);
    }
}
