//! Configuration system for the Parley CLI.
//!
//! Two file formats are accepted: TOML (any path ending in `.toml`) and the
//! legacy plain-text `KEY=VALUE` format. Both end up as a [`Config`], which
//! is validated and turned into the immutable [`ChatConfig`] the session
//! runs with.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_core::config::{DEFAULT_ADJECTIVES, DEFAULT_NOUNS};
use parley_core::{ChatConfig, FrameFormat, NatConfig, RelayConfig, TransportConfig};
use parley_discovery::nat::DEFAULT_STUN_SERVERS;

/// Parley configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node identity
    #[serde(default)]
    pub node: NodeConfig,
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Relay configuration
    #[serde(default)]
    pub relay: RelaySection,
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportSection,
    /// Room configuration
    #[serde(default)]
    pub room: RoomConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Fixed nickname
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Adjectives for generated nicknames
    #[serde(default = "default_adjectives")]
    pub adjectives: Vec<String>,
    /// Nouns for generated nicknames
    #[serde(default = "default_nouns")]
    pub nouns: Vec<String>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP port for chat frames
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// UDP port for LAN announcements
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Broadcast presence on the LAN
    #[serde(default = "default_true")]
    pub lan: bool,
    /// Interval between announcements, e.g. `"5s"`
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval: String,
    /// Broadcast destination
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
    /// Query STUN servers for the public address
    #[serde(default = "default_true")]
    pub stun: bool,
    /// STUN servers, tried in order
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    /// Per-server STUN timeout
    #[serde(default = "default_five_seconds")]
    pub stun_timeout: String,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    /// Allow relay mode
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Relay mode engages above this many members
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// Peers unheard from for longer are not live
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout: String,
    /// Never become a relay
    #[serde(default)]
    pub opt_out: bool,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    /// Dial timeout
    #[serde(default = "default_five_seconds")]
    pub dial_timeout: String,
    /// Inbound read timeout; unbounded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<String>,
    /// Largest accepted frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Concurrent outbound sends
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    /// `raw` or `length-prefixed`
    #[serde(default = "default_frame_format")]
    pub frame_format: String,
}

/// Room configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Maximum members including self
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    /// Read chunk size for `/file`
    #[serde(default = "default_file_chunk_size")]
    pub file_chunk_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_adjectives() -> Vec<String> {
    DEFAULT_ADJECTIVES.iter().map(ToString::to_string).collect()
}

fn default_nouns() -> Vec<String> {
    DEFAULT_NOUNS.iter().map(ToString::to_string).collect()
}

fn default_tcp_port() -> u16 {
    8080
}

fn default_udp_port() -> u16 {
    8081
}

fn default_true() -> bool {
    true
}

fn default_broadcast_interval() -> String {
    "5s".to_string()
}

fn default_broadcast_addr() -> String {
    Ipv4Addr::BROADCAST.to_string()
}

fn default_stun_servers() -> Vec<String> {
    DEFAULT_STUN_SERVERS.iter().map(ToString::to_string).collect()
}

fn default_five_seconds() -> String {
    "5s".to_string()
}

fn default_threshold() -> usize {
    5
}

fn default_liveness_timeout() -> String {
    "30s".to_string()
}

fn default_max_frame_size() -> usize {
    4096
}

fn default_max_concurrent_sends() -> usize {
    64
}

fn default_frame_format() -> String {
    "raw".to_string()
}

fn default_max_nodes() -> usize {
    100
}

fn default_file_chunk_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            nickname: None,
            adjectives: default_adjectives(),
            nouns: default_nouns(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_port: default_tcp_port(),
            udp_port: default_udp_port(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lan: true,
            broadcast_interval: default_broadcast_interval(),
            broadcast_addr: default_broadcast_addr(),
            stun: true,
            stun_servers: default_stun_servers(),
            stun_timeout: default_five_seconds(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            liveness_timeout: default_liveness_timeout(),
            opt_out: false,
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            dial_timeout: default_five_seconds(),
            read_timeout: None,
            max_frame_size: default_max_frame_size(),
            max_concurrent_sends: default_max_concurrent_sends(),
            frame_format: default_frame_format(),
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_nodes: default_max_nodes(),
            file_chunk_size: default_file_chunk_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Parse a duration such as `5s`, `500ms`, `2m` or `1h`.
///
/// A bare number is taken as seconds.
///
/// # Errors
///
/// Returns an error if the number or unit is not recognized.
pub fn parse_duration(text: &str) -> anyhow::Result<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number
        .parse()
        .with_context(|| format!("invalid duration: {text:?}"))?;
    let seconds = match unit.trim() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => anyhow::bail!("invalid duration unit {other:?} in {text:?}"),
    };
    Duration::try_from_secs_f64(seconds).with_context(|| format!("invalid duration: {text:?}"))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl Config {
    /// Load configuration from file
    ///
    /// Paths ending in `.toml` are parsed as TOML, anything else as the
    /// legacy `KEY=VALUE` format.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        if path.extension().is_some_and(|e| e == "toml") {
            let config: Self = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::from_legacy(&contents))
        }
    }

    /// Parse the legacy `KEY=VALUE` format over the defaults.
    ///
    /// Blank lines and `#` comments are skipped. Unknown keys and values
    /// that fail to parse are ignored, leaving the default in place.
    #[must_use]
    pub fn from_legacy(contents: &str) -> Self {
        let mut config = Self::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "TCPPORT" => {
                    if let Ok(port) = value.parse() {
                        config.network.tcp_port = port;
                    }
                }
                "UDPPORT" => {
                    if let Ok(port) = value.parse() {
                        config.network.udp_port = port;
                    }
                }
                "BROADCAST_TIMEOUT" => {
                    if parse_duration(value).is_ok() {
                        config.discovery.broadcast_interval = value.to_string();
                    }
                }
                "DEFAULT_NICKNAME" => {
                    if !value.is_empty() {
                        config.node.nickname = Some(value.to_string());
                    }
                }
                "DEFAULT_ADJECTIVES" => config.node.adjectives = split_list(value),
                "DEFAULT_NOUNS" => config.node.nouns = split_list(value),
                "MAX_NODES" => {
                    if let Ok(n) = value.parse() {
                        config.room.max_nodes = n;
                    }
                }
                "FILE_CHUNK_SIZE" => {
                    if let Ok(n) = value.parse() {
                        config.room.file_chunk_size = n;
                    }
                }
                other => tracing::debug!(key = other, "ignoring unknown config key"),
            }
        }
        config
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("parley/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    fn frame_format(&self) -> anyhow::Result<FrameFormat> {
        match self.transport.frame_format.as_str() {
            "raw" => Ok(FrameFormat::Raw),
            "length-prefixed" => Ok(FrameFormat::LengthPrefixed),
            other => anyhow::bail!(
                "Invalid frame format: {other}. Must be one of: raw, length-prefixed"
            ),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        self.frame_format()?;
        self.discovery
            .broadcast_addr
            .parse::<Ipv4Addr>()
            .with_context(|| {
                format!("Invalid broadcast address: {}", self.discovery.broadcast_addr)
            })?;

        if self.discovery.stun && self.discovery.stun_servers.is_empty() {
            anyhow::bail!("STUN enabled but no servers configured");
        }
        for server in &self.discovery.stun_servers {
            validate_host_port(server, "STUN server")?;
        }

        self.to_chat_config()?.validate()?;
        Ok(())
    }

    /// Build the session configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a duration, address or frame format is invalid.
    pub fn to_chat_config(&self) -> anyhow::Result<ChatConfig> {
        let read_timeout = self
            .transport
            .read_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        Ok(ChatConfig {
            tcp_port: self.network.tcp_port,
            udp_port: self.network.udp_port,
            broadcast_interval: parse_duration(&self.discovery.broadcast_interval)?,
            broadcast_addr: self.discovery.broadcast_addr.parse()?,
            lan_discovery: self.discovery.lan,
            default_nickname: self.node.nickname.clone(),
            default_adjectives: self.node.adjectives.clone(),
            default_nouns: self.node.nouns.clone(),
            max_nodes: self.room.max_nodes,
            file_chunk_size: self.room.file_chunk_size,
            relay: RelayConfig {
                enabled: self.relay.enabled,
                threshold: self.relay.threshold,
                liveness_timeout: parse_duration(&self.relay.liveness_timeout)?,
                supernode_opt_out: self.relay.opt_out,
            },
            nat: NatConfig {
                resolve_public: self.discovery.stun,
                stun_servers: self.discovery.stun_servers.clone(),
                stun_timeout: parse_duration(&self.discovery.stun_timeout)?,
            },
            transport: TransportConfig {
                dial_timeout: parse_duration(&self.transport.dial_timeout)?,
                read_timeout,
                max_frame_size: self.transport.max_frame_size,
                max_concurrent_sends: self.transport.max_concurrent_sends,
                frame_format: self.frame_format()?,
            },
        })
    }
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!("{name} '{addr}' missing port (expected format: host:port)");
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("{name} '{addr}' has invalid port: {port_str}"))?;
    if port == 0 {
        anyhow::bail!("{name} '{addr}' has invalid port: 0");
    }
    if host.is_empty() {
        anyhow::bail!("{name} '{addr}' has empty hostname");
    }
    if host.contains('/') || host.contains('\\') {
        anyhow::bail!("{name} '{addr}' contains invalid characters");
    }
    Ok(())
}
