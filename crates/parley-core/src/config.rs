//! Chat configuration
//!
//! A [`ChatConfig`] is built once at startup (by the CLI from its config
//! file and flags, or by tests directly) and shared immutably behind an
//! `Arc` with every component.

use std::net::Ipv4Addr;
use std::time::Duration;

use parley_discovery::nat::DEFAULT_STUN_SERVERS;

use crate::error::ChatError;

/// Default adjectives for generated nicknames
pub const DEFAULT_ADJECTIVES: [&str; 10] = [
    "Cool", "Smart", "Fast", "Lucky", "Brave", "Clever", "Quick", "Sharp", "Bright", "Wise",
];

/// Default nouns for generated nicknames
pub const DEFAULT_NOUNS: [&str; 10] = [
    "Tiger", "Eagle", "Wolf", "Fox", "Bear", "Hawk", "Lion", "Shark", "Horse", "Owl",
];

/// Chat node configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// TCP port for chat frames (0 picks a free port)
    pub tcp_port: u16,

    /// UDP port for LAN announcements
    pub udp_port: u16,

    /// Interval between LAN announcements
    pub broadcast_interval: Duration,

    /// Destination address for LAN announcements
    pub broadcast_addr: Ipv4Addr,

    /// Run the LAN announcer and listener
    pub lan_discovery: bool,

    /// Fixed nickname; generated from the word lists when `None`
    pub default_nickname: Option<String>,

    /// Adjectives for generated nicknames
    pub default_adjectives: Vec<String>,

    /// Nouns for generated nicknames
    pub default_nouns: Vec<String>,

    /// Maximum room size, including the local peer
    pub max_nodes: usize,

    /// Chunk size used when reading files for `/file`
    pub file_chunk_size: usize,

    /// Relay topology configuration
    pub relay: RelayConfig,

    /// Public endpoint resolution
    pub nat: NatConfig,

    /// TCP transport configuration
    pub transport: TransportConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            tcp_port: 8080,
            udp_port: 8081,
            broadcast_interval: Duration::from_secs(5),
            broadcast_addr: Ipv4Addr::BROADCAST,
            lan_discovery: true,
            default_nickname: None,
            default_adjectives: DEFAULT_ADJECTIVES.iter().map(ToString::to_string).collect(),
            default_nouns: DEFAULT_NOUNS.iter().map(ToString::to_string).collect(),
            max_nodes: 100,
            file_chunk_size: 1024,
            relay: RelayConfig::default(),
            nat: NatConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ChatConfig {
    /// Configuration for loopback tests: ephemeral TCP port, no STUN, no
    /// broadcast.
    #[must_use]
    pub fn loopback() -> Self {
        Self {
            tcp_port: 0,
            lan_discovery: false,
            nat: NatConfig {
                resolve_public: false,
                ..NatConfig::default()
            },
            ..Self::default()
        }
    }

    /// Check the configuration for values the node cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConfigInvalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.max_nodes < 2 {
            return Err(ChatError::config_invalid("max_nodes must be at least 2"));
        }
        if self.broadcast_interval.is_zero() {
            return Err(ChatError::config_invalid(
                "broadcast_interval must be non-zero",
            ));
        }
        if self.file_chunk_size == 0 {
            return Err(ChatError::config_invalid("file_chunk_size must be non-zero"));
        }
        if self.default_nickname.is_none()
            && (self.default_adjectives.is_empty() || self.default_nouns.is_empty())
        {
            return Err(ChatError::config_invalid(
                "nickname word lists must not be empty",
            ));
        }
        if self.transport.max_frame_size < 32 {
            return Err(ChatError::config_invalid(
                "max_frame_size must hold at least one encrypted block",
            ));
        }
        if self.transport.max_concurrent_sends == 0 {
            return Err(ChatError::config_invalid(
                "max_concurrent_sends must be non-zero",
            ));
        }
        if self.transport.dial_timeout.is_zero() {
            return Err(ChatError::config_invalid("dial_timeout must be non-zero"));
        }
        if self.relay.liveness_timeout.is_zero() {
            return Err(ChatError::config_invalid(
                "liveness_timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Relay topology configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay mode switch (can also be toggled at runtime)
    pub enabled: bool,

    /// Relay mode is active only when the room has more members than this
    pub threshold: usize,

    /// A peer is live while its last announcement is younger than this
    pub liveness_timeout: Duration,

    /// The local peer never takes the relay role
    pub supernode_opt_out: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            liveness_timeout: Duration::from_secs(30),
            supernode_opt_out: false,
        }
    }
}

/// Public endpoint resolution
#[derive(Debug, Clone)]
pub struct NatConfig {
    /// Query STUN servers; when false the local address guess is advertised
    pub resolve_public: bool,

    /// STUN servers (`host:port`), tried in order
    pub stun_servers: Vec<String>,

    /// Per-server STUN timeout
    pub stun_timeout: Duration,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            resolve_public: true,
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(ToString::to_string).collect(),
            stun_timeout: Duration::from_secs(5),
        }
    }
}

/// How chat frames are delimited on a TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFormat {
    /// One frame per connection, read until the peer closes
    #[default]
    Raw,
    /// 4-byte big-endian length, then the frame
    LengthPrefixed,
}

/// TCP transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for establishing an outbound connection
    pub dial_timeout: Duration,

    /// Timeout for reading an inbound frame (`None` waits indefinitely)
    pub read_timeout: Option<Duration>,

    /// Largest inbound frame accepted, in bytes
    pub max_frame_size: usize,

    /// Upper bound on concurrently running outbound sends
    pub max_concurrent_sends: usize,

    /// Frame delimiting
    pub frame_format: FrameFormat,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            read_timeout: None,
            max_frame_size: 4096,
            max_concurrent_sends: 64,
            frame_format: FrameFormat::Raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.tcp_port, 8080);
        assert_eq!(config.udp_port, 8081);
        assert_eq!(config.broadcast_interval, Duration::from_secs(5));
        assert_eq!(config.max_nodes, 100);
        assert_eq!(config.file_chunk_size, 1024);
        assert_eq!(config.default_adjectives.len(), 10);
        assert_eq!(config.default_nouns[9], "Owl");
        assert!(config.relay.enabled);
        assert_eq!(config.relay.threshold, 5);
        assert_eq!(config.nat.stun_servers.len(), 19);
        assert_eq!(config.transport.frame_format, FrameFormat::Raw);
        assert!(config.transport.read_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_loopback_profile() {
        let config = ChatConfig::loopback();
        assert_eq!(config.tcp_port, 0);
        assert!(!config.lan_discovery);
        assert!(!config.nat.resolve_public);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tiny_room() {
        let config = ChatConfig {
            max_nodes: 1,
            ..ChatConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ChatError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_word_lists() {
        let mut config = ChatConfig::default();
        config.default_nouns.clear();
        assert!(config.validate().is_err());

        config.default_nickname = Some("alice".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sends() {
        let mut config = ChatConfig::default();
        config.transport.max_concurrent_sends = 0;
        assert!(config.validate().is_err());
    }
}
