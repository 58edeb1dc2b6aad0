//! Peer identity records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use parley_discovery::Announcement;

/// Peer identifier: the canonical `ip:port` text of the peer's address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Identifier for a peer reachable at `addr`.
    #[must_use]
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }

    /// Borrow as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a room participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Unique id
    pub id: PeerId,
    /// TCP endpoint for chat frames
    pub address: SocketAddr,
    /// Display name
    pub display_name: String,
    /// Peer refuses the relay role
    pub supernode_opt_out: bool,
}

impl PeerRecord {
    /// Record whose id is derived from its address.
    #[must_use]
    pub fn new(address: SocketAddr, display_name: impl Into<String>) -> Self {
        Self {
            id: PeerId::from_addr(address),
            address,
            display_name: display_name.into(),
            supernode_opt_out: false,
        }
    }

    /// Same record with the relay opt-out flag set.
    #[must_use]
    pub fn opted_out(mut self, opt_out: bool) -> Self {
        self.supernode_opt_out = opt_out;
        self
    }

    /// Presence announcement for this record.
    #[must_use]
    pub fn announcement(&self, is_relay: bool) -> Announcement {
        Announcement {
            id: self.id.to_string(),
            address: self.address,
            nickname: self.display_name.clone(),
            no_super_node: self.supernode_opt_out,
            super_node: is_relay,
            leaving: false,
        }
    }
}

/// The record is keyed by the announced address; the announcement's own
/// `id` text is not trusted.
impl From<Announcement> for PeerRecord {
    fn from(a: Announcement) -> Self {
        Self {
            id: PeerId::from_addr(a.address),
            address: a.address,
            display_name: a.nickname,
            supernode_opt_out: a.no_super_node,
        }
    }
}

/// Role of a peer in the relay topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Sends and receives its own traffic only
    #[default]
    Regular,
    /// Forwards traffic for the room (a.k.a. supernode)
    Relay,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Regular => f.write_str("regular"),
            Role::Relay => f.write_str("relay"),
        }
    }
}
