//! # Parley Core
//!
//! Rooms, relay topology, routing and the TCP transport of the Parley
//! serverless chat overlay.
//!
//! This crate provides:
//! - Room membership with an admission cap
//! - Relay ("super node") election, failover and role gossip
//! - Outbound routing and relay fan-out with loop avoidance
//! - One-frame-per-connection TCP transport
//! - The [`ChatSession`] façade tying it together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ChatSession                               │
//! │   (create/join room, send, peers, events)                        │
//! ├──────────────────────────────┬──────────────────────────────────┤
//! │   Room + TopologyManager     │   Router                         │
//! │   (members, roles, liveness) │   (direct / via relay / relay)   │
//! ├──────────────────────────────┴──────────────────────────────────┤
//! │                 Dialer / Listener (TCP frames)                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod fanout;
pub mod message;
pub mod peer;
pub mod room;
pub mod router;
pub mod session;
pub mod topology;
pub mod transport;

pub use config::{ChatConfig, FrameFormat, NatConfig, RelayConfig, TransportConfig};
pub use error::{ChatError, ErrorKind, Result};
pub use fanout::{DeliveryReport, FanOut};
pub use message::{Message, SeenMessages};
pub use peer::{PeerId, PeerRecord, Role};
pub use room::{Admission, Room};
pub use router::{RelayPlan, Route, plan_outbound, plan_relay, resolve_sender};
pub use session::{ChatEvent, ChatSession, EventReceiver, Outbound, PeerView};
pub use topology::{PeerEntry, Promotion, TopologyManager};
pub use transport::{Dialer, Listener, read_frame};

pub use parley_crypto::RoomKey;
