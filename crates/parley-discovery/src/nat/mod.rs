//! Public endpoint discovery.
//!
//! - **STUN Client**: RFC 5389 Binding queries for the server reflexive address
//! - **Endpoint Resolver**: walks a server list and falls back to a local guess

pub mod resolver;
pub mod stun;

pub use resolver::{DEFAULT_STUN_SERVERS, EndpointResolver, local_ip_guess};
pub use stun::{StunClient, StunError};
