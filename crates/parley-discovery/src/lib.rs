//! # Parley Discovery
//!
//! How a Parley node finds out where it is and who else is around.
//!
//! This crate provides:
//! - STUN Binding queries (RFC 5389) to learn the public IPv4 endpoint, walking
//!   an ordered list of public servers and falling back to a local address
//! - LAN presence announcements over UDP broadcast, decoded into
//!   [`DiscoveryEvent`]s for the session layer
//!
//! ## Example
//!
//! ```rust,no_run
//! use parley_discovery::nat::EndpointResolver;
//! use std::time::Duration;
//!
//! # async fn run() {
//! let resolver = EndpointResolver::new(
//!     vec!["stun.l.google.com:19302".to_string()],
//!     Duration::from_secs(5),
//!     8080,
//! );
//! let endpoint = resolver.resolve_public_endpoint().await;
//! println!("reachable at {endpoint}");
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod lan;
pub mod nat;

pub use error::DiscoveryError;
pub use lan::{Announcement, DiscoveryEvent, LanConfig, LanDiscovery};
pub use nat::{EndpointResolver, StunClient, StunError};
