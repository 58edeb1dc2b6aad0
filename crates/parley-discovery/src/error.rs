//! Discovery error types.

use thiserror::Error;

/// Errors raised by LAN discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Socket setup or I/O failure
    #[error("discovery I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Announcement datagram could not be encoded or decoded
    #[error("announcement codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
