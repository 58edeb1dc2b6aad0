//! Error types for the chat core
//!
//! Errors follow a small taxonomy so callers can decide what to surface:
//!
//! - **TransientNetwork**: a dial, read or write to one peer failed. Logged and
//!   skipped; never fatal to a fan-out.
//! - **ProtocolMalformed**: an inbound frame could not be decrypted or decoded.
//!   The frame is dropped.
//! - **ConfigInvalid**: bad room key or configuration value. Surfaced to the
//!   operator; the operation is aborted.
//! - **ResourceExhausted**: the room is full. The new peer is refused.
//! - **InvalidState**: the operation does not fit the session state (joining
//!   twice, sending outside a room).
//!
//! # Example
//!
//! ```no_run
//! use parley_core::{ChatError, ErrorKind};
//!
//! fn report(err: &ChatError) {
//!     if err.is_transient() {
//!         tracing::debug!("peer unreachable: {err}");
//!     } else if err.kind() == ErrorKind::ConfigInvalid {
//!         eprintln!("{err}");
//!     }
//! }
//! ```

use std::borrow::Cow;
use thiserror::Error;

use parley_crypto::CryptoError;

/// Coarse error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Per-peer network failure
    TransientNetwork,
    /// Undecodable frame or datagram
    ProtocolMalformed,
    /// Operator-supplied value rejected
    ConfigInvalid,
    /// Capacity limit reached
    ResourceExhausted,
    /// Operation not valid in the current state
    InvalidState,
    /// Local I/O failure
    Io,
}

/// Errors that can occur in chat operations
#[derive(Debug, Error, Clone)]
pub enum ChatError {
    /// Dial, read or write to a peer failed
    #[error("network error: {0}")]
    TransientNetwork(Cow<'static, str>),

    /// Frame could not be decrypted or decoded
    #[error("malformed frame: {0}")]
    ProtocolMalformed(Cow<'static, str>),

    /// Invalid room key or configuration
    #[error("invalid configuration: {0}")]
    ConfigInvalid(Cow<'static, str>),

    /// Room is at its member cap
    #[error("resource exhausted: {0}")]
    ResourceExhausted(Cow<'static, str>),

    /// Operation does not fit the session state
    #[error("invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// Local I/O error (listener bind, file access)
    #[error("I/O error: {0}")]
    Io(String),
}

impl ChatError {
    /// Category of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            ChatError::ProtocolMalformed(_) => ErrorKind::ProtocolMalformed,
            ChatError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            ChatError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            ChatError::InvalidState(_) => ErrorKind::InvalidState,
            ChatError::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::TransientNetwork(_))
    }

    /// Create a network error with static context (zero allocation)
    #[must_use]
    pub const fn network(context: &'static str) -> Self {
        ChatError::TransientNetwork(Cow::Borrowed(context))
    }

    /// Create a malformed-frame error with static context (zero allocation)
    #[must_use]
    pub const fn malformed(context: &'static str) -> Self {
        ChatError::ProtocolMalformed(Cow::Borrowed(context))
    }

    /// Create a configuration error with static context (zero allocation)
    #[must_use]
    pub const fn config_invalid(context: &'static str) -> Self {
        ChatError::ConfigInvalid(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        ChatError::InvalidState(Cow::Borrowed(context))
    }

    /// Create a network error with dynamic context
    #[must_use]
    pub fn network_dynamic(context: String) -> Self {
        ChatError::TransientNetwork(Cow::Owned(context))
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Io(err.to_string())
    }
}

impl From<CryptoError> for ChatError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKeyLength { .. } | CryptoError::InvalidKeyEncoding => {
                ChatError::ConfigInvalid(Cow::Owned(format!("room key: {err}")))
            }
            CryptoError::RandomFailed => ChatError::Io(err.to_string()),
            CryptoError::InvalidInput(_) | CryptoError::BadPadding => {
                ChatError::ProtocolMalformed(Cow::Owned(err.to_string()))
            }
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::ProtocolMalformed(Cow::Owned(err.to_string()))
    }
}

/// Result type for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;
