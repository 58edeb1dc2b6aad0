//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Input is empty or not a whole number of blocks
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Padding bytes are missing, zero, oversized or inconsistent
    #[error("bad padding")]
    BadPadding,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Key text is not valid base64
    #[error("invalid key encoding")]
    InvalidKeyEncoding,

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,
}
