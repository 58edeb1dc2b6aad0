//! Pre-shared room keys.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::ZeroizeOnDrop;

use crate::random::fill_random;
use crate::{CryptoError, ROOM_KEY_SIZE};

/// A room's pre-shared AES-128 key.
///
/// Keys are shared out of band as standard base64 text. The key is zeroized
/// on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct RoomKey([u8; ROOM_KEY_SIZE]);

impl RoomKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; ROOM_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random key from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the CSPRNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; ROOM_KEY_SIZE];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Create from slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not 16 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; ROOM_KEY_SIZE] =
            slice
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: ROOM_KEY_SIZE,
                    actual: slice.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Parse the base64 text form of a key.
    ///
    /// Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyEncoding`] for malformed base64 and
    /// [`CryptoError::InvalidKeyLength`] when the decoded key is not 16 bytes.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let decoded = STANDARD
            .decode(text.trim())
            .map_err(|_| CryptoError::InvalidKeyEncoding)?;
        Self::from_slice(&decoded)
    }

    /// Encode the key as standard base64 text for sharing.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Get raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ROOM_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RoomKey(<redacted>)")
    }
}
