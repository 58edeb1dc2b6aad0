//! # Parley Crypto
//!
//! Symmetric encryption for Parley chat rooms.
//!
//! Every room is protected by a single pre-shared 16-byte key. A message is
//! serialized, padded with PKCS#7 and encrypted with AES-128 in CBC mode under
//! a fresh random IV. The IV travels in front of the ciphertext:
//!
//! ```text
//! +----------------+-----------------------------+
//! | IV (16 bytes)  | ciphertext (n * 16 bytes)   |
//! +----------------+-----------------------------+
//! ```
//!
//! The scheme is confidentiality only. There is no authentication tag, so a
//! tampered blob either fails padding validation or decrypts to garbage that
//! the message decoder rejects.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cipher;
pub mod error;
pub mod key;
pub mod random;

pub use cipher::{decrypt, encrypt, encrypt_with_iv, pkcs7_pad, pkcs7_unpad};
pub use error::CryptoError;
pub use key::RoomKey;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Room key size in bytes (AES-128).
pub const ROOM_KEY_SIZE: usize = 16;

/// IV size in bytes, equal to the block size.
pub const IV_SIZE: usize = BLOCK_SIZE;
