//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG.

use rand_core::{OsRng, RngCore};

use crate::{CryptoError, IV_SIZE};

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|_| CryptoError::RandomFailed)
}

/// Generate a fresh CBC initialization vector.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_iv() -> Result<[u8; IV_SIZE], CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    fill_random(&mut iv)?;
    Ok(iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_iv_differs() {
        let a = random_iv().unwrap();
        let b = random_iv().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fill_random_empty() {
        let mut buf = [];
        assert!(fill_random(&mut buf).is_ok());
    }
}
