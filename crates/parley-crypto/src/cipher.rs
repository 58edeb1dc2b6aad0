//! AES-128-CBC with PKCS#7 padding.
//!
//! Padding is applied and validated here rather than inside the block-mode
//! crate so that every malformed trailer is reported uniformly as
//! [`CryptoError::BadPadding`].

use aes::Aes128;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::random::random_iv;
use crate::{BLOCK_SIZE, CryptoError, IV_SIZE, RoomKey};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Append PKCS#7 padding.
///
/// Always adds between 1 and `block_size` bytes, so an input that is already
/// block aligned gains a full block of padding.
#[must_use]
pub fn pkcs7_pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let pad = block_size - (data.len() % block_size);
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    // pad is in 1..=block_size and block_size is at most 255 for PKCS#7
    out.resize(data.len() + pad, pad as u8);
    out
}

/// Strip and validate PKCS#7 padding.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidInput`] for empty input and
/// [`CryptoError::BadPadding`] when the trailing byte is zero, larger than
/// `block_size` or the input, or when the padding bytes disagree.
pub fn pkcs7_unpad(data: &[u8], block_size: usize) -> Result<&[u8], CryptoError> {
    let Some(&last) = data.last() else {
        return Err(CryptoError::InvalidInput("empty input"));
    };
    let pad = usize::from(last);
    if pad == 0 || pad > block_size || pad > data.len() {
        return Err(CryptoError::BadPadding);
    }
    let (body, trailer) = data.split_at(data.len() - pad);
    if trailer.iter().any(|&b| b != last) {
        return Err(CryptoError::BadPadding);
    }
    Ok(body)
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// The output is `IV || ciphertext`, always at least two blocks long.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if no IV could be generated.
pub fn encrypt(key: &RoomKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = random_iv()?;
    Ok(encrypt_with_iv(key, &iv, plaintext))
}

/// Encrypt with a caller-chosen IV.
///
/// Only deterministic test vectors should use this directly; a reused IV
/// leaks equality of message prefixes.
#[must_use]
pub fn encrypt_with_iv(key: &RoomKey, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let mut body = pkcs7_pad(plaintext, BLOCK_SIZE);
    let len = body.len();
    let cipher = Aes128CbcEnc::new(key.as_bytes().into(), iv.into());
    // body is block aligned, so NoPadding cannot fail here
    let _ = cipher.encrypt_padded_mut::<NoPadding>(&mut body, len);

    let mut out = Vec::with_capacity(IV_SIZE + len);
    out.extend_from_slice(iv);
    out.extend_from_slice(&body);
    out
}

/// Decrypt an `IV || ciphertext` blob produced by [`encrypt`].
///
/// # Errors
///
/// - [`CryptoError::InvalidInput`] if the blob is shorter than one block or
///   its ciphertext is not a whole number of blocks
/// - [`CryptoError::BadPadding`] if the recovered padding is invalid
pub fn decrypt(key: &RoomKey, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < IV_SIZE {
        return Err(CryptoError::InvalidInput("ciphertext shorter than IV"));
    }
    let (iv, ciphertext) = blob.split_at(IV_SIZE);
    if ciphertext.is_empty() {
        return Err(CryptoError::InvalidInput("empty ciphertext"));
    }
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidInput(
            "ciphertext is not a multiple of the block size",
        ));
    }

    let mut buf = ciphertext.to_vec();
    let cipher = Aes128CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| CryptoError::InvalidInput("bad IV length"))?;
    let plain = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::InvalidInput("ciphertext is not block aligned"))?;
    pkcs7_unpad(plain, BLOCK_SIZE).map(<[u8]>::to_vec)
}
