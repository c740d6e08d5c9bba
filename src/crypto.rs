//! The encryption transformer wrapped around encoded values.
//!
//! Same contract the ancestor networking code implemented against `libsodium-sys`
//! (`nonce || ciphertext || tag`, authenticated with an AEAD cipher): here built on the
//! pure-Rust `chacha20poly1305` crate instead of an unsafe FFI binding, so there is no
//! `sodium_init()` ceremony and no unsafe block in this module.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::error::Error;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const MAC_SIZE: usize = 16;

/// Encrypts `plain` under `key`, returning `nonce || ciphertext || tag`.
///
/// A fresh random nonce is drawn for every call; at the scale a single pool entry is
/// rewritten, the birthday bound on a 96-bit nonce is not a practical concern.
pub fn encrypt(plain: &[u8], key: &[u8; KEY_SIZE]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(&nonce, plain)
        .expect("chacha20poly1305 encryption of a well-formed buffer cannot fail");

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.append(&mut ciphertext);
    out
}

/// Decrypts a buffer produced by [`encrypt`]. Fails with [`Error::Decrypt`] if the buffer
/// is too short to contain a nonce and tag, or if authentication fails (wrong key, or the
/// buffer was tampered with).
pub fn decrypt(data: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>, Error> {
    if data.len() < NONCE_SIZE + MAC_SIZE {
        return Err(Error::Decrypt);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher.decrypt(nonce, ciphertext).map_err(|_| Error::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_under_matching_key() {
        let key = [7u8; KEY_SIZE];
        let plain = b"super secret payload";

        let encrypted = encrypt(plain, &key);
        let decrypted = decrypt(&encrypted, &key).unwrap();

        assert_eq!(decrypted, plain);
    }

    #[test]
    fn fails_under_mismatched_key() {
        let key = [7u8; KEY_SIZE];
        let other_key = [9u8; KEY_SIZE];
        let encrypted = encrypt(b"payload", &key);

        assert!(decrypt(&encrypted, &other_key).is_err());
    }

    #[test]
    fn fails_on_truncated_buffer() {
        let key = [1u8; KEY_SIZE];
        assert!(decrypt(&[0u8; 4], &key).is_err());
    }
}
