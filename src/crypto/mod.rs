//! AES-256-GCM block sealing and Argon2id key derivation.
//!
//! Key derivation: Argon2id(password, salt=archive identity UUID) -> 32-byte key
//! Sealing:        AES-256-GCM, nonce prepended to ciphertext
//!
//! Sealed payload layout: `nonce (12 B) || ciphertext || GCM tag (16 B)`.
//! The caller supplies the 32-byte key directly; `derive_key` exists only for
//! the CLI's password-unlock convenience (§6.2's `Archive::open` contract
//! takes a raw key, not a password).

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;

/// Byte length of the AES-GCM nonce prepended to every sealed payload.
pub const NONCE_LEN: usize = 12;
/// Byte length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed — wrong key or corrupted data")]
    DecryptionFailed,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("sealed payload too short (minimum {NONCE_LEN} bytes)")]
    TooShort,
    #[error("no key was provided")]
    MissingKey,
}

/// Derive a 256-bit key from a password using Argon2id.
///
/// `salt` should be the archive's identity UUID bytes, giving each archive a
/// unique key even when the same password is reused across archives. This is
/// a convenience for CLI callers; the core archive contract always takes a
/// raw 32-byte key.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let params = Params::new(64 * 1024, 3, 1, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Seal `plaintext` with AES-256-GCM using a fresh random nonce.
///
/// Returns `nonce (12 B) || ciphertext || GCM-tag (16 B)`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unseal a payload produced by [`seal`].
///
/// Any tampering with nonce, ciphertext, or tag is detected here — the GCM
/// tag check fails and `DecryptionFailed` is returned.
pub fn unseal(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::TooShort);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    let nonce = aes_gcm::Nonce::from_slice(&data[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &data[NONCE_LEN..])
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_unseal_roundtrip() {
        let key = [7u8; 32];
        let plaintext = b"some block payload bytes";
        let sealed = seal(&key, plaintext).unwrap();
        let back = unseal(&key, &sealed).unwrap();
        assert_eq!(back, plaintext);
    }

    #[test]
    fn tamper_detected() {
        let key = [7u8; 32];
        let mut sealed = seal(&key, b"hello world").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(unseal(&key, &sealed).is_err());
    }

    #[test]
    fn derive_key_deterministic() {
        let salt = [1u8; 16];
        let a = derive_key("hunter2", &salt).unwrap();
        let b = derive_key("hunter2", &salt).unwrap();
        assert_eq!(a, b);
    }
}
