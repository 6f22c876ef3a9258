//! AES-256-GCM sealing of cloud fragments.
//!
//! Output framing is self-describing: `nonce (12) ‖ ciphertext ‖ tag (16)`,
//! so decryption needs nothing besides the master key. A fresh random nonce
//! is generated per call; decryption fails closed on any tag mismatch.

use crate::error::{ArchiveError, Result};
use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AEAD nonce length: 96 bits.
pub const NONCE_LEN: usize = 12;
/// AEAD authentication tag length: 128 bits.
pub const TAG_LEN: usize = 16;

/// 256-bit master key. Zeroized on drop, redacted in Debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(pub [u8; 32]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

impl MasterKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    /// Construct from raw key material.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Encrypt a cloud fragment under the master key.
pub fn encrypt_fragment(key: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| ArchiveError::EncryptionFailed(e.to_string()))?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| ArchiveError::EncryptionFailed(e.to_string()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed fragment. Any tampering, truncation, or wrong key yields
/// `DecryptionAuthFailed`; partial plaintext is never returned.
pub fn decrypt_fragment(key: &MasterKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(ArchiveError::DecryptionAuthFailed);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| ArchiveError::EncryptionFailed(e.to_string()))?;
    cipher
        .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ArchiveError::DecryptionAuthFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MasterKey {
        MasterKey::from_bytes([42u8; 32])
    }

    #[test]
    fn roundtrip() {
        let key = test_key();
        let sealed = encrypt_fragment(&key, b"cloud fragment bytes").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + b"cloud fragment bytes".len() + TAG_LEN);
        let plain = decrypt_fragment(&key, &sealed).unwrap();
        assert_eq!(plain, b"cloud fragment bytes");
    }

    #[test]
    fn empty_fragment_roundtrips() {
        let key = test_key();
        let sealed = encrypt_fragment(&key, b"").unwrap();
        assert_eq!(decrypt_fragment(&key, &sealed).unwrap(), b"");
    }

    #[test]
    fn nonces_are_fresh_per_call() {
        let key = test_key();
        let a = encrypt_fragment(&key, b"same input").unwrap();
        let b = encrypt_fragment(&key, b"same input").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = encrypt_fragment(&test_key(), b"secret").unwrap();
        let wrong = MasterKey::from_bytes([99u8; 32]);
        assert!(matches!(
            decrypt_fragment(&wrong, &sealed),
            Err(ArchiveError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let key = test_key();
        let mut sealed = encrypt_fragment(&key, b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            decrypt_fragment(&key, &sealed),
            Err(ArchiveError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn short_input_fails_closed() {
        assert!(matches!(
            decrypt_fragment(&test_key(), &[0u8; NONCE_LEN + TAG_LEN - 1]),
            Err(ArchiveError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn debug_redacts_key_material() {
        assert_eq!(format!("{:?}", test_key()), "MasterKey([REDACTED])");
    }
}
