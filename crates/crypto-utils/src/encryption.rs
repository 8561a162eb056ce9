use aes_gcm::aead::{Aead, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};

use crate::error::CryptoError;

/// AES-256-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// AES-256-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Seals `plaintext` with AES-256-GCM under `key`, binding it to `aad`.
///
/// A random 12-byte nonce is generated and prepended. Output layout:
/// `[nonce (12 bytes) | ciphertext | tag (16 bytes)]`.
///
/// The associated data is authenticated but not stored; opening requires the
/// exact same bytes.
pub fn seal(plaintext: &[u8], key: &[u8; 32], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);

    Ok(output)
}

/// Opens data produced by [`seal`].
///
/// Truncated input, a wrong key, mismatched associated data and a modified
/// ciphertext all produce the same [`CryptoError::OpenFailed`].
pub fn open(sealed: &[u8], key: &[u8; 32], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::OpenFailed);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key();
        let sealed = seal(b"hello, crypto wallet!", &key, b"secret-1").unwrap();
        let opened = open(&sealed, &key, b"secret-1").unwrap();
        assert_eq!(opened, b"hello, crypto wallet!");
    }

    #[test]
    fn sealed_layout_is_nonce_ciphertext_tag() {
        let sealed = seal(b"test", &test_key(), b"").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 4 + TAG_SIZE);
    }

    #[test]
    fn fresh_nonce_every_time() {
        let key = test_key();
        let a = seal(b"determinism check", &key, b"").unwrap();
        let b = seal(b"determinism check", &key, b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_and_tamper_fail_identically() {
        let key = test_key();
        let mut wrong_key = test_key();
        wrong_key[0] ^= 0xff;

        let sealed = seal(b"secret data", &key, b"ref").unwrap();
        let mut tampered = sealed.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xff;

        let e1 = open(&sealed, &wrong_key, b"ref").unwrap_err();
        let e2 = open(&tampered, &key, b"ref").unwrap_err();
        assert_eq!(e1.to_string(), e2.to_string());
    }

    #[test]
    fn associated_data_is_bound() {
        let key = test_key();
        let sealed = seal(b"seed", &key, b"secret-a").unwrap();
        assert!(matches!(
            open(&sealed, &key, b"secret-b"),
            Err(CryptoError::OpenFailed)
        ));
    }

    #[test]
    fn truncated_input_fails() {
        assert!(matches!(
            open(&[0u8; 5], &test_key(), b""),
            Err(CryptoError::OpenFailed)
        ));
        assert!(open(&[], &test_key(), b"").is_err());
    }
}
