//! Solana addresses are Base58-encoded 32-byte Ed25519 public keys, with no
//! hashing step.

use crate::error::SolError;

/// Convert an Ed25519 public key to a Solana address string.
pub fn pubkey_to_address(ed25519_pubkey: &[u8]) -> Result<String, SolError> {
    if ed25519_pubkey.len() != 32 {
        return Err(SolError::InvalidPublicKey(format!(
            "expected 32 bytes, got {}",
            ed25519_pubkey.len()
        )));
    }
    Ok(bs58::encode(ed25519_pubkey).into_string())
}

/// Decode a Solana address string to its 32-byte representation.
pub fn address_to_bytes(address: &str) -> Result<[u8; 32], SolError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| SolError::InvalidAddress(format!("base58 decode failed: {e}")))?;

    bytes.try_into().map_err(|v: Vec<u8>| {
        SolError::InvalidAddress(format!("expected 32 bytes, got {}", v.len()))
    })
}

/// Whether `address` is Base58 that decodes to exactly 32 bytes.
pub fn validate_address(address: &str) -> bool {
    address_to_bytes(address).is_ok()
}
