use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use sha3::{Digest, Keccak256};

use crate::error::EthError;

/// Derives an EIP-55 checksummed address from a secp256k1 public key in
/// SEC1 form, compressed (33 bytes) or uncompressed (65 bytes).
///
/// The address is the last 20 bytes of the Keccak-256 hash of the 64-byte
/// uncompressed key without its `0x04` prefix.
pub fn pubkey_to_eth_address(pubkey: &[u8]) -> Result<String, EthError> {
    let pubkey = PublicKey::from_sec1_bytes(pubkey)
        .map_err(|_| EthError::InvalidPublicKey("not a valid secp256k1 SEC1 key".into()))?;
    Ok(address_from_key(&pubkey))
}

pub(crate) fn address_from_key(pubkey: &PublicKey) -> String {
    let uncompressed = pubkey.to_encoded_point(false);
    let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);
    checksum_hex(&hex::encode(&hash[12..]))
}

/// Parses a `0x`-prefixed address into its 20 raw bytes.
///
/// Mixed-case input must carry a correct EIP-55 checksum; all-lowercase and
/// all-uppercase input is accepted as-is.
pub fn parse_address(address: &str) -> Result<[u8; 20], EthError> {
    let hex_part = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| EthError::InvalidAddress("address must start with 0x".into()))?;

    if hex_part.len() != 40 {
        return Err(EthError::InvalidAddress(format!(
            "expected 40 hex characters, got {}",
            hex_part.len()
        )));
    }

    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(EthError::InvalidAddress(
            "address contains non-hex characters".into(),
        ));
    }

    let is_all_lower = hex_part.chars().all(|c| !c.is_ascii_uppercase());
    let is_all_upper = hex_part.chars().all(|c| !c.is_ascii_lowercase());
    if !(is_all_lower || is_all_upper) && checksum_hex(&hex_part.to_lowercase()) != address {
        return Err(EthError::InvalidAddress(format!(
            "EIP-55 checksum mismatch for {address}"
        )));
    }

    let mut bytes = [0u8; 20];
    hex::decode_to_slice(hex_part, &mut bytes)
        .map_err(|e| EthError::InvalidAddress(format!("invalid hex: {e}")))?;
    Ok(bytes)
}

/// Whether `address` is a well-formed EVM address.
pub fn validate_address(address: &str) -> bool {
    parse_address(address).is_ok()
}

/// Applies EIP-55 mixed-case checksum encoding to a `0x`-prefixed address.
pub fn checksum_address(address: &str) -> Result<String, EthError> {
    let bytes = parse_address(&address.to_lowercase())?;
    Ok(checksum_hex(&hex::encode(bytes)))
}

/// `lower_hex` must be 40 lowercase hex characters.
fn checksum_hex(lower_hex: &str) -> String {
    let hash = Keccak256::digest(lower_hex.as_bytes());

    let mut checksummed = String::with_capacity(42);
    checksummed.push_str("0x");

    for (i, c) in lower_hex.chars().enumerate() {
        // Nibble i of the hash decides the case of character i.
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }

    checksummed
}
