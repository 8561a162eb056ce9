use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use sha3::{Digest, Keccak256};

use crate::error::TronError;

/// Mainnet and Nile both prefix raw addresses with `0x41`.
pub const ADDRESS_PREFIX: u8 = 0x41;

/// Derive a Base58Check `T...` address from a SEC1 secp256k1 public key.
pub fn pubkey_to_address(pubkey: &[u8]) -> Result<String, TronError> {
    let key = PublicKey::from_sec1_bytes(pubkey)
        .map_err(|_| TronError::InvalidPublicKey("not a valid secp256k1 SEC1 key".into()))?;
    Ok(encode_address(&raw_address_from_key(&key)))
}

/// `0x41 || last 20 bytes of keccak256(uncompressed key without 0x04)`.
pub(crate) fn raw_address_from_key(key: &PublicKey) -> [u8; 21] {
    let uncompressed = key.to_encoded_point(false);
    let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);

    let mut raw = [0u8; 21];
    raw[0] = ADDRESS_PREFIX;
    raw[1..].copy_from_slice(&hash[12..]);
    raw
}

pub fn encode_address(raw: &[u8; 21]) -> String {
    bs58::encode(raw).with_check().into_string()
}

/// Decode a Base58Check address to its 21 raw bytes.
pub fn decode_address(address: &str) -> Result<[u8; 21], TronError> {
    let bytes = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| TronError::InvalidAddress(format!("{address}: {e}")))?;

    let raw: [u8; 21] = bytes.try_into().map_err(|v: Vec<u8>| {
        TronError::InvalidAddress(format!("expected 21 bytes, got {}", v.len()))
    })?;
    if raw[0] != ADDRESS_PREFIX {
        return Err(TronError::InvalidAddress(format!(
            "unexpected prefix 0x{:02x}",
            raw[0]
        )));
    }
    Ok(raw)
}

pub fn validate_address(address: &str) -> bool {
    decode_address(address).is_ok()
}
