//! TON wallet addresses.
//!
//! A wallet's address is the hash of its contract's initial state (code and
//! data cells) on workchain 0. User-facing addresses are the 48-character
//! URL-safe Base64 form; wallets are shown non-bounceable, as an uninitialized
//! wallet must be able to receive.

use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use tonlib_core::cell::{Cell, CellBuilder};
use tonlib_core::wallet::WalletVersion;
use tonlib_core::TonAddress;

use crate::error::TonError;
use crate::transaction::DEFAULT_SUBWALLET_ID;

pub(crate) fn public_key_bytes(public_key: &[u8]) -> Result<[u8; 32], TonError> {
    let bytes: [u8; 32] = public_key.try_into().map_err(|_| {
        TonError::InvalidPublicKey(format!("expected 32 bytes, got {}", public_key.len()))
    })?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| TonError::InvalidPublicKey(e.to_string()))?;
    Ok(bytes)
}

pub(crate) fn cell_hash(cell: &Cell) -> Result<[u8; 32], TonError> {
    cell.cell_hash()
        .as_slice()
        .try_into()
        .map_err(|_| TonError::Cell("cell hash is not 32 bytes".into()))
}

/// StateInit of a fresh v4r2 wallet owned by `public_key`: seqno 0, the
/// default subwallet and no plugins.
pub(crate) fn wallet_state_init(public_key: &[u8; 32]) -> Result<Cell, TonError> {
    let code = WalletVersion::V4R2.code()?;

    let mut data = CellBuilder::new();
    data.store_u32(32, 0)?
        .store_u32(32, DEFAULT_SUBWALLET_ID)?
        .store_slice(public_key)?
        .store_bit(false)?;
    let data = data.build()?;

    // split_depth, special, code, data, library
    let mut init = CellBuilder::new();
    init.store_bit(false)?
        .store_bit(false)?
        .store_bit(true)?
        .store_bit(true)?
        .store_bit(false)?
        .store_reference(code)?
        .store_reference(&Arc::new(data))?;
    Ok(init.build()?)
}

/// Address of the v4r2 wallet owned by an Ed25519 public key.
pub fn pubkey_to_address(public_key: &[u8], testnet: bool) -> Result<String, TonError> {
    let key = public_key_bytes(public_key)?;
    let hash = cell_hash(&wallet_state_init(&key)?)?;
    let address = parse_address(&format!("0:{}", hex::encode(hash)))?;
    Ok(address.to_base64_url_flags(true, testnet))
}

pub(crate) fn parse_address(address: &str) -> Result<TonAddress, TonError> {
    address
        .parse::<TonAddress>()
        .map_err(|e| TonError::InvalidAddress(format!("{address}: {e}")))
}

/// Network flag of a user-friendly address, `None` for the raw `wc:hex` form.
fn testnet_flag(address: &str) -> Option<bool> {
    match address.chars().next() {
        Some('E' | 'U') => Some(false),
        Some('k' | '0') if !address.contains(':') => Some(true),
        _ => None,
    }
}

/// Whether `address` parses and, when it carries a network flag, is meant
/// for the network `testnet` selects.
pub fn validate_address(address: &str, testnet: bool) -> bool {
    if parse_address(address).is_err() {
        return false;
    }
    testnet_flag(address).map_or(true, |flag| flag == testnet)
}

/// Whether a transfer to `address` should bounce if the recipient is not
/// initialized. Raw addresses bounce.
pub fn is_bounceable(address: &str) -> bool {
    !matches!(address.chars().next(), Some('U' | '0')) || address.contains(':')
}

/// Whether two addresses in any accepted form name the same account.
pub fn same_address(a: &str, b: &str) -> bool {
    match (parse_address(a), parse_address(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY: [u8; 32] = [
        0xd7, 0x5a, 0x98, 0x01, 0x82, 0xb1, 0x0a, 0xb7, 0xd5, 0x4b, 0xfe, 0xd3, 0xc9, 0x64, 0x07,
        0x3a, 0x0e, 0xe1, 0x72, 0xf3, 0xda, 0xa6, 0x23, 0x25, 0xaf, 0x02, 0x1a, 0x68, 0xf7, 0x07,
        0x51, 0x1a,
    ];

    #[test]
    fn wallet_addresses_are_non_bounceable_per_network() {
        let mainnet = pubkey_to_address(&PUBKEY, false).unwrap();
        let testnet = pubkey_to_address(&PUBKEY, true).unwrap();
        assert_eq!(mainnet.len(), 48);
        assert!(mainnet.starts_with("UQ"), "{mainnet}");
        assert!(testnet.starts_with("0Q"), "{testnet}");
        assert!(same_address(&mainnet, &testnet));
        assert!(!is_bounceable(&mainnet));
    }

    #[test]
    fn derivation_is_deterministic_and_key_specific() {
        let a = pubkey_to_address(&PUBKEY, false).unwrap();
        assert_eq!(a, pubkey_to_address(&PUBKEY, false).unwrap());

        let mut other = PUBKEY;
        other[31] ^= 0x01;
        if let Ok(b) = pubkey_to_address(&other, false) {
            assert_ne!(a, b);
        }
    }

    #[test]
    fn raw_form_names_the_same_account() {
        let friendly = pubkey_to_address(&PUBKEY, false).unwrap();
        let raw = parse_address(&friendly).unwrap().to_hex();
        assert!(raw.starts_with("0:"));
        assert!(same_address(&friendly, &raw));
        assert!(validate_address(&raw, false));
        assert!(validate_address(&raw, true));
        assert!(is_bounceable(&raw));
    }

    #[test]
    fn network_flag_is_checked() {
        let mainnet = pubkey_to_address(&PUBKEY, false).unwrap();
        let testnet = pubkey_to_address(&PUBKEY, true).unwrap();
        assert!(validate_address(&mainnet, false));
        assert!(!validate_address(&mainnet, true));
        assert!(validate_address(&testnet, true));
        assert!(!validate_address(&testnet, false));
    }

    #[test]
    fn malformed_input_rejected() {
        assert!(!validate_address("", false));
        assert!(!validate_address("UQ-not-an-address", false));
        assert!(!validate_address("0x9858EfFD232B4033E47d90003D41EC34EcaEda94", false));
        assert!(pubkey_to_address(&[1u8; 33], false).is_err());
        assert!(!same_address("garbage", "garbage"));
    }
}
