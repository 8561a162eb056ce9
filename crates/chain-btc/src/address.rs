use bitcoin::address::{Address, NetworkUnchecked};
use bitcoin::CompressedPublicKey;

use crate::error::BtcError;
use crate::network::BtcNetwork;

/// Derive a P2WPKH (native SegWit bech32) address from a compressed public key.
///
/// Returns `bc1...` on mainnet and `tb1...` on testnet.
pub fn pubkey_to_p2wpkh_address(
    pubkey_bytes: &[u8],
    network: BtcNetwork,
) -> Result<String, BtcError> {
    let compressed_pk = CompressedPublicKey::from_slice(pubkey_bytes).map_err(|e| {
        BtcError::InvalidPublicKey(format!("failed to parse compressed public key: {e}"))
    })?;

    let address = Address::p2wpkh(&compressed_pk, network.to_bitcoin_network());

    Ok(address.to_string())
}

/// Parse an address and require that it belongs to `network`.
pub fn parse_address(address: &str, network: BtcNetwork) -> Result<Address, BtcError> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| BtcError::InvalidAddress(format!("failed to parse address {address}: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|_| BtcError::InvalidAddress(format!("{address} is not a {network} address")))
}

/// Whether `address` is a well-formed address for `network`.
///
/// P2PKH, P2SH, P2WPKH, P2WSH and P2TR are all accepted as destinations.
pub fn validate_address(address: &str, network: BtcNetwork) -> bool {
    parse_address(address, network).is_ok()
}
