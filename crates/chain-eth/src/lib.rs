//! Ethereum/EVM chain support for the wallet core.
//!
//! - EIP-55 address derivation from secp256k1 public keys and validation
//! - EIP-1559 transaction building, with an optional calldata memo
//! - signing digests, signature attachment and signer recovery
//! - the EVM network table

pub mod address;
pub mod chains;
pub mod error;
pub mod transaction;

pub use error::EthError;
pub use transaction::{EthTransaction, SignedEthTransaction};
