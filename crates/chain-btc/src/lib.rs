//! Bitcoin chain support for the wallet core.
//!
//! P2WPKH address derivation and validation, UTXO coin selection, unsigned
//! transaction building with an optional OP_RETURN memo, BIP-143 sighash
//! digests, witness assembly from externally produced signatures, and
//! signature verification. Private keys never enter this crate.

pub mod address;
pub mod error;
pub mod network;
pub mod transaction;
pub mod utxo;

pub use error::BtcError;
pub use network::BtcNetwork;
pub use transaction::{SignedBtcTx, UnsignedBtcTx};
pub use utxo::Utxo;
