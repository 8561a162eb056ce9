//! Tron chain support for the wallet core.
//!
//! Base58Check addresses (`0x41` prefix over the Keccak-256 of the public
//! key), `TransferContract` transactions encoded as protobuf with `prost`,
//! transaction ids, signature attachment and signer recovery.

pub mod address;
pub mod error;
pub mod protocol;
pub mod transaction;

pub use error::TronError;
pub use transaction::{RefBlock, SignedTronTx, UnsignedTronTx};
