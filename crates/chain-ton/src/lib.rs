//! TON chain support for the wallet core.
//!
//! Wallet v4r2 addresses derived from the contract's initial state, native
//! transfers with an optional text comment, and signature attachment and
//! verification. Cells, their hashes and bag-of-cells serialization come
//! from `tonlib-core`; `ed25519-dalek` verifies signatures.

pub mod address;
pub mod error;
pub mod transaction;

pub use address::{is_bounceable, pubkey_to_address, same_address, validate_address};
pub use error::TonError;
pub use transaction::{
    build_ton_transfer, SignedTonTx, UnsignedTonTx, DEFAULT_SUBWALLET_ID, MAX_COMMENT_BYTES,
};
