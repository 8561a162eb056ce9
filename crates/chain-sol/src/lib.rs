//! Solana chain support for the wallet core.
//!
//! Address encoding, the compact transaction wire format, System Program
//! transfers with an optional Memo Program instruction, and signature
//! attachment/verification. The wire format is built by hand instead of
//! pulling in `solana-sdk`; `ed25519-dalek` verifies signatures and `bs58`
//! handles Base58.

pub mod address;
pub mod error;
pub mod transaction;

pub use address::{address_to_bytes, pubkey_to_address, validate_address};
pub use error::SolError;
pub use transaction::{
    build_sol_transfer, compile_transaction, encode_compact_u16, SignedSolTransaction,
    SolAccountMeta, SolInstruction, SolTransaction, MEMO_PROGRAM_ID, SYSTEM_PROGRAM_ID,
};
