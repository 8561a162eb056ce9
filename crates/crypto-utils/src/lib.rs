//! # crypto-utils
//!
//! Password-based key derivation, authenticated sealing, secure random and
//! zeroize-on-drop buffers used by the wallet key store.

pub mod encryption;
pub mod error;
pub mod kdf;
pub mod random;
pub mod secret;

pub use error::CryptoError;
pub use kdf::KdfParams;
pub use secret::SecretBytes;
