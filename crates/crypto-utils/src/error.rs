use thiserror::Error;

/// Cryptographic operation errors.
///
/// `OpenFailed` carries no detail. A wrong key and a tampered
/// ciphertext are indistinguishable to the caller.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("sealing failed: {0}")]
    SealFailed(String),

    #[error("unable to open sealed data")]
    OpenFailed,

    #[error("key derivation failed: {0}")]
    KdfFailed(String),

    #[error("invalid kdf parameters: {0}")]
    InvalidParams(String),
}
