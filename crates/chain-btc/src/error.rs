use thiserror::Error;

/// Bitcoin chain operation errors.
#[derive(Debug, Error)]
pub enum BtcError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A build-time constraint was violated. The message names it.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("insufficient funds: have {have} sat, need {need} sat")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}
