use thiserror::Error;
use tonlib_core::cell::TonCellError;

/// TON chain operation errors.
#[derive(Debug, Error)]
pub enum TonError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A build-time constraint was violated. The message names it.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("cell error: {0}")]
    Cell(String),
}

impl From<TonCellError> for TonError {
    fn from(e: TonCellError) -> Self {
        TonError::Cell(e.to_string())
    }
}
