use thiserror::Error;

/// Tron chain operation errors.
#[derive(Debug, Error)]
pub enum TronError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A build-time constraint was violated. The message names it.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_address() {
        let err = TronError::InvalidAddress("bad checksum".into());
        assert_eq!(err.to_string(), "invalid address: bad checksum");
    }

    #[test]
    fn display_invalid_transaction() {
        let err = TronError::InvalidTransaction("cannot transfer to the sending address".into());
        assert_eq!(
            err.to_string(),
            "invalid transaction: cannot transfer to the sending address"
        );
    }
}
