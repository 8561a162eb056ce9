use thiserror::Error;

use crate::account::AccountId;
use crate::keystore::SecretRef;
use crate::types::ChainId;

/// What the caller can assume about the world after an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No state changed anywhere. Safe to retry or abandon.
    NothingHappened,
    /// The effect may or may not have happened (a broadcast that timed out,
    /// a device that stopped answering mid-sign). Query before acting again.
    Unknown,
    /// The transaction is no good as built. Build a fresh one.
    RebuildRequired,
    /// A bug, corrupted state or broken environment.
    Fatal,
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("account {account} has no wallet on {chain}")]
    WalletNotFound { account: AccountId, chain: ChainId },

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// A build-time constraint was violated. The message names it.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("{chain} query failed: {reason}")]
    QueryFailed { chain: ChainId, reason: String },

    #[error("{chain} fee estimation unavailable: {reason}")]
    EstimationUnavailable { chain: ChainId, reason: String },

    #[error("{chain} rejected the transaction: {reason}")]
    BroadcastRejected { chain: ChainId, reason: String },

    #[error("{chain} broadcast timed out, the transaction may or may not be on chain")]
    BroadcastTimeout { chain: ChainId },

    #[error("account {0} is view-only and cannot sign")]
    NotSignable(AccountId),

    #[error("a password is required to sign with this account")]
    PasswordRequired,

    /// Wrong password and corrupted ciphertext share this message.
    #[error("unable to decrypt secret")]
    DecryptionFailed,

    #[error("secret not found: {0}")]
    SecretNotFound(SecretRef),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("device {0} is already in use by another session")]
    DeviceBusy(String),

    #[error("session for device {0} is busy with another command")]
    SessionBusy(String),

    #[error("rejected on the device")]
    UserRejected,

    #[error("device {0} disconnected")]
    DeviceDisconnected(String),

    #[error("device {0} did not answer in time")]
    DeviceTimeout(String),

    #[error("device key mismatch: expected {expected}, device has {actual}")]
    DeviceMismatch { expected: String, actual: String },

    #[error("blind signing is disabled on the device")]
    BlindSigningDisabled,

    #[error("the chain app is not open on the device")]
    DeviceAppUnavailable,

    #[error("device returned status 0x{0:04x}")]
    DeviceError(u16),

    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error(transparent)]
    Crypto(#[from] crypto_utils::CryptoError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl WalletError {
    pub fn outcome(&self) -> Outcome {
        use WalletError::*;
        match self {
            UnsupportedChain(_)
            | WalletNotFound { .. }
            | AccountNotFound(_)
            | InvalidAccount(_)
            | InvalidMnemonic(_)
            | QueryFailed { .. }
            | EstimationUnavailable { .. }
            | NotSignable(_)
            | PasswordRequired
            | DecryptionFailed
            | SecretNotFound(_)
            | DeviceNotFound(_)
            | DeviceBusy(_)
            | SessionBusy(_)
            | UserRejected
            | BlindSigningDisabled
            | DeviceAppUnavailable => Outcome::NothingHappened,

            BroadcastTimeout { .. } | DeviceDisconnected(_) | DeviceTimeout(_) => Outcome::Unknown,

            InvalidTransaction(_) | BroadcastRejected { .. } => Outcome::RebuildRequired,

            DeviceMismatch { .. }
            | DeviceError(_)
            | DerivationFailed(_)
            | SigningFailed(_)
            | Crypto(_)
            | Storage(_)
            | Config(_) => Outcome::Fatal,
        }
    }

    /// Transient failures that left nothing behind.
    pub fn is_retryable(&self) -> bool {
        self.outcome() == Outcome::NothingHappened
            && matches!(
                self,
                WalletError::QueryFailed { .. }
                    | WalletError::EstimationUnavailable { .. }
                    | WalletError::SessionBusy(_)
                    | WalletError::DeviceBusy(_)
            )
    }
}

impl From<chain_btc::BtcError> for WalletError {
    fn from(e: chain_btc::BtcError) -> Self {
        use chain_btc::BtcError;
        match e {
            BtcError::InvalidPublicKey(m) => WalletError::DerivationFailed(format!("bitcoin: {m}")),
            BtcError::SigningError(m) | BtcError::InvalidSignature(m) => {
                WalletError::SigningFailed(format!("bitcoin: {m}"))
            }
            other => WalletError::InvalidTransaction(format!("bitcoin: {other}")),
        }
    }
}

impl From<chain_eth::EthError> for WalletError {
    fn from(e: chain_eth::EthError) -> Self {
        use chain_eth::EthError;
        match e {
            EthError::InvalidPublicKey(m) => WalletError::DerivationFailed(format!("evm: {m}")),
            EthError::InvalidSignature(m) => WalletError::SigningFailed(format!("evm: {m}")),
            EthError::UnsupportedChain(id) => WalletError::UnsupportedChain(format!("evm chain id {id}")),
            other => WalletError::InvalidTransaction(format!("evm: {other}")),
        }
    }
}

impl From<chain_sol::SolError> for WalletError {
    fn from(e: chain_sol::SolError) -> Self {
        use chain_sol::SolError;
        match e {
            SolError::InvalidPublicKey(m) => WalletError::DerivationFailed(format!("solana: {m}")),
            SolError::InvalidSignature(m) => WalletError::SigningFailed(format!("solana: {m}")),
            other => WalletError::InvalidTransaction(format!("solana: {other}")),
        }
    }
}

impl From<chain_tron::TronError> for WalletError {
    fn from(e: chain_tron::TronError) -> Self {
        use chain_tron::TronError;
        match e {
            TronError::InvalidPublicKey(m) => WalletError::DerivationFailed(format!("tron: {m}")),
            TronError::InvalidSignature(m) => WalletError::SigningFailed(format!("tron: {m}")),
            other => WalletError::InvalidTransaction(format!("tron: {other}")),
        }
    }
}

impl From<chain_ton::TonError> for WalletError {
    fn from(e: chain_ton::TonError) -> Self {
        use chain_ton::TonError;
        match e {
            TonError::InvalidPublicKey(m) => WalletError::DerivationFailed(format!("ton: {m}")),
            TonError::InvalidSignature(m) => WalletError::SigningFailed(format!("ton: {m}")),
            other => WalletError::InvalidTransaction(format!("ton: {other}")),
        }
    }
}
