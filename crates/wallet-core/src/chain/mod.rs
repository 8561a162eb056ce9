//! Chain adapters: one variant per network family, each exposing the same
//! capability set over its family's primitives crate.

pub mod bitcoin;
pub mod data_source;
pub mod evm;
pub mod registry;
pub mod sequencer;
pub mod solana;
pub mod ton;
pub mod tron;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use tracing::{info, warn};

use crate::account::Wallet;
use crate::error::WalletError;
use crate::hd_derivation;
use crate::types::{
    Amount, Asset, ChainFamily, ChainId, CurveType, SignedTx, SigningPayload, UnsignedTx,
};

pub use bitcoin::BitcoinAdapter;
pub use data_source::{ChainDataSource, DataSourceError, FeeMarket, TxContext};
pub use evm::EvmAdapter;
pub use registry::ChainRegistry;
pub use sequencer::Sequencer;
pub use solana::SolanaAdapter;
pub use ton::TonAdapter;
pub use tron::TronAdapter;

/// What an address is derived from.
#[derive(Clone, Copy)]
pub enum KeyMaterial<'a> {
    /// BIP-39 seed. The key at the chain's derivation path for `index` is used.
    Seed(&'a [u8]),
    /// A public key exported by a device or supplied by the caller.
    PublicKey(&'a [u8]),
}

/// A chain plus the data source serving it.
#[derive(Clone)]
pub(crate) struct ChainLink {
    pub chain: ChainId,
    pub source: Arc<dyn ChainDataSource>,
}

impl ChainLink {
    fn query_failed(&self, e: impl std::fmt::Display) -> WalletError {
        WalletError::QueryFailed {
            chain: self.chain,
            reason: e.to_string(),
        }
    }

    pub async fn balance(&self, address: &str) -> Result<Amount, WalletError> {
        self.source
            .balance(self.chain, address)
            .await
            .map_err(|e| self.query_failed(e))
    }

    pub async fn tx_context(&self, address: &str) -> Result<TxContext, WalletError> {
        self.source
            .tx_context(self.chain, address)
            .await
            .map_err(|e| self.query_failed(e))
    }

    pub async fn fee_market(&self) -> Result<FeeMarket, WalletError> {
        self.source
            .fee_market(self.chain)
            .await
            .map_err(|e| WalletError::EstimationUnavailable {
                chain: self.chain,
                reason: e.to_string(),
            })
    }

    pub fn unexpected_context(&self, got: &TxContext) -> WalletError {
        self.query_failed(format!("data source returned a foreign tx context: {got:?}"))
    }

    pub fn unexpected_fees(&self, got: &FeeMarket) -> WalletError {
        WalletError::EstimationUnavailable {
            chain: self.chain,
            reason: format!("data source returned a foreign fee market: {got:?}"),
        }
    }
}

#[derive(Clone)]
pub enum ChainAdapter {
    Bitcoin(BitcoinAdapter),
    Evm(EvmAdapter),
    Solana(SolanaAdapter),
    Tron(TronAdapter),
    Ton(TonAdapter),
}

impl ChainAdapter {
    pub(crate) fn new(chain: ChainId, source: Arc<dyn ChainDataSource>) -> Self {
        let link = ChainLink { chain, source };
        match chain.family() {
            ChainFamily::Bitcoin => ChainAdapter::Bitcoin(BitcoinAdapter::new(link)),
            ChainFamily::Evm => ChainAdapter::Evm(EvmAdapter::new(link)),
            ChainFamily::Solana => ChainAdapter::Solana(SolanaAdapter::new(link)),
            ChainFamily::Tron => ChainAdapter::Tron(TronAdapter::new(link)),
            ChainFamily::Ton => ChainAdapter::Ton(TonAdapter::new(link)),
        }
    }

    fn link(&self) -> &ChainLink {
        match self {
            ChainAdapter::Bitcoin(a) => &a.link,
            ChainAdapter::Evm(a) => &a.link,
            ChainAdapter::Solana(a) => &a.link,
            ChainAdapter::Tron(a) => &a.link,
            ChainAdapter::Ton(a) => &a.link,
        }
    }

    pub fn chain(&self) -> ChainId {
        self.link().chain
    }

    /// Derive the wallet at `index`. Pure and deterministic.
    pub fn derive_address(&self, key: KeyMaterial<'_>, index: u32) -> Result<Wallet, WalletError> {
        let chain = self.chain();
        let public_key = match key {
            KeyMaterial::Seed(seed) => hd_derivation::derive_public_key(seed, chain, index)?,
            KeyMaterial::PublicKey(pk) => normalize_public_key(chain, pk)?,
        };
        let address = self.address_from_public_key(&public_key)?;
        Ok(Wallet {
            chain,
            address,
            index,
            public_key: Some(public_key),
        })
    }

    pub fn address_from_public_key(&self, public_key: &[u8]) -> Result<String, WalletError> {
        match self {
            ChainAdapter::Bitcoin(a) => a.address_from_public_key(public_key),
            ChainAdapter::Evm(_) => Ok(chain_eth::address::pubkey_to_eth_address(public_key)?),
            ChainAdapter::Solana(_) => Ok(chain_sol::pubkey_to_address(public_key)?),
            ChainAdapter::Tron(_) => Ok(chain_tron::address::pubkey_to_address(public_key)?),
            ChainAdapter::Ton(a) => a.address_from_public_key(public_key),
        }
    }

    pub fn validate_address(&self, address: &str) -> bool {
        match self {
            ChainAdapter::Bitcoin(a) => a.validate_address(address),
            ChainAdapter::Evm(_) => chain_eth::address::validate_address(address),
            ChainAdapter::Solana(_) => chain_sol::validate_address(address),
            ChainAdapter::Tron(_) => chain_tron::address::validate_address(address),
            ChainAdapter::Ton(a) => a.validate_address(address),
        }
    }

    /// Native balance. Fails with `QueryFailed`, never reports zero for an
    /// unreachable backend.
    pub async fn get_balance(&self, address: &str, timeout: Duration) -> Result<Amount, WalletError> {
        let link = self.link();
        self.check_address(address)?;
        with_timeout(link.balance(address), timeout, || WalletError::QueryFailed {
            chain: link.chain,
            reason: format!("timed out after {timeout:?}"),
        })
        .await
    }

    pub async fn get_assets(&self, address: &str, timeout: Duration) -> Result<Vec<Asset>, WalletError> {
        let link = self.link();
        self.check_address(address)?;
        let fut = async {
            link.source
                .assets(link.chain, address)
                .await
                .map_err(|e| link.query_failed(e))
        };
        with_timeout(fut, timeout, || WalletError::QueryFailed {
            chain: link.chain,
            reason: format!("timed out after {timeout:?}"),
        })
        .await
    }

    /// Build an unsigned native transfer. Every constraint violation fails
    /// with `InvalidTransaction` naming it; nothing is clamped.
    pub async fn build_transaction(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        memo: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<UnsignedTx, WalletError> {
        let chain = self.chain();
        self.check_address(from)?;
        self.check_address(to)?;

        let build = async {
            match self {
                ChainAdapter::Bitcoin(a) => a.build(from, to, amount, memo).await,
                ChainAdapter::Evm(a) => a.build(from, to, amount, memo).await,
                ChainAdapter::Solana(a) => a.build(from, to, amount, memo).await,
                ChainAdapter::Tron(a) => a.build(from, to, amount, memo).await,
                ChainAdapter::Ton(a) => a.build(from, to, amount, memo).await,
            }
        };
        let unsigned = with_timeout(build, timeout, || WalletError::QueryFailed {
            chain,
            reason: format!("building timed out after {timeout:?}"),
        })
        .await?;

        info!(%chain, from, to, amount = %amount, fee = %unsigned.fee, "built transaction");
        Ok(unsigned)
    }

    /// Fee `unsigned` would pay at current market rates.
    pub async fn estimate_fee(&self, unsigned: &UnsignedTx, timeout: Duration) -> Result<Amount, WalletError> {
        let chain = self.chain();
        self.check_chain(unsigned.chain)?;
        let estimate = async {
            let market = self.link().fee_market().await?;
            match self {
                ChainAdapter::Bitcoin(a) => a.fee_at(unsigned, &market),
                ChainAdapter::Evm(a) => a.fee_at(unsigned, &market),
                ChainAdapter::Solana(a) => a.fee_at(unsigned, &market),
                ChainAdapter::Tron(a) => a.fee_at(unsigned, &market),
                ChainAdapter::Ton(a) => a.fee_at(unsigned, &market),
            }
        };
        with_timeout(estimate, timeout, || WalletError::EstimationUnavailable {
            chain,
            reason: format!("timed out after {timeout:?}"),
        })
        .await
    }

    pub fn signing_payload(&self, unsigned: &UnsignedTx) -> Result<SigningPayload, WalletError> {
        self.check_chain(unsigned.chain)?;
        match self {
            ChainAdapter::Bitcoin(a) => a.signing_payload(unsigned),
            ChainAdapter::Evm(a) => a.signing_payload(unsigned),
            ChainAdapter::Solana(a) => a.signing_payload(unsigned),
            ChainAdapter::Tron(a) => a.signing_payload(unsigned),
            ChainAdapter::Ton(a) => a.signing_payload(unsigned),
        }
    }

    /// Attach `signatures` (one per payload message) made by `public_key`.
    /// The result is checked to be authorized by `unsigned.from`.
    pub fn finalize(
        &self,
        unsigned: &UnsignedTx,
        signatures: &[Vec<u8>],
        public_key: &[u8],
    ) -> Result<SignedTx, WalletError> {
        self.check_chain(unsigned.chain)?;
        let expected = self.signing_payload(unsigned)?.messages.len();
        if signatures.len() != expected {
            return Err(WalletError::SigningFailed(format!(
                "expected {expected} signatures, got {}",
                signatures.len()
            )));
        }
        let signed = match self {
            ChainAdapter::Bitcoin(a) => a.finalize(unsigned, signatures, public_key)?,
            ChainAdapter::Evm(a) => a.finalize(unsigned, signatures)?,
            ChainAdapter::Solana(a) => a.finalize(unsigned, signatures)?,
            ChainAdapter::Tron(a) => a.finalize(unsigned, signatures)?,
            ChainAdapter::Ton(a) => a.finalize(unsigned, signatures, public_key)?,
        };
        if !self.verify_signed(&signed, &unsigned.from)? {
            return Err(WalletError::SigningFailed(format!(
                "signature is not from {}",
                unsigned.from
            )));
        }
        Ok(signed)
    }

    /// Whether `signed` carries valid signatures from `address`.
    pub fn verify_signed(&self, signed: &SignedTx, address: &str) -> Result<bool, WalletError> {
        self.check_chain(signed.chain)?;
        match self {
            ChainAdapter::Bitcoin(a) => a.verify(signed, address),
            ChainAdapter::Evm(a) => a.verify(signed, address),
            ChainAdapter::Solana(a) => a.verify(signed, address),
            ChainAdapter::Tron(a) => a.verify(signed, address),
            ChainAdapter::Ton(a) => a.verify(signed, address),
        }
    }

    /// Submit `signed` once. A rejection clears the sender's tracked nonce
    /// and output reservations; a timeout leaves them, since the
    /// transaction may have landed.
    pub async fn broadcast(&self, signed: &SignedTx, timeout: Duration) -> Result<String, WalletError> {
        let link = self.link();
        let chain = link.chain;
        self.check_chain(signed.chain)?;
        let raw = signed.raw_bytes();

        match tokio::time::timeout(timeout, link.source.broadcast(chain, &raw)).await {
            Ok(Ok(tx_id)) => {
                let local = signed.tx_id();
                if tx_id != local {
                    warn!(%chain, network = %tx_id, %local, "network reported a different tx id");
                }
                info!(%chain, from = %signed.from, %tx_id, "broadcast accepted");
                Ok(tx_id)
            }
            Ok(Err(DataSourceError::Rejected(reason))) => {
                warn!(%chain, from = %signed.from, %reason, "broadcast rejected");
                self.reset_sender(&signed.from).await;
                Err(WalletError::BroadcastRejected { chain, reason })
            }
            Ok(Err(DataSourceError::Unavailable(reason))) => {
                warn!(%chain, from = %signed.from, %reason, "broadcast outcome unknown");
                Err(WalletError::BroadcastTimeout { chain })
            }
            Err(_) => {
                warn!(%chain, from = %signed.from, ?timeout, "broadcast timed out");
                Err(WalletError::BroadcastTimeout { chain })
            }
        }
    }

    /// Give back the nonce or outputs `unsigned` allocated. For transactions
    /// that will never be broadcast.
    pub async fn release(&self, unsigned: &UnsignedTx) {
        match self {
            ChainAdapter::Bitcoin(a) => a.release(unsigned).await,
            ChainAdapter::Evm(a) => a.release(unsigned).await,
            ChainAdapter::Ton(a) => a.release(unsigned).await,
            ChainAdapter::Solana(_) | ChainAdapter::Tron(_) => {}
        }
    }

    async fn reset_sender(&self, address: &str) {
        match self {
            ChainAdapter::Bitcoin(a) => a.sequencer.reset(a.link.chain, address).await,
            ChainAdapter::Evm(a) => a.sequencer.reset(a.link.chain, address).await,
            ChainAdapter::Ton(a) => a.sequencer.reset(a.link.chain, address).await,
            ChainAdapter::Solana(_) | ChainAdapter::Tron(_) => {}
        }
    }

    fn check_address(&self, address: &str) -> Result<(), WalletError> {
        if self.validate_address(address) {
            Ok(())
        } else {
            Err(WalletError::InvalidTransaction(format!(
                "{address} is not a valid {} address",
                self.chain()
            )))
        }
    }

    fn check_chain(&self, chain: ChainId) -> Result<(), WalletError> {
        if chain == self.chain() {
            Ok(())
        } else {
            Err(WalletError::InvalidTransaction(format!(
                "transaction for {chain} handed to the {} adapter",
                self.chain()
            )))
        }
    }

    /// Family-specific operations outside the universal set.
    #[deprecated(note = "use the universal operations on ChainAdapter or ChainRegistry")]
    pub fn as_bitcoin(&self) -> Option<&BitcoinAdapter> {
        match self {
            ChainAdapter::Bitcoin(a) => Some(a),
            _ => None,
        }
    }

    #[deprecated(note = "use the universal operations on ChainAdapter or ChainRegistry")]
    pub fn as_evm(&self) -> Option<&EvmAdapter> {
        match self {
            ChainAdapter::Evm(a) => Some(a),
            _ => None,
        }
    }
}

async fn with_timeout<T>(
    fut: impl Future<Output = Result<T, WalletError>>,
    timeout: Duration,
    on_elapsed: impl FnOnce() -> WalletError,
) -> Result<T, WalletError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_elapsed()),
    }
}

/// Bring a device- or caller-supplied public key into the form wallets
/// store: compressed SEC1 for secp256k1, raw 32 bytes for Ed25519.
pub fn normalize_public_key(chain: ChainId, public_key: &[u8]) -> Result<Vec<u8>, WalletError> {
    match chain.curve() {
        CurveType::Secp256k1 => {
            let key = k256::PublicKey::from_sec1_bytes(public_key).map_err(|_| {
                WalletError::DerivationFailed(format!(
                    "{chain}: not a valid secp256k1 public key ({} bytes)",
                    public_key.len()
                ))
            })?;
            Ok(key.to_encoded_point(true).as_bytes().to_vec())
        }
        CurveType::Ed25519 => {
            let bytes: [u8; 32] = public_key.try_into().map_err(|_| {
                WalletError::DerivationFailed(format!(
                    "{chain}: ed25519 public key must be 32 bytes, got {}",
                    public_key.len()
                ))
            })?;
            ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|e| WalletError::DerivationFailed(format!("{chain}: {e}")))?;
            Ok(bytes.to_vec())
        }
    }
}

/// Split a 65-byte `r || s || v` signature.
pub(crate) fn recoverable_signature(signature: &[u8]) -> Result<[u8; 65], WalletError> {
    signature.try_into().map_err(|_| {
        WalletError::SigningFailed(format!(
            "expected a 65-byte recoverable signature, got {} bytes",
            signature.len()
        ))
    })
}

pub(crate) fn ed25519_signature(signature: &[u8]) -> Result<[u8; 64], WalletError> {
    signature.try_into().map_err(|_| {
        WalletError::SigningFailed(format!(
            "expected a 64-byte ed25519 signature, got {} bytes",
            signature.len()
        ))
    })
}

pub(crate) fn amount_u64(chain: ChainId, amount: Amount) -> Result<u64, WalletError> {
    u64::try_from(amount).map_err(|_| {
        WalletError::InvalidTransaction(format!("{chain}: amount {amount} does not fit in 64 bits"))
    })
}

pub(crate) fn foreign_body(chain: ChainId) -> WalletError {
    WalletError::InvalidTransaction(format!("transaction body does not belong to {chain}"))
}

pub(crate) fn check_balance(
    chain: ChainId,
    balance: Amount,
    amount: Amount,
    fee: Amount,
) -> Result<(), WalletError> {
    let need = amount.saturating_add(fee);
    if need > balance {
        return Err(WalletError::InvalidTransaction(format!(
            "{chain}: insufficient funds, balance {balance} but amount plus fee is {need}"
        )));
    }
    Ok(())
}
