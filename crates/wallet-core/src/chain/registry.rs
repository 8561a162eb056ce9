use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::account::Wallet;
use crate::config::TimeoutConfig;
use crate::error::WalletError;
use crate::types::{Amount, Asset, ChainId, SignedTx, UnsignedTx};

use super::{ChainAdapter, ChainDataSource, KeyMaterial};

/// The enabled chains and their adapters.
///
/// A chain is enabled exactly when a data source was supplied for it.
/// Universal operations take an optional timeout and fall back to the
/// configured defaults.
pub struct ChainRegistry {
    adapters: BTreeMap<ChainId, ChainAdapter>,
    timeouts: TimeoutConfig,
}

impl ChainRegistry {
    pub fn new<I>(sources: I, timeouts: TimeoutConfig) -> Self
    where
        I: IntoIterator<Item = (ChainId, Arc<dyn ChainDataSource>)>,
    {
        let adapters = sources
            .into_iter()
            .map(|(chain, source)| (chain, ChainAdapter::new(chain, source)))
            .collect();
        Self { adapters, timeouts }
    }

    /// Look up an adapter by its string id.
    pub fn resolve(&self, chain_id: &str) -> Result<&ChainAdapter, WalletError> {
        self.adapter(chain_id.parse()?)
    }

    pub fn adapter(&self, chain: ChainId) -> Result<&ChainAdapter, WalletError> {
        self.adapters
            .get(&chain)
            .ok_or_else(|| WalletError::UnsupportedChain(chain.to_string()))
    }

    pub fn is_enabled(&self, chain: ChainId) -> bool {
        self.adapters.contains_key(&chain)
    }

    pub fn enabled_chains(&self) -> Vec<ChainId> {
        self.adapters.keys().copied().collect()
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    pub fn derive_address(
        &self,
        chain: ChainId,
        key: KeyMaterial<'_>,
        index: u32,
    ) -> Result<Wallet, WalletError> {
        self.adapter(chain)?.derive_address(key, index)
    }

    pub fn validate_address(&self, chain: ChainId, address: &str) -> Result<bool, WalletError> {
        Ok(self.adapter(chain)?.validate_address(address))
    }

    pub async fn get_balance(
        &self,
        chain: ChainId,
        address: &str,
        timeout: Option<Duration>,
    ) -> Result<Amount, WalletError> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.query());
        self.adapter(chain)?.get_balance(address, timeout).await
    }

    pub async fn get_assets(
        &self,
        chain: ChainId,
        address: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<Asset>, WalletError> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.query());
        self.adapter(chain)?.get_assets(address, timeout).await
    }

    pub async fn build_transaction(
        &self,
        chain: ChainId,
        from: &str,
        to: &str,
        amount: Amount,
        memo: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<UnsignedTx, WalletError> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.query());
        self.adapter(chain)?
            .build_transaction(from, to, amount, memo, timeout)
            .await
    }

    pub async fn estimate_fee(
        &self,
        unsigned: &UnsignedTx,
        timeout: Option<Duration>,
    ) -> Result<Amount, WalletError> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.query());
        self.adapter(unsigned.chain)?
            .estimate_fee(unsigned, timeout)
            .await
    }

    pub async fn broadcast(
        &self,
        signed: &SignedTx,
        timeout: Option<Duration>,
    ) -> Result<String, WalletError> {
        let timeout = timeout.unwrap_or_else(|| self.timeouts.broadcast());
        self.adapter(signed.chain)?.broadcast(signed, timeout).await
    }

    pub fn verify_signed(&self, signed: &SignedTx, address: &str) -> Result<bool, WalletError> {
        self.adapter(signed.chain)?.verify_signed(signed, address)
    }

    pub async fn release(&self, unsigned: &UnsignedTx) -> Result<(), WalletError> {
        self.adapter(unsigned.chain)?.release(unsigned).await;
        Ok(())
    }
}
