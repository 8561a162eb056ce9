use std::sync::Arc;

use chain_eth::chains::{self, EvmChain};
use chain_eth::transaction::{build_transfer, FeeCaps};
use tracing::debug;

use super::{
    check_balance, foreign_body, recoverable_signature, ChainLink, FeeMarket, Sequencer, TxContext,
};
use crate::error::WalletError;
use crate::types::{
    Amount, ChainId, SignatureScheme, SignedBody, SignedTx, SigningPayload, UnsignedBody,
    UnsignedTx,
};

/// EIP-1559 value transfers on every supported EVM network.
///
/// Nonces handed out by builds are tracked per sender so that transactions
/// built back to back get consecutive nonces even before the first one is
/// seen by the node.
#[derive(Clone)]
pub struct EvmAdapter {
    pub(crate) link: ChainLink,
    pub(crate) sequencer: Arc<Sequencer>,
    network: &'static EvmChain,
}

fn network_for(chain: ChainId) -> &'static EvmChain {
    match chain {
        ChainId::Polygon => &chains::POLYGON,
        ChainId::Arbitrum => &chains::ARBITRUM,
        ChainId::Base => &chains::BASE,
        ChainId::Sepolia => &chains::SEPOLIA,
        _ => &chains::ETHEREUM,
    }
}

impl EvmAdapter {
    pub(crate) fn new(link: ChainLink) -> Self {
        let network = network_for(link.chain);
        Self {
            link,
            sequencer: Arc::new(Sequencer::new()),
            network,
        }
    }

    /// EIP-155 chain id.
    pub fn chain_id(&self) -> u64 {
        self.network.chain_id
    }

    /// The nonce the next build from `address` will use at minimum, if any
    /// build has been recorded.
    pub async fn pending_nonce(&self, address: &str) -> Option<u64> {
        let nonce = self.sequencer.lock(self.link.chain, address).await.next_nonce;
        self.sequencer.prune(self.link.chain, address).await;
        nonce
    }

    pub(crate) async fn build(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        memo: Option<&[u8]>,
    ) -> Result<UnsignedTx, WalletError> {
        let chain = self.link.chain;
        let fees = match self.link.fee_market().await? {
            FeeMarket::Evm {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => FeeCaps {
                max_priority_fee_per_gas,
                max_fee_per_gas,
            },
            other => return Err(self.link.unexpected_fees(&other)),
        };
        let balance = self.link.balance(from).await?;

        let mut state = self.sequencer.lock(chain, from).await;
        let chain_nonce = match self.link.tx_context(from).await? {
            TxContext::Evm { nonce } => nonce,
            other => return Err(self.link.unexpected_context(&other)),
        };
        let nonce = state.next_nonce.map_or(chain_nonce, |n| n.max(chain_nonce));

        let tx = build_transfer(self.network.chain_id, nonce, to, amount, memo, fees)?;
        let fee = tx.max_fee_wei();
        check_balance(chain, balance, amount, fee)?;

        let next = nonce.checked_add(1).ok_or_else(|| WalletError::QueryFailed {
            chain,
            reason: format!("account nonce {nonce} cannot be incremented"),
        })?;
        state.next_nonce = Some(next);
        debug!(%chain, from, nonce, "allocated nonce");

        Ok(UnsignedTx {
            chain,
            from: from.to_string(),
            to: to.to_string(),
            amount,
            fee,
            body: UnsignedBody::Evm(tx),
        })
    }

    pub(crate) fn fee_at(&self, unsigned: &UnsignedTx, market: &FeeMarket) -> Result<Amount, WalletError> {
        let UnsignedBody::Evm(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        match market {
            FeeMarket::Evm {
                max_fee_per_gas, ..
            } => Amount::from(tx.gas_limit)
                .checked_mul(*max_fee_per_gas)
                .ok_or_else(|| WalletError::EstimationUnavailable {
                    chain: self.link.chain,
                    reason: "fee cap overflows".into(),
                }),
            other => Err(self.link.unexpected_fees(other)),
        }
    }

    pub(crate) fn signing_payload(&self, unsigned: &UnsignedTx) -> Result<SigningPayload, WalletError> {
        let UnsignedBody::Evm(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        Ok(SigningPayload {
            scheme: SignatureScheme::Secp256k1Prehash,
            messages: vec![tx.signing_hash()?.to_vec()],
        })
    }

    pub(crate) fn finalize(&self, unsigned: &UnsignedTx, signatures: &[Vec<u8>]) -> Result<SignedTx, WalletError> {
        let UnsignedBody::Evm(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        let [signature] = signatures else {
            return Err(WalletError::SigningFailed("expected exactly one signature".into()));
        };
        let signed = tx.attach_signature(&recoverable_signature(signature)?)?;
        Ok(SignedTx {
            chain: unsigned.chain,
            from: unsigned.from.clone(),
            body: SignedBody::Evm(signed),
        })
    }

    pub(crate) fn verify(&self, signed: &SignedTx, address: &str) -> Result<bool, WalletError> {
        let SignedBody::Evm(tx) = &signed.body else {
            return Err(foreign_body(self.link.chain));
        };
        if tx.tx.chain_id != self.network.chain_id {
            return Ok(false);
        }
        Ok(tx.recover_signer()?.eq_ignore_ascii_case(address))
    }

    /// Hand the nonce back if no later build has taken the one after it.
    pub(crate) async fn release(&self, unsigned: &UnsignedTx) {
        let UnsignedBody::Evm(tx) = &unsigned.body else {
            return;
        };
        let mut state = self.sequencer.lock(self.link.chain, &unsigned.from).await;
        if state.next_nonce.is_some() && state.next_nonce == tx.nonce.checked_add(1) {
            state.next_nonce = Some(tx.nonce);
            debug!(chain = %self.link.chain, from = %unsigned.from, nonce = tx.nonce, "released nonce");
        }
    }
}
