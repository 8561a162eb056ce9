use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chain_ton::{build_ton_transfer, same_address, TonError};
use tracing::debug;

use super::{
    amount_u64, check_balance, ed25519_signature, foreign_body, ChainLink, FeeMarket, Sequencer,
    TxContext,
};
use crate::error::WalletError;
use crate::types::{
    Amount, SignatureScheme, SignedBody, SignedTx, SigningPayload, UnsignedBody, UnsignedTx,
};

/// How long a built transfer stays acceptable to the wallet contract.
const VALIDITY: Duration = Duration::from_secs(60);

/// Native TON transfers from v4r2 wallets with an optional text comment.
///
/// The wallet contract accepts one message per seqno, so seqnos handed out
/// by builds are tracked per sender the same way EVM nonces are.
#[derive(Clone)]
pub struct TonAdapter {
    pub(crate) link: ChainLink,
    pub(crate) sequencer: Arc<Sequencer>,
}

fn valid_until() -> u32 {
    let deadline = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_add(VALIDITY);
    u32::try_from(deadline.as_secs()).unwrap_or(u32::MAX)
}

impl TonAdapter {
    pub(crate) fn new(link: ChainLink) -> Self {
        Self {
            link,
            sequencer: Arc::new(Sequencer::new()),
        }
    }

    pub(crate) fn address_from_public_key(&self, public_key: &[u8]) -> Result<String, WalletError> {
        Ok(chain_ton::pubkey_to_address(public_key, self.link.chain.is_testnet())?)
    }

    pub(crate) fn validate_address(&self, address: &str) -> bool {
        chain_ton::validate_address(address, self.link.chain.is_testnet())
    }

    pub(crate) async fn build(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        memo: Option<&[u8]>,
    ) -> Result<UnsignedTx, WalletError> {
        let chain = self.link.chain;
        let nanoton = amount_u64(chain, amount)?;
        if same_address(from, to) {
            return Err(WalletError::InvalidTransaction(format!(
                "{chain}: cannot transfer to the sending address"
            )));
        }

        let fee = match self.link.fee_market().await? {
            FeeMarket::Ton {
                nanoton_per_transfer,
            } => Amount::from(nanoton_per_transfer),
            other => return Err(self.link.unexpected_fees(&other)),
        };
        let balance = self.link.balance(from).await?;

        let mut state = self.sequencer.lock(chain, from).await;
        let chain_seqno = match self.link.tx_context(from).await? {
            TxContext::Ton { seqno } => u64::from(seqno),
            other => return Err(self.link.unexpected_context(&other)),
        };
        let seqno = state.next_nonce.map_or(chain_seqno, |n| n.max(chain_seqno));
        let seqno = u32::try_from(seqno).map_err(|_| WalletError::QueryFailed {
            chain,
            reason: format!("wallet seqno {seqno} cannot be incremented"),
        })?;

        let tx = build_ton_transfer(
            from,
            to,
            nanoton,
            memo,
            seqno,
            valid_until(),
            chain.is_testnet(),
        )?;
        check_balance(chain, balance, amount, fee)?;

        state.next_nonce = Some(u64::from(seqno) + 1);
        debug!(%chain, from, seqno, "allocated seqno");

        Ok(UnsignedTx {
            chain,
            from: from.to_string(),
            to: to.to_string(),
            amount,
            fee,
            body: UnsignedBody::Ton(tx),
        })
    }

    pub(crate) fn fee_at(&self, unsigned: &UnsignedTx, market: &FeeMarket) -> Result<Amount, WalletError> {
        let UnsignedBody::Ton(_) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        match market {
            FeeMarket::Ton {
                nanoton_per_transfer,
            } => Ok(Amount::from(*nanoton_per_transfer)),
            other => Err(self.link.unexpected_fees(other)),
        }
    }

    pub(crate) fn signing_payload(&self, unsigned: &UnsignedTx) -> Result<SigningPayload, WalletError> {
        let UnsignedBody::Ton(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        Ok(SigningPayload {
            scheme: SignatureScheme::Ed25519,
            messages: vec![tx.signing_hash()?.to_vec()],
        })
    }

    pub(crate) fn finalize(
        &self,
        unsigned: &UnsignedTx,
        signatures: &[Vec<u8>],
        public_key: &[u8],
    ) -> Result<SignedTx, WalletError> {
        let UnsignedBody::Ton(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        let [signature] = signatures else {
            return Err(WalletError::SigningFailed("expected exactly one signature".into()));
        };
        let signed = tx.attach_signature(public_key, &ed25519_signature(signature)?)?;
        Ok(SignedTx {
            chain: unsigned.chain,
            from: unsigned.from.clone(),
            body: SignedBody::Ton(signed),
        })
    }

    pub(crate) fn verify(&self, signed: &SignedTx, address: &str) -> Result<bool, WalletError> {
        let SignedBody::Ton(tx) = &signed.body else {
            return Err(foreign_body(self.link.chain));
        };
        match tx.verify(address) {
            Ok(()) => Ok(true),
            Err(TonError::InvalidSignature(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Hand the seqno back if no later build has taken the one after it.
    pub(crate) async fn release(&self, unsigned: &UnsignedTx) {
        let UnsignedBody::Ton(tx) = &unsigned.body else {
            return;
        };
        let mut state = self.sequencer.lock(self.link.chain, &unsigned.from).await;
        if state.next_nonce == Some(u64::from(tx.seqno) + 1) {
            state.next_nonce = Some(u64::from(tx.seqno));
            debug!(chain = %self.link.chain, from = %unsigned.from, seqno = tx.seqno, "released seqno");
        }
    }
}
