use chain_tron::transaction::build_trx_transfer;

use super::{
    amount_u64, check_balance, foreign_body, recoverable_signature, ChainLink, FeeMarket, TxContext,
};
use crate::error::WalletError;
use crate::types::{
    Amount, SignatureScheme, SignedBody, SignedTx, SigningPayload, UnsignedBody, UnsignedTx,
};

/// Native TRX transfers anchored to a reference block.
///
/// The fee is the bandwidth the signed transaction consumes, priced at the
/// data source's rate. Staked bandwidth is not taken into account.
#[derive(Clone)]
pub struct TronAdapter {
    pub(crate) link: ChainLink,
}

impl TronAdapter {
    pub(crate) fn new(link: ChainLink) -> Self {
        Self { link }
    }

    pub(crate) async fn build(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        memo: Option<&[u8]>,
    ) -> Result<UnsignedTx, WalletError> {
        let chain = self.link.chain;
        let amount_sun = amount_u64(chain, amount)?;

        let sun_per_bandwidth = match self.link.fee_market().await? {
            FeeMarket::Tron { sun_per_bandwidth } => sun_per_bandwidth,
            other => return Err(self.link.unexpected_fees(&other)),
        };
        let ref_block = match self.link.tx_context(from).await? {
            TxContext::Tron { ref_block } => ref_block,
            other => return Err(self.link.unexpected_context(&other)),
        };
        let balance = self.link.balance(from).await?;

        let tx = build_trx_transfer(from, to, amount_sun, memo, &ref_block)?;
        let fee = Amount::from(tx.bandwidth_bytes()) * Amount::from(sun_per_bandwidth);
        check_balance(chain, balance, amount, fee)?;

        Ok(UnsignedTx {
            chain,
            from: from.to_string(),
            to: to.to_string(),
            amount,
            fee,
            body: UnsignedBody::Tron(tx),
        })
    }

    pub(crate) fn fee_at(&self, unsigned: &UnsignedTx, market: &FeeMarket) -> Result<Amount, WalletError> {
        let UnsignedBody::Tron(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        match market {
            FeeMarket::Tron { sun_per_bandwidth } => {
                Ok(Amount::from(tx.bandwidth_bytes()) * Amount::from(*sun_per_bandwidth))
            }
            other => Err(self.link.unexpected_fees(other)),
        }
    }

    pub(crate) fn signing_payload(&self, unsigned: &UnsignedTx) -> Result<SigningPayload, WalletError> {
        let UnsignedBody::Tron(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        Ok(SigningPayload {
            scheme: SignatureScheme::Secp256k1Prehash,
            messages: vec![tx.txid().to_vec()],
        })
    }

    pub(crate) fn finalize(&self, unsigned: &UnsignedTx, signatures: &[Vec<u8>]) -> Result<SignedTx, WalletError> {
        let UnsignedBody::Tron(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        let [signature] = signatures else {
            return Err(WalletError::SigningFailed("expected exactly one signature".into()));
        };
        let signed = tx.attach_signature(&recoverable_signature(signature)?)?;
        Ok(SignedTx {
            chain: unsigned.chain,
            from: unsigned.from.clone(),
            body: SignedBody::Tron(signed),
        })
    }

    pub(crate) fn verify(&self, signed: &SignedTx, address: &str) -> Result<bool, WalletError> {
        match &signed.body {
            SignedBody::Tron(tx) => Ok(tx.recover_signer()? == address),
            _ => Err(foreign_body(self.link.chain)),
        }
    }
}
