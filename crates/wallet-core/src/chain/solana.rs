use chain_sol::{address_to_bytes, build_sol_transfer};

use super::{amount_u64, check_balance, ed25519_signature, foreign_body, ChainLink, FeeMarket, TxContext};
use crate::error::WalletError;
use crate::types::{
    Amount, SignatureScheme, SignedBody, SignedTx, SigningPayload, UnsignedBody, UnsignedTx,
};

/// System-program SOL transfers with an optional memo instruction.
#[derive(Clone)]
pub struct SolanaAdapter {
    pub(crate) link: ChainLink,
}

impl SolanaAdapter {
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
        let lamports = amount_u64(chain, amount)?;
        let from_key = address_to_bytes(from)?;
        let to_key = address_to_bytes(to)?;
        if from_key == to_key {
            return Err(WalletError::InvalidTransaction(format!(
                "{chain}: cannot transfer to the sending address"
            )));
        }

        let per_signature = match self.link.fee_market().await? {
            FeeMarket::Solana {
                lamports_per_signature,
            } => lamports_per_signature,
            other => return Err(self.link.unexpected_fees(&other)),
        };
        let blockhash = match self.link.tx_context(from).await? {
            TxContext::Solana { recent_blockhash } => recent_blockhash,
            other => return Err(self.link.unexpected_context(&other)),
        };
        let balance = self.link.balance(from).await?;

        let tx = build_sol_transfer(&from_key, &to_key, lamports, memo, &blockhash)?;
        let fee = Amount::from(per_signature) * Amount::from(tx.num_required_signatures);
        check_balance(chain, balance, amount, fee)?;

        Ok(UnsignedTx {
            chain,
            from: from.to_string(),
            to: to.to_string(),
            amount,
            fee,
            body: UnsignedBody::Solana(tx),
        })
    }

    pub(crate) fn fee_at(&self, unsigned: &UnsignedTx, market: &FeeMarket) -> Result<Amount, WalletError> {
        let UnsignedBody::Solana(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        match market {
            FeeMarket::Solana {
                lamports_per_signature,
            } => Ok(Amount::from(*lamports_per_signature) * Amount::from(tx.num_required_signatures)),
            other => Err(self.link.unexpected_fees(other)),
        }
    }

    pub(crate) fn signing_payload(&self, unsigned: &UnsignedTx) -> Result<SigningPayload, WalletError> {
        let UnsignedBody::Solana(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        Ok(SigningPayload {
            scheme: SignatureScheme::Ed25519,
            messages: vec![tx.serialize_message()],
        })
    }

    pub(crate) fn finalize(&self, unsigned: &UnsignedTx, signatures: &[Vec<u8>]) -> Result<SignedTx, WalletError> {
        let UnsignedBody::Solana(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        let [signature] = signatures else {
            return Err(WalletError::SigningFailed("expected exactly one signature".into()));
        };
        let signed = tx.attach_signature(&ed25519_signature(signature)?)?;
        Ok(SignedTx {
            chain: unsigned.chain,
            from: unsigned.from.clone(),
            body: SignedBody::Solana(signed),
        })
    }

    pub(crate) fn verify(&self, signed: &SignedTx, address: &str) -> Result<bool, WalletError> {
        match &signed.body {
            SignedBody::Solana(tx) => Ok(tx.verify(address)?),
            _ => Err(foreign_body(self.link.chain)),
        }
    }
}
