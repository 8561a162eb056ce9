use std::sync::Arc;

use chain_btc::transaction::{attach_signatures, build_p2wpkh_transaction, sighashes};
use chain_btc::{address, BtcNetwork};
use tracing::debug;

use super::{amount_u64, foreign_body, ChainLink, FeeMarket, Sequencer, TxContext};
use crate::error::WalletError;
use crate::types::{
    Amount, ChainId, SignatureScheme, SignedBody, SignedTx, SigningPayload, UnsignedBody,
    UnsignedTx,
};

/// Native SegWit (P2WPKH) transfers. Outputs spent by built transactions
/// stay reserved until the network stops reporting them or the build is
/// released.
#[derive(Clone)]
pub struct BitcoinAdapter {
    pub(crate) link: ChainLink,
    pub(crate) sequencer: Arc<Sequencer>,
    network: BtcNetwork,
}

impl BitcoinAdapter {
    pub(crate) fn new(link: ChainLink) -> Self {
        let network = match link.chain {
            ChainId::Bitcoin => BtcNetwork::Mainnet,
            _ => BtcNetwork::Testnet,
        };
        Self {
            link,
            sequencer: Arc::new(Sequencer::new()),
            network,
        }
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    pub(crate) fn address_from_public_key(&self, public_key: &[u8]) -> Result<String, WalletError> {
        Ok(address::pubkey_to_p2wpkh_address(public_key, self.network)?)
    }

    pub(crate) fn validate_address(&self, addr: &str) -> bool {
        address::validate_address(addr, self.network)
    }

    /// Outpoints currently reserved for `address`.
    pub async fn reserved_outputs(&self, address: &str) -> Vec<String> {
        let mut reserved: Vec<_> = {
            let state = self.sequencer.lock(self.link.chain, address).await;
            state.reserved.iter().cloned().collect()
        };
        self.sequencer.prune(self.link.chain, address).await;
        reserved.sort();
        reserved
    }

    pub(crate) async fn build(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        memo: Option<&[u8]>,
    ) -> Result<UnsignedTx, WalletError> {
        let chain = self.link.chain;
        let amount_sat = amount_u64(chain, amount)?;
        let fee_rate = match self.link.fee_market().await? {
            FeeMarket::Bitcoin { sat_per_vbyte } => sat_per_vbyte,
            other => return Err(self.link.unexpected_fees(&other)),
        };

        let mut state = self.sequencer.lock(chain, from).await;
        let utxos = match self.link.tx_context(from).await? {
            TxContext::Bitcoin { utxos } => utxos,
            other => return Err(self.link.unexpected_context(&other)),
        };

        // Reservations the network no longer reports have been spent for good.
        state
            .reserved
            .retain(|outpoint| utxos.iter().any(|u| &u.outpoint() == outpoint));
        let spendable: Vec<_> = utxos
            .into_iter()
            .filter(|u| !state.reserved.contains(&u.outpoint()))
            .collect();

        let tx = build_p2wpkh_transaction(
            &spendable,
            from,
            to,
            amount_sat,
            memo,
            fee_rate,
            self.network,
        )?;
        state.reserved.extend(tx.spent.iter().cloned());
        debug!(%chain, from, spent = ?tx.spent, "reserved outputs");

        Ok(UnsignedTx {
            chain,
            from: from.to_string(),
            to: to.to_string(),
            amount,
            fee: Amount::from(tx.fee_sat),
            body: UnsignedBody::Bitcoin(tx),
        })
    }

    pub(crate) fn fee_at(&self, unsigned: &UnsignedTx, market: &FeeMarket) -> Result<Amount, WalletError> {
        let UnsignedBody::Bitcoin(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        match market {
            FeeMarket::Bitcoin { sat_per_vbyte } => {
                Ok(Amount::from(tx.vsize) * Amount::from(*sat_per_vbyte))
            }
            other => Err(self.link.unexpected_fees(other)),
        }
    }

    pub(crate) fn signing_payload(&self, unsigned: &UnsignedTx) -> Result<SigningPayload, WalletError> {
        let UnsignedBody::Bitcoin(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        Ok(SigningPayload {
            scheme: SignatureScheme::Secp256k1Prehash,
            messages: sighashes(tx)?.into_iter().map(|d| d.to_vec()).collect(),
        })
    }

    pub(crate) fn finalize(
        &self,
        unsigned: &UnsignedTx,
        signatures: &[Vec<u8>],
        public_key: &[u8],
    ) -> Result<SignedTx, WalletError> {
        let UnsignedBody::Bitcoin(tx) = &unsigned.body else {
            return Err(foreign_body(self.link.chain));
        };
        let compact = signatures
            .iter()
            .map(|sig| {
                sig.get(..64)
                    .and_then(|rs| <[u8; 64]>::try_from(rs).ok())
                    .ok_or_else(|| {
                        WalletError::SigningFailed(format!(
                            "signature of {} bytes is too short",
                            sig.len()
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let signed = attach_signatures(tx, &compact, public_key)?;
        Ok(SignedTx {
            chain: unsigned.chain,
            from: unsigned.from.clone(),
            body: SignedBody::Bitcoin(signed),
        })
    }

    pub(crate) fn verify(&self, signed: &SignedTx, address: &str) -> Result<bool, WalletError> {
        match &signed.body {
            SignedBody::Bitcoin(tx) => Ok(tx.verify(address)?),
            _ => Err(foreign_body(self.link.chain)),
        }
    }

    pub(crate) async fn release(&self, unsigned: &UnsignedTx) {
        let UnsignedBody::Bitcoin(tx) = &unsigned.body else {
            return;
        };
        {
            let mut state = self.sequencer.lock(self.link.chain, &unsigned.from).await;
            for outpoint in &tx.spent {
                state.reserved.remove(outpoint);
            }
        }
        self.sequencer.prune(self.link.chain, &unsigned.from).await;
        debug!(chain = %self.link.chain, from = %unsigned.from, "released outputs");
    }
}
