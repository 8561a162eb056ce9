use crate::error::BtcError;
use crate::transaction::estimate_vsize;

/// A single unspent transaction output owned by the sending address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// Transaction ID as a hex string (display order).
    pub txid: String,
    /// Output index within the transaction.
    pub vout: u32,
    /// Value in satoshis.
    pub amount_sat: u64,
}

impl Utxo {
    pub fn new(txid: impl Into<String>, vout: u32, amount_sat: u64) -> Self {
        Self {
            txid: txid.into(),
            vout,
            amount_sat,
        }
    }

    /// `txid:vout`, the identity used when reserving outputs.
    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.txid, self.vout)
    }
}

/// Result of UTXO selection: the chosen UTXOs and their aggregate value.
#[derive(Debug, Clone)]
pub struct UtxoSelection {
    pub selected: Vec<Utxo>,
    pub total_sat: u64,
}

/// Select UTXOs to cover `target_sat` plus fees.
///
/// Largest-first. The fee is estimated for P2WPKH inputs with a recipient
/// and a change output, plus `extra_vbytes` for anything else the caller
/// attaches (an OP_RETURN memo, for instance).
pub fn select_utxos(
    utxos: &[Utxo],
    target_sat: u64,
    fee_rate_sat_vbyte: u64,
    extra_vbytes: u64,
) -> Result<UtxoSelection, BtcError> {
    let fee_for = |inputs: usize| -> Result<u64, BtcError> {
        (estimate_vsize(inputs, 2) + extra_vbytes)
            .checked_mul(fee_rate_sat_vbyte)
            .ok_or_else(|| {
                BtcError::InvalidTransaction(format!(
                    "fee rate {fee_rate_sat_vbyte} sat/vB overflows the fee"
                ))
            })
    };
    // Saturates so an absurd target reports as unaffordable instead of wrapping.
    let need_for = |inputs: usize| -> Result<u64, BtcError> {
        Ok(target_sat.saturating_add(fee_for(inputs)?))
    };

    let mut sorted: Vec<&Utxo> = utxos.iter().collect();
    sorted.sort_by(|a, b| b.amount_sat.cmp(&a.amount_sat));

    let mut selected: Vec<Utxo> = Vec::new();
    let mut total_sat: u64 = 0;

    for utxo in sorted {
        selected.push(utxo.clone());
        total_sat = total_sat.checked_add(utxo.amount_sat).ok_or_else(|| {
            BtcError::InvalidTransaction("utxo values overflow a u64".into())
        })?;

        if total_sat >= need_for(selected.len())? {
            return Ok(UtxoSelection { selected, total_sat });
        }
    }

    Err(BtcError::InsufficientFunds {
        have: total_sat,
        need: need_for(selected.len().max(1))?,
    })
}
