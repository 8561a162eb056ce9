use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::script::{PushBytesBuf, ScriptBuf};
use bitcoin::secp256k1::{ecdsa, Message, PublicKey, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, CompressedPublicKey, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::address::parse_address;
use crate::error::BtcError;
use crate::network::BtcNetwork;
use crate::utxo::{select_utxos, Utxo};

/// Estimated virtual size of a P2WPKH input (in vbytes).
/// 41 bytes non-witness + ~107 witness bytes / 4.
const P2WPKH_INPUT_VBYTES: u64 = 68;

/// Estimated virtual size of a P2WPKH output (in vbytes).
const OUTPUT_VBYTES: u64 = 31;

/// Fixed transaction overhead: version + locktime + segwit marker/flag + counts.
const TX_OVERHEAD_VBYTES: u64 = 11;

/// Outputs below this value are non-standard and will not relay.
pub const DUST_LIMIT_SAT: u64 = 546;

/// Largest OP_RETURN payload relayed by default policy.
pub const MAX_MEMO_BYTES: usize = 80;

/// An unsigned Bitcoin transaction ready for signing.
#[derive(Debug, Clone)]
pub struct UnsignedBtcTx {
    /// The transaction with empty witnesses.
    pub tx: Transaction,
    /// Spent outputs, in input order. Needed for BIP-143 digests.
    pub prevouts: Vec<TxOut>,
    /// Outpoints (`txid:vout`) this transaction spends.
    pub spent: Vec<String>,
    pub fee_sat: u64,
    /// Estimated size once witnesses are attached.
    pub vsize: u64,
    pub network: BtcNetwork,
}

/// A fully witnessed transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedBtcTx {
    pub tx: Transaction,
    pub prevouts: Vec<TxOut>,
    pub network: BtcNetwork,
}

/// Estimate the virtual size of a P2WPKH transaction.
pub fn estimate_vsize(num_inputs: usize, num_outputs: usize) -> u64 {
    TX_OVERHEAD_VBYTES + (num_inputs as u64 * P2WPKH_INPUT_VBYTES) + (num_outputs as u64 * OUTPUT_VBYTES)
}

/// Estimate the fee for a P2WPKH transaction at `fee_rate_sat_vbyte`.
pub fn estimate_fee(num_inputs: usize, num_outputs: usize, fee_rate_sat_vbyte: u64) -> u64 {
    estimate_vsize(num_inputs, num_outputs).saturating_mul(fee_rate_sat_vbyte)
}

/// Size of an OP_RETURN output carrying `len` bytes.
pub fn memo_output_vbytes(len: usize) -> u64 {
    // value (8) + script length (1) + OP_RETURN (1) + push opcode(s) + data
    let push = if len <= 75 { 1 } else { 2 };
    (8 + 1 + 1 + push + len) as u64
}

/// Build an unsigned P2WPKH transaction from `from` to `recipient`.
///
/// Every UTXO must belong to `from`; change returns there too and is only
/// added when it clears the dust limit (otherwise it goes to the fee). A memo
/// becomes a zero-value OP_RETURN output.
pub fn build_p2wpkh_transaction(
    utxos: &[Utxo],
    from: &str,
    recipient: &str,
    amount_sat: u64,
    memo: Option<&[u8]>,
    fee_rate_sat_vbyte: u64,
    network: BtcNetwork,
) -> Result<UnsignedBtcTx, BtcError> {
    if amount_sat < DUST_LIMIT_SAT {
        return Err(BtcError::InvalidTransaction(format!(
            "amount {amount_sat} sat is below the dust limit of {DUST_LIMIT_SAT} sat"
        )));
    }
    if amount_sat > Amount::MAX_MONEY.to_sat() {
        return Err(BtcError::InvalidTransaction(format!(
            "amount {amount_sat} sat exceeds the 21M BTC supply"
        )));
    }
    if fee_rate_sat_vbyte == 0 {
        return Err(BtcError::InvalidTransaction(
            "fee rate must be at least 1 sat/vB".into(),
        ));
    }

    let memo_script = match memo {
        Some(data) if data.len() > MAX_MEMO_BYTES => {
            return Err(BtcError::InvalidTransaction(format!(
                "memo is {} bytes, OP_RETURN allows at most {MAX_MEMO_BYTES}",
                data.len()
            )));
        }
        Some(data) => {
            let push = PushBytesBuf::try_from(data.to_vec())
                .map_err(|e| BtcError::InvalidTransaction(format!("memo: {e}")))?;
            Some(ScriptBuf::new_op_return(push))
        }
        None => None,
    };
    let memo_vbytes = memo.map(|m| memo_output_vbytes(m.len())).unwrap_or(0);

    let recipient_addr = parse_address(recipient, network)?;
    let from_addr = parse_address(from, network)?;
    let from_script = from_addr.script_pubkey();
    if !from_script.is_p2wpkh() {
        return Err(BtcError::InvalidAddress(format!(
            "sending address {from} is not P2WPKH"
        )));
    }

    let selection = select_utxos(utxos, amount_sat, fee_rate_sat_vbyte, memo_vbytes)?;
    let num_inputs = selection.selected.len();

    let mut inputs = Vec::with_capacity(num_inputs);
    let mut prevouts = Vec::with_capacity(num_inputs);
    let mut spent = Vec::with_capacity(num_inputs);

    for utxo in &selection.selected {
        let txid: Txid = utxo
            .txid
            .parse()
            .map_err(|e| BtcError::InvalidTransaction(format!("invalid txid {}: {e}", utxo.txid)))?;

        inputs.push(TxIn {
            previous_output: OutPoint::new(txid, utxo.vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        });
        prevouts.push(TxOut {
            value: Amount::from_sat(utxo.amount_sat),
            script_pubkey: from_script.clone(),
        });
        spent.push(utxo.outpoint());
    }

    let vsize_with_change = estimate_vsize(num_inputs, 2) + memo_vbytes;
    let fee_with_change = vsize_with_change
        .checked_mul(fee_rate_sat_vbyte)
        .ok_or_else(|| BtcError::InvalidTransaction("fee overflows a u64".into()))?;
    let change_sat = amount_sat
        .checked_add(fee_with_change)
        .map(|spend| selection.total_sat.saturating_sub(spend))
        .ok_or_else(|| BtcError::InvalidTransaction("amount plus fee overflows a u64".into()))?;

    let mut outputs = vec![TxOut {
        value: Amount::from_sat(amount_sat),
        script_pubkey: recipient_addr.script_pubkey(),
    }];
    if let Some(script) = memo_script {
        outputs.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: script,
        });
    }

    let (fee_sat, vsize) = if change_sat > DUST_LIMIT_SAT {
        outputs.push(TxOut {
            value: Amount::from_sat(change_sat),
            script_pubkey: from_script,
        });
        (fee_with_change, vsize_with_change)
    } else {
        // No change: whatever is left over is paid as fee.
        (
            selection.total_sat.saturating_sub(amount_sat),
            estimate_vsize(num_inputs, 1) + memo_vbytes,
        )
    };

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: outputs,
    };

    Ok(UnsignedBtcTx {
        tx,
        prevouts,
        spent,
        fee_sat,
        vsize,
        network,
    })
}

/// BIP-143 signature digests, one per input, with `SIGHASH_ALL`.
pub fn sighashes(unsigned: &UnsignedBtcTx) -> Result<Vec<[u8; 32]>, BtcError> {
    let mut cache = SighashCache::new(&unsigned.tx);
    unsigned
        .prevouts
        .iter()
        .enumerate()
        .map(|(index, prevout)| {
            cache
                .p2wpkh_signature_hash(
                    index,
                    &prevout.script_pubkey,
                    prevout.value,
                    EcdsaSighashType::All,
                )
                .map(|hash| hash.to_byte_array())
                .map_err(|e| BtcError::SigningError(format!("sighash for input {index}: {e}")))
        })
        .collect()
}

/// Attach compact (`r || s`) signatures, one per input, and the signer's
/// compressed public key as P2WPKH witnesses.
///
/// High-S signatures are normalized. Each signature is checked against its
/// digest before it is attached.
pub fn attach_signatures(
    unsigned: &UnsignedBtcTx,
    signatures: &[[u8; 64]],
    pubkey: &[u8],
) -> Result<SignedBtcTx, BtcError> {
    if signatures.len() != unsigned.tx.input.len() {
        return Err(BtcError::SigningError(format!(
            "expected {} signatures, got {}",
            unsigned.tx.input.len(),
            signatures.len()
        )));
    }

    let public_key = PublicKey::from_slice(pubkey)
        .map_err(|e| BtcError::InvalidPublicKey(format!("witness public key: {e}")))?;
    let owner_script = ScriptBuf::new_p2wpkh(&CompressedPublicKey(public_key).wpubkey_hash());
    if unsigned.prevouts.iter().any(|p| p.script_pubkey != owner_script) {
        return Err(BtcError::InvalidSignature(
            "public key does not control the spent outputs".into(),
        ));
    }

    let secp = Secp256k1::verification_only();
    let digests = sighashes(unsigned)?;
    let mut signed_tx = unsigned.tx.clone();

    for (index, (compact, digest)) in signatures.iter().zip(digests).enumerate() {
        let mut signature = ecdsa::Signature::from_compact(compact)
            .map_err(|e| BtcError::InvalidSignature(format!("input {index}: {e}")))?;
        signature.normalize_s();

        let msg = Message::from_digest(digest);
        secp.verify_ecdsa(&msg, &signature, &public_key)
            .map_err(|_| BtcError::InvalidSignature(format!("input {index} does not verify")))?;

        // DER signature + sighash type byte, then the public key.
        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(EcdsaSighashType::All as u8);

        let mut witness = Witness::new();
        witness.push(&sig_bytes);
        witness.push(public_key.serialize());
        signed_tx.input[index].witness = witness;
    }

    Ok(SignedBtcTx {
        tx: signed_tx,
        prevouts: unsigned.prevouts.clone(),
        network: unsigned.network,
    })
}

impl SignedBtcTx {
    /// Consensus serialization, ready for broadcast.
    pub fn serialize(&self) -> Vec<u8> {
        bitcoin::consensus::serialize(&self.tx)
    }

    pub fn txid(&self) -> String {
        self.tx.compute_txid().to_string()
    }

    /// Whether every input spends an output of `address` and carries a valid
    /// witness signature from the key behind it.
    pub fn verify(&self, address: &str) -> Result<bool, BtcError> {
        let expected_script = parse_address(address, self.network)?.script_pubkey();
        if self.prevouts.len() != self.tx.input.len()
            || self.prevouts.iter().any(|p| p.script_pubkey != expected_script)
        {
            return Ok(false);
        }

        let secp = Secp256k1::verification_only();
        let mut cache = SighashCache::new(&self.tx);

        for (index, input) in self.tx.input.iter().enumerate() {
            let (Some(sig_bytes), Some(pk_bytes)) = (input.witness.nth(0), input.witness.nth(1))
            else {
                return Ok(false);
            };
            let Some((_sighash_type, der)) = sig_bytes.split_last() else {
                return Ok(false);
            };

            let public_key = PublicKey::from_slice(pk_bytes)
                .map_err(|e| BtcError::InvalidPublicKey(format!("input {index}: {e}")))?;
            let wpkh = CompressedPublicKey(public_key).wpubkey_hash();
            if ScriptBuf::new_p2wpkh(&wpkh) != expected_script {
                return Ok(false);
            }

            let signature = ecdsa::Signature::from_der(der)
                .map_err(|e| BtcError::InvalidSignature(format!("input {index}: {e}")))?;
            let digest = cache
                .p2wpkh_signature_hash(
                    index,
                    &self.prevouts[index].script_pubkey,
                    self.prevouts[index].value,
                    EcdsaSighashType::All,
                )
                .map_err(|e| BtcError::SigningError(format!("sighash for input {index}: {e}")))?;

            let msg = Message::from_digest(digest.to_byte_array());
            if secp.verify_ecdsa(&msg, &signature, &public_key).is_err() {
                return Ok(false);
            }
        }

        Ok(true)
    }
}
