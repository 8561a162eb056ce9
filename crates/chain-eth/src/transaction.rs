use alloy_rlp::{Encodable, RlpEncodable};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::address::{address_from_key, parse_address};
use crate::error::EthError;

/// Gas used by a plain value transfer with empty calldata.
pub const BASE_TRANSFER_GAS: u64 = 21_000;

/// Largest calldata memo accepted on a value transfer.
pub const MAX_DATA_BYTES: usize = 1024;

/// EIP-1559 fee caps, in wei per gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeCaps {
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
}

/// An unsigned EIP-1559 (type 2) transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    /// Recipient address as a 0x-prefixed hex string.
    pub to: String,
    /// Transfer value in wei.
    pub value: u128,
    /// Calldata. Carries the memo bytes on a plain transfer.
    pub data: Vec<u8>,
}

/// A signed EIP-1559 transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedEthTransaction {
    pub tx: EthTransaction,
    pub y_parity: bool,
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// `0x02 || rlp(signed fields)`.
    pub raw_tx: Vec<u8>,
    /// Keccak-256 of `raw_tx`, 0x-prefixed.
    pub tx_hash: String,
}

/// Intrinsic gas of a call to an externally owned account carrying `data`:
/// 21000 plus 16 per non-zero byte and 4 per zero byte.
pub fn intrinsic_gas(data: &[u8]) -> u64 {
    data.iter().fold(BASE_TRANSFER_GAS, |gas, byte| {
        gas + if *byte == 0 { 4 } else { 16 }
    })
}

/// Builds an unsigned native-asset transfer.
///
/// The gas limit is the intrinsic gas of the memo-bearing call, so a memo
/// costs exactly what the network charges for its calldata.
pub fn build_transfer(
    chain_id: u64,
    nonce: u64,
    to: &str,
    value_wei: u128,
    memo: Option<&[u8]>,
    fees: FeeCaps,
) -> Result<EthTransaction, EthError> {
    parse_address(to)?;

    if value_wei == 0 {
        return Err(EthError::InvalidTransaction(
            "amount must be greater than zero".into(),
        ));
    }
    if fees.max_priority_fee_per_gas > fees.max_fee_per_gas {
        return Err(EthError::InvalidTransaction(format!(
            "priority fee {} exceeds max fee {}",
            fees.max_priority_fee_per_gas, fees.max_fee_per_gas
        )));
    }

    let data = memo.unwrap_or_default().to_vec();
    if data.len() > MAX_DATA_BYTES {
        return Err(EthError::InvalidTransaction(format!(
            "memo is {} bytes, at most {MAX_DATA_BYTES} allowed",
            data.len()
        )));
    }

    Ok(EthTransaction {
        chain_id,
        nonce,
        max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        max_fee_per_gas: fees.max_fee_per_gas,
        gas_limit: intrinsic_gas(&data),
        to: to.to_string(),
        value: value_wei,
        data,
    })
}

impl EthTransaction {
    /// Upper bound on what the sender pays in fees: `gas_limit * max_fee_per_gas`.
    pub fn max_fee_wei(&self) -> u128 {
        (self.gas_limit as u128).saturating_mul(self.max_fee_per_gas)
    }

    /// `0x02 || rlp([chain_id, nonce, max_priority_fee_per_gas,
    /// max_fee_per_gas, gas_limit, to, value, data, access_list])`.
    pub fn encode_unsigned(&self) -> Result<Vec<u8>, EthError> {
        let fields = UnsignedTxFields {
            chain_id: self.chain_id,
            nonce: self.nonce,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            gas_limit: self.gas_limit,
            to: RlpBytes(parse_address(&self.to)?.to_vec()),
            value: self.value,
            data: RlpBytes(self.data.clone()),
            access_list: Vec::new(),
        };
        Ok(typed(&fields))
    }

    /// Keccak-256 of the unsigned encoding. This is what gets signed.
    pub fn signing_hash(&self) -> Result<[u8; 32], EthError> {
        Ok(Keccak256::digest(self.encode_unsigned()?).into())
    }

    /// Attaches a 65-byte `r || s || v` signature.
    ///
    /// `v` may be a raw recovery id (0/1) or the legacy 27/28 form. A high-S
    /// signature is normalized and its parity flipped.
    pub fn attach_signature(&self, signature: &[u8; 65]) -> Result<SignedEthTransaction, EthError> {
        let (sig, recovery_id) = parse_recoverable(signature)?;
        let y_parity = recovery_id.is_y_odd();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig.r().to_bytes());
        s.copy_from_slice(&sig.s().to_bytes());

        let fields = SignedTxFields {
            chain_id: self.chain_id,
            nonce: self.nonce,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            max_fee_per_gas: self.max_fee_per_gas,
            gas_limit: self.gas_limit,
            to: RlpBytes(parse_address(&self.to)?.to_vec()),
            value: self.value,
            data: RlpBytes(self.data.clone()),
            access_list: Vec::new(),
            signature_y_parity: y_parity,
            signature_r: RlpU256(r),
            signature_s: RlpU256(s),
        };
        let raw_tx = typed(&fields);
        let tx_hash = format!("0x{}", hex::encode(Keccak256::digest(&raw_tx)));

        Ok(SignedEthTransaction {
            tx: self.clone(),
            y_parity,
            r,
            s,
            raw_tx,
            tx_hash,
        })
    }
}

impl SignedEthTransaction {
    /// Recovers the EIP-55 address that produced the signature.
    pub fn recover_signer(&self) -> Result<String, EthError> {
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        let sig = Signature::from_slice(&compact)
            .map_err(|e| EthError::InvalidSignature(e.to_string()))?;
        let recovery_id = RecoveryId::new(self.y_parity, false);

        let key = VerifyingKey::recover_from_prehash(&self.tx.signing_hash()?, &sig, recovery_id)
            .map_err(|e| EthError::InvalidSignature(format!("recovery failed: {e}")))?;
        Ok(address_from_key(&key.into()))
    }
}

/// Splits `r || s || v` into a low-S signature and its recovery id.
fn parse_recoverable(signature: &[u8; 65]) -> Result<(Signature, RecoveryId), EthError> {
    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => {
            return Err(EthError::InvalidSignature(format!(
                "invalid recovery byte {other}"
            )))
        }
    };
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| EthError::InvalidSignature(e.to_string()))?;

    // Negating s mirrors R, so the parity flips with it.
    Ok(match sig.normalize_s() {
        Some(low) => (low, RecoveryId::new(v == 0, false)),
        None => (sig, RecoveryId::new(v == 1, false)),
    })
}

fn typed<T: Encodable>(fields: &T) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + fields.length());
    out.push(0x02); // EIP-1559 type byte.
    fields.encode(&mut out);
    out
}

// ---------------------------------------------------------------------------
// RLP-encodable structures
// ---------------------------------------------------------------------------

#[derive(RlpEncodable)]
struct UnsignedTxFields {
    chain_id: u64,
    nonce: u64,
    max_priority_fee_per_gas: u128,
    max_fee_per_gas: u128,
    gas_limit: u64,
    to: RlpBytes,
    value: u128,
    data: RlpBytes,
    access_list: Vec<AccessListItem>,
}

#[derive(RlpEncodable)]
struct SignedTxFields {
    chain_id: u64,
    nonce: u64,
    max_priority_fee_per_gas: u128,
    max_fee_per_gas: u128,
    gas_limit: u64,
    to: RlpBytes,
    value: u128,
    data: RlpBytes,
    access_list: Vec<AccessListItem>,
    signature_y_parity: bool,
    signature_r: RlpU256,
    signature_s: RlpU256,
}

/// An EIP-2930 access list entry. Always empty on plain transfers.
#[derive(RlpEncodable)]
struct AccessListItem {
    address: RlpBytes,
    storage_keys: Vec<RlpBytes>,
}

/// A byte string. `Vec<u8>` on its own would encode as a list.
struct RlpBytes(Vec<u8>);

impl Encodable for RlpBytes {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.0.as_slice().encode(out);
    }

    fn length(&self) -> usize {
        self.0.as_slice().length()
    }
}

/// A 256-bit integer, encoded big-endian with leading zeros stripped.
struct RlpU256([u8; 32]);

impl RlpU256 {
    fn trimmed(&self) -> &[u8] {
        let start = self.0.iter().position(|&b| b != 0).unwrap_or(32);
        &self.0[start..]
    }
}

impl Encodable for RlpU256 {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        self.trimmed().encode(out);
    }

    fn length(&self) -> usize {
        self.trimmed().length()
    }
}
