use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use prost::Message;
use sha2::{Digest, Sha256};

use crate::address::{decode_address, encode_address, raw_address_from_key};
use crate::error::TronError;
use crate::protocol::{
    Any, Contract, Transaction, TransactionRaw, TransferContract, TRANSFER_CONTRACT_TYPE,
    TRANSFER_CONTRACT_TYPE_URL,
};

/// Largest memo accepted in `raw_data.data`.
pub const MAX_MEMO_BYTES: usize = 1024;

/// How long after the reference block a transaction stays valid.
pub const EXPIRATION_MS: i64 = 60_000;

/// Extra bytes the network charges bandwidth for beyond the encoded
/// transaction (the result field added on-chain).
const RESULT_OVERHEAD_BYTES: u64 = 64;

/// The block a transaction anchors to (TaPoS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefBlock {
    pub number: u64,
    /// Block id. Bytes 8..16 become `ref_block_hash`.
    pub hash: [u8; 32],
    pub timestamp_ms: i64,
}

/// An unsigned TRX transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTronTx {
    pub raw: TransactionRaw,
}

/// A transfer with its owner's signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTronTx {
    pub raw: TransactionRaw,
    /// `r || s || v` with `v` in 27/28 form.
    pub signature: [u8; 65],
}

/// Build an unsigned native TRX transfer of `amount_sun`.
pub fn build_trx_transfer(
    from: &str,
    to: &str,
    amount_sun: u64,
    memo: Option<&[u8]>,
    ref_block: &RefBlock,
) -> Result<UnsignedTronTx, TronError> {
    let owner = decode_address(from)?;
    let recipient = decode_address(to)?;

    if owner == recipient {
        return Err(TronError::InvalidTransaction(
            "cannot transfer to the sending address".into(),
        ));
    }
    if amount_sun == 0 {
        return Err(TronError::InvalidTransaction(
            "amount must be greater than zero".into(),
        ));
    }
    let amount = i64::try_from(amount_sun)
        .map_err(|_| TronError::InvalidTransaction(format!("amount {amount_sun} overflows int64")))?;

    let data = memo.unwrap_or_default().to_vec();
    if data.len() > MAX_MEMO_BYTES {
        return Err(TronError::InvalidTransaction(format!(
            "memo is {} bytes, at most {MAX_MEMO_BYTES} allowed",
            data.len()
        )));
    }

    let transfer = TransferContract {
        owner_address: owner.to_vec(),
        to_address: recipient.to_vec(),
        amount,
    };

    let raw = TransactionRaw {
        ref_block_bytes: ref_block.number.to_be_bytes()[6..8].to_vec(),
        ref_block_hash: ref_block.hash[8..16].to_vec(),
        expiration: ref_block.timestamp_ms + EXPIRATION_MS,
        data,
        contract: vec![Contract {
            r#type: TRANSFER_CONTRACT_TYPE,
            parameter: Some(Any {
                type_url: TRANSFER_CONTRACT_TYPE_URL.into(),
                value: transfer.encode_to_vec(),
            }),
        }],
        timestamp: ref_block.timestamp_ms,
    };

    Ok(UnsignedTronTx { raw })
}

fn txid_of(raw: &TransactionRaw) -> [u8; 32] {
    Sha256::digest(raw.encode_to_vec()).into()
}

impl UnsignedTronTx {
    /// `sha256(raw_data)`: both the transaction id and the signed digest.
    pub fn txid(&self) -> [u8; 32] {
        txid_of(&self.raw)
    }

    /// The sending address, as recorded in the transfer contract.
    pub fn owner(&self) -> Result<String, TronError> {
        let contract = self
            .raw
            .contract
            .first()
            .and_then(|c| c.parameter.as_ref())
            .ok_or_else(|| TronError::InvalidTransaction("missing transfer contract".into()))?;
        let transfer = TransferContract::decode(contract.value.as_slice())?;
        let raw: [u8; 21] = transfer
            .owner_address
            .try_into()
            .map_err(|_| TronError::InvalidAddress("owner address is not 21 bytes".into()))?;
        Ok(encode_address(&raw))
    }

    /// Bandwidth the signed transaction will consume.
    pub fn bandwidth_bytes(&self) -> u64 {
        let signed_len = Transaction {
            raw_data: Some(self.raw.clone()),
            signature: vec![vec![0u8; 65]],
        }
        .encoded_len();
        signed_len as u64 + RESULT_OVERHEAD_BYTES
    }

    /// Attach a 65-byte `r || s || v` signature. `v` may be 0/1 or 27/28.
    pub fn attach_signature(&self, signature: &[u8; 65]) -> Result<SignedTronTx, TronError> {
        let v = match signature[64] {
            v @ (0 | 1) => v,
            v @ (27 | 28) => v - 27,
            other => {
                return Err(TronError::InvalidSignature(format!(
                    "invalid recovery byte {other}"
                )))
            }
        };
        let sig = Signature::from_slice(&signature[..64])
            .map_err(|e| TronError::InvalidSignature(e.to_string()))?;
        let (sig, odd) = match sig.normalize_s() {
            Some(low) => (low, v == 0),
            None => (sig, v == 1),
        };

        let mut normalized = [0u8; 65];
        normalized[..64].copy_from_slice(&sig.to_bytes());
        normalized[64] = 27 + odd as u8;

        Ok(SignedTronTx {
            raw: self.raw.clone(),
            signature: normalized,
        })
    }
}

impl SignedTronTx {
    pub fn txid_hex(&self) -> String {
        hex::encode(txid_of(&self.raw))
    }

    /// Protobuf `Transaction` bytes, ready for `broadcasthex`.
    pub fn encode(&self) -> Vec<u8> {
        Transaction {
            raw_data: Some(self.raw.clone()),
            signature: vec![self.signature.to_vec()],
        }
        .encode_to_vec()
    }

    /// Recovers the Base58Check address that produced the signature.
    pub fn recover_signer(&self) -> Result<String, TronError> {
        let sig = Signature::from_slice(&self.signature[..64])
            .map_err(|e| TronError::InvalidSignature(e.to_string()))?;
        let recovery_id = RecoveryId::new(self.signature[64] == 28, false);
        let key = VerifyingKey::recover_from_prehash(&txid_of(&self.raw), &sig, recovery_id)
            .map_err(|e| TronError::InvalidSignature(format!("recovery failed: {e}")))?;
        Ok(encode_address(&raw_address_from_key(&key.into())))
    }
}
