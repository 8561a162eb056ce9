//! Solana transaction wire format.
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::address::address_to_bytes;
use crate::error::SolError;

/// The System Program: 32 zero bytes, `11111111111111111111111111111111`.
pub const SYSTEM_PROGRAM_ID: [u8; 32] = [0u8; 32];

/// Memo Program v2, `MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr`.
pub const MEMO_PROGRAM_ID: [u8; 32] = [
    0x05, 0x4a, 0x53, 0x5a, 0x99, 0x29, 0x21, 0x06, 0x4d, 0x24, 0xe8, 0x71, 0x60, 0xda, 0x38,
    0x7c, 0x7c, 0x35, 0xb5, 0xdd, 0xbc, 0x92, 0xbb, 0x81, 0xe4, 0x1f, 0xa8, 0x40, 0x41, 0x05,
    0x44, 0x8d,
];

/// System Program `Transfer` instruction index (little-endian u32).
const SYSTEM_TRANSFER_IX_INDEX: u32 = 2;

/// Largest memo that still fits a single-signer transfer in one packet.
pub const MAX_MEMO_BYTES: usize = 566;

/// Maximum serialized transaction size (IPv6 MTU minus headers).
pub const PACKET_DATA_SIZE: usize = 1232;

/// Encode a `u16` in Solana's compact-u16 (7 bits per byte, LEB128-style).
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// A single account reference in an instruction.
#[derive(Debug, Clone)]
pub struct SolAccountMeta {
    pub pubkey: [u8; 32],
    pub is_signer: bool,
    pub is_writable: bool,
}

/// An instruction before it is compiled into a message.
#[derive(Debug, Clone)]
pub struct SolInstruction {
    pub program_id: [u8; 32],
    pub accounts: Vec<SolAccountMeta>,
    pub data: Vec<u8>,
}

/// An unsigned single-signer transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolTransaction {
    /// Account keys in canonical order: writable signers (fee payer first),
    /// read-only signers, writable non-signers, read-only non-signers.
    pub account_keys: Vec<[u8; 32]>,
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
    pub recent_blockhash: [u8; 32],
    pub compiled_instructions: Vec<CompiledInstruction>,
}

/// An instruction with account references replaced by indices into
/// `account_keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// A transaction carrying the fee payer's signature.
#[derive(Debug, Clone)]
pub struct SignedSolTransaction {
    pub message: Vec<u8>,
    pub signature: [u8; 64],
    pub fee_payer: [u8; 32],
}

/// Build a native SOL transfer, optionally followed by a memo signed by the
/// sender.
pub fn build_sol_transfer(
    from_pubkey: &[u8; 32],
    to_pubkey: &[u8; 32],
    lamports: u64,
    memo: Option<&[u8]>,
    recent_blockhash: &[u8; 32],
) -> Result<SolTransaction, SolError> {
    if lamports == 0 {
        return Err(SolError::InvalidTransaction("lamports must be > 0".into()));
    }

    let mut instructions = vec![system_transfer_instruction(from_pubkey, to_pubkey, lamports)];

    if let Some(memo) = memo {
        if memo.len() > MAX_MEMO_BYTES {
            return Err(SolError::InvalidTransaction(format!(
                "memo is {} bytes, at most {MAX_MEMO_BYTES} allowed",
                memo.len()
            )));
        }
        if std::str::from_utf8(memo).is_err() {
            return Err(SolError::InvalidTransaction("memo must be valid UTF-8".into()));
        }
        instructions.push(SolInstruction {
            program_id: MEMO_PROGRAM_ID,
            accounts: vec![SolAccountMeta {
                pubkey: *from_pubkey,
                is_signer: true,
                is_writable: true,
            }],
            data: memo.to_vec(),
        });
    }

    let tx = compile_transaction(&instructions, from_pubkey, recent_blockhash)?;

    // One compact-u16 count byte plus one signature.
    let wire_len = 1 + 64 + tx.serialize_message().len();
    if wire_len > PACKET_DATA_SIZE {
        return Err(SolError::InvalidTransaction(format!(
            "transaction is {wire_len} bytes, packet limit is {PACKET_DATA_SIZE}"
        )));
    }

    Ok(tx)
}

fn system_transfer_instruction(from: &[u8; 32], to: &[u8; 32], lamports: u64) -> SolInstruction {
    // u32 LE instruction index followed by u64 LE lamports.
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_IX_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    SolInstruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta {
                pubkey: *from,
                is_signer: true,
                is_writable: true,
            },
            SolAccountMeta {
                pubkey: *to,
                is_signer: false,
                is_writable: true,
            },
        ],
        data,
    }
}

/// Compile instructions into a message with a single fee payer.
pub fn compile_transaction(
    instructions: &[SolInstruction],
    fee_payer: &[u8; 32],
    recent_blockhash: &[u8; 32],
) -> Result<SolTransaction, SolError> {
    struct AccountEntry {
        pubkey: [u8; 32],
        is_signer: bool,
        is_writable: bool,
    }

    let mut entries: Vec<AccountEntry> = Vec::new();
    let mut upsert = |pubkey: [u8; 32], signer: bool, writable: bool| {
        if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
            entry.is_signer |= signer;
            entry.is_writable |= writable;
        } else {
            entries.push(AccountEntry {
                pubkey,
                is_signer: signer,
                is_writable: writable,
            });
        }
    };

    upsert(*fee_payer, true, true);
    for ix in instructions {
        for meta in &ix.accounts {
            upsert(meta.pubkey, meta.is_signer, meta.is_writable);
        }
        upsert(ix.program_id, false, false);
    }

    // Stable sort, so the fee payer stays first among writable signers.
    entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
        (true, true) => 0u8,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    });

    let num_required_signatures = entries.iter().filter(|e| e.is_signer).count() as u8;
    if num_required_signatures != 1 {
        return Err(SolError::InvalidTransaction(format!(
            "expected a single signer, found {num_required_signatures}"
        )));
    }
    let num_readonly_signed = entries
        .iter()
        .filter(|e| e.is_signer && !e.is_writable)
        .count() as u8;
    let num_readonly_unsigned = entries
        .iter()
        .filter(|e| !e.is_signer && !e.is_writable)
        .count() as u8;

    let account_keys: Vec<[u8; 32]> = entries.iter().map(|e| e.pubkey).collect();
    let index_of = |key: &[u8; 32]| -> Result<u8, SolError> {
        account_keys
            .iter()
            .position(|k| k == key)
            .map(|i| i as u8)
            .ok_or_else(|| SolError::InvalidTransaction("account not in account keys".into()))
    };

    let compiled = instructions
        .iter()
        .map(|ix| {
            Ok(CompiledInstruction {
                program_id_index: index_of(&ix.program_id)?,
                account_indices: ix
                    .accounts
                    .iter()
                    .map(|meta| index_of(&meta.pubkey))
                    .collect::<Result<_, _>>()?,
                data: ix.data.clone(),
            })
        })
        .collect::<Result<Vec<_>, SolError>>()?;

    Ok(SolTransaction {
        account_keys,
        num_required_signatures,
        num_readonly_signed,
        num_readonly_unsigned,
        recent_blockhash: *recent_blockhash,
        compiled_instructions: compiled,
    })
}

impl SolTransaction {
    pub fn fee_payer(&self) -> Option<&[u8; 32]> {
        self.account_keys.first()
    }

    /// The message bytes. These are what the fee payer signs.
    pub fn serialize_message(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);

        buf.push(self.num_required_signatures);
        buf.push(self.num_readonly_signed);
        buf.push(self.num_readonly_unsigned);

        buf.extend_from_slice(&encode_compact_u16(self.account_keys.len() as u16));
        for key in &self.account_keys {
            buf.extend_from_slice(key);
        }

        buf.extend_from_slice(&self.recent_blockhash);

        buf.extend_from_slice(&encode_compact_u16(self.compiled_instructions.len() as u16));
        for ix in &self.compiled_instructions {
            buf.push(ix.program_id_index);
            buf.extend_from_slice(&encode_compact_u16(ix.account_indices.len() as u16));
            buf.extend_from_slice(&ix.account_indices);
            buf.extend_from_slice(&encode_compact_u16(ix.data.len() as u16));
            buf.extend_from_slice(&ix.data);
        }

        buf
    }

    /// Attach the fee payer's Ed25519 signature over the message.
    pub fn attach_signature(&self, signature: &[u8; 64]) -> Result<SignedSolTransaction, SolError> {
        let fee_payer = *self
            .fee_payer()
            .ok_or_else(|| SolError::InvalidTransaction("transaction has no accounts".into()))?;
        let signed = SignedSolTransaction {
            message: self.serialize_message(),
            signature: *signature,
            fee_payer,
        };

        if !signed.verify_with(&fee_payer)? {
            return Err(SolError::InvalidSignature(
                "signature does not verify against the fee payer".into(),
            ));
        }
        Ok(signed)
    }
}

impl SignedSolTransaction {
    /// Wire format, ready for `sendTransaction`.
    pub fn wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(1 + 64 + self.message.len());
        wire.extend_from_slice(&encode_compact_u16(1));
        wire.extend_from_slice(&self.signature);
        wire.extend_from_slice(&self.message);
        wire
    }

    /// The first signature in Base58, which is the transaction id.
    pub fn signature_base58(&self) -> String {
        bs58::encode(self.signature).into_string()
    }

    /// Whether the signature verifies against `address` and `address` pays the fee.
    pub fn verify(&self, address: &str) -> Result<bool, SolError> {
        let key = address_to_bytes(address)?;
        Ok(key == self.fee_payer && self.verify_with(&key)?)
    }

    fn verify_with(&self, pubkey: &[u8; 32]) -> Result<bool, SolError> {
        let key = VerifyingKey::from_bytes(pubkey)
            .map_err(|e| SolError::InvalidPublicKey(e.to_string()))?;
        let signature = Signature::from_bytes(&self.signature);
        Ok(key.verify(&self.message, &signature).is_ok())
    }
}
