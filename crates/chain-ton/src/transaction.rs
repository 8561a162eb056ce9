//! TON wallet v4r2 transfers.
//!
//! ```text
//! External message:
//!   ext_in_msg_info$10  src:addr_none  dest:wallet  import_fee:0
//!   init:   Maybe ^StateInit   (only while seqno == 0)
//!   body:   ^SignedBody
//!
//! SignedBody:
//!   signature   512 bits, Ed25519 over the hash of the unsigned body
//!   subwallet   u32
//!   valid_until u32
//!   seqno       u32
//!   op          u8 (0 = simple send)
//!   mode        u8
//!   ^InternalMessage
//!
//! InternalMessage:
//!   int_msg_info$0 ihr_disabled bounce bounced:0 src:addr_none dest value
//!   ihr_fee:0 fwd_fee:0 created_lt:0 created_at:0 init:nothing
//!   body: Either nothing or ^(u32 0 ++ comment)
//! ```

use std::sync::Arc;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tonlib_core::cell::{BagOfCells, Cell, CellBuilder};

use crate::address::{
    cell_hash, is_bounceable, parse_address, pubkey_to_address, public_key_bytes, same_address,
    validate_address, wallet_state_init,
};
use crate::error::TonError;

/// Subwallet id of the first wallet on workchain 0.
pub const DEFAULT_SUBWALLET_ID: u32 = 698_983_191;

/// Longest text comment that fits the comment cell next to its 32-bit tag.
pub const MAX_COMMENT_BYTES: usize = 123;

/// Pay transfer fees separately and ignore action-phase errors.
const SEND_MODE: u8 = 3;

/// An unsigned transfer from a v4r2 wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTonTx {
    pub from: String,
    pub to: String,
    pub amount_nanoton: u64,
    pub comment: Option<Vec<u8>>,
    pub seqno: u32,
    /// Unix time after which the wallet refuses the message.
    pub valid_until: u32,
    pub subwallet_id: u32,
    pub bounce: bool,
    pub testnet: bool,
}

/// A transfer carrying the wallet owner's signature, ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTonTx {
    pub tx: UnsignedTonTx,
    pub public_key: [u8; 32],
    pub signature: [u8; 64],
    /// Bag of cells of the external message.
    pub boc: Vec<u8>,
    /// Hash of the external message cell.
    pub message_hash: [u8; 32],
}

/// Build a native TON transfer with an optional UTF-8 comment.
pub fn build_ton_transfer(
    from: &str,
    to: &str,
    amount_nanoton: u64,
    comment: Option<&[u8]>,
    seqno: u32,
    valid_until: u32,
    testnet: bool,
) -> Result<UnsignedTonTx, TonError> {
    if amount_nanoton == 0 {
        return Err(TonError::InvalidTransaction("amount must be > 0".into()));
    }
    if !validate_address(from, testnet) {
        return Err(TonError::InvalidAddress(format!("sender {from}")));
    }
    if !validate_address(to, testnet) {
        return Err(TonError::InvalidAddress(format!("recipient {to}")));
    }
    if let Some(comment) = comment {
        if comment.len() > MAX_COMMENT_BYTES {
            return Err(TonError::InvalidTransaction(format!(
                "comment is {} bytes, at most {MAX_COMMENT_BYTES} allowed",
                comment.len()
            )));
        }
        if std::str::from_utf8(comment).is_err() {
            return Err(TonError::InvalidTransaction("comment must be valid UTF-8".into()));
        }
    }

    let tx = UnsignedTonTx {
        from: from.to_string(),
        to: to.to_string(),
        amount_nanoton,
        comment: comment.map(<[u8]>::to_vec),
        seqno,
        valid_until,
        subwallet_id: DEFAULT_SUBWALLET_ID,
        bounce: is_bounceable(to),
        testnet,
    };
    // Surface cell errors at build time rather than at signing.
    tx.signing_hash()?;
    Ok(tx)
}

/// `Grams`: a 4-bit byte length followed by the big-endian value.
fn store_coins(builder: &mut CellBuilder, amount: u64) -> Result<(), TonError> {
    let bytes = amount.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let value = &bytes[skip..];
    builder.store_u8(4, value.len() as u8)?;
    if !value.is_empty() {
        builder.store_slice(value)?;
    }
    Ok(())
}

impl UnsignedTonTx {
    fn internal_message(&self) -> Result<Cell, TonError> {
        let dest = parse_address(&self.to)?;

        let mut msg = CellBuilder::new();
        msg.store_bit(false)? // int_msg_info$0
            .store_bit(true)? // ihr_disabled
            .store_bit(self.bounce)?
            .store_bit(false)? // bounced
            .store_u8(2, 0)? // src: addr_none
            .store_address(&dest)?;
        store_coins(&mut msg, self.amount_nanoton)?;
        msg.store_bit(false)? // no extra currencies
            .store_u8(4, 0)? // ihr_fee
            .store_u8(4, 0)? // fwd_fee
            .store_u64(64, 0)? // created_lt
            .store_u32(32, 0)? // created_at
            .store_bit(false)?; // no init

        match &self.comment {
            Some(comment) => {
                let mut text = CellBuilder::new();
                text.store_u32(32, 0)?.store_slice(comment)?;
                msg.store_bit(true)?
                    .store_reference(&Arc::new(text.build()?))?;
            }
            None => {
                msg.store_bit(false)?;
            }
        }
        Ok(msg.build()?)
    }

    fn write_body(&self, builder: &mut CellBuilder) -> Result<(), TonError> {
        let message = self.internal_message()?;
        builder
            .store_u32(32, self.subwallet_id)?
            .store_u32(32, self.valid_until)?
            .store_u32(32, self.seqno)?
            .store_u8(8, 0)?
            .store_u8(8, SEND_MODE)?
            .store_reference(&Arc::new(message))?;
        Ok(())
    }

    /// Hash of the unsigned body cell; this is what the owner signs.
    pub fn signing_hash(&self) -> Result<[u8; 32], TonError> {
        let mut body = CellBuilder::new();
        self.write_body(&mut body)?;
        cell_hash(&body.build()?)
    }

    /// Attach the owner's signature and serialize the external message.
    pub fn attach_signature(
        &self,
        public_key: &[u8],
        signature: &[u8; 64],
    ) -> Result<SignedTonTx, TonError> {
        let key = public_key_bytes(public_key)?;
        let owner = pubkey_to_address(&key, self.testnet)?;
        if !same_address(&owner, &self.from) {
            return Err(TonError::InvalidSignature(format!(
                "public key belongs to {owner}, not {}",
                self.from
            )));
        }
        verify_hash(&key, &self.signing_hash()?, signature)?;

        let mut body = CellBuilder::new();
        body.store_slice(signature)?;
        self.write_body(&mut body)?;
        let body = body.build()?;

        let wallet = parse_address(&self.from)?;
        let mut ext = CellBuilder::new();
        ext.store_u8(2, 0b10)? // ext_in_msg_info$10
            .store_u8(2, 0)? // src: addr_none
            .store_address(&wallet)?
            .store_u8(4, 0)?; // import_fee
        if self.seqno == 0 {
            // Deploy the wallet with its first outgoing message.
            ext.store_bit(true)?
                .store_bit(true)?
                .store_reference(&Arc::new(wallet_state_init(&key)?))?;
        } else {
            ext.store_bit(false)?;
        }
        ext.store_bit(true)?.store_reference(&Arc::new(body))?;
        let ext = ext.build()?;

        let message_hash = cell_hash(&ext)?;
        let boc = BagOfCells::from_root(ext).serialize(true)?;

        Ok(SignedTonTx {
            tx: self.clone(),
            public_key: key,
            signature: *signature,
            boc,
            message_hash,
        })
    }
}

fn verify_hash(key: &[u8; 32], hash: &[u8; 32], signature: &[u8; 64]) -> Result<(), TonError> {
    let key = VerifyingKey::from_bytes(key).map_err(|e| TonError::InvalidPublicKey(e.to_string()))?;
    key.verify(hash, &Signature::from_bytes(signature))
        .map_err(|e| TonError::InvalidSignature(e.to_string()))
}

impl SignedTonTx {
    /// Hex message hash, the identifier explorers index external messages by.
    pub fn tx_id(&self) -> String {
        hex::encode(self.message_hash)
    }

    pub fn boc(&self) -> &[u8] {
        &self.boc
    }

    /// Check that the signature covers the transfer and that the signing key
    /// owns `address`.
    pub fn verify(&self, address: &str) -> Result<(), TonError> {
        let owner = pubkey_to_address(&self.public_key, self.tx.testnet)?;
        if !same_address(&owner, address) || !same_address(&owner, &self.tx.from) {
            return Err(TonError::InvalidSignature(format!(
                "signer {owner} does not own {address}"
            )));
        }
        verify_hash(&self.public_key, &self.tx.signing_hash()?, &self.signature)
    }
}
