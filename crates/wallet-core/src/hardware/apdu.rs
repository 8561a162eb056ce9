//! Command framing for the signing device.
//!
//! A command is `CLA INS P1 P2 Lc data`. Key commands carry
//! `curve (1) || path length (1) || path components (4 each, BE) || message`.
//! Data longer than [`MAX_CHUNK`] is split: P1 marks the first or a following
//! chunk, P2 says whether more chunks follow. Replies end in a 16-bit status
//! word.

use crate::error::WalletError;
use crate::types::CurveType;

pub const CLA: u8 = 0xE0;

pub const INS_GET_PUBLIC_KEY: u8 = 0x02;
pub const INS_SIGN: u8 = 0x04;
pub const INS_ABORT: u8 = 0x0F;

/// `INS_GET_PUBLIC_KEY` P1: show the address on screen and wait for approval.
pub const P1_CONFIRM: u8 = 0x01;
pub const P1_SILENT: u8 = 0x00;

pub const P1_FIRST_CHUNK: u8 = 0x00;
pub const P1_NEXT_CHUNK: u8 = 0x80;
pub const P2_MORE_CHUNKS: u8 = 0x80;
pub const P2_LAST_CHUNK: u8 = 0x00;

pub const MAX_CHUNK: usize = 255;

pub const SW_OK: u16 = 0x9000;
pub const SW_USER_REJECTED: u16 = 0x6985;
pub const SW_BLIND_SIGNING_DISABLED: u16 = 0xBD00;
pub const SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;

const CURVE_SECP256K1: u8 = 0x00;
const CURVE_ED25519: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl Command {
    pub fn new(ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self { ins, p1, p2, data }
    }

    pub fn abort() -> Self {
        Self::new(INS_ABORT, 0, 0, Vec::new())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.data.len());
        out.extend_from_slice(&[CLA, self.ins, self.p1, self.p2, self.data.len() as u8]);
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse an encoded command. `None` if the length byte disagrees with
    /// the data or the class byte is foreign.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (header, data) = bytes.split_at_checked(5)?;
        if header[0] != CLA || header[4] as usize != data.len() {
            return None;
        }
        Some(Self::new(header[1], header[2], header[3], data.to_vec()))
    }
}

/// Key-addressed request body.
pub fn key_request(curve: CurveType, path: &[u32], message: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 + path.len() * 4 + message.len());
    data.push(match curve {
        CurveType::Secp256k1 => CURVE_SECP256K1,
        CurveType::Ed25519 => CURVE_ED25519,
    });
    data.push(path.len() as u8);
    for component in path {
        data.extend_from_slice(&component.to_be_bytes());
    }
    data.extend_from_slice(message);
    data
}

/// Inverse of [`key_request`]: curve, path and the trailing message.
pub fn parse_key_request(data: &[u8]) -> Option<(CurveType, Vec<u32>, &[u8])> {
    let (&curve, rest) = data.split_first()?;
    let curve = match curve {
        CURVE_SECP256K1 => CurveType::Secp256k1,
        CURVE_ED25519 => CurveType::Ed25519,
        _ => return None,
    };
    let (&depth, rest) = rest.split_first()?;
    let (path_bytes, message) = rest.split_at_checked(depth as usize * 4)?;
    let path = path_bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some((curve, path, message))
}

/// Split `data` into commands of at most [`MAX_CHUNK`] bytes each.
pub fn chunked(ins: u8, data: &[u8]) -> Vec<Command> {
    if data.is_empty() {
        return vec![Command::new(ins, P1_FIRST_CHUNK, P2_LAST_CHUNK, Vec::new())];
    }
    let count = data.len().div_ceil(MAX_CHUNK);
    data.chunks(MAX_CHUNK)
        .enumerate()
        .map(|(i, chunk)| {
            let p1 = if i == 0 { P1_FIRST_CHUNK } else { P1_NEXT_CHUNK };
            let p2 = if i + 1 < count { P2_MORE_CHUNKS } else { P2_LAST_CHUNK };
            Command::new(ins, p1, p2, chunk.to_vec())
        })
        .collect()
}

/// Split a reply into its payload and status word.
pub fn split_reply(reply: &[u8]) -> Result<(&[u8], u16), WalletError> {
    let split = reply
        .len()
        .checked_sub(2)
        .ok_or(WalletError::DeviceError(0))?;
    let (payload, sw) = reply.split_at(split);
    Ok((payload, u16::from_be_bytes([sw[0], sw[1]])))
}

/// Payload of a successful reply, or the error its status word stands for.
pub fn check_reply(reply: &[u8]) -> Result<Vec<u8>, WalletError> {
    let (payload, sw) = split_reply(reply)?;
    match sw {
        SW_OK => Ok(payload.to_vec()),
        other => Err(status_error(other)),
    }
}

pub fn status_error(sw: u16) -> WalletError {
    match sw {
        SW_USER_REJECTED => WalletError::UserRejected,
        SW_BLIND_SIGNING_DISABLED => WalletError::BlindSigningDisabled,
        SW_CLA_NOT_SUPPORTED | SW_INS_NOT_SUPPORTED => WalletError::DeviceAppUnavailable,
        other => WalletError::DeviceError(other),
    }
}
