//! Signing with keys derived from a decrypted seed.
//!
//! Produces the same signature shapes a hardware device returns, so both
//! account kinds finish through the adapter's `finalize`.

use ed25519_dalek::Signer;

use crate::error::WalletError;
use crate::hd_derivation::{derivation_path, derive_ed25519_key, derive_secp256k1_key};
use crate::types::{ChainId, SignatureScheme, SigningPayload};

/// Signatures over every message in `payload` plus the signing public key.
pub struct LocalSignature {
    pub signatures: Vec<Vec<u8>>,
    pub public_key: Vec<u8>,
}

/// Sign `payload` with the key of the wallet at `index` on `chain`.
pub fn sign_payload(
    seed: &[u8],
    chain: ChainId,
    index: u32,
    payload: &SigningPayload,
) -> Result<LocalSignature, WalletError> {
    let path = derivation_path(chain, index);
    match payload.scheme {
        SignatureScheme::Secp256k1Prehash => {
            let key = derive_secp256k1_key(seed, &path)?;
            let signatures = payload
                .messages
                .iter()
                .map(|digest| {
                    let (signature, recovery_id) = key
                        .signing_key
                        .sign_prehash_recoverable(digest)
                        .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
                    let mut out = signature.to_bytes().to_vec();
                    out.push(recovery_id.to_byte());
                    Ok(out)
                })
                .collect::<Result<Vec<_>, WalletError>>()?;
            Ok(LocalSignature {
                signatures,
                public_key: key.public_key.to_vec(),
            })
        }
        SignatureScheme::Ed25519 => {
            let key = derive_ed25519_key(seed, &path)?;
            let signatures = payload
                .messages
                .iter()
                .map(|message| key.signing_key.sign(message).to_bytes().to_vec())
                .collect();
            Ok(LocalSignature {
                signatures,
                public_key: key.public_key.to_vec(),
            })
        }
    }
}
