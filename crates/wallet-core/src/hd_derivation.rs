use bip32::{DerivationPath, XPrv};
use hmac::{Hmac, Mac};
use k256::ecdsa::SigningKey;
use sha2::Sha512;
use zeroize::{Zeroize, Zeroizing};

use crate::error::WalletError;
use crate::types::{ChainFamily, ChainId, CurveType};

type HmacSha512 = Hmac<Sha512>;

pub const HARDENED: u32 = 0x8000_0000;

/// Derivation path of the wallet at `index` on `chain`.
///
/// - BTC:  m/84'/coin'/0'/0/index  (BIP-84 native SegWit)
/// - EVM:  m/44'/60'/0'/0/index    (same key on every EVM chain)
/// - TRX:  m/44'/195'/0'/0/index
/// - SOL:  m/44'/501'/index'/0'    (SLIP-10 needs every level hardened)
/// - TON:  m/44'/607'/index'
pub fn derivation_path(chain: ChainId, index: u32) -> String {
    let coin = chain.coin_type();
    if chain.family() == ChainFamily::Ton {
        return format!("m/44'/{coin}'/{index}'");
    }
    match chain.curve() {
        CurveType::Ed25519 => format!("m/44'/{coin}'/{index}'/0'"),
        CurveType::Secp256k1 if coin <= 1 => format!("m/84'/{coin}'/0'/0/{index}"),
        CurveType::Secp256k1 => format!("m/44'/{coin}'/0'/0/{index}"),
    }
}

/// Parse "m/44'/501'/0'/0'" into child numbers, hardened bit included.
pub fn parse_derivation_path(path: &str) -> Result<Vec<u32>, WalletError> {
    let path = path
        .strip_prefix("m/")
        .ok_or_else(|| WalletError::DerivationFailed("path must start with m/".into()))?;

    path.split('/')
        .map(|component| {
            let (num_str, hardened) = match component
                .strip_suffix('\'')
                .or_else(|| component.strip_suffix('h'))
            {
                Some(stripped) => (stripped, true),
                None => (component, false),
            };
            let index = num_str.parse::<u32>().map_err(|e| {
                WalletError::DerivationFailed(format!("invalid path component {component:?}: {e}"))
            })?;
            if index & HARDENED != 0 {
                return Err(WalletError::DerivationFailed(format!(
                    "path component {index} out of range"
                )));
            }
            Ok(if hardened { index | HARDENED } else { index })
        })
        .collect()
}

/// Derived secp256k1 key (BTC, EVM, Tron)
pub struct DerivedKey {
    pub signing_key: SigningKey,
    /// SEC1 compressed.
    pub public_key: [u8; 33],
    pub derivation_path: String,
}

/// Derived Ed25519 key (Solana, TON)
pub struct DerivedEd25519Key {
    pub signing_key: ed25519_dalek::SigningKey,
    pub public_key: [u8; 32],
    pub derivation_path: String,
}

/// BIP-32 derivation of a secp256k1 key at `path`.
pub fn derive_secp256k1_key(seed: &[u8], path: &str) -> Result<DerivedKey, WalletError> {
    let parsed: DerivationPath = path
        .parse()
        .map_err(|e: bip32::Error| WalletError::DerivationFailed(e.to_string()))?;

    let xprv = XPrv::derive_from_path(seed, &parsed)
        .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;

    let private_key_bytes = Zeroizing::new(<[u8; 32]>::from(xprv.to_bytes()));
    let signing_key = SigningKey::from_slice(private_key_bytes.as_slice())
        .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;

    let public_key: [u8; 33] = signing_key
        .verifying_key()
        .to_encoded_point(true)
        .as_bytes()
        .try_into()
        .map_err(|_| WalletError::DerivationFailed("invalid public key length".into()))?;

    Ok(DerivedKey {
        signing_key,
        public_key,
        derivation_path: path.to_string(),
    })
}

/// SLIP-10 derivation of an Ed25519 key at `path`. Every component must be
/// hardened.
pub fn derive_ed25519_key(seed: &[u8], path: &str) -> Result<DerivedEd25519Key, WalletError> {
    let components = parse_derivation_path(path)?;
    if let Some(soft) = components.iter().find(|c| *c & HARDENED == 0) {
        return Err(WalletError::DerivationFailed(format!(
            "ed25519 only supports hardened derivation, got {soft} in {path}"
        )));
    }

    // Master key: HMAC-SHA512(key="ed25519 seed", data=seed)
    let mut mac = HmacSha512::new_from_slice(b"ed25519 seed")
        .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;
    mac.update(seed);
    let mut result = mac.finalize().into_bytes();

    let mut key = Zeroizing::new([0u8; 32]);
    let mut chain_code = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&result[..32]);
    chain_code.copy_from_slice(&result[32..]);
    result.as_mut_slice().zeroize();

    for child_index in components {
        let mut mac = HmacSha512::new_from_slice(chain_code.as_slice())
            .map_err(|e| WalletError::DerivationFailed(e.to_string()))?;
        // Hardened child: 0x00 || key || index
        mac.update(&[0x00]);
        mac.update(key.as_slice());
        mac.update(&child_index.to_be_bytes());
        let mut result = mac.finalize().into_bytes();

        key.copy_from_slice(&result[..32]);
        chain_code.copy_from_slice(&result[32..]);
        result.as_mut_slice().zeroize();
    }

    let signing_key = ed25519_dalek::SigningKey::from_bytes(&key);
    let public_key = signing_key.verifying_key().to_bytes();

    Ok(DerivedEd25519Key {
        signing_key,
        public_key,
        derivation_path: path.to_string(),
    })
}

/// Public key of the wallet at `index` on `chain`: 33-byte compressed
/// secp256k1 or 32-byte Ed25519.
pub fn derive_public_key(seed: &[u8], chain: ChainId, index: u32) -> Result<Vec<u8>, WalletError> {
    let path = derivation_path(chain, index);
    match chain.curve() {
        CurveType::Secp256k1 => Ok(derive_secp256k1_key(seed, &path)?.public_key.to_vec()),
        CurveType::Ed25519 => Ok(derive_ed25519_key(seed, &path)?.public_key.to_vec()),
    }
}
