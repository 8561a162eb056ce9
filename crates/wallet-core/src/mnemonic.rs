use bip39::{Language, Mnemonic};
use crypto_utils::SecretBytes;
use zeroize::Zeroizing;

use crate::error::WalletError;

/// Generate a new 24-word BIP-39 mnemonic (256 bits of entropy)
pub fn generate_mnemonic() -> Result<Zeroizing<String>, WalletError> {
    let entropy = Zeroizing::new(crypto_utils::random::random_array::<32>());
    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy.as_slice())
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Whether `phrase` is a valid English BIP-39 mnemonic, checksum included.
pub fn validate_mnemonic(phrase: &str) -> bool {
    Mnemonic::parse_in_normalized(Language::English, phrase).is_ok()
}

/// Derive the 64-byte BIP-39 seed from a mnemonic and optional passphrase.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<SecretBytes, WalletError> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;

    let seed = Zeroizing::new(mnemonic.to_seed(passphrase));
    Ok(SecretBytes::new(seed.to_vec()))
}
