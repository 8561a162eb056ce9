//! Password-sealed storage for seed material.
//!
//! Secrets are sealed with AES-256-GCM under an Argon2id key derived from the
//! caller's password. The secret's reference is bound in as associated data,
//! so a ciphertext moved under another reference fails to open. Cleartext
//! only exists inside [`SecureKeyStore::with_decrypted_secret`], in a buffer
//! that is wiped when the closure returns, errors or unwinds.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{PoisonError, RwLock};

use crypto_utils::kdf::{self, SALT_LEN};
use crypto_utils::{encryption, KdfParams, SecretBytes};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Opaque handle to a stored secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(String);

impl SecretRef {
    pub(crate) fn generate() -> Self {
        Self(format!("secret-{}", crypto_utils::random::random_hex_id::<16>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A sealed secret and everything needed to open it, except the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// `nonce || ciphertext || tag`
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_salt")]
    pub salt: [u8; SALT_LEN],
    pub kdf: KdfParams,
}

pub struct SecureKeyStore {
    entries: RwLock<HashMap<SecretRef, EncryptedSecret>>,
    params: KdfParams,
}

impl SecureKeyStore {
    /// Store that seals new secrets with `params`.
    pub fn new(params: KdfParams) -> Result<Self, WalletError> {
        params.validate()?;
        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            params,
        })
    }

    /// Seal `secret` under a fresh reference without storing it.
    ///
    /// Callers that commit the result somewhere first and only then
    /// [`insert`](Self::insert) it use this instead of [`store`](Self::store).
    pub fn seal(
        &self,
        secret: &[u8],
        password: &SecretString,
    ) -> Result<(SecretRef, EncryptedSecret), WalletError> {
        let secret_ref = SecretRef::generate();
        let encrypted = self.seal_as(&secret_ref, secret, password)?;
        Ok((secret_ref, encrypted))
    }

    fn seal_as(
        &self,
        secret_ref: &SecretRef,
        secret: &[u8],
        password: &SecretString,
    ) -> Result<EncryptedSecret, WalletError> {
        let salt = kdf::generate_salt();
        let key = kdf::derive_key(password.expose_secret().as_bytes(), &salt, &self.params)?;
        let ciphertext = encryption::seal(secret, &key, secret_ref.as_str().as_bytes())?;
        Ok(EncryptedSecret {
            ciphertext,
            salt,
            kdf: self.params,
        })
    }

    /// Open `secret_ref` with `old` and seal it again under `new`, keeping the
    /// reference. The stored entry is left alone until the caller
    /// [`insert`](Self::insert)s the result.
    pub fn reseal(
        &self,
        secret_ref: &SecretRef,
        old: &SecretString,
        new: &SecretString,
    ) -> Result<EncryptedSecret, WalletError> {
        self.with_decrypted_secret(secret_ref, old, |secret| self.seal_as(secret_ref, secret, new))
    }

    pub fn insert(&self, secret_ref: SecretRef, encrypted: EncryptedSecret) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(secret_ref, encrypted);
    }

    /// Seal and store `secret`, returning its reference.
    pub fn store(&self, secret: &[u8], password: &SecretString) -> Result<SecretRef, WalletError> {
        let (secret_ref, encrypted) = self.seal(secret, password)?;
        self.insert(secret_ref.clone(), encrypted);
        Ok(secret_ref)
    }

    /// Decrypt the secret behind `secret_ref` and run `f` over it.
    ///
    /// A wrong password and a corrupted entry both fail with
    /// [`WalletError::DecryptionFailed`].
    pub fn with_decrypted_secret<R>(
        &self,
        secret_ref: &SecretRef,
        password: &SecretString,
        f: impl FnOnce(&[u8]) -> Result<R, WalletError>,
    ) -> Result<R, WalletError> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(secret_ref)
            .cloned()
            .ok_or_else(|| WalletError::SecretNotFound(secret_ref.clone()))?;

        let key = kdf::derive_key(password.expose_secret().as_bytes(), &entry.salt, &entry.kdf)?;
        let secret = encryption::open(&entry.ciphertext, &key, secret_ref.as_str().as_bytes())
            .map(SecretBytes::new)
            .map_err(|_| WalletError::DecryptionFailed)?;

        f(&secret)
    }

    /// Remove and return the entry behind `secret_ref`.
    pub fn remove(&self, secret_ref: &SecretRef) -> Result<EncryptedSecret, WalletError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(secret_ref)
            .ok_or_else(|| WalletError::SecretNotFound(secret_ref.clone()))
    }

    pub fn contains(&self, secret_ref: &SecretRef) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(secret_ref)
    }

    /// Every sealed entry, for persisting.
    pub fn snapshot(&self) -> BTreeMap<SecretRef, EncryptedSecret> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace every entry with `entries`.
    pub fn restore(&self, entries: BTreeMap<SecretRef, EncryptedSecret>) {
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) =
            entries.into_iter().collect();
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_salt {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::SALT_LEN;

    pub fn serialize<S: Serializer>(bytes: &[u8; SALT_LEN], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; SALT_LEN], D::Error> {
        let s = String::deserialize(d)?;
        let mut out = [0u8; SALT_LEN];
        hex::decode_to_slice(s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
