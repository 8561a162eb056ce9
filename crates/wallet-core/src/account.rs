//! Account model and its persisted form.
//!
//! An account's trust level is its [`AccountKind`]. The kind decides which
//! metadata exists: only mnemonic accounts reference a stored secret and only
//! hardware accounts carry device metadata. Nothing mutates the kind after
//! construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::keystore::SecretRef;
use crate::types::ChainId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub(crate) fn generate() -> Self {
        Self(format!("acct-{}", crypto_utils::random::random_hex_id::<12>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Physical connection family of a hardware signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareDriver {
    Hid,
    Ble,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareMeta {
    pub driver: HardwareDriver,
    pub device_id: String,
    pub device_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountKind {
    /// Seed-backed. The seed lives sealed in the key store.
    Mnemonic { secret: SecretRef },
    /// Keys live on an external signing device.
    Hardware(HardwareMeta),
    /// Addresses only. Cannot sign.
    ViewOnly,
}

/// Discriminant of [`AccountKind`], as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountType {
    Mnemonic,
    Hardware,
    ViewOnly,
}

/// One address on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub chain: ChainId,
    pub address: String,
    pub index: u32,
    /// Absent on view-only wallets.
    pub public_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    kind: AccountKind,
    wallets: Vec<Wallet>,
}

impl Account {
    /// Check the per-kind wallet rules and build the account.
    ///
    /// Mnemonic and view-only accounts hold one wallet per chain; hardware
    /// accounts up to `max_indices` per chain. Addresses and indices are
    /// unique per chain, and only view-only wallets lack a public key.
    pub(crate) fn new(
        id: AccountId,
        kind: AccountKind,
        mut wallets: Vec<Wallet>,
        max_indices: u32,
    ) -> Result<Self, WalletError> {
        if wallets.is_empty() {
            return Err(WalletError::InvalidAccount("account has no wallets".into()));
        }
        wallets.sort_by(|a, b| a.chain.cmp(&b.chain).then(a.index.cmp(&b.index)));

        let per_chain_limit = match kind {
            AccountKind::Hardware(_) => max_indices,
            AccountKind::Mnemonic { .. } | AccountKind::ViewOnly => 1,
        };

        for chain in ChainId::ALL {
            let on_chain: Vec<&Wallet> = wallets.iter().filter(|w| w.chain == chain).collect();
            if on_chain.len() as u64 > per_chain_limit as u64 {
                return Err(WalletError::InvalidAccount(format!(
                    "{} wallets on {chain}, at most {per_chain_limit} allowed",
                    on_chain.len()
                )));
            }
            for (i, a) in on_chain.iter().enumerate() {
                for b in &on_chain[i + 1..] {
                    if a.index == b.index {
                        return Err(WalletError::InvalidAccount(format!(
                            "duplicate index {} on {chain}",
                            a.index
                        )));
                    }
                    if a.address == b.address {
                        return Err(WalletError::InvalidAccount(format!(
                            "duplicate address {} on {chain}",
                            a.address
                        )));
                    }
                }
            }
        }

        let view_only = matches!(kind, AccountKind::ViewOnly);
        if let Some(w) = wallets.iter().find(|w| w.public_key.is_some() == view_only) {
            let reason = if view_only {
                "view-only wallets carry no public key"
            } else {
                "signing wallets need a public key"
            };
            return Err(WalletError::InvalidAccount(format!(
                "{} on {}: {reason}",
                w.address, w.chain
            )));
        }

        Ok(Self { id, kind, wallets })
    }

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn kind(&self) -> &AccountKind {
        &self.kind
    }

    pub fn account_type(&self) -> AccountType {
        match self.kind {
            AccountKind::Mnemonic { .. } => AccountType::Mnemonic,
            AccountKind::Hardware(_) => AccountType::Hardware,
            AccountKind::ViewOnly => AccountType::ViewOnly,
        }
    }

    /// True only for mnemonic accounts, whose seed is sealed in the key store.
    pub fn is_stored_encrypted(&self) -> bool {
        matches!(self.kind, AccountKind::Mnemonic { .. })
    }

    pub fn secret_ref(&self) -> Option<&SecretRef> {
        match &self.kind {
            AccountKind::Mnemonic { secret } => Some(secret),
            _ => None,
        }
    }

    pub fn hardware_meta(&self) -> Option<&HardwareMeta> {
        match &self.kind {
            AccountKind::Hardware(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn wallets(&self) -> &[Wallet] {
        &self.wallets
    }

    /// The primary (lowest index) wallet on `chain`.
    pub fn wallet(&self, chain: ChainId) -> Option<&Wallet> {
        self.wallets.iter().find(|w| w.chain == chain)
    }

    pub fn wallet_by_address(&self, chain: ChainId, address: &str) -> Option<&Wallet> {
        self.wallets
            .iter()
            .find(|w| w.chain == chain && w.address == address)
    }

    pub fn chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.wallets.iter().map(|w| w.chain).collect();
        chains.dedup();
        chains
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub chain_id: ChainId,
    pub address: String,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// Persisted form of an [`Account`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: AccountId,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_secret_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_meta: Option<HardwareMeta>,
    pub wallets: Vec<WalletRecord>,
}

impl From<&Account> for AccountRecord {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            account_type: account.account_type(),
            encrypted_secret_ref: account.secret_ref().cloned(),
            hardware_meta: account.hardware_meta().cloned(),
            wallets: account
                .wallets
                .iter()
                .map(|w| WalletRecord {
                    chain_id: w.chain,
                    address: w.address.clone(),
                    index: w.index,
                    public_key: w.public_key.as_ref().map(hex::encode),
                })
                .collect(),
        }
    }
}

impl AccountRecord {
    /// Rebuild the account, rejecting records whose metadata contradicts
    /// their type.
    ///
    /// The hardware index limit applies when wallets are added, not here:
    /// an account saved under a higher limit still loads.
    pub fn into_account(self) -> Result<Account, WalletError> {
        let kind = match (self.account_type, self.encrypted_secret_ref, self.hardware_meta) {
            (AccountType::Mnemonic, Some(secret), None) => AccountKind::Mnemonic { secret },
            (AccountType::Hardware, None, Some(meta)) => AccountKind::Hardware(meta),
            (AccountType::ViewOnly, None, None) => AccountKind::ViewOnly,
            (account_type, secret, meta) => {
                return Err(WalletError::InvalidAccount(format!(
                    "record {} of type {account_type:?} has encryptedSecretRef={} hardwareMeta={}",
                    self.id,
                    secret.is_some(),
                    meta.is_some()
                )))
            }
        };

        let wallets = self
            .wallets
            .into_iter()
            .map(|w| {
                let public_key = w
                    .public_key
                    .map(|hex_key| {
                        hex::decode(&hex_key).map_err(|e| {
                            WalletError::InvalidAccount(format!("public key of {}: {e}", w.address))
                        })
                    })
                    .transpose()?;
                Ok(Wallet {
                    chain: w.chain_id,
                    address: w.address,
                    index: w.index,
                    public_key,
                })
            })
            .collect::<Result<Vec<_>, WalletError>>()?;

        Account::new(self.id, kind, wallets, u32::MAX)
    }
}
