//! Account lifecycle: creation, lookup, removal and password changes.
//!
//! Every mutation writes the complete next snapshot (accounts and sealed
//! secrets) to the store before memory changes. A failed write leaves the
//! registry and key store exactly as they were.

use std::collections::BTreeMap;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::account::{Account, AccountId, AccountKind, AccountRecord, HardwareMeta, Wallet};
use crate::chain::{ChainAdapter, ChainRegistry, KeyMaterial};
use crate::error::WalletError;
use crate::keystore::{EncryptedSecret, SecretRef, SecureKeyStore};
use crate::mnemonic;
use crate::store::{Snapshot, WalletStore, SNAPSHOT_VERSION};
use crate::types::ChainId;

/// A public key exported from a hardware device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareKey {
    pub chain: ChainId,
    pub index: u32,
    pub public_key: Vec<u8>,
}

pub struct AccountRegistry {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
    keystore: Arc<SecureKeyStore>,
    store: Arc<dyn WalletStore>,
    /// Held from building a snapshot until memory reflects it.
    commit_lock: Mutex<()>,
    max_indices: u32,
    default_chains: Vec<ChainId>,
}

impl AccountRegistry {
    /// Load every account and sealed secret from `store`.
    pub async fn open(
        store: Arc<dyn WalletStore>,
        keystore: Arc<SecureKeyStore>,
        max_indices: u32,
        default_chains: Vec<ChainId>,
    ) -> Result<Self, WalletError> {
        let snapshot = store.load().await?;
        let mut accounts = BTreeMap::new();
        for record in snapshot.accounts {
            let account = record.into_account()?;
            if let Some(secret) = account.secret_ref() {
                if !snapshot.secrets.contains_key(secret) {
                    return Err(WalletError::Storage(format!(
                        "account {} references missing secret {secret}",
                        account.id()
                    )));
                }
            }
            accounts.insert(account.id().clone(), account);
        }
        keystore.restore(snapshot.secrets);
        info!(accounts = accounts.len(), "loaded accounts");

        Ok(Self {
            accounts: RwLock::new(accounts),
            keystore,
            store,
            commit_lock: Mutex::new(()),
            max_indices,
            default_chains,
        })
    }

    pub(crate) fn keystore(&self) -> &Arc<SecureKeyStore> {
        &self.keystore
    }

    /// Import a BIP-39 mnemonic. The primary wallet of every enabled default
    /// chain is derived and the seed is sealed under `password`.
    pub async fn create_mnemonic_account(
        &self,
        chains: &ChainRegistry,
        phrase: &str,
        password: SecretString,
    ) -> Result<Account, WalletError> {
        if !mnemonic::validate_mnemonic(phrase) {
            return Err(WalletError::InvalidMnemonic(
                "not a valid English BIP-39 phrase".into(),
            ));
        }
        let adapters = self.default_adapters(chains)?;

        let phrase = Zeroizing::new(phrase.to_string());
        let keystore = self.keystore.clone();
        let (wallets, secret_ref, sealed) = tokio::task::spawn_blocking(move || {
            let seed = mnemonic::mnemonic_to_seed(&phrase, "")?;
            let wallets = adapters
                .iter()
                .map(|adapter| adapter.derive_address(KeyMaterial::Seed(&seed), 0))
                .collect::<Result<Vec<_>, _>>()?;
            let (secret_ref, sealed) = keystore.seal(&seed, &password)?;
            Ok::<_, WalletError>((wallets, secret_ref, sealed))
        })
        .await
        .map_err(|e| WalletError::DerivationFailed(format!("derivation task failed: {e}")))??;

        let account = Account::new(
            AccountId::generate(),
            AccountKind::Mnemonic {
                secret: secret_ref.clone(),
            },
            wallets,
            self.max_indices,
        )?;
        self.commit_new(account, Some((secret_ref, sealed))).await
    }

    /// Register a hardware account from public keys the device exported.
    pub async fn create_hardware_account(
        &self,
        chains: &ChainRegistry,
        meta: HardwareMeta,
        keys: Vec<HardwareKey>,
    ) -> Result<Account, WalletError> {
        if meta.device_id.is_empty() {
            return Err(WalletError::InvalidAccount("device id is empty".into()));
        }
        let wallets = keys
            .iter()
            .map(|key| {
                chains
                    .adapter(key.chain)?
                    .derive_address(KeyMaterial::PublicKey(&key.public_key), key.index)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let account = Account::new(
            AccountId::generate(),
            AccountKind::Hardware(meta),
            wallets,
            self.max_indices,
        )?;
        self.commit_new(account, None).await
    }

    /// Track addresses without any key material.
    pub async fn create_view_only_account(
        &self,
        chains: &ChainRegistry,
        addresses: Vec<(ChainId, String)>,
    ) -> Result<Account, WalletError> {
        let wallets = addresses
            .into_iter()
            .map(|(chain, address)| {
                if !chains.adapter(chain)?.validate_address(&address) {
                    return Err(WalletError::InvalidAccount(format!(
                        "{address} is not a valid {chain} address"
                    )));
                }
                Ok(Wallet {
                    chain,
                    address,
                    index: 0,
                    public_key: None,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let account = Account::new(AccountId::generate(), AccountKind::ViewOnly, wallets, 1)?;
        self.commit_new(account, None).await
    }

    pub async fn get_account(&self, id: &AccountId) -> Result<Account, WalletError> {
        self.accounts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WalletError::AccountNotFound(id.clone()))
    }

    /// The primary wallet of `id` on `chain`.
    pub async fn get_wallet(&self, id: &AccountId, chain: ChainId) -> Result<Wallet, WalletError> {
        self.get_account(id)
            .await?
            .wallet(chain)
            .cloned()
            .ok_or_else(|| WalletError::WalletNotFound {
                account: id.clone(),
                chain,
            })
    }

    pub async fn wallet_by_address(
        &self,
        id: &AccountId,
        chain: ChainId,
        address: &str,
    ) -> Result<Wallet, WalletError> {
        self.get_account(id)
            .await?
            .wallet_by_address(chain, address)
            .cloned()
            .ok_or_else(|| WalletError::WalletNotFound {
                account: id.clone(),
                chain,
            })
    }

    pub async fn list_accounts(&self) -> Vec<Account> {
        self.accounts.read().await.values().cloned().collect()
    }

    /// Remove `id` and purge its sealed secret in the same commit.
    pub async fn remove_account(&self, id: &AccountId) -> Result<Account, WalletError> {
        let _commit = self.commit_lock.lock().await;
        let mut next = self.accounts.read().await.clone();
        let account = next
            .remove(id)
            .ok_or_else(|| WalletError::AccountNotFound(id.clone()))?;

        let mut secrets = self.keystore.snapshot();
        if let Some(secret) = account.secret_ref() {
            secrets.remove(secret);
        }
        self.save(&next, secrets).await?;

        if let Some(secret) = account.secret_ref() {
            self.keystore.remove(secret)?;
        }
        self.accounts.write().await.remove(id);
        info!(account = %id, kind = ?account.account_type(), "removed account");
        Ok(account)
    }

    /// Check `password` against the stored seeds. False when it opens none
    /// of them or there are none to open.
    pub async fn verify_password(&self, password: SecretString) -> Result<bool, WalletError> {
        let refs = self.secret_refs().await;
        let keystore = self.keystore.clone();
        tokio::task::spawn_blocking(move || {
            for secret in &refs {
                match keystore.with_decrypted_secret(secret, &password, |_| Ok(())) {
                    Ok(()) => {}
                    Err(WalletError::DecryptionFailed) => return Ok(false),
                    Err(e) => return Err(e),
                }
            }
            Ok(!refs.is_empty())
        })
        .await
        .map_err(|e| WalletError::Storage(format!("password check task failed: {e}")))?
    }

    /// Re-seal every stored seed under `new_password` in one commit.
    ///
    /// Every seed must open with `old_password`. If any does not, or the
    /// commit fails, all seeds stay sealed under the old password.
    pub async fn change_password(
        &self,
        old_password: SecretString,
        new_password: SecretString,
    ) -> Result<usize, WalletError> {
        let _commit = self.commit_lock.lock().await;
        let accounts = self.accounts.read().await.clone();
        let refs = self.secret_refs().await;
        if refs.is_empty() {
            return Err(WalletError::InvalidAccount("no seed is sealed under a password".into()));
        }

        let keystore = self.keystore.clone();
        let resealed = tokio::task::spawn_blocking(move || {
            refs.into_iter()
                .map(|secret| {
                    let sealed = keystore.reseal(&secret, &old_password, &new_password)?;
                    Ok((secret, sealed))
                })
                .collect::<Result<BTreeMap<_, _>, WalletError>>()
        })
        .await
        .map_err(|e| WalletError::Storage(format!("re-seal task failed: {e}")))??;

        let mut secrets = self.keystore.snapshot();
        secrets.extend(resealed.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Err(e) = self.save(&accounts, secrets).await {
            warn!(error = %e, "password change commit failed");
            return Err(e);
        }

        let count = resealed.len();
        for (secret, sealed) in resealed {
            self.keystore.insert(secret, sealed);
        }
        info!(secrets = count, "changed password");
        Ok(count)
    }

    async fn secret_refs(&self) -> Vec<SecretRef> {
        self.accounts
            .read()
            .await
            .values()
            .filter_map(|account| account.secret_ref().cloned())
            .collect()
    }

    fn default_adapters(&self, chains: &ChainRegistry) -> Result<Vec<ChainAdapter>, WalletError> {
        let adapters: Vec<ChainAdapter> = self
            .default_chains
            .iter()
            .filter_map(|chain| match chains.adapter(*chain) {
                Ok(adapter) => Some(adapter.clone()),
                Err(_) => {
                    debug!(%chain, "default chain not enabled, skipping");
                    None
                }
            })
            .collect();
        if adapters.is_empty() {
            return Err(WalletError::InvalidAccount(
                "none of the default chains is enabled".into(),
            ));
        }
        Ok(adapters)
    }

    async fn commit_new(
        &self,
        account: Account,
        secret: Option<(SecretRef, EncryptedSecret)>,
    ) -> Result<Account, WalletError> {
        let _commit = self.commit_lock.lock().await;
        let mut next = self.accounts.read().await.clone();
        next.insert(account.id().clone(), account.clone());

        let mut secrets = self.keystore.snapshot();
        if let Some((secret_ref, sealed)) = &secret {
            secrets.insert(secret_ref.clone(), sealed.clone());
        }
        if let Err(e) = self.save(&next, secrets).await {
            warn!(account = %account.id(), error = %e, "account commit failed");
            return Err(e);
        }

        if let Some((secret_ref, sealed)) = secret {
            self.keystore.insert(secret_ref, sealed);
        }
        self.accounts
            .write()
            .await
            .insert(account.id().clone(), account.clone());
        info!(
            account = %account.id(),
            kind = ?account.account_type(),
            chains = ?account.chains(),
            "created account"
        );
        Ok(account)
    }

    async fn save(
        &self,
        accounts: &BTreeMap<AccountId, Account>,
        secrets: BTreeMap<SecretRef, EncryptedSecret>,
    ) -> Result<(), WalletError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            accounts: accounts.values().map(AccountRecord::from).collect(),
            secrets,
        };
        self.store.save(&snapshot).await
    }
}
