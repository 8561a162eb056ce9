//! The wallet facade: accounts on one side, chains on the other, and
//! signing as the single place where the two meet.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use secrecy::SecretString;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::account::{Account, AccountId, AccountKind, HardwareMeta, Wallet};
use crate::account_registry::{AccountRegistry, HardwareKey};
use crate::chain::ChainRegistry;
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::hardware::{DeviceHub, DeviceTransport, HardwareWalletSession};
use crate::keystore::SecureKeyStore;
use crate::mnemonic;
use crate::signer::{self, LocalSignature};
use crate::store::WalletStore;
use crate::types::{Amount, Asset, ChainId, SignedTx, UnsignedTx};

/// A native transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub to: String,
    pub amount: Amount,
    pub memo: Option<Vec<u8>>,
    /// Wallet index to send from. The primary wallet when `None`.
    pub from_index: Option<u32>,
}

impl Transfer {
    pub fn new(to: impl Into<String>, amount: Amount) -> Self {
        Self {
            to: to.into(),
            amount,
            memo: None,
            from_index: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<Vec<u8>>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn from_index(mut self, index: u32) -> Self {
        self.from_index = Some(index);
        self
    }
}

/// Balance of one wallet, or why it could not be read.
#[derive(Debug)]
pub struct WalletBalance {
    pub chain: ChainId,
    pub address: String,
    pub index: u32,
    pub balance: Result<Amount, WalletError>,
}

pub struct WalletCore {
    config: WalletConfig,
    chains: ChainRegistry,
    accounts: AccountRegistry,
    devices: DeviceHub,
    /// Open sessions by device id, reused across calls.
    sessions: Mutex<HashMap<String, HardwareWalletSession>>,
}

impl WalletCore {
    pub async fn open(
        config: WalletConfig,
        chains: ChainRegistry,
        store: Arc<dyn WalletStore>,
        transport: Arc<dyn DeviceTransport>,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        let keystore = Arc::new(SecureKeyStore::new(config.kdf.params())?);
        let accounts = AccountRegistry::open(
            store,
            keystore,
            config.hardware.max_indices_per_account,
            config.default_chains.clone(),
        )
        .await?;
        let devices = DeviceHub::new(
            transport,
            config.hardware.busy_policy,
            config.timeouts.device(),
        );
        info!(chains = ?chains.enabled_chains(), "wallet core opened");

        Ok(Self {
            config,
            chains,
            accounts,
            devices,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.chains
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    // ─── Accounts ───────────────────────────────────────────────────

    pub async fn create_mnemonic_account(
        &self,
        phrase: &str,
        password: SecretString,
    ) -> Result<Account, WalletError> {
        self.accounts
            .create_mnemonic_account(&self.chains, phrase, password)
            .await
    }

    /// Generate a fresh 24-word phrase and import it. The phrase is returned
    /// once for the user to back up and is not kept anywhere in clear.
    pub async fn create_new_wallet(
        &self,
        password: SecretString,
    ) -> Result<(Account, Zeroizing<String>), WalletError> {
        let phrase = mnemonic::generate_mnemonic()?;
        let account = self.create_mnemonic_account(&phrase, password).await?;
        Ok((account, phrase))
    }

    /// True when `password` opens every sealed seed.
    pub async fn verify_password(&self, password: SecretString) -> Result<bool, WalletError> {
        self.accounts.verify_password(password).await
    }

    /// Re-seal every seed under `new_password`. Returns how many were
    /// re-sealed.
    pub async fn change_password(
        &self,
        old_password: SecretString,
        new_password: SecretString,
    ) -> Result<usize, WalletError> {
        self.accounts.change_password(old_password, new_password).await
    }

    pub async fn create_hardware_account(
        &self,
        meta: HardwareMeta,
        keys: Vec<HardwareKey>,
    ) -> Result<Account, WalletError> {
        self.accounts
            .create_hardware_account(&self.chains, meta, keys)
            .await
    }

    /// Read the keys at `indices` on each chain from the device and register
    /// the account.
    pub async fn create_hardware_account_from_device(
        &self,
        meta: HardwareMeta,
        chains: &[ChainId],
        indices: Range<u32>,
        timeout: Option<Duration>,
    ) -> Result<Account, WalletError> {
        let session = self.session_for(&meta.device_id)?;
        let mut keys = Vec::with_capacity(chains.len() * indices.len());
        for chain in chains {
            self.chains.adapter(*chain)?;
            for index in indices.clone() {
                let public_key = session.get_public_key(*chain, index, false, timeout).await?;
                keys.push(HardwareKey {
                    chain: *chain,
                    index,
                    public_key,
                });
            }
        }
        self.create_hardware_account(meta, keys).await
    }

    /// Addresses at `start..start + count` on `chain`, read from the device
    /// without registering anything, so the user can pick which to import.
    pub async fn scan_hardware_wallets(
        &self,
        device_id: &str,
        chain: ChainId,
        start: u32,
        count: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<Wallet>, WalletError> {
        let end = start.checked_add(count).ok_or_else(|| {
            WalletError::InvalidAccount(format!("index range {start}+{count} overflows"))
        })?;
        let adapter = self.chains.adapter(chain)?;
        let session = self.session_for(device_id)?;
        let mut wallets = Vec::with_capacity(count as usize);
        for index in start..end {
            wallets.push(session.get_address(adapter, index, false, timeout).await?);
        }
        debug!(device_id, %chain, start, count, "scanned device wallets");
        Ok(wallets)
    }

    pub async fn create_view_only_account(
        &self,
        addresses: Vec<(ChainId, String)>,
    ) -> Result<Account, WalletError> {
        self.accounts
            .create_view_only_account(&self.chains, addresses)
            .await
    }

    pub async fn get_account(&self, id: &AccountId) -> Result<Account, WalletError> {
        self.accounts.get_account(id).await
    }

    pub async fn list_accounts(&self) -> Vec<Account> {
        self.accounts.list_accounts().await
    }

    pub async fn get_wallet(&self, id: &AccountId, chain: ChainId) -> Result<Wallet, WalletError> {
        self.accounts.get_wallet(id, chain).await
    }

    /// Remove the account and its sealed secret. A cached device session is
    /// closed once no remaining account uses that device.
    pub async fn remove_account(&self, id: &AccountId) -> Result<(), WalletError> {
        let removed = self.accounts.remove_account(id).await?;
        if let Some(meta) = removed.hardware_meta() {
            let still_used = self
                .accounts
                .list_accounts()
                .await
                .iter()
                .any(|a| a.hardware_meta().map(|m| &m.device_id) == Some(&meta.device_id));
            if !still_used {
                self.close_device(&meta.device_id);
            }
        }
        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────────

    pub async fn get_balance(
        &self,
        id: &AccountId,
        chain: ChainId,
        timeout: Option<Duration>,
    ) -> Result<Amount, WalletError> {
        let wallet = self.get_wallet(id, chain).await?;
        self.chains.get_balance(chain, &wallet.address, timeout).await
    }

    pub async fn get_assets(
        &self,
        id: &AccountId,
        chain: ChainId,
        timeout: Option<Duration>,
    ) -> Result<Vec<Asset>, WalletError> {
        let wallet = self.get_wallet(id, chain).await?;
        self.chains.get_assets(chain, &wallet.address, timeout).await
    }

    /// Balances of every wallet of the account, queried concurrently. One
    /// failing chain does not hide the others.
    pub async fn get_all_balances(
        &self,
        id: &AccountId,
        timeout: Option<Duration>,
    ) -> Result<Vec<WalletBalance>, WalletError> {
        let account = self.get_account(id).await?;
        let queries = account.wallets().iter().map(|wallet| async move {
            WalletBalance {
                chain: wallet.chain,
                address: wallet.address.clone(),
                index: wallet.index,
                balance: self
                    .chains
                    .get_balance(wallet.chain, &wallet.address, timeout)
                    .await,
            }
        });
        Ok(join_all(queries).await)
    }

    // ─── Transactions ───────────────────────────────────────────────

    pub async fn build_transaction(
        &self,
        id: &AccountId,
        chain: ChainId,
        transfer: &Transfer,
        timeout: Option<Duration>,
    ) -> Result<UnsignedTx, WalletError> {
        let account = self.get_account(id).await?;
        let wallet = sending_wallet(&account, chain, transfer.from_index)?;
        self.chains
            .build_transaction(
                chain,
                &wallet.address,
                &transfer.to,
                transfer.amount,
                transfer.memo.as_deref(),
                timeout,
            )
            .await
    }

    pub async fn estimate_fee(
        &self,
        unsigned: &UnsignedTx,
        timeout: Option<Duration>,
    ) -> Result<Amount, WalletError> {
        self.chains.estimate_fee(unsigned, timeout).await
    }

    /// Sign `unsigned` with the account's key for its sending address.
    ///
    /// View-only accounts fail before any key store or device access.
    /// Mnemonic accounts need `password`; hardware accounts sign on the
    /// device recorded in the account, waiting at most `timeout` (the
    /// configured device timeout when `None`).
    pub async fn sign(
        &self,
        id: &AccountId,
        chain: ChainId,
        unsigned: &UnsignedTx,
        password: Option<SecretString>,
        timeout: Option<Duration>,
    ) -> Result<SignedTx, WalletError> {
        let account = self.get_account(id).await?;
        if matches!(account.kind(), AccountKind::ViewOnly) {
            return Err(WalletError::NotSignable(id.clone()));
        }
        if unsigned.chain != chain {
            return Err(WalletError::InvalidTransaction(format!(
                "transaction is for {}, not {chain}",
                unsigned.chain
            )));
        }
        let adapter = self.chains.adapter(chain)?;
        let wallet = account
            .wallet_by_address(chain, &unsigned.from)
            .ok_or_else(|| WalletError::WalletNotFound {
                account: id.clone(),
                chain,
            })?;
        let public_key = wallet.public_key.clone().ok_or_else(|| {
            WalletError::InvalidAccount(format!("{} has no public key", wallet.address))
        })?;

        let signed = match account.kind() {
            AccountKind::ViewOnly => return Err(WalletError::NotSignable(id.clone())),
            AccountKind::Mnemonic { secret } => {
                let password = password.ok_or(WalletError::PasswordRequired)?;
                let payload = adapter.signing_payload(unsigned)?;
                let keystore = self.accounts.keystore().clone();
                let secret = secret.clone();
                let index = wallet.index;

                let local: LocalSignature = tokio::task::spawn_blocking(move || {
                    keystore.with_decrypted_secret(&secret, &password, |seed| {
                        signer::sign_payload(seed, chain, index, &payload)
                    })
                })
                .await
                .map_err(|e| WalletError::SigningFailed(format!("signing task failed: {e}")))??;

                if local.public_key != public_key {
                    return Err(WalletError::DerivationFailed(format!(
                        "seed does not derive the stored key of {}",
                        wallet.address
                    )));
                }
                adapter.finalize(unsigned, &local.signatures, &local.public_key)?
            }
            AccountKind::Hardware(meta) => {
                let session = self.session_for(&meta.device_id)?;
                session
                    .sign_transaction(adapter, wallet.index, unsigned, &public_key, timeout)
                    .await?
            }
        };

        info!(account = %id, %chain, from = %unsigned.from, tx_id = %signed.tx_id(), "signed transaction");
        Ok(signed)
    }

    /// Submit once. Never retried here.
    pub async fn broadcast(
        &self,
        signed: &SignedTx,
        timeout: Option<Duration>,
    ) -> Result<String, WalletError> {
        self.chains.broadcast(signed, timeout).await
    }

    /// Build, sign and broadcast. A failed signature hands back whatever the
    /// build allocated. `timeout` bounds each step on its own.
    pub async fn transfer(
        &self,
        id: &AccountId,
        chain: ChainId,
        transfer: &Transfer,
        password: Option<SecretString>,
        timeout: Option<Duration>,
    ) -> Result<String, WalletError> {
        let unsigned = self.build_transaction(id, chain, transfer, timeout).await?;
        let signed = match self.sign(id, chain, &unsigned, password, timeout).await {
            Ok(signed) => signed,
            Err(e) => {
                warn!(account = %id, %chain, error = %e, "signing failed, releasing allocation");
                self.chains.release(&unsigned).await?;
                return Err(e);
            }
        };
        self.broadcast(&signed, timeout).await
    }

    // ─── Devices ────────────────────────────────────────────────────

    /// Show the wallet's address on the device and check it matches the
    /// stored one.
    pub async fn verify_hardware_address(
        &self,
        id: &AccountId,
        chain: ChainId,
        index: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<Wallet, WalletError> {
        let account = self.get_account(id).await?;
        let meta = account.hardware_meta().ok_or_else(|| {
            WalletError::InvalidAccount(format!("account {id} is not a hardware account"))
        })?;
        let stored = sending_wallet(&account, chain, index)?;
        let adapter = self.chains.adapter(chain)?;

        let session = self.session_for(&meta.device_id)?;
        let shown = session.get_address(adapter, stored.index, true, timeout).await?;
        if shown.address != stored.address {
            return Err(WalletError::DeviceMismatch {
                expected: stored.address.clone(),
                actual: shown.address,
            });
        }
        Ok(shown)
    }

    /// Devices with an open cached session.
    pub fn open_devices(&self) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut open: Vec<String> = sessions
            .values()
            .filter(|s| s.is_usable())
            .map(|s| s.device_id().to_string())
            .collect();
        open.sort();
        open
    }

    /// Close and forget the cached session for `device_id`, if any.
    pub fn close_device(&self, device_id: &str) {
        let session = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id);
        if let Some(session) = session {
            session.close();
            debug!(device_id, "closed cached session");
        }
    }

    /// The open session for `device_id`, connecting if there is none or the
    /// cached one has disconnected.
    fn session_for(&self, device_id: &str) -> Result<HardwareWalletSession, WalletError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = sessions.get(device_id) {
            if session.is_usable() {
                return Ok(session.clone());
            }
            sessions.remove(device_id);
        }
        let session = self.devices.connect(device_id)?;
        sessions.insert(device_id.to_string(), session.clone());
        Ok(session)
    }
}

fn sending_wallet(account: &Account, chain: ChainId, index: Option<u32>) -> Result<&Wallet, WalletError> {
    let wallet = match index {
        Some(index) => account
            .wallets()
            .iter()
            .find(|w| w.chain == chain && w.index == index),
        None => account.wallet(chain),
    };
    wallet.ok_or_else(|| WalletError::WalletNotFound {
        account: account.id().clone(),
        chain,
    })
}
