//! Persistence of accounts and sealed secrets.
//!
//! Both are written together as one [`Snapshot`], so an account and its
//! secret are always committed (or lost) as a unit.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::account::AccountRecord;
use crate::error::WalletError;
use crate::keystore::{EncryptedSecret, SecretRef};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub accounts: Vec<AccountRecord>,
    pub secrets: BTreeMap<SecretRef, EncryptedSecret>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            accounts: Vec::new(),
            secrets: BTreeMap::new(),
        }
    }
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// The last committed snapshot, or an empty one if nothing was saved yet.
    async fn load(&self) -> Result<Snapshot, WalletError>;

    /// Replace the stored snapshot. Either the whole snapshot lands or the
    /// previous one stays.
    async fn save(&self, snapshot: &Snapshot) -> Result<(), WalletError>;
}

/// Keeps the snapshot in memory. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn load(&self) -> Result<Snapshot, WalletError> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), WalletError> {
        *self.snapshot.lock().await = snapshot.clone();
        Ok(())
    }
}

/// Stores the snapshot as JSON in a single file.
///
/// Writes go to a uniquely named temporary file in the same directory which
/// is synced and then renamed over the target.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn storage_err(context: &str, path: &Path, e: impl std::fmt::Display) -> WalletError {
    WalletError::Storage(format!("{context} {}: {e}", path.display()))
}

fn read_snapshot(path: &Path) -> Result<Snapshot, WalletError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
        Err(e) => return Err(storage_err("reading", path, e)),
    };
    let snapshot: Snapshot =
        serde_json::from_str(&contents).map_err(|e| storage_err("parsing", path, e))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(WalletError::Storage(format!(
            "{} has snapshot version {}, expected {SNAPSHOT_VERSION}",
            path.display(),
            snapshot.version
        )));
    }
    Ok(snapshot)
}

fn write_snapshot(path: &Path, json: &[u8]) -> Result<(), WalletError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    // A unique name per write, removed on drop unless persisted.
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| storage_err("creating temp file in", dir, e))?;
    tmp.write_all(json)
        .map_err(|e| storage_err("writing", tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| storage_err("syncing", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| storage_err("replacing", path, e.error))?;
    Ok(())
}

#[async_trait]
impl WalletStore for JsonFileStore {
    async fn load(&self) -> Result<Snapshot, WalletError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_snapshot(&path))
            .await
            .map_err(|e| WalletError::Storage(format!("load task failed: {e}")))?
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), WalletError> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| WalletError::Storage(format!("serializing snapshot: {e}")))?;

        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&path, &json))
            .await
            .map_err(|e| WalletError::Storage(format!("save task failed: {e}")))?
    }
}
