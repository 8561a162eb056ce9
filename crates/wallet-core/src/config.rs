//! Wallet configuration, loaded from TOML. Every section has defaults, so an
//! empty document is a valid configuration.

use std::path::Path;
use std::time::Duration;

use crypto_utils::KdfParams;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::types::ChainId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Chains a new mnemonic account gets a wallet on.
    pub default_chains: Vec<ChainId>,
    pub kdf: KdfConfig,
    pub timeouts: TimeoutConfig,
    pub hardware: HardwareConfig,
    pub logging: LoggingConfig,
}

/// Argon2id cost for newly stored secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// Defaults used when a caller passes no timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub query_ms: u64,
    pub broadcast_ms: u64,
    pub device_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Indices per chain a hardware account may hold, primary included.
    pub max_indices_per_account: u32,
    pub busy_policy: BusyPolicy,
}

/// What a session does with a command that arrives while another is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait for the in-flight command to finish.
    Queue,
    /// Fail immediately with `SessionBusy`.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive. `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            default_chains: vec![
                ChainId::Bitcoin,
                ChainId::Ethereum,
                ChainId::Solana,
                ChainId::Tron,
            ],
            kdf: KdfConfig::default(),
            timeouts: TimeoutConfig::default(),
            hardware: HardwareConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        let params = KdfParams::default();
        Self {
            memory_kib: params.memory_kib,
            iterations: params.iterations,
            parallelism: params.parallelism,
        }
    }
}

impl KdfConfig {
    pub fn params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.memory_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            query_ms: 10_000,
            broadcast_ms: 30_000,
            device_ms: 120_000,
        }
    }
}

impl TimeoutConfig {
    pub fn query(&self) -> Duration {
        Duration::from_millis(self.query_ms)
    }

    pub fn broadcast(&self) -> Duration {
        Duration::from_millis(self.broadcast_ms)
    }

    pub fn device(&self) -> Duration {
        Duration::from_millis(self.device_ms)
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            max_indices_per_account: 5,
            busy_policy: BusyPolicy::Queue,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

impl WalletConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, WalletError> {
        let config: WalletConfig =
            toml::from_str(s).map_err(|e| WalletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WalletError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.default_chains.is_empty() {
            return Err(WalletError::Config("default_chains must not be empty".into()));
        }
        let t = &self.timeouts;
        if t.query_ms == 0 || t.broadcast_ms == 0 || t.device_ms == 0 {
            return Err(WalletError::Config("timeouts must be greater than zero".into()));
        }
        if self.hardware.max_indices_per_account == 0 {
            return Err(WalletError::Config(
                "hardware.max_indices_per_account must be at least 1".into(),
            ));
        }
        self.kdf
            .params()
            .validate()
            .map_err(|e| WalletError::Config(format!("kdf: {e}")))?;
        Ok(())
    }
}
