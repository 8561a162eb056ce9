//! Multi-chain wallet core.
//!
//! [`WalletCore`] ties three parts together: the [`AccountRegistry`] (what
//! accounts exist and how each one signs), the [`ChainRegistry`] (one
//! adapter per enabled network) and hardware sessions for device-backed
//! accounts. Seeds stay sealed in the [`SecureKeyStore`] and are only
//! decrypted for the duration of a signature.

pub mod account;
pub mod account_registry;
pub mod chain;
pub mod config;
pub mod error;
pub mod facade;
pub mod hardware;
pub mod hd_derivation;
pub mod keystore;
pub mod logging;
pub mod mnemonic;
pub mod signer;
pub mod store;
pub mod types;

pub use account::{Account, AccountId, AccountKind, AccountType, HardwareDriver, HardwareMeta, Wallet};
pub use account_registry::{AccountRegistry, HardwareKey};
pub use chain::{ChainAdapter, ChainDataSource, ChainRegistry, DataSourceError, FeeMarket, KeyMaterial, TxContext};
pub use config::{BusyPolicy, WalletConfig};
pub use facade::{Transfer, WalletBalance, WalletCore};
pub use error::{Outcome, WalletError};
pub use hardware::{DeviceTransport, HardwareWalletSession, SessionState, TransportError};
pub use keystore::{SecretRef, SecureKeyStore};
pub use store::{JsonFileStore, MemoryStore, WalletStore};
pub use types::{Amount, Asset, ChainFamily, ChainId, CurveType, SignedTx, UnsignedTx};
