//! Shared fixtures: a scripted chain backend and a simulated signing device.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chain_btc::Utxo;
use chain_tron::RefBlock;
use ed25519_dalek::Signer;
use k256::elliptic_curve::sec1::ToEncodedPoint;

use wallet_core::chain::{
    ChainDataSource, ChainRegistry, DataSourceError, FeeMarket, KeyMaterial, TxContext,
};
use wallet_core::config::{KdfConfig, TimeoutConfig, WalletConfig};
use wallet_core::hardware::apdu::{self, Command};
use wallet_core::hardware::{DeviceTransport, DisconnectCallback, TransportError};
use wallet_core::hd_derivation::{derive_ed25519_key, derive_secp256k1_key};
use wallet_core::mnemonic::mnemonic_to_seed;
use wallet_core::store::{MemoryStore, WalletStore};
use wallet_core::types::{Amount, Asset, ChainFamily, ChainId, CurveType};
use wallet_core::WalletCore;

pub const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// A second phrase, used as the key set of the simulated device.
pub const DEVICE_MNEMONIC: &str =
    "legal winner thank year wave sausage worth useful legal winner thank yellow";

pub fn password() -> secrecy::SecretString {
    secrecy::SecretString::from("correct horse battery staple".to_string())
}

pub fn test_config(default_chains: Vec<ChainId>) -> WalletConfig {
    let fast = crypto_utils::KdfParams::insecure_fast();
    WalletConfig {
        default_chains,
        kdf: KdfConfig {
            memory_kib: fast.memory_kib,
            iterations: fast.iterations,
            parallelism: fast.parallelism,
        },
        timeouts: TimeoutConfig {
            query_ms: 2_000,
            broadcast_ms: 2_000,
            device_ms: 2_000,
        },
        ..WalletConfig::default()
    }
}

// ─── Chain backend ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum BroadcastMode {
    /// Accept and answer with this id.
    Accept(String),
    Reject(String),
    Unavailable(String),
    /// Never answer.
    Hang,
}

/// In-memory chain backend whose answers tests set up front.
pub struct ScriptedSource {
    balances: Mutex<HashMap<(ChainId, String), Amount>>,
    utxos: Mutex<HashMap<String, Vec<Utxo>>>,
    nonces: Mutex<HashMap<String, u64>>,
    broadcast_mode: Mutex<BroadcastMode>,
    query_delay: Mutex<Duration>,
    failing: Mutex<Vec<ChainId>>,
    pub broadcasts: Mutex<Vec<(ChainId, Vec<u8>)>>,
    queried: Mutex<Vec<ChainId>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            balances: Mutex::new(HashMap::new()),
            utxos: Mutex::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
            broadcast_mode: Mutex::new(BroadcastMode::Accept("network-id".into())),
            query_delay: Mutex::new(Duration::ZERO),
            failing: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
        })
    }

    pub fn set_balance(&self, chain: ChainId, address: &str, amount: Amount) {
        self.balances
            .lock()
            .unwrap()
            .insert((chain, address.to_string()), amount);
    }

    pub fn set_utxos(&self, address: &str, utxos: Vec<Utxo>) {
        self.utxos.lock().unwrap().insert(address.to_string(), utxos);
    }

    /// Next EVM nonce, or wallet seqno on TON.
    pub fn set_nonce(&self, address: &str, nonce: u64) {
        self.nonces.lock().unwrap().insert(address.to_string(), nonce);
    }

    pub fn set_broadcast(&self, mode: BroadcastMode) {
        *self.broadcast_mode.lock().unwrap() = mode;
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = delay;
    }

    /// Make every query for `chain` fail as unavailable.
    pub fn fail_chain(&self, chain: ChainId) {
        self.failing.lock().unwrap().push(chain);
    }

    /// Number of data source calls made for `chain`, broadcasts excluded.
    pub fn queries_for(&self, chain: ChainId) -> usize {
        self.queried.lock().unwrap().iter().filter(|c| **c == chain).count()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }

    async fn answer<T>(&self, chain: ChainId, value: T) -> Result<T, DataSourceError> {
        self.queried.lock().unwrap().push(chain);
        let delay = *self.query_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&chain) {
            return Err(DataSourceError::Unavailable("503 service unavailable".into()));
        }
        Ok(value)
    }
}

#[async_trait]
impl ChainDataSource for ScriptedSource {
    async fn balance(&self, chain: ChainId, address: &str) -> Result<Amount, DataSourceError> {
        let balance = self
            .balances
            .lock()
            .unwrap()
            .get(&(chain, address.to_string()))
            .copied()
            .unwrap_or(0);
        self.answer(chain, balance).await
    }

    async fn assets(&self, chain: ChainId, address: &str) -> Result<Vec<Asset>, DataSourceError> {
        let balance = self.balance(chain, address).await?;
        Ok(vec![Asset {
            symbol: chain.symbol().to_string(),
            contract: None,
            decimals: chain.decimals(),
            balance,
        }])
    }

    async fn tx_context(&self, chain: ChainId, address: &str) -> Result<TxContext, DataSourceError> {
        let context = match chain.family() {
            ChainFamily::Bitcoin => TxContext::Bitcoin {
                utxos: self
                    .utxos
                    .lock()
                    .unwrap()
                    .get(address)
                    .cloned()
                    .unwrap_or_default(),
            },
            ChainFamily::Evm => TxContext::Evm {
                nonce: self.nonces.lock().unwrap().get(address).copied().unwrap_or(0),
            },
            ChainFamily::Solana => TxContext::Solana {
                recent_blockhash: [7u8; 32],
            },
            ChainFamily::Tron => TxContext::Tron {
                ref_block: RefBlock {
                    number: 60_000_000,
                    hash: [9u8; 32],
                    timestamp_ms: 1_700_000_000_000,
                },
            },
            ChainFamily::Ton => TxContext::Ton {
                seqno: self
                    .nonces
                    .lock()
                    .unwrap()
                    .get(address)
                    .map_or(0, |n| u32::try_from(*n).unwrap()),
            },
        };
        self.answer(chain, context).await
    }

    async fn fee_market(&self, chain: ChainId) -> Result<FeeMarket, DataSourceError> {
        let market = match chain.family() {
            ChainFamily::Bitcoin => FeeMarket::Bitcoin { sat_per_vbyte: 2 },
            ChainFamily::Evm => FeeMarket::Evm {
                max_fee_per_gas: 30_000_000_000,
                max_priority_fee_per_gas: 1_000_000_000,
            },
            ChainFamily::Solana => FeeMarket::Solana {
                lamports_per_signature: 5_000,
            },
            ChainFamily::Tron => FeeMarket::Tron {
                sun_per_bandwidth: 1_000,
            },
            ChainFamily::Ton => FeeMarket::Ton {
                nanoton_per_transfer: 5_500_000,
            },
        };
        self.answer(chain, market).await
    }

    async fn broadcast(&self, chain: ChainId, raw_tx: &[u8]) -> Result<String, DataSourceError> {
        let mode = self.broadcast_mode.lock().unwrap().clone();
        self.broadcasts.lock().unwrap().push((chain, raw_tx.to_vec()));
        match mode {
            BroadcastMode::Accept(id) => Ok(id),
            BroadcastMode::Reject(reason) => Err(DataSourceError::Rejected(reason)),
            BroadcastMode::Unavailable(reason) => Err(DataSourceError::Unavailable(reason)),
            BroadcastMode::Hang => std::future::pending().await,
        }
    }
}

pub fn registry(source: Arc<ScriptedSource>, chains: &[ChainId]) -> ChainRegistry {
    let source: Arc<dyn ChainDataSource> = source;
    ChainRegistry::new(
        chains.iter().map(|chain| (*chain, source.clone())),
        test_config(chains.to_vec()).timeouts,
    )
}

pub fn utxo(tag: u8, vout: u32, amount_sat: u64) -> Utxo {
    Utxo::new(hex::encode([tag; 32]), vout, amount_sat)
}

// ─── Simulated device ───────────────────────────────────────────────

/// A signing device answering the command set over keys derived from
/// [`DEVICE_MNEMONIC`]. Logs every command it receives.
pub struct SimulatedDevice {
    device_id: String,
    seed: Vec<u8>,
    present: AtomicBool,
    reject: AtomicBool,
    delay: Mutex<Duration>,
    buffer: Mutex<Vec<u8>>,
    callbacks: Mutex<Vec<DisconnectCallback>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub log: Mutex<Vec<Command>>,
}

impl SimulatedDevice {
    pub fn new(device_id: &str) -> Arc<Self> {
        let seed = mnemonic_to_seed(DEVICE_MNEMONIC, "").unwrap().to_vec();
        Arc::new(Self {
            device_id: device_id.to_string(),
            seed,
            present: AtomicBool::new(true),
            reject: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            buffer: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn seed(&self) -> &[u8] {
        &self.seed
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Answer confirmations and signing requests with "rejected by user".
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn unplug(&self) {
        self.present.store(false, Ordering::SeqCst);
        for callback in self.callbacks.lock().unwrap().iter() {
            callback();
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, ins: u8) -> usize {
        self.log.lock().unwrap().iter().filter(|c| c.ins == ins).count()
    }

    /// The key the device holds at `path`, as it reports it: uncompressed
    /// SEC1 for secp256k1, raw 32 bytes for Ed25519.
    fn public_key(&self, curve: CurveType, path: &str) -> Vec<u8> {
        match curve {
            CurveType::Secp256k1 => derive_secp256k1_key(&self.seed, path)
                .unwrap()
                .signing_key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            CurveType::Ed25519 => derive_ed25519_key(&self.seed, path).unwrap().public_key.to_vec(),
        }
    }

    fn sign(&self, curve: CurveType, path: &str, message: &[u8]) -> Vec<u8> {
        match curve {
            CurveType::Secp256k1 => {
                let key = derive_secp256k1_key(&self.seed, path).unwrap();
                let (signature, recovery_id) =
                    key.signing_key.sign_prehash_recoverable(message).unwrap();
                let mut out = signature.to_bytes().to_vec();
                out.push(recovery_id.to_byte());
                out
            }
            CurveType::Ed25519 => {
                let key = derive_ed25519_key(&self.seed, path).unwrap();
                key.signing_key.sign(message).to_bytes().to_vec()
            }
        }
    }

    fn process(&self, command: &Command) -> Vec<u8> {
        let rejected = self.reject.load(Ordering::SeqCst);
        let reply = match command.ins {
            apdu::INS_GET_PUBLIC_KEY => {
                let Some((curve, path, _)) = apdu::parse_key_request(&command.data) else {
                    return status(0x6A80, vec![]);
                };
                if command.p1 == apdu::P1_CONFIRM && rejected {
                    return status(apdu::SW_USER_REJECTED, vec![]);
                }
                self.public_key(curve, &path_string(&path))
            }
            apdu::INS_SIGN => {
                let mut buffer = self.buffer.lock().unwrap();
                if command.p1 == apdu::P1_FIRST_CHUNK {
                    buffer.clear();
                }
                buffer.extend_from_slice(&command.data);
                if command.p2 == apdu::P2_MORE_CHUNKS {
                    return status(apdu::SW_OK, vec![]);
                }
                let request = std::mem::take(&mut *buffer);
                let Some((curve, path, message)) = apdu::parse_key_request(&request) else {
                    return status(0x6A80, vec![]);
                };
                if rejected {
                    return status(apdu::SW_USER_REJECTED, vec![]);
                }
                self.sign(curve, &path_string(&path), message)
            }
            apdu::INS_ABORT => {
                self.buffer.lock().unwrap().clear();
                vec![]
            }
            _ => return status(apdu::SW_INS_NOT_SUPPORTED, vec![]),
        };
        status(apdu::SW_OK, reply)
    }
}

#[async_trait]
impl DeviceTransport for SimulatedDevice {
    async fn exchange(&self, device_id: &str, raw: &[u8]) -> Result<Vec<u8>, TransportError> {
        if device_id != self.device_id || !self.present.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let command = Command::decode(raw).ok_or_else(|| TransportError::Io("bad apdu".into()))?;
        self.log.lock().unwrap().push(command.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self.process(&command);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if !self.present.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        Ok(reply)
    }

    fn is_present(&self, device_id: &str) -> bool {
        device_id == self.device_id && self.present.load(Ordering::SeqCst)
    }

    fn on_disconnect(&self, _device_id: &str, callback: DisconnectCallback) {
        self.callbacks.lock().unwrap().push(callback);
    }
}

fn status(sw: u16, mut payload: Vec<u8>) -> Vec<u8> {
    payload.extend_from_slice(&sw.to_be_bytes());
    payload
}

fn path_string(path: &[u32]) -> String {
    let mut out = String::from("m");
    for component in path {
        if component & 0x8000_0000 != 0 {
            out.push_str(&format!("/{}'", component & 0x7FFF_FFFF));
        } else {
            out.push_str(&format!("/{component}"));
        }
    }
    out
}

/// Check that every multi-chunk signing request went out without any
/// other command in between.
pub fn assert_chunks_contiguous(commands: &[Command]) {
    let mut open = false;
    for (i, command) in commands.iter().enumerate() {
        let is_sign = command.ins == apdu::INS_SIGN;
        if open {
            assert!(
                is_sign && command.p1 == apdu::P1_NEXT_CHUNK,
                "command {i} interleaved into an open signing request: {command:?}"
            );
        } else if is_sign {
            assert_eq!(command.p1, apdu::P1_FIRST_CHUNK, "command {i} continues nothing");
        }
        if is_sign {
            open = command.p2 == apdu::P2_MORE_CHUNKS;
        }
    }
    assert!(!open, "signing request left unfinished");
}

// ─── Wallet ─────────────────────────────────────────────────────────

pub struct Harness {
    pub core: WalletCore,
    pub source: Arc<ScriptedSource>,
    pub device: Arc<SimulatedDevice>,
    pub store: Arc<MemoryStore>,
}

pub async fn harness(chains: &[ChainId]) -> Harness {
    harness_with(chains, test_config(chains.to_vec())).await
}

pub async fn harness_with(chains: &[ChainId], config: WalletConfig) -> Harness {
    wallet_core::logging::init_logging(&config.logging);
    let source = ScriptedSource::new();
    let device = SimulatedDevice::new("nano-1");
    let store = Arc::new(MemoryStore::new());
    let core = WalletCore::open(
        config,
        registry(source.clone(), chains),
        store.clone() as Arc<dyn WalletStore>,
        device.clone(),
    )
    .await
    .unwrap();
    Harness {
        core,
        source,
        device,
        store,
    }
}

/// An address on `chain` held by nobody under test.
pub fn recipient(core: &WalletCore, chain: ChainId) -> String {
    let seed = mnemonic_to_seed(DEVICE_MNEMONIC, "unrelated").unwrap();
    core.chains()
        .derive_address(chain, KeyMaterial::Seed(&seed), 0)
        .unwrap()
        .address
}
