use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::apdu::{self, Command};
use super::transport::DeviceTransport;
use crate::account::Wallet;
use crate::chain::{normalize_public_key, ChainAdapter, KeyMaterial};
use crate::config::BusyPolicy;
use crate::error::WalletError;
use crate::hd_derivation::{derivation_path, parse_derivation_path};
use crate::types::{ChainId, SignedTx, UnsignedTx};

/// device id -> generation of the session holding it.
type Claims = Arc<StdMutex<HashMap<String, u64>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    /// A command is in flight.
    Signing,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Connecting,
            2 => SessionState::Ready,
            3 => SessionState::Signing,
            _ => SessionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::Disconnected => 0,
            SessionState::Connecting => 1,
            SessionState::Ready => 2,
            SessionState::Signing => 3,
        }
    }
}

/// Hands out sessions, at most one per device.
pub struct DeviceHub {
    transport: Arc<dyn DeviceTransport>,
    claims: Claims,
    generation: AtomicU64,
    busy_policy: BusyPolicy,
    device_timeout: Duration,
}

impl DeviceHub {
    pub fn new(transport: Arc<dyn DeviceTransport>, busy_policy: BusyPolicy, device_timeout: Duration) -> Self {
        Self {
            transport,
            claims: Arc::new(StdMutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            busy_policy,
            device_timeout,
        }
    }

    pub fn is_claimed(&self, device_id: &str) -> bool {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(device_id)
    }

    /// Open a session on `device_id`. The device stays claimed until the
    /// session is closed, dropped or sees the device disconnect.
    pub fn connect(&self, device_id: &str) -> Result<HardwareWalletSession, WalletError> {
        if !self.transport.is_present(device_id) {
            return Err(WalletError::DeviceNotFound(device_id.to_string()));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
            if claims.contains_key(device_id) {
                return Err(WalletError::DeviceBusy(device_id.to_string()));
            }
            claims.insert(device_id.to_string(), generation);
        }

        let (disconnected, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            device_id: device_id.to_string(),
            generation,
            transport: self.transport.clone(),
            claims: self.claims.clone(),
            state: AtomicU8::new(SessionState::Connecting.as_u8()),
            command_lock: Mutex::new(()),
            abort_pending: AtomicBool::new(false),
            disconnected,
            busy_policy: self.busy_policy,
            default_timeout: self.device_timeout,
        });

        let weak = Arc::downgrade(&inner);
        self.transport.on_disconnect(
            device_id,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.mark_disconnected("device removed");
                }
            }),
        );
        // The device may have gone between the presence check and registration.
        if !self.transport.is_present(device_id) {
            inner.mark_disconnected("device removed while connecting");
            return Err(WalletError::DeviceNotFound(device_id.to_string()));
        }

        inner.set_state(SessionState::Ready);
        info!(device_id, generation, "device session opened");
        Ok(HardwareWalletSession { inner })
    }
}

struct Inner {
    device_id: String,
    generation: u64,
    transport: Arc<dyn DeviceTransport>,
    claims: Claims,
    state: AtomicU8,
    /// One command (all its chunks included) on the wire at a time.
    command_lock: Mutex<()>,
    abort_pending: AtomicBool,
    disconnected: watch::Sender<bool>,
    busy_policy: BusyPolicy,
    default_timeout: Duration,
}

impl Inner {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        if state == SessionState::Disconnected {
            self.state.store(state.as_u8(), Ordering::SeqCst);
            return;
        }
        // Disconnected is terminal.
        let _ = self.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            (current != SessionState::Disconnected.as_u8()).then_some(state.as_u8())
        });
    }

    fn is_disconnected(&self) -> bool {
        *self.disconnected.borrow()
    }

    fn disconnected_error(&self) -> WalletError {
        WalletError::DeviceDisconnected(self.device_id.clone())
    }

    fn mark_disconnected(&self, reason: &str) {
        let was_disconnected = self.disconnected.send_replace(true);
        self.set_state(SessionState::Disconnected);
        self.release_claim();
        if !was_disconnected {
            info!(device_id = %self.device_id, reason, "device session ended");
        }
    }

    fn release_claim(&self) {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        if claims.get(&self.device_id) == Some(&self.generation) {
            claims.remove(&self.device_id);
        }
    }

    async fn send(&self, command: &Command) -> Result<Vec<u8>, WalletError> {
        debug!(
            device_id = %self.device_id,
            ins = command.ins,
            p1 = command.p1,
            p2 = command.p2,
            len = command.data.len(),
            "apdu"
        );
        match self.transport.exchange(&self.device_id, &command.encode()).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.mark_disconnected(&e.to_string());
                Err(self.disconnected_error())
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.release_claim();
    }
}

/// Marks an abort pending unless the command ran to an answer.
struct InFlight<'a> {
    inner: &'a Inner,
    answered: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.answered {
            self.inner.abort_pending.store(true, Ordering::SeqCst);
            warn!(device_id = %self.inner.device_id, "command abandoned, abort pending");
        }
        self.inner.set_state(SessionState::Ready);
    }
}

/// Protocol session with one signing device.
///
/// Clones share the session. The device is released when the session is
/// closed, when the device disconnects, or when the last clone is dropped.
/// After a disconnect every call fails with `DeviceDisconnected`; a new
/// session must be opened.
#[derive(Clone)]
pub struct HardwareWalletSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for HardwareWalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareWalletSession")
            .field("device_id", &self.inner.device_id)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl HardwareWalletSession {
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_usable(&self) -> bool {
        !self.inner.is_disconnected()
    }

    /// Whether the next command will first send `ABORT`.
    pub fn abort_pending(&self) -> bool {
        self.inner.abort_pending.load(Ordering::SeqCst)
    }

    /// End the session and release the device. Safe to call repeatedly.
    pub fn close(&self) {
        self.inner.mark_disconnected("closed");
    }

    /// Public key of the wallet at `index` on `chain`, optionally shown on
    /// the device for the user to confirm.
    pub async fn get_public_key(
        &self,
        chain: ChainId,
        index: u32,
        display: bool,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, WalletError> {
        let path = parse_derivation_path(&derivation_path(chain, index))?;
        let p1 = if display { apdu::P1_CONFIRM } else { apdu::P1_SILENT };
        let command = Command::new(
            apdu::INS_GET_PUBLIC_KEY,
            p1,
            0,
            apdu::key_request(chain.curve(), &path, &[]),
        );
        let replies = self.transact(vec![vec![command]], |_, _| Ok(()), timeout).await?;
        let reply = replies.into_iter().next().unwrap_or_default();
        normalize_public_key(chain, &reply)
    }

    pub async fn get_address(
        &self,
        adapter: &ChainAdapter,
        index: u32,
        display: bool,
        timeout: Option<Duration>,
    ) -> Result<Wallet, WalletError> {
        let public_key = self
            .get_public_key(adapter.chain(), index, display, timeout)
            .await?;
        adapter.derive_address(KeyMaterial::PublicKey(&public_key), index)
    }

    /// Sign `unsigned` with the key at `index`.
    ///
    /// The device's key is read first, inside the same command window, and
    /// must equal `expected_public_key` before any signing request is sent.
    pub async fn sign_transaction(
        &self,
        adapter: &ChainAdapter,
        index: u32,
        unsigned: &UnsignedTx,
        expected_public_key: &[u8],
        timeout: Option<Duration>,
    ) -> Result<SignedTx, WalletError> {
        let chain = adapter.chain();
        let curve = chain.curve();
        let payload = adapter.signing_payload(unsigned)?;
        let expected = normalize_public_key(chain, expected_public_key)?;
        let path = parse_derivation_path(&derivation_path(chain, index))?;

        let mut groups = vec![vec![Command::new(
            apdu::INS_GET_PUBLIC_KEY,
            apdu::P1_SILENT,
            0,
            apdu::key_request(curve, &path, &[]),
        )]];
        groups.extend(
            payload
                .messages
                .iter()
                .map(|message| apdu::chunked(apdu::INS_SIGN, &apdu::key_request(curve, &path, message))),
        );

        let check_key = |group: usize, reply: &[u8]| {
            if group > 0 {
                return Ok(());
            }
            let actual = normalize_public_key(chain, reply)?;
            if actual != expected {
                return Err(WalletError::DeviceMismatch {
                    expected: hex::encode(&expected),
                    actual: hex::encode(&actual),
                });
            }
            Ok(())
        };
        let mut replies = self.transact(groups, check_key, timeout).await?;
        let signatures = replies.split_off(1);

        let signed = adapter.finalize(unsigned, &signatures, &expected)?;
        info!(
            device_id = %self.inner.device_id,
            %chain,
            from = %unsigned.from,
            tx_id = %signed.tx_id(),
            "device signed transaction"
        );
        Ok(signed)
    }

    /// Run command groups back to back under the command lock, returning
    /// the final reply payload of each group. `check` sees each group's
    /// payload before the next group is sent.
    async fn transact(
        &self,
        groups: Vec<Vec<Command>>,
        mut check: impl FnMut(usize, &[u8]) -> Result<(), WalletError> + Send,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<u8>>, WalletError> {
        let inner = &*self.inner;
        let timeout = timeout.unwrap_or(inner.default_timeout);
        if inner.is_disconnected() {
            return Err(inner.disconnected_error());
        }
        let mut disconnected = inner.disconnected.subscribe();

        let _lock = match inner.busy_policy {
            BusyPolicy::Fail => inner
                .command_lock
                .try_lock()
                .map_err(|_| WalletError::SessionBusy(inner.device_id.clone()))?,
            BusyPolicy::Queue => tokio::select! {
                guard = inner.command_lock.lock() => guard,
                _ = disconnected.wait_for(|gone| *gone) => return Err(inner.disconnected_error()),
            },
        };
        if inner.is_disconnected() {
            return Err(inner.disconnected_error());
        }

        inner.set_state(SessionState::Signing);
        let mut in_flight = InFlight {
            inner,
            answered: false,
        };

        let work = async {
            if inner.abort_pending.swap(false, Ordering::SeqCst) {
                debug!(device_id = %inner.device_id, "sending pending abort");
                // Any status is fine; the device is idle afterwards.
                inner.send(&Command::abort()).await?;
            }
            let mut replies = Vec::with_capacity(groups.len());
            for (i, group) in groups.iter().enumerate() {
                let mut last = Vec::new();
                for command in group {
                    last = apdu::check_reply(&inner.send(command).await?)?;
                }
                check(i, &last)?;
                replies.push(last);
            }
            Ok(replies)
        };

        let result = tokio::select! {
            outcome = tokio::time::timeout(timeout, work) => match outcome {
                Ok(result) => result,
                Err(_) => Err(WalletError::DeviceTimeout(inner.device_id.clone())),
            },
            _ = disconnected.wait_for(|gone| *gone) => Err(inner.disconnected_error()),
        };

        match &result {
            Err(WalletError::DeviceTimeout(_)) => {
                warn!(device_id = %inner.device_id, ?timeout, "device timed out");
            }
            Err(e) => {
                in_flight.answered = true;
                debug!(device_id = %inner.device_id, error = %e, "device command failed");
            }
            Ok(_) => in_flight.answered = true,
        }
        result
    }
}
