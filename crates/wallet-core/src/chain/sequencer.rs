//! Per-address allocation state: EVM nonces and reserved Bitcoin outputs.
//!
//! Builds for the same (chain, address) hold the address's lock from the
//! moment they read chain state until the allocation is recorded, so two
//! concurrent builds never pick the same nonce or spend the same output.
//! Different addresses never contend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::ChainId;

#[derive(Debug, Default)]
pub struct AddressState {
    /// Nonce the next build should use at minimum.
    pub next_nonce: Option<u64>,
    /// Outpoints (`txid:vout`) spent by built but unconfirmed transactions.
    pub reserved: HashSet<String>,
}

impl AddressState {
    fn is_idle(&self) -> bool {
        self.next_nonce.is_none() && self.reserved.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Sequencer {
    slots: Mutex<HashMap<(ChainId, String), Arc<Mutex<AddressState>>>>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to the state of `address`, waiting for any build
    /// already holding it.
    pub async fn lock(&self, chain: ChainId, address: &str) -> OwnedMutexGuard<AddressState> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry((chain, address.to_string()))
                .or_default()
                .clone()
        };
        slot.lock_owned().await
    }

    /// Forget everything tracked for `address`. The next build starts from
    /// chain state alone.
    pub async fn reset(&self, chain: ChainId, address: &str) {
        *self.lock(chain, address).await = AddressState::default();
        self.prune(chain, address).await;
    }

    /// Drop the slot for `address` if it tracks nothing and nobody holds it.
    pub async fn prune(&self, chain: ChainId, address: &str) {
        let mut slots = self.slots.lock().await;
        let key = (chain, address.to_string());
        // Slots are only cloned under the map lock, so a count of one means
        // no guard is outstanding and none can be taken while we decide.
        let idle = slots.get(&key).is_some_and(|slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|state| state.is_idle())
        });
        if idle {
            slots.remove(&key);
        }
    }
}
