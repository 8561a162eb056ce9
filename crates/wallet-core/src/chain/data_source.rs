use async_trait::async_trait;
use chain_btc::Utxo;
use chain_tron::RefBlock;
use thiserror::Error;

use crate::types::{Amount, Asset, ChainId};

#[derive(Debug, Error)]
pub enum DataSourceError {
    /// The backend could not answer (network, rate limit, bad response).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The network refused a submitted transaction.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Chain state a transaction is built against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxContext {
    Bitcoin { utxos: Vec<Utxo> },
    /// Next nonce according to the chain, pending transactions included.
    Evm { nonce: u64 },
    Solana { recent_blockhash: [u8; 32] },
    Tron { ref_block: RefBlock },
    /// Wallet contract seqno; 0 for a wallet that was never deployed.
    Ton { seqno: u32 },
}

/// Current fee levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMarket {
    Bitcoin {
        sat_per_vbyte: u64,
    },
    Evm {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    Solana {
        lamports_per_signature: u64,
    },
    Tron {
        sun_per_bandwidth: u64,
    },
    /// Forward and compute fees of a simple wallet transfer.
    Ton {
        nanoton_per_transfer: u64,
    },
}

/// Read and submit access to a chain's indexer or node.
///
/// Implementations do no retrying of their own beyond what their transport
/// does. Every method is called with a timeout around it.
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    /// Native balance in the chain's smallest unit.
    async fn balance(&self, chain: ChainId, address: &str) -> Result<Amount, DataSourceError>;

    async fn assets(&self, chain: ChainId, address: &str) -> Result<Vec<Asset>, DataSourceError>;

    async fn tx_context(&self, chain: ChainId, address: &str) -> Result<TxContext, DataSourceError>;

    async fn fee_market(&self, chain: ChainId) -> Result<FeeMarket, DataSourceError>;

    /// Submit raw transaction bytes and return the id the network assigned.
    async fn broadcast(&self, chain: ChainId, raw_tx: &[u8]) -> Result<String, DataSourceError>;
}
