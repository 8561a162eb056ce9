use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Amount in the chain's smallest unit (satoshi, wei, lamport, sun, nanoton).
pub type Amount = u128;

/// Supported blockchain networks. Parsed from and rendered as kebab-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainId {
    Bitcoin,
    BitcoinTestnet,
    Ethereum,
    Polygon,
    Arbitrum,
    Base,
    Sepolia,
    Solana,
    SolanaDevnet,
    Tron,
    TronNile,
    Ton,
    TonTestnet,
}

/// Network families. One chain adapter exists per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    Bitcoin,
    Evm,
    Solana,
    Tron,
    Ton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveType {
    Secp256k1,
    Ed25519,
}

impl ChainId {
    pub const ALL: [ChainId; 13] = [
        ChainId::Bitcoin,
        ChainId::BitcoinTestnet,
        ChainId::Ethereum,
        ChainId::Polygon,
        ChainId::Arbitrum,
        ChainId::Base,
        ChainId::Sepolia,
        ChainId::Solana,
        ChainId::SolanaDevnet,
        ChainId::Tron,
        ChainId::TronNile,
        ChainId::Ton,
        ChainId::TonTestnet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Bitcoin => "bitcoin",
            ChainId::BitcoinTestnet => "bitcoin-testnet",
            ChainId::Ethereum => "ethereum",
            ChainId::Polygon => "polygon",
            ChainId::Arbitrum => "arbitrum",
            ChainId::Base => "base",
            ChainId::Sepolia => "sepolia",
            ChainId::Solana => "solana",
            ChainId::SolanaDevnet => "solana-devnet",
            ChainId::Tron => "tron",
            ChainId::TronNile => "tron-nile",
            ChainId::Ton => "ton",
            ChainId::TonTestnet => "ton-testnet",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            ChainId::Bitcoin | ChainId::BitcoinTestnet => ChainFamily::Bitcoin,
            ChainId::Ethereum
            | ChainId::Polygon
            | ChainId::Arbitrum
            | ChainId::Base
            | ChainId::Sepolia => ChainFamily::Evm,
            ChainId::Solana | ChainId::SolanaDevnet => ChainFamily::Solana,
            ChainId::Tron | ChainId::TronNile => ChainFamily::Tron,
            ChainId::Ton | ChainId::TonTestnet => ChainFamily::Ton,
        }
    }

    /// BIP-44 coin type for this chain
    pub fn coin_type(&self) -> u32 {
        match self {
            ChainId::Bitcoin => 0,
            ChainId::BitcoinTestnet => 1,
            ChainId::Ethereum
            | ChainId::Polygon
            | ChainId::Arbitrum
            | ChainId::Base
            | ChainId::Sepolia => 60,
            ChainId::Solana | ChainId::SolanaDevnet => 501,
            ChainId::Tron | ChainId::TronNile => 195,
            ChainId::Ton | ChainId::TonTestnet => 607,
        }
    }

    /// Whether this chain uses secp256k1 (BTC/EVM/Tron) or Ed25519 (SOL/TON)
    pub fn curve(&self) -> CurveType {
        match self.family() {
            ChainFamily::Solana | ChainFamily::Ton => CurveType::Ed25519,
            _ => CurveType::Secp256k1,
        }
    }

    /// Native token symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            ChainId::Bitcoin | ChainId::BitcoinTestnet => "BTC",
            ChainId::Ethereum | ChainId::Arbitrum | ChainId::Base | ChainId::Sepolia => "ETH",
            ChainId::Polygon => "POL",
            ChainId::Solana | ChainId::SolanaDevnet => "SOL",
            ChainId::Tron | ChainId::TronNile => "TRX",
            ChainId::Ton | ChainId::TonTestnet => "TON",
        }
    }

    /// Decimals of the native token
    pub fn decimals(&self) -> u8 {
        match self.family() {
            ChainFamily::Bitcoin => 8,
            ChainFamily::Evm => 18,
            ChainFamily::Solana | ChainFamily::Ton => 9,
            ChainFamily::Tron => 6,
        }
    }

    pub fn is_testnet(&self) -> bool {
        matches!(
            self,
            ChainId::BitcoinTestnet
                | ChainId::Sepolia
                | ChainId::SolanaDevnet
                | ChainId::TronNile
                | ChainId::TonTestnet
        )
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainId::ALL
            .into_iter()
            .find(|chain| chain.as_str() == s)
            .ok_or_else(|| WalletError::UnsupportedChain(s.to_string()))
    }
}

/// A balance line for one asset held by an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    /// Token contract or mint. `None` for the native asset.
    pub contract: Option<String>,
    pub decimals: u8,
    pub balance: Amount,
}

/// How the messages of a [`SigningPayload`] must be signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// Each message is a 32-byte digest. Signatures are `r || s || v` (65 bytes).
    Secp256k1Prehash,
    /// Each message is signed as-is. Signatures are 64 bytes.
    Ed25519,
}

/// Everything a signer needs to authorize an unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningPayload {
    pub scheme: SignatureScheme,
    pub messages: Vec<Vec<u8>>,
}

/// Chain-specific unsigned transaction body.
#[derive(Debug, Clone)]
pub enum UnsignedBody {
    Bitcoin(chain_btc::UnsignedBtcTx),
    Evm(chain_eth::EthTransaction),
    Solana(chain_sol::SolTransaction),
    Tron(chain_tron::UnsignedTronTx),
    Ton(chain_ton::UnsignedTonTx),
}

/// A transaction built by a chain adapter and not yet signed.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
    pub chain: ChainId,
    pub from: String,
    pub to: String,
    pub amount: Amount,
    /// Fee the transaction commits to (an upper bound on EVM).
    pub fee: Amount,
    pub body: UnsignedBody,
}

/// Chain-specific signed transaction body.
#[derive(Debug, Clone)]
pub enum SignedBody {
    Bitcoin(chain_btc::SignedBtcTx),
    Evm(chain_eth::SignedEthTransaction),
    Solana(chain_sol::SignedSolTransaction),
    Tron(chain_tron::SignedTronTx),
    Ton(chain_ton::SignedTonTx),
}

/// A transaction ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub chain: ChainId,
    pub from: String,
    pub body: SignedBody,
}

impl SignedTx {
    /// The id the network will know this transaction by.
    pub fn tx_id(&self) -> String {
        match &self.body {
            SignedBody::Bitcoin(tx) => tx.txid(),
            SignedBody::Evm(tx) => tx.tx_hash.clone(),
            SignedBody::Solana(tx) => tx.signature_base58(),
            SignedBody::Tron(tx) => tx.txid_hex(),
            SignedBody::Ton(tx) => tx.tx_id(),
        }
    }

    /// Wire bytes handed to the data source for broadcast.
    pub fn raw_bytes(&self) -> Vec<u8> {
        match &self.body {
            SignedBody::Bitcoin(tx) => tx.serialize(),
            SignedBody::Evm(tx) => tx.raw_tx.clone(),
            SignedBody::Solana(tx) => tx.wire(),
            SignedBody::Tron(tx) => tx.encode(),
            SignedBody::Ton(tx) => tx.boc().to_vec(),
        }
    }
}
