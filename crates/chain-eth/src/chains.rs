/// Definition of an EVM-compatible network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvmChain {
    pub chain_id: u64,
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimals: u8,
    pub is_testnet: bool,
}

/// Ethereum Mainnet (chain ID 1).
pub const ETHEREUM: EvmChain = EvmChain {
    chain_id: 1,
    name: "Ethereum",
    symbol: "ETH",
    decimals: 18,
    is_testnet: false,
};

/// Polygon PoS (chain ID 137).
pub const POLYGON: EvmChain = EvmChain {
    chain_id: 137,
    name: "Polygon",
    symbol: "POL",
    decimals: 18,
    is_testnet: false,
};

/// Arbitrum One (chain ID 42161).
pub const ARBITRUM: EvmChain = EvmChain {
    chain_id: 42161,
    name: "Arbitrum One",
    symbol: "ETH",
    decimals: 18,
    is_testnet: false,
};

/// Base (chain ID 8453).
pub const BASE: EvmChain = EvmChain {
    chain_id: 8453,
    name: "Base",
    symbol: "ETH",
    decimals: 18,
    is_testnet: false,
};

/// Sepolia Testnet (chain ID 11155111).
pub const SEPOLIA: EvmChain = EvmChain {
    chain_id: 11155111,
    name: "Sepolia",
    symbol: "ETH",
    decimals: 18,
    is_testnet: true,
};

const ALL_CHAINS: &[&EvmChain] = &[&ETHEREUM, &POLYGON, &ARBITRUM, &BASE, &SEPOLIA];

/// Returns the chain definition for a given chain ID.
pub fn get_chain(chain_id: u64) -> Option<&'static EvmChain> {
    ALL_CHAINS.iter().find(|c| c.chain_id == chain_id).copied()
}

/// All supported EVM chain definitions.
pub fn supported_chains() -> &'static [&'static EvmChain] {
    ALL_CHAINS
}
