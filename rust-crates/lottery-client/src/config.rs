use crate::types::{
    Address,
    Amount,
    ChainId,
};
use std::time::Duration;

pub const DEFAULT_HISTORY_DEPTH: u64 = 10;
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(600);
/// 0.01 ETH.
pub const DEFAULT_TICKET_PRICE: Amount = Amount::from_wei(10_000_000_000_000_000);

/// The one network the client expects the wallet to be on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_id: ChainId,
    pub chain_name: String,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl NetworkConfig {
    pub fn sepolia() -> Self {
        Self {
            chain_id: ChainId::SEPOLIA,
            chain_name: "Sepolia".to_string(),
            rpc_urls: vec!["https://rpc.sepolia.org".to_string()],
            block_explorer_urls: vec!["https://sepolia.etherscan.io/".to_string()],
        }
    }

    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_urls = vec![url.into()];
        self
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::sepolia()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `None` keeps the synchronizer inert.
    pub contract_address: Option<Address>,
    pub ticket_price: Amount,
    pub history_depth: u64,
    pub confirmation_timeout: Duration,
    pub network: NetworkConfig,
}

impl ClientConfig {
    pub fn new(contract_address: Address) -> Self {
        Self {
            contract_address: Some(contract_address),
            ..Self::default()
        }
    }

    /// Accepts the raw configured value; anything that is not an address
    /// (including an unfilled placeholder) leaves the client unconfigured.
    pub fn with_raw_contract_address(mut self, raw: Option<&str>) -> Self {
        self.contract_address = raw.and_then(|raw| match raw.parse() {
            Ok(address) => Some(address),
            Err(err) => {
                tracing::warn!(%raw, %err, "ignoring invalid contract address");
                None
            }
        });
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            contract_address: None,
            ticket_price: DEFAULT_TICKET_PRICE,
            history_depth: DEFAULT_HISTORY_DEPTH,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            network: NetworkConfig::default(),
        }
    }
}
