//! Signing agent backed by a node or signer that manages keys itself and
//! exposes them over JSON-RPC (a dev node, or a desktop signer such as
//! Frame). Account and network changes are detected by polling.

use crate::rpc::{
    RpcClient,
    node_error,
};
use alloy::{
    primitives,
    providers::Provider,
    transports::TransportError,
};
use lottery_client::{
    Address,
    AgentError,
    AgentNotification,
    ChainId,
    NetworkConfig,
    SigningAgent,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{
    debug,
    warn,
};

/// JSON-RPC "internal error", used when the failure is not the node's own.
const INTERNAL_ERROR_CODE: i64 = -32603;

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND_CODE: i64 = -32601;

fn agent_error(err: TransportError) -> AgentError {
    match node_error(&err) {
        Some((code, message)) => AgentError::new(code, message.to_string()),
        None => AgentError::new(INTERNAL_ERROR_CODE, err.to_string()),
    }
}

/// Narrows the node's accounts to `pinned` when one was requested.
fn select_accounts(
    accounts: Vec<primitives::Address>,
    pinned: Option<Address>,
) -> Vec<Address> {
    let accounts: Vec<Address> = accounts
        .into_iter()
        .map(|account| Address::new(account.into_array()))
        .collect();
    match pinned {
        Some(pinned) if accounts.contains(&pinned) => vec![pinned],
        Some(pinned) => {
            warn!(%pinned, "requested account is not managed by the node");
            Vec::new()
        }
        None => accounts,
    }
}

#[derive(Clone)]
pub struct NodeWallet {
    rpc: RpcClient,
    /// Restricts the session to one of the node's accounts.
    account: Option<Address>,
    poll_interval: Duration,
}

impl NodeWallet {
    pub fn new(rpc: RpcClient, account: Option<Address>, poll_interval: Duration) -> Self {
        Self {
            rpc,
            account,
            poll_interval,
        }
    }

    async fn node_accounts(&self, method: &'static str) -> Result<Vec<Address>, AgentError> {
        let accounts: Vec<primitives::Address> = self
            .rpc
            .provider()
            .raw_request(method.into(), ())
            .await
            .map_err(agent_error)?;
        Ok(select_accounts(accounts, self.account))
    }
}

impl SigningAgent for NodeWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, AgentError> {
        match self.node_accounts("eth_requestAccounts").await {
            // Plain nodes do not implement the interactive method.
            Err(err) if err.code == METHOD_NOT_FOUND_CODE => {
                self.node_accounts("eth_accounts").await
            }
            other => other,
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>, AgentError> {
        self.node_accounts("eth_accounts").await
    }

    async fn chain_id(&self) -> Result<ChainId, AgentError> {
        self.rpc
            .provider()
            .get_chain_id()
            .await
            .map(ChainId)
            .map_err(agent_error)
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), AgentError> {
        let result: Result<serde_json::Value, _> = self
            .rpc
            .provider()
            .raw_request(
                "wallet_switchEthereumChain".into(),
                json!([{ "chainId": chain_id.to_string() }]),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = agent_error(err);
                if err.code == METHOD_NOT_FOUND_CODE && self.chain_id().await? == chain_id {
                    return Ok(());
                }
                Err(err)
            }
        }
    }

    async fn add_chain(&self, network: &NetworkConfig) -> Result<(), AgentError> {
        let params = json!([{
            "chainId": network.chain_id.to_string(),
            "chainName": network.chain_name,
            "rpcUrls": network.rpc_urls,
            "blockExplorerUrls": network.block_explorer_urls,
            "nativeCurrency": { "name": "Ether", "symbol": "ETH", "decimals": 18 },
        }]);
        self.rpc
            .provider()
            .raw_request::<_, serde_json::Value>("wallet_addEthereumChain".into(), params)
            .await
            .map(|_| ())
            .map_err(agent_error)
    }

    fn notifications(&self) -> mpsc::UnboundedReceiver<AgentNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        let wallet = self.clone();
        tokio::spawn(async move {
            let mut accounts = wallet.accounts().await.ok();
            let mut chain = wallet.chain_id().await.ok();
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(wallet.poll_interval) => {}
                }
                match wallet.accounts().await {
                    Ok(current) if accounts.as_ref() != Some(&current) => {
                        debug!(?current, "node accounts changed");
                        accounts = Some(current.clone());
                        if tx.send(AgentNotification::AccountsChanged(current)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => debug!(%err, "account poll failed"),
                }
                match wallet.chain_id().await {
                    Ok(current) if chain != Some(current) => {
                        chain = Some(current);
                        if tx.send(AgentNotification::ChainChanged(current)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => debug!(%err, "chain poll failed"),
                }
            }
        });
        rx
    }
}
