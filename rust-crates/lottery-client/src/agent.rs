//! Port to the user's signing agent (wallet).
//!
//! The connection manager is built entirely on these primitives; the agent
//! itself (key storage, prompts, chain management) is outside this crate.

use crate::{
    config::NetworkConfig,
    types::{
        Address,
        ChainId,
    },
};
use std::future::Future;
use tokio::sync::mpsc;

/// EIP-1193 provider error code for a prompt the user declined.
pub const USER_REJECTED_CODE: i64 = 4001;
/// EIP-3326 error code: the wallet does not know the requested chain.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("signing agent error {code}: {message}")]
pub struct AgentError {
    pub code: i64,
    pub message: String,
}

impl AgentError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(USER_REJECTED_CODE, "user rejected the request")
    }

    pub fn unrecognized_chain(chain_id: ChainId) -> Self {
        Self::new(
            UNRECOGNIZED_CHAIN_CODE,
            format!("unrecognized chain id {chain_id}"),
        )
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == USER_REJECTED_CODE
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == UNRECOGNIZED_CHAIN_CODE
    }
}

/// Pushed by the agent when the user changes accounts or networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentNotification {
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
}

pub trait SigningAgent: Send + Sync + 'static {
    /// Interactive: may prompt the user to authorize the application.
    fn request_accounts(
        &self,
    ) -> impl Future<Output = Result<Vec<Address>, AgentError>> + Send;

    /// Non-interactive probe for accounts that are already authorized.
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>, AgentError>> + Send;

    fn chain_id(&self) -> impl Future<Output = Result<ChainId, AgentError>> + Send;

    fn switch_chain(
        &self,
        chain_id: ChainId,
    ) -> impl Future<Output = Result<(), AgentError>> + Send;

    fn add_chain(
        &self,
        network: &NetworkConfig,
    ) -> impl Future<Output = Result<(), AgentError>> + Send;

    /// Each call registers a new listener; dropping the receiver unregisters it.
    fn notifications(&self) -> mpsc::UnboundedReceiver<AgentNotification>;
}
