use crate::types::ChainId;
use serde::Serialize;
use std::fmt;

/// Public operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Connect,
    SwitchNetwork,
    Bind,
    Refresh,
    RefreshHistory,
    Enter,
    PickWinner,
    Pause,
    Resume,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::SwitchNetwork => "switch network",
            Operation::Bind => "bind contract",
            Operation::Refresh => "refresh",
            Operation::RefreshHistory => "refresh history",
            Operation::Enter => "enter",
            Operation::PickWinner => "pick winner",
            Operation::Pause => "pause",
            Operation::Resume => "resume",
        };
        write!(f, "{name}")
    }
}

/// Errors are cleared by the next successful operation of the same category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Connection,
    Network,
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientError {
    #[error("no signing agent is available")]
    ProviderMissing,
    #[error("{operation} was rejected in the wallet")]
    UserRejected { operation: Operation },
    #[error("wrong network: expected {expected}, wallet is on {actual}")]
    NetworkMismatch { expected: ChainId, actual: ChainId },
    #[error("switching to network {chain_id} failed: {reason}")]
    NetworkSwitchFailed { chain_id: ChainId, reason: String },
    #[error("{operation} failed reading contract state: {reason}")]
    ReadFailed { operation: Operation, reason: String },
    #[error("{operation} transaction failed: {reason}")]
    WriteFailed { operation: Operation, reason: String },
    #[error("{operation} rejected: another transaction is still pending")]
    Busy { operation: Operation },
    #[error("{operation} requires a connected wallet and a bound contract")]
    NotConnected { operation: Operation },
    #[error("{operation} rejected: the current round is closed")]
    LotteryClosed { operation: Operation },
    #[error("{operation} is restricted to the contract administrator")]
    NotOwner { operation: Operation },
    #[error("{operation} rejected: the round has no players")]
    NoPlayers { operation: Operation },
    #[error("draw confirmation is stale; request a new draw")]
    StaleDrawToken,
    #[error("{operation} failed: {reason}")]
    Unknown { operation: Operation, reason: String },
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::ProviderMissing
            | ClientError::UserRejected {
                operation: Operation::Connect,
            }
            | ClientError::Unknown {
                operation: Operation::Connect,
                ..
            } => ErrorCategory::Connection,
            ClientError::NetworkMismatch { .. }
            | ClientError::NetworkSwitchFailed { .. }
            | ClientError::UserRejected {
                operation: Operation::SwitchNetwork,
            } => ErrorCategory::Network,
            ClientError::ReadFailed { .. }
            | ClientError::UserRejected {
                operation: Operation::Refresh | Operation::RefreshHistory | Operation::Bind,
            }
            | ClientError::Unknown {
                operation: Operation::Refresh | Operation::RefreshHistory | Operation::Bind,
                ..
            } => ErrorCategory::Read,
            ClientError::WriteFailed { .. }
            | ClientError::Busy { .. }
            | ClientError::NotConnected { .. }
            | ClientError::LotteryClosed { .. }
            | ClientError::NotOwner { .. }
            | ClientError::NoPlayers { .. }
            | ClientError::StaleDrawToken
            | ClientError::UserRejected { .. }
            | ClientError::Unknown { .. } => ErrorCategory::Write,
        }
    }

    /// Wallet prompt declined by the user; nothing changed remotely.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, ClientError::UserRejected { .. })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, ClientError::Busy { .. })
    }
}
