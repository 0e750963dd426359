//! Port to the deployed lottery contract.

use crate::{
    connection::SigningHandle,
    error::{
        ClientError,
        Operation,
    },
    state::FeeInfo,
    types::{
        Address,
        Amount,
        TxHash,
    },
};
use serde::Serialize;
use std::future::Future;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The user declined the transaction prompt.
    #[error("user rejected the transaction")]
    Rejected,
    #[error("execution reverted: {reason}")]
    Reverted { reason: String },
    #[error("transport error: {0}")]
    Transport(String),
}

/// State-changing calls. Only `Enter` carries a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCall {
    Enter { value: Amount },
    PickWinner,
    Pause,
    Resume,
}

impl WriteCall {
    pub fn kind(&self) -> OperationKind {
        match self {
            WriteCall::Enter { .. } => OperationKind::Enter,
            WriteCall::PickWinner => OperationKind::PickWinner,
            WriteCall::Pause => OperationKind::Pause,
            WriteCall::Resume => OperationKind::Resume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Enter,
    PickWinner,
    Pause,
    Resume,
}

impl OperationKind {
    pub fn operation(self) -> Operation {
        match self {
            OperationKind::Enter => Operation::Enter,
            OperationKind::PickWinner => Operation::PickWinner,
            OperationKind::Pause => Operation::Pause,
            OperationKind::Resume => Operation::Resume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub tx: TxHash,
    pub block_number: Option<u64>,
}

/// Remote events. Payloads are refresh triggers, never the source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LotteryEvent {
    Entered {
        player: Address,
        round_id: u64,
        timestamp: u64,
    },
    GuaranteedWinner {
        winner: Address,
        round_id: u64,
        prize: Amount,
    },
    JackpotWinner {
        winner: Address,
        round_id: u64,
        jackpot: Amount,
    },
    JackpotMissed {
        round_id: u64,
        carry_over: Amount,
    },
    DonationMade {
        charity: Address,
        round_id: u64,
        amount: Amount,
    },
    RoundReset {
        new_round_id: u64,
    },
}

/// Live event listener registered against one binding. Dropping or closing
/// the receiver unregisters it on the contract side.
pub type EventSubscription = mpsc::UnboundedReceiver<LotteryEvent>;

pub trait LotteryContract: Send + Sync + 'static {
    fn lottery_id(&self) -> impl Future<Output = Result<u64, CallError>> + Send;
    fn prize_pool(&self) -> impl Future<Output = Result<Amount, CallError>> + Send;
    fn players_count(&self) -> impl Future<Output = Result<u64, CallError>> + Send;
    fn players(&self) -> impl Future<Output = Result<Vec<Address>, CallError>> + Send;
    fn lottery_open(&self) -> impl Future<Output = Result<bool, CallError>> + Send;
    fn total_donated(&self) -> impl Future<Output = Result<Amount, CallError>> + Send;
    fn fee_info(&self) -> impl Future<Output = Result<FeeInfo, CallError>> + Send;
    fn admin(&self) -> impl Future<Output = Result<Address, CallError>> + Send;

    fn winner(&self, round: u64)
    -> impl Future<Output = Result<Address, CallError>> + Send;
    fn guaranteed_prize(
        &self,
        round: u64,
    ) -> impl Future<Output = Result<Amount, CallError>> + Send;
    fn jackpot_prize(
        &self,
        round: u64,
    ) -> impl Future<Output = Result<Amount, CallError>> + Send;
    fn donation_amount(
        &self,
        round: u64,
    ) -> impl Future<Output = Result<Amount, CallError>> + Send;
    fn jackpot_won(&self, round: u64)
    -> impl Future<Output = Result<bool, CallError>> + Send;

    /// Signs and broadcasts; resolves once the transaction has a hash.
    fn submit(
        &self,
        call: WriteCall,
    ) -> impl Future<Output = Result<TxHash, CallError>> + Send;

    fn wait_for_confirmation(
        &self,
        tx: TxHash,
    ) -> impl Future<Output = Result<TxReceipt, CallError>> + Send;

    fn subscribe(
        &self,
    ) -> impl Future<Output = Result<EventSubscription, CallError>> + Send;
}

/// Builds a contract binding for a signing handle.
pub trait ContractConnector: Send + Sync + 'static {
    type Contract: LotteryContract;

    fn bind(
        &self,
        address: Address,
        signer: &SigningHandle,
    ) -> Result<Self::Contract, ClientError>;
}
