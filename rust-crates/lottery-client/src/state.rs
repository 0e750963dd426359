use crate::{
    contract::OperationKind,
    error::ClientError,
    types::{
        Address,
        Amount,
        TxHash,
    },
};
use serde::Serialize;

/// Snapshot of the current round. Only refresh reads write this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundState {
    pub round_id: u64,
    pub prize_pool: Amount,
    pub players_count: u64,
    /// One entry per ticket; an address appears once per entry.
    pub players: Vec<Address>,
    pub is_open: bool,
}

impl Default for RoundState {
    fn default() -> Self {
        Self {
            round_id: 0,
            prize_pool: Amount::ZERO,
            players_count: 0,
            players: Vec::new(),
            is_open: true,
        }
    }
}

/// Fee split as configured in the contract. Percentages are 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FeeInfo {
    pub winner_percentage: u8,
    pub donation_percentage: u8,
    pub admin_percentage: u8,
    pub charity: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DonationInfo {
    pub charity_address: Address,
    pub donation_percentage: u8,
    pub total_donated: Amount,
}

/// A closed round with a recorded winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WinnerRecord {
    pub round: u64,
    pub winner: Address,
    pub guaranteed_prize: Amount,
    pub jackpot_prize: Amount,
    pub total_prize: Amount,
    pub donation: Amount,
    pub jackpot_won: bool,
}

impl WinnerRecord {
    /// Returns `None` if the prize sum does not fit in 128 bits.
    pub fn new(
        round: u64,
        winner: Address,
        guaranteed_prize: Amount,
        jackpot_prize: Amount,
        donation: Amount,
        jackpot_won: bool,
    ) -> Option<Self> {
        let total_prize = guaranteed_prize.checked_add(jackpot_prize)?;
        Some(Self {
            round,
            winner,
            guaranteed_prize,
            jackpot_prize,
            total_prize,
            donation,
            jackpot_won,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Idle,
    Submitting,
    AwaitingConfirmation,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub tx: Option<TxHash>,
    pub status: OperationStatus,
}

/// Everything the synchronizer publishes to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LotteryState {
    pub round: RoundState,
    pub donation: DonationInfo,
    pub fees: FeeInfo,
    pub admin: Option<Address>,
    pub is_owner: bool,
    pub history: Vec<WinnerRecord>,
    pub pending: Option<PendingOperation>,
    pub last_tx: Option<TxHash>,
    pub is_refreshing: bool,
    pub is_bound: bool,
    pub error: Option<ClientError>,
}

impl LotteryState {
    pub fn win_probability(&self) -> Option<f64> {
        match self.round.players_count {
            0 => None,
            n => Some(1.0 / n as f64),
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.pending
            .as_ref()
            .map_or(OperationStatus::Idle, |pending| pending.status)
    }
}
