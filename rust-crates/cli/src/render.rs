use chrono::Local;
use lottery_client::{
    Address,
    Amount,
    ChainId,
    ConnectionState,
    LotteryState,
    OperationStatus,
    TxHash,
    TxReceipt,
    WinnerRecord,
};
use serde::Serialize;
use std::fmt::Write as _;

/// Machine-readable status: the published state plus the connection facts
/// the CLI knows about.
#[derive(Serialize)]
pub struct StatusView<'a> {
    pub account: Option<Address>,
    pub chain_id: Option<ChainId>,
    pub correct_network: bool,
    pub ticket_price: Amount,
    pub win_probability: Option<f64>,
    #[serde(flatten)]
    pub state: &'a LotteryState,
}

impl<'a> StatusView<'a> {
    pub fn new(
        connection: &ConnectionState,
        state: &'a LotteryState,
        ticket_price: Amount,
    ) -> Self {
        Self {
            account: connection.account(),
            chain_id: connection.chain_id(),
            correct_network: connection.is_correct_network(),
            ticket_price,
            win_probability: state.win_probability(),
            state,
        }
    }
}

fn status_label(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Idle => "idle",
        OperationStatus::Submitting => "waiting for wallet",
        OperationStatus::AwaitingConfirmation => "awaiting confirmation",
        OperationStatus::Confirmed => "confirmed",
        OperationStatus::Failed => "failed",
    }
}

pub fn status(
    connection: &ConnectionState,
    state: &LotteryState,
    ticket_price: Amount,
) -> String {
    let mut out = String::new();
    match connection.account() {
        Some(account) if connection.is_correct_network() => {
            let _ = writeln!(out, "Account:      {account}");
        }
        Some(account) => {
            let _ = writeln!(
                out,
                "Account:      {account} (wrong network, expected {})",
                connection.expected_chain
            );
        }
        None => {
            let _ = writeln!(out, "Account:      not connected");
        }
    }

    let round = &state.round;
    let open = if round.is_open { "open" } else { "closed" };
    let _ = writeln!(out, "Round:        #{} ({open})", round.round_id);
    let _ = writeln!(out, "Prize pool:   {}", round.prize_pool);
    let _ = writeln!(out, "Ticket price: {ticket_price}");
    match state.win_probability() {
        Some(p) => {
            let _ = writeln!(
                out,
                "Players:      {} (one ticket wins with {:.2}%)",
                round.players_count,
                p * 100.0
            );
        }
        None => {
            let _ = writeln!(out, "Players:      0");
        }
    }

    let fees = &state.fees;
    let _ = writeln!(
        out,
        "Fee split:    winner {}% / charity {}% / admin {}%",
        fees.winner_percentage, fees.donation_percentage, fees.admin_percentage
    );
    let _ = writeln!(
        out,
        "Charity:      {} (donated {} in total)",
        state.donation.charity_address, state.donation.total_donated
    );
    if let Some(admin) = state.admin {
        let marker = if state.is_owner { " (you)" } else { "" };
        let _ = writeln!(out, "Admin:        {admin}{marker}");
    }
    if let Some(pending) = &state.pending {
        let tx = pending
            .tx
            .map(|tx| format!(" {tx}"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "Last command: {:?} {}{tx}",
            pending.kind,
            status_label(pending.status)
        );
    }
    if let Some(error) = state.error.as_ref().or(connection.error.as_ref()) {
        let _ = writeln!(out, "Error:        {error}");
    }
    out
}

pub fn history(records: &[WinnerRecord]) -> String {
    if records.is_empty() {
        return "No completed rounds yet.\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        let jackpot = if record.jackpot_won {
            format!(" incl. jackpot {}", record.jackpot_prize)
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "#{:<5} {}  won {}{jackpot}, donated {}",
            record.round, record.winner, record.total_prize, record.donation
        );
    }
    out
}

pub fn tx_link(explorer: Option<&str>, tx: TxHash) -> Option<String> {
    explorer.map(|base| format!("{}/tx/{tx}", base.trim_end_matches('/')))
}

pub fn receipt(action: &str, receipt: &TxReceipt, explorer: Option<&str>) -> String {
    let block = receipt
        .block_number
        .map(|block| format!(" in block {block}"))
        .unwrap_or_default();
    let mut line = format!("{action} confirmed{block}: {}", receipt.tx);
    if let Some(link) = tx_link(explorer, receipt.tx) {
        let _ = write!(line, "\n  {link}");
    }
    line
}

/// Prefix for lines printed while following the lottery.
pub fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
