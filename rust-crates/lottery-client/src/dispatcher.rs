//! Maps remote events to the refreshes they require.

use crate::contract::LotteryEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshAction {
    Refresh,
    RefreshHistory,
}

pub fn actions_for(event: &LotteryEvent) -> &'static [RefreshAction] {
    match event {
        LotteryEvent::GuaranteedWinner { .. } | LotteryEvent::JackpotWinner { .. } => {
            &[RefreshAction::Refresh, RefreshAction::RefreshHistory]
        }
        LotteryEvent::Entered { .. }
        | LotteryEvent::JackpotMissed { .. }
        | LotteryEvent::DonationMade { .. }
        | LotteryEvent::RoundReset { .. } => &[RefreshAction::Refresh],
    }
}
