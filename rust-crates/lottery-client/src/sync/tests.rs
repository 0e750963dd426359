#![allow(non_snake_case)]

use super::*;
use crate::{
    connection::Session,
    test_helpers::{
        FakeLottery,
        Read,
        RoundRecord,
        address,
        ether,
    },
    types::{
        Amount,
        ChainId,
    },
};
use std::time::Duration;

const ADMIN: u8 = 0xad;
const PLAYER: u8 = 0x01;

fn config() -> ClientConfig {
    ClientConfig::new(address(0xcc))
}

async fn bound_as(lottery: &FakeLottery, account: Address) -> LotterySync<FakeLottery> {
    let sync = LotterySync::new(lottery.clone(), config());
    sync.attach(Some(SigningHandle::new(account, 1))).await;
    sync
}

async fn wait_until(
    sync: &LotterySync<FakeLottery>,
    condition: impl Fn(&LotteryState) -> bool,
) -> LotteryState {
    let mut state = sync.subscribe();
    let reached = tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| condition(s)))
        .await
        .expect("condition not reached in time")
        .expect("synchronizer dropped");
    reached.clone()
}

fn disconnected() -> ConnectionState {
    ConnectionState {
        session: None,
        is_connecting: false,
        error: None,
        expected_chain: ChainId::SEPOLIA,
    }
}

fn connected_as(account: Address, generation: u64) -> ConnectionState {
    ConnectionState {
        session: Some(Session {
            account,
            chain_id: ChainId::SEPOLIA,
            handle: SigningHandle::new(account, generation),
        }),
        ..disconnected()
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn record(winner: u8, guaranteed: &str, jackpot: &str) -> RoundRecord {
    RoundRecord {
        winner: address(winner),
        guaranteed_prize: ether(guaranteed),
        jackpot_prize: ether(jackpot),
        donation: ether("0.001"),
        jackpot_won: jackpot != "0",
    }
}

#[tokio::test]
async fn attach__applies_initial_refresh() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_round(3);
    lottery.set_players(vec![address(1), address(2), address(1)]);
    lottery.set_prize_pool(ether("0.03"));
    lottery.set_total_donated(ether("1.5"));

    // when
    let sync = bound_as(&lottery, address(PLAYER)).await;

    // then
    let state = sync.state();
    assert!(state.is_bound);
    assert_eq!(state.round.round_id, 3);
    assert_eq!(state.round.players_count, 3);
    assert_eq!(state.round.players.len() as u64, state.round.players_count);
    assert_eq!(state.round.prize_pool, ether("0.03"));
    assert_eq!(state.donation.total_donated, ether("1.5"));
    assert_eq!(state.donation.donation_percentage, 10);
    assert_eq!(state.donation.charity_address, address(0xc4));
    assert_eq!(state.admin, Some(address(ADMIN)));
    assert!(!state.is_owner);
    assert!(!state.is_refreshing);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn attach__without_contract_address__stays_inert() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = LotterySync::new(lottery.clone(), ClientConfig::default());

    // when
    sync.attach(Some(SigningHandle::new(address(PLAYER), 1))).await;
    let refreshed = sync.refresh().await;

    // then
    assert_eq!(refreshed, Ok(()));
    assert!(!sync.is_bound());
    assert!(lottery.reads().is_empty());
    assert_eq!(lottery.live_listeners(), 0);
}

#[tokio::test]
async fn attach__bind_failure__records_error_and_stays_unbound() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let error = ClientError::Unknown {
        operation: Operation::Bind,
        reason: "bad interface".into(),
    };
    lottery.fail_bind(error.clone());
    let sync = LotterySync::new(lottery.clone(), config());

    // when
    sync.attach(Some(SigningHandle::new(address(PLAYER), 1))).await;

    // then
    assert!(!sync.is_bound());
    assert_eq!(sync.state().error, Some(error));
}

#[tokio::test]
async fn attach__replacing_binding__unregisters_previous_listener() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    assert_eq!(lottery.live_listeners(), 1);

    // when
    sync.attach(Some(SigningHandle::new(address(ADMIN), 2))).await;

    // then
    assert_eq!(lottery.live_listeners(), 1);
    assert_eq!(lottery.bindings().len(), 2);
    assert!(sync.state().is_owner);
}

#[tokio::test]
async fn attach__none__releases_binding_and_read_model() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_players(vec![address(1)]);
    let sync = bound_as(&lottery, address(PLAYER)).await;

    // when
    sync.attach(None).await;

    // then
    let state = sync.state();
    assert!(!state.is_bound);
    assert_eq!(state.round, RoundState::default());
    assert_eq!(lottery.live_listeners(), 0);
}

#[tokio::test]
async fn follow__signer_removed_during_initial_refresh__unbinds_at_once() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let gate = lottery.hold_reads();
    let (connection, receiver) = watch::channel(disconnected());
    let sync = LotterySync::new(lottery.clone(), config());
    sync.follow(receiver);
    connection.send_replace(connected_as(address(PLAYER), 1));
    wait_until(&sync, |s| s.is_bound && s.is_refreshing).await;

    // when
    connection.send_replace(disconnected());
    let unbound = wait_until(&sync, |s| !s.is_bound).await;
    let entered = sync.enter().await;

    // then
    assert!(!unbound.is_refreshing);
    assert_eq!(
        entered,
        Err(ClientError::NotConnected {
            operation: Operation::Enter
        })
    );
    assert!(lottery.submissions().is_empty());
    assert_eq!(lottery.live_listeners(), 0);
    gate.open();
}

#[tokio::test]
async fn follow__signer_swapped_during_initial_refresh__rebinds_new_signer() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let gate = lottery.hold_reads();
    let (connection, receiver) = watch::channel(disconnected());
    let sync = LotterySync::new(lottery.clone(), config());
    sync.follow(receiver);
    connection.send_replace(connected_as(address(PLAYER), 1));
    wait_until(&sync, |s| s.is_bound && s.is_refreshing).await;

    // when
    connection.send_replace(connected_as(address(ADMIN), 2));
    tokio::time::timeout(Duration::from_secs(5), async {
        while lottery.bindings().len() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("no second binding");
    gate.open();

    // then
    let state = wait_until(&sync, |s| s.is_owner && !s.is_refreshing).await;
    assert!(state.is_bound);
    let bindings = lottery.bindings();
    assert_eq!(bindings[1].account(), address(ADMIN));
    assert_eq!(lottery.live_listeners(), 1);
}

#[tokio::test]
async fn dispose__unregisters_listener() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;

    // when
    sync.dispose().await;

    // then
    assert_eq!(lottery.live_listeners(), 0);
    assert!(!sync.is_bound());
}

#[tokio::test]
async fn refresh__partial_failure__keeps_previous_read_model() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_players(vec![address(1)]);
    let sync = bound_as(&lottery, address(PLAYER)).await;
    let before = sync.state();
    lottery.set_players(vec![address(1), address(2)]);
    lottery.set_round(7);
    lottery.fail_read(Read::TotalDonated);

    // when
    let result = sync.refresh().await;

    // then
    assert!(matches!(
        result,
        Err(ClientError::ReadFailed {
            operation: Operation::Refresh,
            ..
        })
    ));
    let after = sync.state();
    assert_eq!(after.round, before.round);
    assert_eq!(after.error, result.err());
}

#[tokio::test]
async fn refresh__player_count_mismatch__is_a_read_failure() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_players(vec![address(1)]);
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.set_players(vec![address(1), address(2)]);
    lottery.set_players_count_override(5);

    // when
    let result = sync.refresh().await;

    // then
    assert!(matches!(result, Err(ClientError::ReadFailed { .. })));
    let state = sync.state();
    assert_eq!(state.round.players, vec![address(1)]);
    assert_eq!(state.round.players.len() as u64, state.round.players_count);
}

#[tokio::test]
async fn refresh__success__clears_read_error() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.fail_read(Read::Admin);
    sync.refresh().await.unwrap_err();
    assert!(sync.state().error.is_some());
    lottery.restore_reads();

    // when
    sync.refresh().await.unwrap();

    // then
    assert_eq!(sync.state().error, None);
}

#[tokio::test]
async fn refresh__overlapping_calls__share_one_read_batch() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.clear_reads();
    let gate = lottery.hold_reads();

    // when
    let first = tokio::spawn({
        let sync = sync.clone();
        async move { sync.refresh().await }
    });
    let second = tokio::spawn({
        let sync = sync.clone();
        async move { sync.refresh().await }
    });
    settle().await;
    assert!(sync.state().is_refreshing);
    gate.open();

    // then
    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));
    assert_eq!(lottery.count_reads(Read::LotteryId), 1);
    assert_eq!(lottery.count_reads(Read::Players), 1);
    assert!(!sync.state().is_refreshing);
}

#[tokio::test]
async fn refresh__rederives_owner_from_fresh_admin() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(ADMIN)).await;
    assert!(sync.state().is_owner);

    // when
    lottery.set_admin(address(0xee));
    sync.refresh().await.unwrap();

    // then
    assert!(!sync.state().is_owner);
    assert_eq!(sync.state().admin, Some(address(0xee)));
}

#[tokio::test]
async fn refresh__new_round__reloads_history() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.set_round_record(1, record(9, "0.02", "0"));
    lottery.set_round(2);

    // when
    sync.refresh().await.unwrap();

    // then
    let history = sync.state().history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].round, 1);
    assert_eq!(history[0].winner, address(9));
}

#[tokio::test]
async fn refresh_history__round_one__issues_no_reads() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.clear_reads();

    // when
    let history = sync.refresh_history().await;

    // then
    assert!(history.is_empty());
    assert!(lottery.reads().is_empty());
}

#[tokio::test]
async fn refresh_history__round_fifteen__reads_last_ten_rounds_newest_first() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_round(15);
    for round in 1..15 {
        let winner = if round == 9 { 0 } else { round as u8 };
        lottery.set_round_record(round, record(winner, "0.05", "0"));
    }
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.clear_reads();

    // when
    let history = sync.refresh_history().await;

    // then
    assert_eq!(lottery.rounds_read(), (5..=14).collect());
    let rounds: Vec<u64> = history.iter().map(|record| record.round).collect();
    assert_eq!(rounds, vec![14, 13, 12, 11, 10, 8, 7, 6, 5]);
    assert_eq!(sync.state().history, history);
}

#[tokio::test]
async fn refresh_history__failing_round__is_skipped() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_round(4);
    for round in 1..4 {
        lottery.set_round_record(round, record(round as u8, "0.01", "0.5"));
    }
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.fail_round(2);

    // when
    let history = sync.refresh_history().await;

    // then
    let rounds: Vec<u64> = history.iter().map(|record| record.round).collect();
    assert_eq!(rounds, vec![3, 1]);
    assert_eq!(history[0].total_prize, ether("0.51"));
    assert!(history[0].jackpot_won);
}

#[tokio::test]
async fn enter__closed_round__fails_without_submitting() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_open(false);
    let sync = bound_as(&lottery, address(PLAYER)).await;
    let mut observed = sync.subscribe();
    observed.mark_unchanged();

    // when
    let result = sync.enter().await;

    // then
    let expected = ClientError::LotteryClosed {
        operation: Operation::Enter,
    };
    assert_eq!(result, Err(expected.clone()));
    assert!(lottery.submissions().is_empty());
    let state = observed.borrow_and_update().clone();
    assert_eq!(state.pending, None);
    assert_eq!(state.error, Some(expected));
}

#[tokio::test]
async fn enter__unbound__is_not_connected() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = LotterySync::new(lottery.clone(), config());

    // when
    let result = sync.enter().await;

    // then
    assert_eq!(
        result,
        Err(ClientError::NotConnected {
            operation: Operation::Enter
        })
    );
    assert!(lottery.submissions().is_empty());
}

#[tokio::test]
async fn enter__confirmed__pays_ticket_price_and_refreshes() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;

    // when
    let receipt = sync.enter().await.unwrap();

    // then
    let submissions = lottery.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].account, address(PLAYER));
    assert_eq!(
        submissions[0].call,
        WriteCall::Enter {
            value: ether("0.01")
        }
    );
    let state = sync.state();
    assert_eq!(state.pending, None);
    assert_eq!(state.last_tx, Some(receipt.tx));
    assert_eq!(state.round.players, vec![address(PLAYER)]);
    assert_eq!(state.round.prize_pool, ether("0.01"));
    assert_eq!(state.win_probability(), Some(1.0));
}

#[tokio::test]
async fn enter__status_passes_through_awaiting_confirmation() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    let gate = lottery.hold_confirmations();

    // when
    let entering = tokio::spawn({
        let sync = sync.clone();
        async move { sync.enter().await }
    });
    let awaiting =
        wait_until(&sync, |s| s.status() == OperationStatus::AwaitingConfirmation).await;
    gate.open();
    entering.await.unwrap().unwrap();

    // then
    let pending = awaiting.pending.unwrap();
    assert_eq!(pending.kind, OperationKind::Enter);
    assert_eq!(pending.tx, Some(lottery.submissions()[0].tx));
    assert_eq!(sync.state().status(), OperationStatus::Idle);
}

#[tokio::test]
async fn enter__while_awaiting_confirmation__is_busy() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_players(vec![address(3)]);
    let sync = bound_as(&lottery, address(ADMIN)).await;
    let gate = lottery.hold_confirmations();
    let first = tokio::spawn({
        let sync = sync.clone();
        async move { sync.enter().await }
    });
    wait_until(&sync, |s| s.status() == OperationStatus::AwaitingConfirmation).await;

    // when
    let second = sync.enter().await;
    let draw = sync.pick_winner().await;

    // then
    assert_eq!(
        second,
        Err(ClientError::Busy {
            operation: Operation::Enter
        })
    );
    assert_eq!(
        draw,
        Err(ClientError::Busy {
            operation: Operation::PickWinner
        })
    );
    assert_eq!(lottery.submissions().len(), 1);
    assert_eq!(sync.state().error, None);
    gate.open();
    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn enter__user_rejects__returns_to_idle_without_error() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.fail_submit(CallError::Rejected);

    // when
    let result = sync.enter().await;

    // then
    let error = result.unwrap_err();
    assert!(error.is_user_rejection());
    let state = sync.state();
    assert_eq!(state.pending, None);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn enter__confirmation_fails__records_write_failure() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.fail_confirmation(CallError::Reverted {
        reason: "lottery is not open".into(),
    });

    // when
    let result = sync.enter().await;

    // then
    assert!(matches!(
        result,
        Err(ClientError::WriteFailed {
            operation: Operation::Enter,
            ..
        })
    ));
    let state = sync.state();
    assert_eq!(state.pending, None);
    assert_eq!(state.error, result.err());
    assert!(state.last_tx.is_some());
}

#[tokio::test(start_paused = true)]
async fn enter__confirmation_never_arrives__times_out() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    let _gate = lottery.hold_confirmations();

    // when
    let result = sync.enter().await;

    // then
    assert!(matches!(result, Err(ClientError::WriteFailed { .. })));
    assert_eq!(sync.state().pending, None);
}

#[tokio::test]
async fn enter__success_after_failure__clears_write_error() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.fail_submit(CallError::Transport("connection reset".into()));
    sync.enter().await.unwrap_err();
    assert!(sync.state().error.is_some());

    // when
    sync.enter().await.unwrap();

    // then
    assert_eq!(sync.state().error, None);
}

#[tokio::test]
async fn pick_winner__non_owner__fails_without_submitting() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_players(vec![address(3)]);
    let sync = bound_as(&lottery, address(PLAYER)).await;

    // when
    let result = sync.pick_winner().await;

    // then
    assert_eq!(
        result,
        Err(ClientError::NotOwner {
            operation: Operation::PickWinner
        })
    );
    assert!(lottery.submissions().is_empty());
}

#[tokio::test]
async fn pick_winner__no_players__fails_without_submitting() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(ADMIN)).await;

    // when
    let result = sync.pick_winner().await;

    // then
    assert_eq!(
        result,
        Err(ClientError::NoPlayers {
            operation: Operation::PickWinner
        })
    );
    assert!(lottery.submissions().is_empty());
}

#[tokio::test]
async fn pick_winner__owner__submits_draw_and_sees_closed_round() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_players(vec![address(3), address(4)]);
    let sync = bound_as(&lottery, address(ADMIN)).await;

    // when
    sync.pick_winner().await.unwrap();

    // then
    assert_eq!(lottery.submissions()[0].call, WriteCall::PickWinner);
    assert!(!sync.state().round.is_open);
}

#[tokio::test]
async fn request_draw__describes_round_to_be_closed() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_round(6);
    lottery.set_players(vec![address(3), address(4), address(3)]);
    let sync = bound_as(&lottery, address(ADMIN)).await;

    // when
    let token = sync.request_draw().unwrap();

    // then
    assert_eq!(token.round_id(), 6);
    assert_eq!(token.players_count(), 3);
    assert!(lottery.submissions().is_empty());
}

#[tokio::test]
async fn request_draw__closed_round__is_refused() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_players(vec![address(3)]);
    lottery.set_open(false);
    let sync = bound_as(&lottery, address(ADMIN)).await;

    // when
    let result = sync.request_draw();

    // then
    assert_eq!(
        result,
        Err(ClientError::LotteryClosed {
            operation: Operation::PickWinner
        })
    );
}

#[tokio::test]
async fn confirm_draw__round_changed__token_is_stale() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_players(vec![address(3)]);
    let sync = bound_as(&lottery, address(ADMIN)).await;
    let token = sync.request_draw().unwrap();
    lottery.set_round(2);
    sync.refresh().await.unwrap();

    // when
    let result = sync.confirm_draw(token).await;

    // then
    assert_eq!(result, Err(ClientError::StaleDrawToken));
    assert!(lottery.submissions().is_empty());
}

#[tokio::test]
async fn confirm_draw__rebound__token_is_stale() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_players(vec![address(3)]);
    let sync = bound_as(&lottery, address(ADMIN)).await;
    let token = sync.request_draw().unwrap();
    sync.attach(Some(SigningHandle::new(address(ADMIN), 2))).await;

    // when
    let result = sync.confirm_draw(token).await;

    // then
    assert_eq!(result, Err(ClientError::StaleDrawToken));
}

#[tokio::test]
async fn pause_and_resume__owner__toggle_round() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(ADMIN)).await;

    // when
    sync.pause().await.unwrap();
    let paused = sync.state().round.is_open;
    sync.resume().await.unwrap();

    // then
    assert!(!paused);
    assert!(sync.state().round.is_open);
    let calls: Vec<WriteCall> = lottery.submissions().iter().map(|s| s.call).collect();
    assert_eq!(calls, vec![WriteCall::Pause, WriteCall::Resume]);
}

#[tokio::test]
async fn pause__non_owner__is_refused() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;

    // when
    let result = sync.pause().await;

    // then
    assert_eq!(
        result,
        Err(ClientError::NotOwner {
            operation: Operation::Pause
        })
    );
    assert!(lottery.submissions().is_empty());
}

#[tokio::test]
async fn event__entry__triggers_refresh() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.set_players(vec![address(5)]);
    lottery.set_prize_pool(ether("0.01"));

    // when
    lottery.emit(LotteryEvent::Entered {
        player: address(5),
        round_id: 1,
        timestamp: 1_700_000_000,
    });

    // then
    let state = wait_until(&sync, |s| s.round.players_count == 1).await;
    assert_eq!(state.round.players, vec![address(5)]);
    assert_eq!(state.round.prize_pool, ether("0.01"));
}

#[tokio::test]
async fn event__winner__refreshes_round_and_history() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_round(2);
    lottery.set_round_record(1, record(7, "0.04", "0"));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    assert_eq!(sync.state().history.len(), 1);
    lottery.set_round_record(2, record(8, "0.03", "1"));
    lottery.set_round(3);
    lottery.clear_reads();

    // when
    lottery.emit(LotteryEvent::JackpotWinner {
        winner: address(8),
        round_id: 2,
        jackpot: Amount::from_wei(1),
    });

    // then
    let state = wait_until(&sync, |s| s.history.len() == 2).await;
    assert_eq!(state.round.round_id, 3);
    assert_eq!(state.history[0].round, 2);
    assert_eq!(state.history[0].total_prize, ether("1.03"));
    assert!(lottery.count_reads(Read::LotteryId) >= 1);
}

#[tokio::test]
async fn event__winner_with_new_round__loads_history_once() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    lottery.set_round(2);
    lottery.set_round_record(1, record(7, "0.04", "0"));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    lottery.set_round_record(2, record(8, "0.03", "0"));
    lottery.set_round(3);
    lottery.clear_reads();

    // when
    lottery.emit(LotteryEvent::GuaranteedWinner {
        winner: address(8),
        round_id: 2,
        prize: ether("0.03"),
    });
    let state = wait_until(&sync, |s| s.history.len() == 2).await;
    settle().await;

    // then
    assert_eq!(state.round.round_id, 3);
    assert_eq!(lottery.count_reads(Read::Winner(2)), 1);
    assert_eq!(lottery.count_reads(Read::Winner(1)), 1);
}

#[tokio::test]
async fn event__after_rebind__old_listener_gets_nothing() {
    // given
    let lottery = FakeLottery::new(address(ADMIN));
    let sync = bound_as(&lottery, address(PLAYER)).await;
    sync.attach(None).await;
    lottery.clear_reads();

    // when
    lottery.emit(LotteryEvent::RoundReset { new_round_id: 2 });
    settle().await;

    // then
    assert!(lottery.reads().is_empty());
}
