//! Cached read-model of the lottery contract plus its write commands.

use crate::{
    config::ClientConfig,
    connection::{
        ConnectionState,
        SigningHandle,
    },
    contract::{
        CallError,
        ContractConnector,
        EventSubscription,
        LotteryContract,
        LotteryEvent,
        OperationKind,
        TxReceipt,
        WriteCall,
    },
    dispatcher::{
        RefreshAction,
        actions_for,
    },
    error::{
        ClientError,
        ErrorCategory,
        Operation,
    },
    state::{
        DonationInfo,
        FeeInfo,
        LotteryState,
        OperationStatus,
        PendingOperation,
        RoundState,
        WinnerRecord,
    },
    types::Address,
};
use futures::future::{
    BoxFuture,
    FutureExt,
    Shared,
};
use serde::Serialize;
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
    Weak,
    atomic::{
        AtomicU64,
        Ordering,
    },
};
use tokio::{
    sync::{
        oneshot,
        watch,
    },
    task::JoinHandle,
};
use tracing::{
    debug,
    info,
    warn,
};

#[cfg(test)]
mod tests;

/// Resolves to whether the refresh also reloaded winner history.
type RefreshFuture = Shared<BoxFuture<'static, Result<bool, ClientError>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_failed(operation: Operation) -> impl Fn(CallError) -> ClientError {
    move |err| ClientError::ReadFailed {
        operation,
        reason: err.to_string(),
    }
}

fn write_failed(operation: Operation, err: CallError) -> ClientError {
    match err {
        CallError::Rejected => ClientError::UserRejected { operation },
        other => ClientError::WriteFailed {
            operation,
            reason: other.to_string(),
        },
    }
}

/// Proof that the draw preconditions held when it was issued. Only valid for
/// the binding and round it was issued against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrawToken {
    round_id: u64,
    players_count: u64,
    #[serde(skip)]
    binding_id: u64,
}

impl DrawToken {
    pub fn round_id(&self) -> u64 {
        self.round_id
    }

    pub fn players_count(&self) -> u64 {
        self.players_count
    }
}

struct Binding<K> {
    id: u64,
    signer: SigningHandle,
    contract: K,
}

struct EventPump {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Snapshot {
    round: RoundState,
    donation: DonationInfo,
    fees: FeeInfo,
    admin: Address,
}

pub struct LotterySync<C: ContractConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: ContractConnector> Clone for LotterySync<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<C: ContractConnector> {
    connector: C,
    config: ClientConfig,
    state: watch::Sender<LotteryState>,
    binding: Mutex<Option<Arc<Binding<C::Contract>>>>,
    next_binding_id: AtomicU64,
    refresh_in_flight: Mutex<Option<(u64, RefreshFuture)>>,
    active_operation: Mutex<Option<u64>>,
    next_operation_id: AtomicU64,
    pump: Mutex<Option<EventPump>>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ContractConnector> Drop for Inner<C> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().unwrap_or_else(PoisonError::into_inner).take()
        {
            pump.task.abort();
        }
        if let Some(follower) = self
            .follower
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            follower.abort();
        }
    }
}

impl<C: ContractConnector> Inner<C> {
    fn current_binding(&self) -> Option<Arc<Binding<C::Contract>>> {
        lock(&self.binding).clone()
    }

    fn is_current(&self, binding_id: u64) -> bool {
        lock(&self.binding)
            .as_ref()
            .is_some_and(|binding| binding.id == binding_id)
    }

    fn record_error(&self, error: &ClientError) {
        let error = error.clone();
        self.state.send_modify(|state| state.error = Some(error));
    }

    fn clear_error(&self, category: ErrorCategory) {
        self.state.send_if_modified(|state| {
            let matches = state
                .error
                .as_ref()
                .is_some_and(|error| error.category() == category);
            if matches {
                state.error = None;
            }
            matches
        });
    }

    /// Applies a completed refresh. Returns the new round id when history
    /// should be reloaded.
    fn finish_refresh(
        &self,
        binding: &Binding<C::Contract>,
        outcome: &Result<Snapshot, ClientError>,
    ) -> Option<u64> {
        {
            let mut in_flight = lock(&self.refresh_in_flight);
            if in_flight.as_ref().is_some_and(|(id, _)| *id == binding.id) {
                *in_flight = None;
            }
        }
        if !self.is_current(binding.id) {
            debug!(binding = binding.id, "dropping refresh for a replaced binding");
            return None;
        }

        let account = binding.signer.account();
        let mut history_round = None;
        self.state.send_modify(|state| {
            state.is_refreshing = false;
            match outcome {
                Ok(snapshot) => {
                    let round_id = snapshot.round.round_id;
                    if round_id != state.round.round_id && round_id > 1 {
                        history_round = Some(round_id);
                    }
                    state.round = snapshot.round.clone();
                    state.donation = snapshot.donation;
                    state.fees = snapshot.fees;
                    state.admin = Some(snapshot.admin);
                    state.is_owner = snapshot.admin == account;
                    if state
                        .error
                        .as_ref()
                        .is_some_and(|error| error.category() == ErrorCategory::Read)
                    {
                        state.error = None;
                    }
                }
                Err(error) => state.error = Some(error.clone()),
            }
        });
        match outcome {
            Ok(snapshot) => info!(
                round_id = snapshot.round.round_id,
                players = snapshot.round.players_count,
                open = snapshot.round.is_open,
                "lottery state refreshed"
            ),
            Err(err) => warn!(%err, "lottery refresh failed"),
        }
        history_round
    }

    fn apply_history(&self, binding_id: u64, records: &[WinnerRecord]) {
        if !self.is_current(binding_id) {
            return;
        }
        let records = records.to_vec();
        self.state.send_modify(|state| state.history = records);
    }
}

async fn read_snapshot<K: LotteryContract>(contract: &K) -> Result<Snapshot, ClientError> {
    let failed = read_failed(Operation::Refresh);
    let (
        round_id,
        prize_pool,
        players_count,
        players,
        is_open,
        total_donated,
        fees,
        admin,
    ) = futures::try_join!(
        contract.lottery_id(),
        contract.prize_pool(),
        contract.players_count(),
        contract.players(),
        contract.lottery_open(),
        contract.total_donated(),
        contract.fee_info(),
        contract.admin(),
    )
    .map_err(&failed)?;

    if players.len() as u64 != players_count {
        return Err(ClientError::ReadFailed {
            operation: Operation::Refresh,
            reason: format!(
                "player list has {} entries but the contract reports {players_count}",
                players.len()
            ),
        });
    }

    Ok(Snapshot {
        round: RoundState {
            round_id,
            prize_pool,
            players_count,
            players,
            is_open,
        },
        donation: DonationInfo {
            charity_address: fees.charity,
            donation_percentage: fees.donation_percentage,
            total_donated,
        },
        fees,
        admin,
    })
}

async fn load_round<K: LotteryContract>(
    contract: &K,
    round: u64,
) -> Result<Option<WinnerRecord>, ClientError> {
    let (winner, guaranteed_prize, jackpot_prize, donation, jackpot_won) = futures::try_join!(
        contract.winner(round),
        contract.guaranteed_prize(round),
        contract.jackpot_prize(round),
        contract.donation_amount(round),
        contract.jackpot_won(round),
    )
    .map_err(read_failed(Operation::RefreshHistory))?;
    if winner.is_zero() {
        return Ok(None);
    }
    WinnerRecord::new(
        round,
        winner,
        guaranteed_prize,
        jackpot_prize,
        donation,
        jackpot_won,
    )
    .map(Some)
    .ok_or_else(|| ClientError::ReadFailed {
        operation: Operation::RefreshHistory,
        reason: format!("prize total for round {round} overflows"),
    })
}

/// Closed rounds before `round_id`, newest first, at most `depth` of them.
async fn load_history<K: LotteryContract>(
    contract: &K,
    round_id: u64,
    depth: u64,
) -> Vec<WinnerRecord> {
    if round_id <= 1 {
        return Vec::new();
    }
    let oldest = round_id.saturating_sub(depth).max(1);
    let mut records = Vec::new();
    for round in (oldest..round_id).rev() {
        match load_round(contract, round).await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => debug!(round, "no winner recorded"),
            Err(err) => warn!(round, %err, "skipping round in history"),
        }
    }
    info!(rounds = records.len(), "past winners loaded");
    records
}

async fn run_refresh<C: ContractConnector>(
    inner: Weak<Inner<C>>,
    binding: Arc<Binding<C::Contract>>,
) -> Result<bool, ClientError> {
    if let Some(inner) = inner.upgrade() {
        inner.state.send_modify(|state| state.is_refreshing = true);
    }
    let outcome = read_snapshot(&binding.contract).await;
    let history_round = match inner.upgrade() {
        Some(inner) => inner.finish_refresh(&binding, &outcome),
        None => return outcome.map(|_| false),
    };
    let Some(round_id) = history_round else {
        return outcome.map(|_| false);
    };
    let depth = match inner.upgrade() {
        Some(inner) => inner.config.history_depth,
        None => return Ok(false),
    };
    let records = load_history(&binding.contract, round_id, depth).await;
    match inner.upgrade() {
        Some(inner) => {
            inner.apply_history(binding.id, &records);
            Ok(true)
        }
        None => Ok(false),
    }
}

fn spawn_pump<C: ContractConnector>(
    inner: Weak<Inner<C>>,
    mut events: EventSubscription,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut stop => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("event stream closed");
                break;
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let sync = LotterySync { inner };
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = sync.dispatch(&event) => {}
            }
        }
    })
}

/// Releases the pending-operation slot when the command finishes or is dropped.
struct PendingGuard<'a, C: ContractConnector> {
    inner: &'a Inner<C>,
    id: u64,
}

impl<C: ContractConnector> Drop for PendingGuard<'_, C> {
    fn drop(&mut self) {
        let mut active = lock(&self.inner.active_operation);
        if *active == Some(self.id) {
            *active = None;
            self.inner.state.send_modify(|state| state.pending = None);
        }
    }
}

impl<C: ContractConnector> PendingGuard<'_, C> {
    fn set_status(&self, status: OperationStatus) {
        self.inner.state.send_modify(|state| {
            if let Some(pending) = state.pending.as_mut() {
                pending.status = status;
            }
        });
    }
}

impl<C: ContractConnector> LotterySync<C> {
    pub fn new(connector: C, config: ClientConfig) -> Self {
        let (state, _) = watch::channel(LotteryState::default());
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state,
                binding: Mutex::new(None),
                next_binding_id: AtomicU64::new(0),
                refresh_in_flight: Mutex::new(None),
                active_operation: Mutex::new(None),
                next_operation_id: AtomicU64::new(0),
                pump: Mutex::new(None),
                follower: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> LotteryState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LotteryState> {
        self.inner.state.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.inner.binding).is_some()
    }

    /// Rebinds whenever the session's signing handle changes. A change that
    /// arrives while the first refresh of a binding is still reading tears
    /// that binding down at once.
    pub fn follow(&self, mut connection: watch::Receiver<ConnectionState>) {
        let inner = Arc::downgrade(&self.inner);
        let follower = tokio::spawn(async move {
            let mut attached = None;
            let mut first = true;
            loop {
                let signer = connection.borrow_and_update().signing_handle();
                if first || signer != attached {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    let sync = LotterySync { inner };
                    let bound = sync.bind(signer).await;
                    attached = signer;
                    first = false;
                    if bound {
                        let refresh = sync.refresh();
                        tokio::pin!(refresh);
                        loop {
                            tokio::select! {
                                biased;
                                changed = connection.changed() => {
                                    if changed.is_err() {
                                        return;
                                    }
                                    if connection.borrow().signing_handle() != attached {
                                        debug!("signer changed during initial refresh");
                                        break;
                                    }
                                }
                                result = &mut refresh => {
                                    if let Err(err) = result {
                                        debug!(%err, "initial refresh failed");
                                    }
                                    break;
                                }
                            }
                        }
                        if connection.borrow().signing_handle() != attached {
                            continue;
                        }
                    }
                }
                if connection.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = lock(&self.inner.follower).replace(follower) {
            previous.abort();
        }
    }

    /// Replaces the binding and applies its first refresh. The previous
    /// binding's event listener is unregistered before the new one is built.
    /// Without a signer or a configured contract address the synchronizer
    /// stays inert.
    pub async fn attach(&self, signer: Option<SigningHandle>) {
        if self.bind(signer).await
            && let Err(err) = self.refresh().await
        {
            debug!(%err, "initial refresh failed");
        }
    }

    /// Tears down the current binding and builds one for `signer`. Returns
    /// whether a binding is now in place.
    async fn bind(&self, signer: Option<SigningHandle>) -> bool {
        self.teardown().await;

        let (Some(signer), Some(address)) = (signer, self.inner.config.contract_address)
        else {
            debug!("no signer or contract address; synchronizer inert");
            return false;
        };

        let contract = match self.inner.connector.bind(address, &signer) {
            Ok(contract) => contract,
            Err(error) => {
                warn!(%error, %address, "failed to bind lottery contract");
                self.inner.record_error(&error);
                return false;
            }
        };
        let id = self.inner.next_binding_id.fetch_add(1, Ordering::Relaxed) + 1;
        let binding = Arc::new(Binding {
            id,
            signer,
            contract,
        });
        *lock(&self.inner.binding) = Some(binding.clone());
        self.inner.state.send_modify(|state| state.is_bound = true);
        info!(%address, account = %signer.account(), binding = id, "lottery contract bound");

        match binding.contract.subscribe().await {
            Ok(events) => {
                let (stop, stop_rx) = oneshot::channel();
                let task = spawn_pump(Arc::downgrade(&self.inner), events, stop_rx);
                *lock(&self.inner.pump) = Some(EventPump { stop, task });
            }
            Err(err) => warn!(%err, "event subscription failed; relying on manual refresh"),
        }
        true
    }

    async fn teardown(&self) {
        let pump = lock(&self.inner.pump).take();
        let had_binding = lock(&self.inner.binding).take().is_some();
        *lock(&self.inner.refresh_in_flight) = None;
        if let Some(pump) = pump {
            let _ = pump.stop.send(());
            if let Err(err) = pump.task.await
                && !err.is_cancelled()
            {
                warn!(%err, "event listener task failed");
            }
        }
        if had_binding {
            self.inner.state.send_modify(|state| {
                *state = LotteryState {
                    pending: state.pending.take(),
                    last_tx: state.last_tx,
                    error: state.error.take(),
                    ..LotteryState::default()
                };
            });
            debug!("previous binding released");
        }
    }

    /// Stops following the connection and releases the binding.
    pub async fn dispose(&self) {
        if let Some(follower) = lock(&self.inner.follower).take() {
            follower.abort();
        }
        self.teardown().await;
    }

    async fn dispatch(&self, event: &LotteryEvent) {
        debug!(?event, "lottery event received");
        let mut history_loaded = false;
        for action in actions_for(event) {
            match action {
                RefreshAction::Refresh => {
                    let refreshed = self.run_shared_refresh().await;
                    history_loaded = matches!(refreshed, Ok(true));
                }
                RefreshAction::RefreshHistory if history_loaded => {
                    debug!("winner history already reloaded for the new round");
                }
                RefreshAction::RefreshHistory => {
                    self.refresh_history().await;
                }
            }
        }
    }

    /// Re-reads the round, donation and fee state and applies it in one
    /// step. Calls that overlap one already in flight share its outcome.
    /// A no-op while unbound.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.run_shared_refresh().await.map(|_| ())
    }

    async fn run_shared_refresh(&self) -> Result<bool, ClientError> {
        let Some(binding) = self.inner.current_binding() else {
            return Ok(false);
        };
        let refresh = {
            let mut in_flight = lock(&self.inner.refresh_in_flight);
            match in_flight.as_ref() {
                Some((id, refresh)) if *id == binding.id => refresh.clone(),
                _ => {
                    let id = binding.id;
                    let refresh = run_refresh(Arc::downgrade(&self.inner), binding)
                        .boxed()
                        .shared();
                    *in_flight = Some((id, refresh.clone()));
                    refresh
                }
            }
        };
        refresh.await
    }

    /// Reloads winner records for recent closed rounds. Rounds that fail to
    /// load are skipped.
    pub async fn refresh_history(&self) -> Vec<WinnerRecord> {
        let Some(binding) = self.inner.current_binding() else {
            return Vec::new();
        };
        let round_id = self.inner.state.borrow().round.round_id;
        let records =
            load_history(&binding.contract, round_id, self.inner.config.history_depth)
                .await;
        self.inner.apply_history(binding.id, &records);
        records
    }

    fn require_binding(
        &self,
        operation: Operation,
    ) -> Result<Arc<Binding<C::Contract>>, ClientError> {
        self.inner.current_binding().ok_or_else(|| {
            let error = ClientError::NotConnected { operation };
            self.inner.record_error(&error);
            error
        })
    }

    /// Claims the single pending-operation slot after `check` passes.
    /// `Busy` is returned without being recorded.
    fn begin(
        &self,
        kind: OperationKind,
        check: impl FnOnce(&LotteryState) -> Result<(), ClientError>,
    ) -> Result<PendingGuard<'_, C>, ClientError> {
        let operation = kind.operation();
        let mut active = lock(&self.inner.active_operation);
        if active.is_some() {
            debug!(%operation, "rejected while another transaction is pending");
            return Err(ClientError::Busy { operation });
        }
        let checked = check(&self.inner.state.borrow());
        if let Err(error) = checked {
            self.inner.record_error(&error);
            return Err(error);
        }
        let id = self.inner.next_operation_id.fetch_add(1, Ordering::Relaxed) + 1;
        *active = Some(id);
        self.inner.state.send_modify(|state| {
            state.pending = Some(PendingOperation {
                kind,
                tx: None,
                status: OperationStatus::Submitting,
            });
            state.last_tx = None;
        });
        Ok(PendingGuard {
            inner: &self.inner,
            id,
        })
    }

    async fn execute(
        &self,
        binding: &Binding<C::Contract>,
        call: WriteCall,
        guard: PendingGuard<'_, C>,
    ) -> Result<TxReceipt, ClientError> {
        let operation = call.kind().operation();
        let tx = match binding.contract.submit(call).await {
            Ok(tx) => tx,
            Err(CallError::Rejected) => {
                info!(%operation, "transaction cancelled in the wallet");
                return Err(ClientError::UserRejected { operation });
            }
            Err(err) => return Err(self.fail(&guard, write_failed(operation, err))),
        };
        info!(%operation, %tx, "transaction submitted");
        self.inner.state.send_modify(|state| {
            state.last_tx = Some(tx);
            if let Some(pending) = state.pending.as_mut() {
                pending.tx = Some(tx);
                pending.status = OperationStatus::AwaitingConfirmation;
            }
        });

        let timeout = self.inner.config.confirmation_timeout;
        let receipt = match tokio::time::timeout(
            timeout,
            binding.contract.wait_for_confirmation(tx),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(err)) => return Err(self.fail(&guard, write_failed(operation, err))),
            Err(_) => {
                let error = ClientError::WriteFailed {
                    operation,
                    reason: format!("no confirmation for {tx} within {timeout:?}"),
                };
                return Err(self.fail(&guard, error));
            }
        };
        info!(%operation, %tx, block = ?receipt.block_number, "transaction confirmed");
        guard.set_status(OperationStatus::Confirmed);
        self.inner.clear_error(ErrorCategory::Write);
        if let Err(err) = self.refresh().await {
            warn!(%err, "refresh after confirmation failed");
        }
        drop(guard);
        Ok(receipt)
    }

    fn fail(&self, guard: &PendingGuard<'_, C>, error: ClientError) -> ClientError {
        warn!(%error, "transaction failed");
        guard.set_status(OperationStatus::Failed);
        self.inner.record_error(&error);
        error
    }

    /// Buys one ticket at the configured price. Resolves after confirmation.
    pub async fn enter(&self) -> Result<TxReceipt, ClientError> {
        let operation = Operation::Enter;
        let binding = self.require_binding(operation)?;
        let guard = self.begin(OperationKind::Enter, |state| {
            if state.round.is_open {
                Ok(())
            } else {
                Err(ClientError::LotteryClosed { operation })
            }
        })?;
        let value = self.inner.config.ticket_price;
        self.execute(&binding, WriteCall::Enter { value }, guard).await
    }

    fn check_draw(state: &LotteryState) -> Result<(), ClientError> {
        let operation = Operation::PickWinner;
        if !state.is_owner {
            Err(ClientError::NotOwner { operation })
        } else if !state.round.is_open {
            Err(ClientError::LotteryClosed { operation })
        } else if state.round.players_count == 0 {
            Err(ClientError::NoPlayers { operation })
        } else {
            Ok(())
        }
    }

    /// First half of a draw: validates and returns a token describing the
    /// round the draw would close.
    pub fn request_draw(&self) -> Result<DrawToken, ClientError> {
        let operation = Operation::PickWinner;
        let binding = self.require_binding(operation)?;
        if lock(&self.inner.active_operation).is_some() {
            return Err(ClientError::Busy { operation });
        }
        let state = self.inner.state.borrow().clone();
        if let Err(error) = Self::check_draw(&state) {
            self.inner.record_error(&error);
            return Err(error);
        }
        Ok(DrawToken {
            round_id: state.round.round_id,
            players_count: state.round.players_count,
            binding_id: binding.id,
        })
    }

    /// Second half of a draw. Success means the contract accepted the draw
    /// request; the winner is chosen later by the contract.
    pub async fn confirm_draw(&self, token: DrawToken) -> Result<TxReceipt, ClientError> {
        let binding = self.require_binding(Operation::PickWinner)?;
        let guard = self.begin(OperationKind::PickWinner, |state| {
            if token.binding_id != binding.id || token.round_id != state.round.round_id {
                return Err(ClientError::StaleDrawToken);
            }
            Self::check_draw(state)
        })?;
        self.execute(&binding, WriteCall::PickWinner, guard).await
    }

    /// Both draw phases without an intermediate confirmation step.
    pub async fn pick_winner(&self) -> Result<TxReceipt, ClientError> {
        let token = self.request_draw()?;
        self.confirm_draw(token).await
    }

    pub async fn pause(&self) -> Result<TxReceipt, ClientError> {
        self.admin_command(OperationKind::Pause, WriteCall::Pause).await
    }

    pub async fn resume(&self) -> Result<TxReceipt, ClientError> {
        self.admin_command(OperationKind::Resume, WriteCall::Resume).await
    }

    async fn admin_command(
        &self,
        kind: OperationKind,
        call: WriteCall,
    ) -> Result<TxReceipt, ClientError> {
        let operation = kind.operation();
        let binding = self.require_binding(operation)?;
        let guard = self.begin(kind, |state| {
            if state.is_owner {
                Ok(())
            } else {
                Err(ClientError::NotOwner { operation })
            }
        })?;
        self.execute(&binding, call, guard).await
    }
}
