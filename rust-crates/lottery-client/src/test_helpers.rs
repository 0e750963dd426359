//! Scriptable signing agent and contract for tests.

use crate::{
    agent::{
        AgentError,
        AgentNotification,
        SigningAgent,
    },
    config::NetworkConfig,
    connection::SigningHandle,
    contract::{
        CallError,
        ContractConnector,
        EventSubscription,
        LotteryContract,
        LotteryEvent,
        TxReceipt,
        WriteCall,
    },
    error::ClientError,
    state::FeeInfo,
    types::{
        Address,
        Amount,
        ChainId,
        TxHash,
    },
};
use std::{
    collections::{
        BTreeSet,
        HashMap,
        HashSet,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};
use tokio::sync::{
    mpsc,
    watch,
};

pub fn address(byte: u8) -> Address {
    Address::new([byte; 20])
}

pub fn ether(raw: &str) -> Amount {
    Amount::from_ether_str(raw).unwrap()
}

/// Suspends callers until opened. Opening is permanent.
#[derive(Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Gate {
    fn closed() -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open: Arc::new(open),
        }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    async fn pass(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }
}

fn broadcast<T: Clone>(listeners: &mut Vec<mpsc::UnboundedSender<T>>, message: T) {
    listeners.retain(|listener| listener.send(message.clone()).is_ok());
}

#[derive(Clone)]
pub struct FakeWallet {
    inner: Arc<Mutex<WalletState>>,
}

struct WalletState {
    accounts: Vec<Address>,
    authorized: bool,
    chain_id: ChainId,
    known_chains: HashSet<ChainId>,
    request_accounts_error: Option<AgentError>,
    chain_id_error: Option<AgentError>,
    switch_error: Option<AgentError>,
    add_chain_error: Option<AgentError>,
    request_accounts_calls: usize,
    switch_calls: usize,
    added_chains: Vec<NetworkConfig>,
    prompt_gate: Option<Gate>,
    listeners: Vec<mpsc::UnboundedSender<AgentNotification>>,
}

impl FakeWallet {
    /// Wallet holding `accounts` on `chain_id`, not yet authorized for the app.
    pub fn new(accounts: Vec<Address>, chain_id: ChainId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WalletState {
                accounts,
                authorized: false,
                chain_id,
                known_chains: HashSet::from([chain_id]),
                request_accounts_error: None,
                chain_id_error: None,
                switch_error: None,
                add_chain_error: None,
                request_accounts_calls: 0,
                switch_calls: 0,
                added_chains: Vec::new(),
                prompt_gate: None,
                listeners: Vec::new(),
            })),
        }
    }

    /// Wallet that already granted this app access in an earlier session.
    pub fn authorized(accounts: Vec<Address>, chain_id: ChainId) -> Self {
        let wallet = Self::new(accounts, chain_id);
        wallet.state().authorized = true;
        wallet
    }

    fn state(&self) -> MutexGuard<'_, WalletState> {
        self.inner.lock().unwrap()
    }

    pub fn with_known_chain(self, chain_id: ChainId) -> Self {
        self.state().known_chains.insert(chain_id);
        self
    }

    pub fn fail_request_accounts(&self, error: AgentError) {
        self.state().request_accounts_error = Some(error);
    }

    pub fn fail_chain_id(&self, error: AgentError) {
        self.state().chain_id_error = Some(error);
    }

    pub fn fail_switch(&self, error: AgentError) {
        self.state().switch_error = Some(error);
    }

    pub fn fail_add_chain(&self, error: AgentError) {
        self.state().add_chain_error = Some(error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.request_accounts_error = None;
        state.chain_id_error = None;
        state.switch_error = None;
        state.add_chain_error = None;
    }

    /// Holds account prompts open until the returned gate is opened.
    pub fn hold_prompts(&self) -> Gate {
        let gate = Gate::closed();
        self.state().prompt_gate = Some(gate.clone());
        gate
    }

    pub fn request_accounts_calls(&self) -> usize {
        self.state().request_accounts_calls
    }

    pub fn switch_calls(&self) -> usize {
        self.state().switch_calls
    }

    pub fn added_chains(&self) -> Vec<NetworkConfig> {
        self.state().added_chains.clone()
    }

    pub fn current_chain(&self) -> ChainId {
        self.state().chain_id
    }

    pub fn live_listeners(&self) -> usize {
        let mut state = self.state();
        state.listeners.retain(|listener| !listener.is_closed());
        state.listeners.len()
    }

    /// Simulates the user switching accounts in the wallet.
    pub fn change_accounts(&self, accounts: Vec<Address>) {
        let mut state = self.state();
        state.accounts = accounts.clone();
        broadcast(
            &mut state.listeners,
            AgentNotification::AccountsChanged(accounts),
        );
    }

    /// Simulates the user switching networks in the wallet.
    pub fn change_chain(&self, chain_id: ChainId) {
        let mut state = self.state();
        state.chain_id = chain_id;
        broadcast(&mut state.listeners, AgentNotification::ChainChanged(chain_id));
    }
}

impl SigningAgent for FakeWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, AgentError> {
        let gate = {
            let mut state = self.state();
            state.request_accounts_calls += 1;
            state.prompt_gate.clone()
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let mut state = self.state();
        if let Some(error) = state.request_accounts_error.clone() {
            return Err(error);
        }
        state.authorized = true;
        Ok(state.accounts.clone())
    }

    async fn accounts(&self) -> Result<Vec<Address>, AgentError> {
        let state = self.state();
        Ok(if state.authorized {
            state.accounts.clone()
        } else {
            Vec::new()
        })
    }

    async fn chain_id(&self) -> Result<ChainId, AgentError> {
        let state = self.state();
        match &state.chain_id_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.chain_id),
        }
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), AgentError> {
        let mut state = self.state();
        state.switch_calls += 1;
        if let Some(error) = state.switch_error.clone() {
            return Err(error);
        }
        if !state.known_chains.contains(&chain_id) {
            return Err(AgentError::unrecognized_chain(chain_id));
        }
        state.chain_id = chain_id;
        broadcast(&mut state.listeners, AgentNotification::ChainChanged(chain_id));
        Ok(())
    }

    async fn add_chain(&self, network: &NetworkConfig) -> Result<(), AgentError> {
        let mut state = self.state();
        state.added_chains.push(network.clone());
        if let Some(error) = state.add_chain_error.clone() {
            return Err(error);
        }
        state.known_chains.insert(network.chain_id);
        state.chain_id = network.chain_id;
        broadcast(
            &mut state.listeners,
            AgentNotification::ChainChanged(network.chain_id),
        );
        Ok(())
    }

    fn notifications(&self) -> mpsc::UnboundedReceiver<AgentNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().listeners.push(tx);
        rx
    }
}

/// Every read the contract port exposes, for asserting which calls were made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Read {
    LotteryId,
    PrizePool,
    PlayersCount,
    Players,
    LotteryOpen,
    TotalDonated,
    FeeInfo,
    Admin,
    Winner(u64),
    GuaranteedPrize(u64),
    JackpotPrize(u64),
    DonationAmount(u64),
    JackpotWon(u64),
}

impl Read {
    pub fn round(&self) -> Option<u64> {
        match self {
            Read::Winner(round)
            | Read::GuaranteedPrize(round)
            | Read::JackpotPrize(round)
            | Read::DonationAmount(round)
            | Read::JackpotWon(round) => Some(*round),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundRecord {
    pub winner: Address,
    pub guaranteed_prize: Amount,
    pub jackpot_prize: Amount,
    pub donation: Amount,
    pub jackpot_won: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub account: Address,
    pub call: WriteCall,
    pub tx: TxHash,
}

/// In-memory lottery contract. Confirmed transactions take effect on the
/// fake's state, so a refresh after a command observes the change.
#[derive(Clone)]
pub struct FakeLottery {
    inner: Arc<Mutex<LotteryFakeState>>,
}

struct LotteryFakeState {
    lottery_id: u64,
    prize_pool: Amount,
    players: Vec<Address>,
    players_count_override: Option<u64>,
    open: bool,
    total_donated: Amount,
    fees: FeeInfo,
    admin: Address,
    rounds: HashMap<u64, RoundRecord>,
    reads: Vec<Read>,
    failing_reads: HashSet<Read>,
    failing_rounds: HashSet<u64>,
    read_gate: Option<Gate>,
    submissions: Vec<Submission>,
    submit_error: Option<CallError>,
    confirmation_error: Option<CallError>,
    confirmation_gate: Option<Gate>,
    bind_error: Option<ClientError>,
    bindings: Vec<SigningHandle>,
    listeners: Vec<mpsc::UnboundedSender<LotteryEvent>>,
}

impl FakeLottery {
    /// Open round 1 with no players, administered by `admin`.
    pub fn new(admin: Address) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LotteryFakeState {
                lottery_id: 1,
                prize_pool: Amount::ZERO,
                players: Vec::new(),
                players_count_override: None,
                open: true,
                total_donated: Amount::ZERO,
                fees: FeeInfo {
                    winner_percentage: 80,
                    donation_percentage: 10,
                    admin_percentage: 10,
                    charity: address(0xc4),
                },
                admin,
                rounds: HashMap::new(),
                reads: Vec::new(),
                failing_reads: HashSet::new(),
                failing_rounds: HashSet::new(),
                read_gate: None,
                submissions: Vec::new(),
                submit_error: None,
                confirmation_error: None,
                confirmation_gate: None,
                bind_error: None,
                bindings: Vec::new(),
                listeners: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, LotteryFakeState> {
        self.inner.lock().unwrap()
    }

    pub fn set_round(&self, lottery_id: u64) {
        self.state().lottery_id = lottery_id;
    }

    pub fn set_players(&self, players: Vec<Address>) {
        self.state().players = players;
    }

    /// Makes `getPlayersCount` disagree with `getPlayers`.
    pub fn set_players_count_override(&self, count: u64) {
        self.state().players_count_override = Some(count);
    }

    pub fn set_open(&self, open: bool) {
        self.state().open = open;
    }

    pub fn set_prize_pool(&self, amount: Amount) {
        self.state().prize_pool = amount;
    }

    pub fn set_total_donated(&self, amount: Amount) {
        self.state().total_donated = amount;
    }

    pub fn set_fees(&self, fees: FeeInfo) {
        self.state().fees = fees;
    }

    pub fn set_admin(&self, admin: Address) {
        self.state().admin = admin;
    }

    pub fn set_round_record(&self, round: u64, record: RoundRecord) {
        self.state().rounds.insert(round, record);
    }

    pub fn fail_read(&self, read: Read) {
        self.state().failing_reads.insert(read);
    }

    pub fn restore_reads(&self) {
        let mut state = self.state();
        state.failing_reads.clear();
        state.failing_rounds.clear();
    }

    /// Every per-round read of `round` fails.
    pub fn fail_round(&self, round: u64) {
        self.state().failing_rounds.insert(round);
    }

    pub fn fail_submit(&self, error: CallError) {
        self.state().submit_error = Some(error);
    }

    pub fn fail_confirmation(&self, error: CallError) {
        self.state().confirmation_error = Some(error);
    }

    pub fn fail_bind(&self, error: ClientError) {
        self.state().bind_error = Some(error);
    }

    /// Reads are logged immediately but do not return until the gate opens.
    pub fn hold_reads(&self) -> Gate {
        let gate = Gate::closed();
        self.state().read_gate = Some(gate.clone());
        gate
    }

    /// Confirmation waits do not return until the gate opens.
    pub fn hold_confirmations(&self) -> Gate {
        let gate = Gate::closed();
        self.state().confirmation_gate = Some(gate.clone());
        gate
    }

    pub fn reads(&self) -> Vec<Read> {
        self.state().reads.clone()
    }

    pub fn count_reads(&self, read: Read) -> usize {
        self.state().reads.iter().filter(|r| **r == read).count()
    }

    /// Distinct rounds touched by per-round reads.
    pub fn rounds_read(&self) -> BTreeSet<u64> {
        self.state().reads.iter().filter_map(Read::round).collect()
    }

    pub fn clear_reads(&self) {
        self.state().reads.clear();
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn bindings(&self) -> Vec<SigningHandle> {
        self.state().bindings.clone()
    }

    pub fn live_listeners(&self) -> usize {
        let mut state = self.state();
        state.listeners.retain(|listener| !listener.is_closed());
        state.listeners.len()
    }

    pub fn emit(&self, event: LotteryEvent) {
        broadcast(&mut self.state().listeners, event);
    }

    async fn read<T>(
        &self,
        read: Read,
        value: impl FnOnce(&LotteryFakeState) -> T,
    ) -> Result<T, CallError> {
        let gate = {
            let mut state = self.state();
            state.reads.push(read);
            state.read_gate.clone()
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let state = self.state();
        let round_failed = read
            .round()
            .is_some_and(|round| state.failing_rounds.contains(&round));
        if round_failed || state.failing_reads.contains(&read) {
            return Err(CallError::Transport(format!("{read:?} unavailable")));
        }
        Ok(value(&state))
    }

    fn round_record(state: &LotteryFakeState, round: u64) -> RoundRecord {
        state.rounds.get(&round).copied().unwrap_or_default()
    }
}

fn tx_hash(sequence: u64) -> TxHash {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&sequence.to_be_bytes());
    TxHash::new(bytes)
}

/// A `FakeLottery` bound to one signing handle.
pub struct FakeBinding {
    lottery: FakeLottery,
    signer: SigningHandle,
}

impl ContractConnector for FakeLottery {
    type Contract = FakeBinding;

    fn bind(
        &self,
        _address: Address,
        signer: &SigningHandle,
    ) -> Result<FakeBinding, ClientError> {
        let mut state = self.state();
        if let Some(error) = state.bind_error.clone() {
            return Err(error);
        }
        state.bindings.push(*signer);
        Ok(FakeBinding {
            lottery: self.clone(),
            signer: *signer,
        })
    }
}

impl LotteryContract for FakeBinding {
    async fn lottery_id(&self) -> Result<u64, CallError> {
        self.lottery.read(Read::LotteryId, |s| s.lottery_id).await
    }

    async fn prize_pool(&self) -> Result<Amount, CallError> {
        self.lottery.read(Read::PrizePool, |s| s.prize_pool).await
    }

    async fn players_count(&self) -> Result<u64, CallError> {
        self.lottery
            .read(Read::PlayersCount, |s| {
                s.players_count_override.unwrap_or(s.players.len() as u64)
            })
            .await
    }

    async fn players(&self) -> Result<Vec<Address>, CallError> {
        self.lottery.read(Read::Players, |s| s.players.clone()).await
    }

    async fn lottery_open(&self) -> Result<bool, CallError> {
        self.lottery.read(Read::LotteryOpen, |s| s.open).await
    }

    async fn total_donated(&self) -> Result<Amount, CallError> {
        self.lottery.read(Read::TotalDonated, |s| s.total_donated).await
    }

    async fn fee_info(&self) -> Result<FeeInfo, CallError> {
        self.lottery.read(Read::FeeInfo, |s| s.fees).await
    }

    async fn admin(&self) -> Result<Address, CallError> {
        self.lottery.read(Read::Admin, |s| s.admin).await
    }

    async fn winner(&self, round: u64) -> Result<Address, CallError> {
        self.lottery
            .read(Read::Winner(round), |s| FakeLottery::round_record(s, round).winner)
            .await
    }

    async fn guaranteed_prize(&self, round: u64) -> Result<Amount, CallError> {
        self.lottery
            .read(Read::GuaranteedPrize(round), |s| {
                FakeLottery::round_record(s, round).guaranteed_prize
            })
            .await
    }

    async fn jackpot_prize(&self, round: u64) -> Result<Amount, CallError> {
        self.lottery
            .read(Read::JackpotPrize(round), |s| {
                FakeLottery::round_record(s, round).jackpot_prize
            })
            .await
    }

    async fn donation_amount(&self, round: u64) -> Result<Amount, CallError> {
        self.lottery
            .read(Read::DonationAmount(round), |s| {
                FakeLottery::round_record(s, round).donation
            })
            .await
    }

    async fn jackpot_won(&self, round: u64) -> Result<bool, CallError> {
        self.lottery
            .read(Read::JackpotWon(round), |s| {
                FakeLottery::round_record(s, round).jackpot_won
            })
            .await
    }

    async fn submit(&self, call: WriteCall) -> Result<TxHash, CallError> {
        let mut state = self.lottery.state();
        if let Some(error) = state.submit_error.take() {
            return Err(error);
        }
        let tx = tx_hash(state.submissions.len() as u64 + 1);
        state.submissions.push(Submission {
            account: self.signer.account(),
            call,
            tx,
        });
        Ok(tx)
    }

    async fn wait_for_confirmation(&self, tx: TxHash) -> Result<TxReceipt, CallError> {
        let gate = self.lottery.state().confirmation_gate.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let mut state = self.lottery.state();
        if let Some(error) = state.confirmation_error.take() {
            return Err(error);
        }
        let submission = state
            .submissions
            .iter()
            .find(|submission| submission.tx == tx)
            .cloned()
            .ok_or_else(|| CallError::Transport(format!("unknown transaction {tx}")))?;
        match submission.call {
            WriteCall::Enter { value } => {
                state.players.push(submission.account);
                state.prize_pool = state
                    .prize_pool
                    .checked_add(value)
                    .ok_or_else(|| CallError::Transport("prize pool overflow".into()))?;
            }
            WriteCall::PickWinner | WriteCall::Pause => state.open = false,
            WriteCall::Resume => state.open = true,
        }
        Ok(TxReceipt {
            tx,
            block_number: Some(state.submissions.len() as u64),
        })
    }

    async fn subscribe(&self) -> Result<EventSubscription, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lottery.state().listeners.push(tx);
        Ok(rx)
    }
}
