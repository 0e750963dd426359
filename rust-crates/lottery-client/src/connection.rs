//! Single session with the user's signing agent.

use crate::{
    agent::{
        AgentError,
        AgentNotification,
        SigningAgent,
    },
    config::NetworkConfig,
    error::{
        ClientError,
        ErrorCategory,
        Operation,
    },
    types::{
        Address,
        ChainId,
    },
};
use std::sync::{
    Arc,
    Mutex,
    PoisonError,
    Weak,
    atomic::{
        AtomicU64,
        Ordering,
    },
};
use tokio::{
    sync::watch,
    task::JoinHandle,
};
use tracing::{
    debug,
    info,
    warn,
};


/// Authority to sign as `account`. A new generation is issued for every
/// connect and every account swap, so bindings built from an older handle
/// can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigningHandle {
    account: Address,
    generation: u64,
}

impl SigningHandle {
    pub fn new(account: Address, generation: u64) -> Self {
        Self {
            account,
            generation,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account: Address,
    pub chain_id: ChainId,
    pub handle: SigningHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub session: Option<Session>,
    pub is_connecting: bool,
    pub error: Option<ClientError>,
    pub expected_chain: ChainId,
}

impl ConnectionState {
    fn new(expected_chain: ChainId) -> Self {
        Self {
            session: None,
            is_connecting: false,
            error: None,
            expected_chain,
        }
    }

    pub fn account(&self) -> Option<Address> {
        self.session.as_ref().map(|session| session.account)
    }

    pub fn chain_id(&self) -> Option<ChainId> {
        self.session.as_ref().map(|session| session.chain_id)
    }

    pub fn signing_handle(&self) -> Option<SigningHandle> {
        self.session.as_ref().map(|session| session.handle)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_correct_network(&self) -> bool {
        self.chain_id() == Some(self.expected_chain)
    }

    fn clear_error(&mut self, category: ErrorCategory) {
        if self
            .error
            .as_ref()
            .is_some_and(|error| error.category() == category)
        {
            self.error = None;
        }
    }
}

pub struct ConnectionManager<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for ConnectionManager<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<A> {
    agent: Option<A>,
    network: NetworkConfig,
    state: watch::Sender<ConnectionState>,
    generation: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<A> Drop for Inner<A> {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
    }
}

impl<A> Inner<A> {
    fn next_handle(&self, account: Address) -> SigningHandle {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        SigningHandle::new(account, generation)
    }

    fn disconnect(&self) {
        self.state.send_modify(|state| {
            state.session = None;
            state.error = None;
        });
        info!("wallet disconnected");
    }

    fn handle_notification(&self, notification: AgentNotification) {
        match notification {
            AgentNotification::AccountsChanged(accounts) => match accounts.first() {
                None => {
                    info!("signing agent removed all accounts");
                    self.disconnect();
                }
                Some(&account) => {
                    let expected = self.state.borrow().account();
                    match expected {
                        None => debug!(%account, "ignoring account change without a session"),
                        Some(current) if current == account => {}
                        Some(_) => {
                            let handle = self.next_handle(account);
                            self.state.send_modify(|state| {
                                if let Some(session) = state.session.as_mut() {
                                    session.account = account;
                                    session.handle = handle;
                                }
                            });
                            info!(%account, "account changed");
                        }
                    }
                }
            },
            AgentNotification::ChainChanged(chain_id) => {
                let expected = self.network.chain_id;
                self.state.send_if_modified(|state| {
                    let Some(session) = state.session.as_mut() else {
                        return false;
                    };
                    session.chain_id = chain_id;
                    if chain_id == expected {
                        state.clear_error(ErrorCategory::Network);
                    } else {
                        state.error = Some(ClientError::NetworkMismatch {
                            expected,
                            actual: chain_id,
                        });
                    }
                    true
                });
                info!(%chain_id, correct = chain_id == expected, "network changed");
            }
        }
    }
}

/// Resets `is_connecting` even if the connect future is dropped mid-prompt.
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<ConnectionState>,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|state| state.is_connecting = false);
    }
}

fn connect_error(operation: Operation, err: AgentError) -> ClientError {
    if err.is_user_rejection() {
        ClientError::UserRejected { operation }
    } else {
        ClientError::Unknown {
            operation,
            reason: err.to_string(),
        }
    }
}

impl<A> ConnectionManager<A> {
    pub fn new(agent: Option<A>, network: NetworkConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::new(network.chain_id));
        Self {
            inner: Arc::new(Inner {
                agent,
                network,
                state,
                generation: AtomicU64::new(0),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.inner.network
    }

    /// Local only; signing agents have no remote disconnect.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn handle_notification(&self, notification: AgentNotification) {
        self.inner.handle_notification(notification);
    }

    /// Stops listening to agent notifications.
    pub fn shutdown(&self) {
        let listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
    }

    fn record_error(&self, error: &ClientError) {
        let error = error.clone();
        self.inner.state.send_modify(|state| state.error = Some(error));
    }
}

impl<A: SigningAgent> ConnectionManager<A> {
    /// Restores an already-authorized session without prompting, then
    /// starts listening for account and network changes.
    pub async fn init(&self) {
        let Some(agent) = self.inner.agent.as_ref() else {
            debug!("no signing agent; skipping session probe");
            return;
        };
        match self.probe(agent).await {
            Ok(Some(session)) => {
                let expected = self.inner.network.chain_id;
                let actual = session.chain_id;
                info!(account = %session.account, %actual, "restored wallet session");
                self.inner.state.send_modify(|state| {
                    state.session = Some(session);
                    if actual != expected {
                        state.error =
                            Some(ClientError::NetworkMismatch { expected, actual });
                    }
                });
            }
            Ok(None) => debug!("no authorized account"),
            Err(err) => warn!(%err, "session probe failed"),
        }
        self.listen(agent);
    }

    async fn probe(&self, agent: &A) -> Result<Option<Session>, AgentError> {
        let accounts = agent.accounts().await?;
        let Some(&account) = accounts.first() else {
            return Ok(None);
        };
        let chain_id = agent.chain_id().await?;
        Ok(Some(Session {
            account,
            chain_id,
            handle: self.inner.next_handle(account),
        }))
    }

    fn listen(&self, agent: &A) {
        let mut notifications = agent.notifications();
        let inner: Weak<Inner<A>> = Arc::downgrade(&self.inner);
        let listener = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.handle_notification(notification);
            }
        });
        let previous = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(listener);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Prompts for accounts and makes sure the agent is on the expected
    /// network. Calls made while a connect is in flight fail with `Busy`.
    pub async fn connect(&self) -> Result<Session, ClientError> {
        let Some(agent) = self.inner.agent.as_ref() else {
            let error = ClientError::ProviderMissing;
            self.record_error(&error);
            return Err(error);
        };

        let started = self.inner.state.send_if_modified(|state| {
            if state.is_connecting {
                false
            } else {
                state.is_connecting = true;
                true
            }
        });
        if !started {
            return Err(ClientError::Busy {
                operation: Operation::Connect,
            });
        }
        let _connecting = ConnectingGuard {
            state: &self.inner.state,
        };

        match self.establish(agent).await {
            Ok(session) => {
                info!(account = %session.account, chain_id = %session.chain_id, "wallet connected");
                let connected = session.clone();
                self.inner.state.send_modify(|state| {
                    state.session = Some(connected);
                    state.error = None;
                });
                Ok(session)
            }
            Err(error) => {
                warn!(%error, "wallet connection failed");
                self.record_error(&error);
                Err(error)
            }
        }
    }

    async fn establish(&self, agent: &A) -> Result<Session, ClientError> {
        let accounts = agent
            .request_accounts()
            .await
            .map_err(|err| connect_error(Operation::Connect, err))?;
        let account = *accounts.first().ok_or_else(|| ClientError::Unknown {
            operation: Operation::Connect,
            reason: "signing agent returned no accounts".to_string(),
        })?;
        let mut chain_id = agent
            .chain_id()
            .await
            .map_err(|err| connect_error(Operation::Connect, err))?;
        if chain_id != self.inner.network.chain_id {
            self.ensure_network(agent).await?;
            chain_id = self.inner.network.chain_id;
        }
        Ok(Session {
            account,
            chain_id,
            handle: self.inner.next_handle(account),
        })
    }

    /// Asks the agent to switch to the expected network, adding it first if
    /// the agent does not know it.
    pub async fn switch_network(&self) -> Result<(), ClientError> {
        let Some(agent) = self.inner.agent.as_ref() else {
            let error = ClientError::ProviderMissing;
            self.record_error(&error);
            return Err(error);
        };
        match self.ensure_network(agent).await {
            Ok(()) => {
                let expected = self.inner.network.chain_id;
                self.inner.state.send_modify(|state| {
                    if let Some(session) = state.session.as_mut() {
                        session.chain_id = expected;
                    }
                    state.clear_error(ErrorCategory::Network);
                });
                Ok(())
            }
            Err(error) => {
                self.record_error(&error);
                Err(error)
            }
        }
    }

    async fn ensure_network(&self, agent: &A) -> Result<(), ClientError> {
        let network = &self.inner.network;
        let switch_failed = |err: AgentError| {
            if err.is_user_rejection() {
                ClientError::UserRejected {
                    operation: Operation::SwitchNetwork,
                }
            } else {
                ClientError::NetworkSwitchFailed {
                    chain_id: network.chain_id,
                    reason: err.message,
                }
            }
        };
        match agent.switch_chain(network.chain_id).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_unrecognized_chain() => {
                info!(chain = %network.chain_name, "adding network to signing agent");
                agent.add_chain(network).await.map_err(switch_failed)
            }
            Err(err) => Err(switch_failed(err)),
        }
    }
}
