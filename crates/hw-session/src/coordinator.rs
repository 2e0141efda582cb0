//! The session coordinator: one writer, many readers.
//!
//! All mutation happens behind a single async mutex that is only ever held
//! between await points, never across a call to the extension or the ledger.
//! Operations mark themselves in flight, drop the lock, do their remote
//! work, then reacquire and re-check an attempt counter before applying
//! anything. `disconnect` bumps that counter, which is how a user tear-down
//! wins against any slower in-flight completion. Marker writes carry the
//! same counter through a write gate and apply in order, so a slow store
//! can never undo a newer operation's persisted state.

use hw_api_types::{ConnectionSnapshot, ConnectionStatus, NetworkId, truncate_address};
use hw_extension::{ExtensionError, WalletExtension};
use hw_ledger_client::BalanceSource;
use hw_network::parse_network;
use hw_storage::{SessionMarker, SessionStore};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use crate::SessionError;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Network the marketplace wants to operate on until told otherwise.
    pub network: NetworkId,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            network: NetworkId::Testnet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Connect,
    Switch,
    Reconcile,
}

struct SessionState {
    status: ConnectionStatus,
    address: Option<String>,
    balance: String,
    balance_stale: bool,
    /// Which (address, network) the current balance figure belongs to.
    balance_scope: Option<(String, NetworkId)>,
    network: NetworkId,
    last_error: Option<SessionError>,
    in_flight: Option<Op>,
    /// Bumped whenever ownership of the session changes hands; stale
    /// completions compare against it and stand down.
    attempt: u64,
    refresh_in_flight: bool,
}

impl SessionState {
    fn new(network: NetworkId) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            address: None,
            balance: "0".to_owned(),
            balance_stale: false,
            balance_scope: None,
            network,
            last_error: None,
            in_flight: None,
            attempt: 0,
            refresh_in_flight: false,
        }
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: self.status,
            address: self.address.clone(),
            balance: self.balance.clone(),
            balance_stale: self.balance_stale,
            network: self.network,
            last_error: self.last_error.as_ref().map(SessionError::detail),
        }
    }

    /// Back to a clean disconnected shape. Keeps the desired network, which
    /// is a preference rather than session state.
    fn teardown(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.address = None;
        self.balance = "0".to_owned();
        self.balance_stale = false;
        self.balance_scope = None;
        self.last_error = None;
    }
}

#[derive(Clone)]
struct RefreshScope {
    address: String,
    network: NetworkId,
    attempt: u64,
}

impl RefreshScope {
    fn still_applies(&self, state: &SessionState) -> bool {
        state.attempt == self.attempt
            && state.network == self.network
            && state.address.as_deref() == Some(self.address.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    /// Requested by a caller who wants the failure surfaced.
    Foreground,
    /// Riding along behind a connect, switch, or reconcile.
    Background,
}

enum ConnectOutcome {
    Granted { address: String },
    MismatchedNetwork { actual: String },
    Failed(SessionError),
}

enum Probe {
    Unavailable,
    NoSession,
    Session { address: String, network_label: String },
    Failed(ExtensionError),
}

enum MarkerUpdate {
    Save(SessionMarker),
    Clear,
}

struct Inner {
    extension: Arc<dyn WalletExtension>,
    balances: Arc<dyn BalanceSource>,
    store: Arc<dyn SessionStore>,
    state: Mutex<SessionState>,
    published: watch::Sender<ConnectionSnapshot>,
    /// Completion counters for joiners; a waiter records the count while
    /// holding the state lock, so it can never miss the wakeup it needs.
    ops_done: watch::Sender<u64>,
    refreshes_done: watch::Sender<u64>,
    /// Orders marker writes; holds the newest attempt whose write ran.
    marker_gate: Mutex<u64>,
}

impl Inner {
    fn publish(&self, state: &SessionState) {
        self.published.send_replace(state.snapshot());
    }

    fn finish_op(&self, state: &mut SessionState) {
        state.in_flight = None;
        self.ops_done.send_modify(|done| *done += 1);
    }
}

#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Builds the coordinator and rehydrates any persisted marker. A found
    /// marker only sets the desired network and a `Connecting` status; the
    /// address is not believed until [`check_connection`] confirms it with
    /// the extension.
    ///
    /// [`check_connection`]: SessionCoordinator::check_connection
    pub async fn start(
        config: SessionConfig,
        extension: Arc<dyn WalletExtension>,
        balances: Arc<dyn BalanceSource>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let mut state = SessionState::new(config.network);

        match store.load_marker().await {
            Ok(Some(marker)) => {
                info!(
                    "found session marker for {} on {}, awaiting confirmation",
                    truncate_address(&marker.address),
                    marker.network
                );
                state.status = ConnectionStatus::Connecting;
                state.network = marker.network;
            }
            Ok(None) => {}
            Err(err) => warn!("failed to load session marker, starting clean: {err:#}"),
        }

        let (published, _) = watch::channel(state.snapshot());
        let (ops_done, _) = watch::channel(0);
        let (refreshes_done, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                extension,
                balances,
                store,
                state: Mutex::new(state),
                published,
                ops_done,
                refreshes_done,
                marker_gate: Mutex::new(0),
            }),
        }
    }

    /// Current read model without taking the state lock.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.published.borrow().clone()
    }

    /// Watch the read model; every applied transition is observable here.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.published.subscribe()
    }

    /// Connects through the wallet extension. A second call while a connect
    /// is already in flight joins it instead of prompting the user twice.
    pub async fn connect(&self) -> Result<ConnectionSnapshot, SessionError> {
        let (attempt, desired) = loop {
            let mut state = self.inner.state.lock().await;
            match state.in_flight {
                Some(Op::Connect) => {
                    let seen = *self.inner.ops_done.borrow();
                    drop(state);
                    self.wait_for_op(seen).await;
                    let state = self.inner.state.lock().await;
                    return if state.status == ConnectionStatus::Connected {
                        Ok(state.snapshot())
                    } else {
                        Err(state.last_error.clone().unwrap_or(SessionError::Superseded))
                    };
                }
                Some(_) => {
                    let seen = *self.inner.ops_done.borrow();
                    drop(state);
                    self.wait_for_op(seen).await;
                    continue;
                }
                None => {}
            }
            if state.status == ConnectionStatus::Connected {
                return Ok(state.snapshot());
            }
            state.status = ConnectionStatus::Connecting;
            state.last_error = None;
            state.in_flight = Some(Op::Connect);
            state.attempt += 1;
            self.inner.publish(&state);
            break (state.attempt, state.network);
        };

        let outcome = self.drive_connect(desired).await;
        self.settle_connect(attempt, outcome).await
    }

    async fn drive_connect(&self, desired: NetworkId) -> ConnectOutcome {
        if !self.inner.extension.is_available().await {
            return ConnectOutcome::Failed(SessionError::ExtensionNotFound);
        }
        let grant = match self.inner.extension.request_access().await {
            Ok(grant) => grant,
            Err(err) => return ConnectOutcome::Failed(SessionError::from(err)),
        };
        let reported = match self.inner.extension.network().await {
            Ok(reported) => reported,
            Err(err) => return ConnectOutcome::Failed(SessionError::from(err)),
        };
        let label = reported.unwrap_or_else(|| "unknown".to_owned());
        match parse_network(&label) {
            Ok(network) if network == desired => ConnectOutcome::Granted {
                address: grant.address,
            },
            _ => ConnectOutcome::MismatchedNetwork { actual: label },
        }
    }

    async fn settle_connect(
        &self,
        attempt: u64,
        outcome: ConnectOutcome,
    ) -> Result<ConnectionSnapshot, SessionError> {
        let mut state = self.inner.state.lock().await;
        if state.attempt != attempt {
            // A disconnect raced us and owns the state now.
            return Err(SessionError::Superseded);
        }

        let mut update = None;
        let mut refresh = None;
        let result = match outcome {
            ConnectOutcome::Granted { address } => {
                info!(
                    "wallet connected: {} on {}",
                    truncate_address(&address),
                    state.network
                );
                state.status = ConnectionStatus::Connected;
                state.address = Some(address.clone());
                state.last_error = None;
                update = Some(MarkerUpdate::Save(SessionMarker {
                    address: address.clone(),
                    network: state.network,
                }));
                refresh = Some(RefreshScope {
                    address,
                    network: state.network,
                    attempt,
                });
                Ok(())
            }
            ConnectOutcome::MismatchedNetwork { actual } => {
                let err = SessionError::NetworkMismatch {
                    expected: state.network,
                    actual,
                };
                warn!("connect refused: {err}");
                state.status = ConnectionStatus::Error;
                state.address = None;
                state.last_error = Some(err.clone());
                Err(err)
            }
            ConnectOutcome::Failed(err) => {
                warn!("connect failed: {err}");
                state.status = ConnectionStatus::Disconnected;
                state.address = None;
                state.last_error = Some(err.clone());
                Err(err)
            }
        };
        self.inner.publish(&state);
        self.inner.finish_op(&mut state);
        let snapshot = state.snapshot();
        drop(state);

        if let Some(update) = update {
            self.sync_marker(attempt, update).await;
        }
        if let Some(scope) = refresh {
            self.spawn_refresh(scope);
        }
        result.map(|()| snapshot)
    }

    /// Tears the session down locally. Always succeeds, including while some
    /// other operation is mid-flight; the attempt bump makes that operation's
    /// completion a no-op.
    pub async fn disconnect(&self) -> ConnectionSnapshot {
        let (attempt, snapshot) = {
            let mut state = self.inner.state.lock().await;
            state.teardown();
            state.attempt += 1;
            if state.in_flight.take().is_some() {
                // Release anyone joined on the superseded operation.
                self.inner.ops_done.send_modify(|done| *done += 1);
            }
            self.inner.publish(&state);
            (state.attempt, state.snapshot())
        };

        self.sync_marker(attempt, MarkerUpdate::Clear).await;
        info!("wallet session disconnected");
        snapshot
    }

    /// Moves the session to `target`. Without a live connection this only
    /// updates the desired network; with one, the extension must already
    /// report `target` or the session parks in an error asking the user to
    /// switch inside the extension, which cannot be done for them.
    pub async fn switch_network(
        &self,
        target: NetworkId,
    ) -> Result<ConnectionSnapshot, SessionError> {
        let attempt = loop {
            let mut state = self.inner.state.lock().await;
            if state.in_flight.is_some() {
                let seen = *self.inner.ops_done.borrow();
                drop(state);
                self.wait_for_op(seen).await;
                continue;
            }
            match state.status {
                ConnectionStatus::Connected if state.network == target => {
                    return Ok(state.snapshot());
                }
                ConnectionStatus::Connected => {
                    state.status = ConnectionStatus::Switching;
                    state.network = target;
                    state.balance_stale = true;
                    state.last_error = None;
                    state.in_flight = Some(Op::Switch);
                    state.attempt += 1;
                    self.inner.publish(&state);
                    break state.attempt;
                }
                _ => {
                    // No live session to reconcile; just record the intent.
                    state.network = target;
                    if state.status == ConnectionStatus::Error {
                        state.status = ConnectionStatus::Disconnected;
                        state.last_error = None;
                    }
                    self.inner.publish(&state);
                    return Ok(state.snapshot());
                }
            }
        };

        let confirmed = self.confirm_network(target).await;
        self.settle_switch(attempt, target, confirmed).await
    }

    /// Checks, without prompting, that the extension is on `target`.
    async fn confirm_network(&self, target: NetworkId) -> Result<(), SessionError> {
        if !self.inner.extension.is_available().await {
            return Err(SessionError::ExtensionNotFound);
        }
        let reported = self
            .inner
            .extension
            .network()
            .await
            .map_err(SessionError::from)?;
        let label = reported.unwrap_or_else(|| "unknown".to_owned());
        match parse_network(&label) {
            Ok(network) if network == target => Ok(()),
            _ => Err(SessionError::ManualSwitchRequired {
                target,
                actual: label,
            }),
        }
    }

    async fn settle_switch(
        &self,
        attempt: u64,
        target: NetworkId,
        confirmed: Result<(), SessionError>,
    ) -> Result<ConnectionSnapshot, SessionError> {
        if confirmed.is_ok() {
            let scope = {
                let state = self.inner.state.lock().await;
                if state.attempt != attempt {
                    return Err(SessionError::Superseded);
                }
                state.address.clone().map(|address| RefreshScope {
                    address,
                    network: target,
                    attempt,
                })
            };
            if let Some(scope) = scope {
                // The new network's balance rides along with the transition;
                // failing to fetch it does not fail the switch.
                let _ = self.run_refresh(scope, RefreshMode::Background).await;
            }
        }

        let mut state = self.inner.state.lock().await;
        if state.attempt != attempt {
            return Err(SessionError::Superseded);
        }

        let mut update = None;
        let result = match confirmed {
            Ok(()) => {
                info!("network switched to {target}");
                state.status = ConnectionStatus::Connected;
                state.last_error = None;
                if let Some(address) = &state.address {
                    update = Some(MarkerUpdate::Save(SessionMarker {
                        address: address.clone(),
                        network: target,
                    }));
                }
                Ok(())
            }
            Err(err) => {
                warn!("network switch to {target} failed: {err}");
                state.status = ConnectionStatus::Error;
                state.address = None;
                state.balance = "0".to_owned();
                state.balance_stale = false;
                state.balance_scope = None;
                state.last_error = Some(err.clone());
                Err(err)
            }
        };
        self.inner.publish(&state);
        self.inner.finish_op(&mut state);
        let snapshot = state.snapshot();
        drop(state);

        if let Some(update) = update {
            self.sync_marker(attempt, update).await;
        }
        result.map(|()| snapshot)
    }

    /// Reconciles local state with what the extension actually reports. Never
    /// fails and never prompts; the extension is the source of truth for
    /// liveness, local state is the source of truth for a user's disconnect.
    pub async fn check_connection(&self) -> ConnectionSnapshot {
        let (attempt, desired) = {
            let mut state = self.inner.state.lock().await;
            if state.in_flight.is_some() {
                // Someone is already driving the session; don't fight them.
                return state.snapshot();
            }
            state.in_flight = Some(Op::Reconcile);
            (state.attempt, state.network)
        };

        let probe = self.probe_extension().await;

        let mut state = self.inner.state.lock().await;
        if state.attempt != attempt || state.in_flight != Some(Op::Reconcile) {
            return state.snapshot();
        }

        // Every arm that changes the session bumps the attempt, so its
        // marker write and refresh scope order after anything still settling.
        let mut update = None;
        let mut refresh = None;

        match probe {
            Probe::Failed(err) => {
                // Absence of evidence; keep the current state.
                warn!("connection probe failed: {err}");
            }
            Probe::Unavailable => {
                if state.status != ConnectionStatus::Disconnected {
                    info!("wallet extension unavailable, demoting session");
                    state.teardown();
                    state.attempt += 1;
                    // The marker stays: a disabled extension can come back.
                }
            }
            Probe::NoSession => {
                if state.status != ConnectionStatus::Disconnected {
                    info!("extension reports no authorized account, demoting session");
                    state.teardown();
                    state.attempt += 1;
                    update = Some(MarkerUpdate::Clear);
                }
            }
            Probe::Session {
                address,
                network_label,
            } => {
                let on_desired =
                    matches!(parse_network(&network_label), Ok(network) if network == desired);
                if !on_desired {
                    if state.status != ConnectionStatus::Disconnected {
                        let err = SessionError::NetworkMismatch {
                            expected: desired,
                            actual: network_label,
                        };
                        warn!("probe found a session on the wrong network: {err}");
                        state.teardown();
                        state.attempt += 1;
                        state.status = ConnectionStatus::Error;
                        state.last_error = Some(err);
                    }
                } else {
                    match state.status {
                        ConnectionStatus::Connected => {
                            if state.address.as_deref() != Some(address.as_str()) {
                                info!(
                                    "wallet account changed in extension, adopting {}",
                                    truncate_address(&address)
                                );
                                state.address = Some(address.clone());
                                state.balance = "0".to_owned();
                                state.balance_stale = false;
                                state.balance_scope = None;
                                state.attempt += 1;
                                update = Some(MarkerUpdate::Save(SessionMarker {
                                    address: address.clone(),
                                    network: desired,
                                }));
                                refresh = Some(RefreshScope {
                                    address,
                                    network: desired,
                                    attempt: state.attempt,
                                });
                            }
                        }
                        ConnectionStatus::Connecting | ConnectionStatus::Error => {
                            info!(
                                "confirmed wallet session for {} on {}",
                                truncate_address(&address),
                                desired
                            );
                            state.status = ConnectionStatus::Connected;
                            state.address = Some(address.clone());
                            state.last_error = None;
                            state.attempt += 1;
                            update = Some(MarkerUpdate::Save(SessionMarker {
                                address: address.clone(),
                                network: desired,
                            }));
                            refresh = Some(RefreshScope {
                                address,
                                network: desired,
                                attempt: state.attempt,
                            });
                        }
                        // A user disconnect is intent; an idle extension
                        // session does not override it.
                        ConnectionStatus::Disconnected | ConnectionStatus::Switching => {}
                    }
                }
            }
        }

        self.inner.publish(&state);
        self.inner.finish_op(&mut state);
        let snapshot = state.snapshot();
        let marker_attempt = state.attempt;
        drop(state);

        if let Some(update) = update {
            self.sync_marker(marker_attempt, update).await;
        }
        if let Some(scope) = refresh {
            self.spawn_refresh(scope);
        }
        snapshot
    }

    async fn probe_extension(&self) -> Probe {
        if !self.inner.extension.is_available().await {
            return Probe::Unavailable;
        }
        let address = match self.inner.extension.address().await {
            Ok(Some(address)) => address,
            Ok(None) => return Probe::NoSession,
            Err(err) => return Probe::Failed(err),
        };
        match self.inner.extension.network().await {
            Ok(label) => Probe::Session {
                address,
                network_label: label.unwrap_or_else(|| "unknown".to_owned()),
            },
            Err(err) => Probe::Failed(err),
        }
    }

    /// Re-fetches the balance for the current session. No-op without an
    /// address. A refresh already in flight for the same scope is joined
    /// rather than duplicated.
    pub async fn refresh_balance(&self) -> Result<ConnectionSnapshot, SessionError> {
        let scope = {
            let state = self.inner.state.lock().await;
            match &state.address {
                Some(address) => RefreshScope {
                    address: address.clone(),
                    network: state.network,
                    attempt: state.attempt,
                },
                None => return Ok(state.snapshot()),
            }
        };

        let refreshed = self.run_refresh(scope, RefreshMode::Foreground).await;
        let state = self.inner.state.lock().await;
        match refreshed {
            Ok(()) => Ok(state.snapshot()),
            Err(err) => Err(err),
        }
    }

    fn spawn_refresh(&self, scope: RefreshScope) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let _ = coordinator.run_refresh(scope, RefreshMode::Background).await;
        });
    }

    async fn run_refresh(
        &self,
        scope: RefreshScope,
        mode: RefreshMode,
    ) -> Result<(), SessionError> {
        loop {
            {
                let mut state = self.inner.state.lock().await;
                if !scope.still_applies(&state) {
                    return Err(SessionError::Superseded);
                }
                if state.refresh_in_flight {
                    let seen = *self.inner.refreshes_done.borrow();
                    drop(state);
                    self.wait_for_refresh(seen).await;
                    let state = self.inner.state.lock().await;
                    let covered = !state.balance_stale
                        && state.balance_scope.as_ref().is_some_and(|(address, network)| {
                            *address == scope.address && *network == scope.network
                        });
                    if covered && scope.still_applies(&state) {
                        return Ok(());
                    }
                    continue;
                }
                state.refresh_in_flight = true;
            }

            let fetched = self
                .inner
                .balances
                .native_balance(&scope.address, scope.network)
                .await;

            let mut state = self.inner.state.lock().await;
            state.refresh_in_flight = false;
            let applies = scope.still_applies(&state);
            let result = match fetched {
                Ok(balance) if applies => {
                    state.balance = balance.amount;
                    state.balance_stale = false;
                    state.balance_scope = Some((scope.address.clone(), scope.network));
                    // The only error that can survive into an applying
                    // refresh is an earlier failed refresh.
                    state.last_error = None;
                    Ok(())
                }
                Ok(_) => Err(SessionError::Superseded),
                Err(err) => {
                    let err = SessionError::BalanceUnavailable {
                        reason: err.to_string(),
                    };
                    if applies {
                        // Keep the previous figure, flagged as stale.
                        state.balance_stale = true;
                        match mode {
                            RefreshMode::Foreground => state.last_error = Some(err.clone()),
                            RefreshMode::Background => {
                                warn!("background balance refresh failed: {err}");
                            }
                        }
                    }
                    Err(err)
                }
            };
            self.inner.publish(&state);
            drop(state);
            self.inner.refreshes_done.send_modify(|done| *done += 1);
            return result;
        }
    }

    /// Applies a marker write, tagged with the attempt that produced it.
    /// Writers hold the gate across the store call, so writes land one at a
    /// time and in order; a writer that finds a newer attempt already
    /// recorded stands down and leaves the store to that operation.
    async fn sync_marker(&self, attempt: u64, update: MarkerUpdate) {
        let mut newest = self.inner.marker_gate.lock().await;
        if attempt < *newest {
            return;
        }
        *newest = attempt;
        let result = match &update {
            MarkerUpdate::Save(marker) => self.inner.store.save_marker(marker).await,
            MarkerUpdate::Clear => self.inner.store.clear_marker().await,
        };
        if let Err(err) = result {
            warn!("failed to update session marker: {err:#}");
        }
    }

    async fn wait_for_op(&self, seen: u64) {
        let mut done = self.inner.ops_done.subscribe();
        let _ = done.wait_for(|count| *count > seen).await;
    }

    async fn wait_for_refresh(&self, seen: u64) {
        let mut done = self.inner.refreshes_done.subscribe();
        let _ = done.wait_for(|count| *count > seen).await;
    }
}
