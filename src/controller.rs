use crate::{
    contract::{
        GameContract,
        hex_hash,
    },
    game::{
        ChainEvent,
        GameView,
        RawGameState,
        short_address,
    },
    network::NetworkConfig,
    status::{
        self,
        UiStatus,
    },
    wallets::{
        WalletError,
        WalletProvider,
    },
};
use chrono::{
    DateTime,
    Local,
};
use color_eyre::eyre::{
    Report,
    Result,
};
use ethers::types::{
    Address,
    U256,
};
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
    Weak,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

const CONNECT_PROMPT: &str = "Connect your wallet to play";

#[derive(Clone, Debug)]
pub struct Deployment {
    pub contract_address: Address,
    pub network: NetworkConfig,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Session {
    pub wallet_address: Option<Address>,
    pub chain_id: u64,
}

/// Everything the renderer needs, captured at one instant.
#[derive(Clone, Debug)]
pub struct ControllerSnapshot {
    pub session: Option<Session>,
    pub view: Option<GameView>,
    pub status: UiStatus,
    pub network: NetworkConfig,
    pub wallet_label: String,
    pub network_warning: Option<String>,
    pub last_synced: Option<DateTime<Local>>,
}

impl ControllerSnapshot {
    pub fn account(&self) -> Option<Address> {
        self.session.as_ref().and_then(|s| s.wallet_address)
    }
}

#[derive(Clone, Debug)]
pub enum ControllerEvent {
    StateChanged(ControllerSnapshot),
    Chain(ChainEvent),
}

#[derive(Debug, Default)]
struct State {
    session: Option<Session>,
    view: Option<GameView>,
    status: UiStatus,
    stake: U256,
    network_warning: Option<String>,
    last_synced: Option<DateTime<Local>>,
    // bumped whenever the session is torn down; stale results compare against it
    epoch: u64,
}

/// Owns the event watcher task; dropping it stops the watcher.
struct EventSubscription {
    task: JoinHandle<()>,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct GameSyncController {
    wallet: Arc<dyn WalletProvider>,
    deployment: Deployment,
    state: Mutex<State>,
    contract: Mutex<Option<Arc<dyn GameContract>>>,
    subscription: Mutex<Option<EventSubscription>>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<ControllerEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GameSyncController {
    pub fn new(wallet: Arc<dyn WalletProvider>, deployment: Deployment) -> Arc<Self> {
        let state = State {
            status: UiStatus::idle(CONNECT_PROMPT),
            ..State::default()
        };
        Arc::new(Self {
            wallet,
            deployment,
            state: Mutex::new(state),
            contract: Mutex::new(None),
            subscription: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.listeners).push(tx);
        rx
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let state = lock(&self.state);
        self.snapshot_of(&state)
    }

    fn snapshot_of(&self, state: &State) -> ControllerSnapshot {
        ControllerSnapshot {
            session: state.session.clone(),
            view: state.view.clone(),
            status: state.status.clone(),
            network: self.deployment.network.clone(),
            wallet_label: self.wallet.label(),
            network_warning: state.network_warning.clone(),
            last_synced: state.last_synced,
        }
    }

    fn emit(&self, event: ControllerEvent) {
        lock(&self.listeners).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn update<R>(&self, apply: impl FnOnce(&mut State) -> R) -> R {
        let (result, snapshot) = {
            let mut state = lock(&self.state);
            let result = apply(&mut state);
            (result, self.snapshot_of(&state))
        };
        self.emit(ControllerEvent::StateChanged(snapshot));
        result
    }

    fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| s.status.message = message);
    }

    fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    fn session_account(&self) -> Option<Address> {
        lock(&self.state)
            .session
            .as_ref()
            .and_then(|s| s.wallet_address)
    }

    fn contract(&self) -> Option<Arc<dyn GameContract>> {
        lock(&self.contract).clone()
    }

    fn require_contract(&self) -> Result<Arc<dyn GameContract>> {
        match self.contract() {
            Some(contract) => Ok(contract),
            None => {
                let err = Report::from(WalletError::NotConnected);
                self.set_message(status::failure_message(&err));
                Err(err)
            }
        }
    }

    /// Drops the contract binding and event watcher, invalidating in-flight
    /// results. Returns the new epoch.
    ///
    /// The binding is only ever swapped while `state` is held, so the epoch
    /// and the installed binding cannot disagree.
    fn teardown(&self) -> u64 {
        let mut state = lock(&self.state);
        state.epoch += 1;
        lock(&self.subscription).take();
        lock(&self.contract).take();
        state.epoch
    }

    /// Startup hook: resumes a session when the wallet already has an
    /// authorized account.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let accounts = match self.wallet.accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                self.set_message(status::failure_message(&err));
                return Err(err);
            }
        };
        let Some(account) = accounts.first().copied() else {
            debug!("no authorized account; waiting for connect");
            return Ok(());
        };
        info!(?account, "resuming authorized wallet session");
        self.update(|s| {
            s.session = Some(Session {
                wallet_address: Some(account),
                chain_id: 0,
            })
        });
        self.initialize().await
    }

    pub async fn connect_wallet(self: &Arc<Self>) -> Result<()> {
        self.set_message(format!("Waiting for {}...", self.wallet.label()));
        let accounts = match self.wallet.request_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(error = %err, "wallet connection failed");
                self.set_message(status::failure_message(&err));
                return Err(err);
            }
        };
        let Some(account) = accounts.first().copied() else {
            let err = Report::from(WalletError::NoAccounts);
            self.set_message(status::failure_message(&err));
            return Err(err);
        };

        let previous = self.session_account();
        self.update(|s| {
            let chain_id = s.session.as_ref().map(|x| x.chain_id).unwrap_or_default();
            s.session = Some(Session {
                wallet_address: Some(account),
                chain_id,
            });
            s.status.message = format!("Connected {}", short_address(&account));
        });
        info!(?account, "wallet connected");

        if previous != Some(account) || self.contract().is_none() {
            self.initialize().await?;
        }
        Ok(())
    }

    /// Binds the contract for the current session, checks the chain, reads
    /// the stake and (re)subscribes to contract events.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.session_account().is_none() {
            let err = Report::from(WalletError::NotConnected);
            self.set_message(status::failure_message(&err));
            return Err(err);
        }
        let epoch = self.teardown();
        self.update(|s| s.network_warning = None);

        let installed = match self.bind(epoch).await {
            Ok(installed) => installed,
            Err(err) if self.epoch() != epoch => {
                debug!(error = %err, "initialization of a replaced session failed");
                return Err(err);
            }
            Err(err) => {
                let mismatched = lock(&self.state).network_warning.is_some();
                let message = if mismatched {
                    status::unsupported_network_message(&self.deployment.network)
                } else {
                    status::init_failure_message(&err, &self.deployment.network)
                };
                error!(error = %err, "initialization failed");
                self.set_message(message);
                return Err(err);
            }
        };
        if !installed {
            return Ok(());
        }

        match self.wallet.accounts().await {
            Ok(accounts) if !accounts.is_empty() => {
                if let Err(err) = self.refresh_state().await {
                    debug!(error = %err, "initial refresh failed");
                }
            }
            Ok(_) => debug!("no authorized account; skipping initial refresh"),
            Err(err) => warn!(error = %err, "failed to list authorized accounts"),
        }
        Ok(())
    }

    /// Returns whether the binding was installed; a session replaced in the
    /// meantime gets nothing.
    async fn bind(self: &Arc<Self>, epoch: u64) -> Result<bool> {
        let contract = self
            .wallet
            .bind_game(self.deployment.contract_address)
            .await?;

        let chain_id = self.wallet.chain_id().await?;
        let expected = &self.deployment.network;
        let warning = (chain_id != expected.chain_id)
            .then(|| status::chain_mismatch_message(expected, chain_id));
        if warning.is_some() {
            warn!(chain_id, expected = expected.chain_id, "wallet is on an unexpected chain");
        }
        self.update(|s| {
            if s.epoch != epoch {
                return;
            }
            if let Some(session) = s.session.as_mut() {
                session.chain_id = chain_id;
            }
            s.network_warning = warning.clone();
        });

        let stake = contract.stake_amount().await?;

        let installed = self.update(|s| {
            if s.epoch != epoch {
                return false;
            }
            *lock(&self.subscription) = Some(self.watch(contract.clone()));
            *lock(&self.contract) = Some(contract);
            s.stake = stake;
            s.status.message = match &warning {
                Some(w) => w.clone(),
                None => String::from("Ready"),
            };
            true
        });
        if !installed {
            debug!("session changed during initialization; dropping binding");
            return Ok(false);
        }
        info!(
            contract = ?self.deployment.contract_address,
            chain_id,
            stake = %stake,
            "contract bound"
        );
        Ok(true)
    }

    fn watch(self: &Arc<Self>, contract: Arc<dyn GameContract>) -> EventSubscription {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let watcher = contract.watch_events(tx);
            tokio::pin!(watcher);
            loop {
                tokio::select! {
                    res = &mut watcher => {
                        if let Err(err) = res {
                            warn!(error = %err, "contract event watcher stopped");
                        }
                        break;
                    }
                    Some(event) = rx.recv() => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.handle_chain_event(event).await;
                    }
                }
            }
        });
        EventSubscription { task }
    }

    async fn handle_chain_event(&self, event: ChainEvent) {
        debug!(?event, "contract event");
        self.emit(ControllerEvent::Chain(event.clone()));
        match &event {
            ChainEvent::GameStarted { player_x, player_o } => self.set_message(format!(
                "Game started! X: {} vs O: {}",
                short_address(player_x),
                short_address(player_o)
            )),
            ChainEvent::MoveMade { .. } => {}
            ChainEvent::GameEnded { winner, is_draw } => {
                let message = if *is_draw {
                    String::from("Game ended in a draw!")
                } else if self.session_account() == Some(*winner) {
                    String::from("You won!")
                } else {
                    format!("Game over! Winner: {}", short_address(winner))
                };
                self.set_message(message);
            }
        }
        if let Err(err) = self.refresh_state().await {
            debug!(error = %err, "refresh after contract event failed");
        }
    }

    /// Reads board, turn and phase together and replaces the view wholesale.
    /// On failure the previous view is kept.
    pub async fn refresh_state(&self) -> Result<()> {
        let contract = self.require_contract()?;
        let (epoch, stake) = {
            let state = lock(&self.state);
            (state.epoch, state.stake)
        };
        let decimals = self.deployment.network.currency.decimals;

        let result = async {
            let (board, turn, phase) = futures::try_join!(
                contract.board(),
                contract.current_turn(),
                contract.game_state()
            )?;
            let raw = RawGameState { board, turn, phase };
            let view = GameView::project(&raw, stake, decimals)?;
            Ok::<_, Report>(view)
        }
        .await;

        match result {
            Ok(view) => {
                let applied = self.update(|s| {
                    if s.epoch != epoch {
                        return false;
                    }
                    s.view = Some(view);
                    s.last_synced = Some(Local::now());
                    true
                });
                if !applied {
                    debug!("discarding refresh from a previous session");
                }
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "state refresh failed");
                if self.epoch() == epoch {
                    self.set_message(status::failure_message(&err));
                }
                Err(err)
            }
        }
    }

    /// Marks the controller busy unless it already is. Returns the session
    /// epoch the caller acquired it in.
    fn begin_busy(&self, message: &str) -> Option<u64> {
        self.update(|s| {
            if s.status.busy {
                return None;
            }
            s.status = UiStatus::working(message);
            Some(s.epoch)
        })
    }

    /// Clears `busy`. The message is only written when the session the
    /// transaction started in is still current; returns whether it was.
    fn finish_busy(&self, epoch: u64, message: String) -> bool {
        self.update(|s| {
            if s.epoch != epoch {
                s.status.busy = false;
                return false;
            }
            s.status = UiStatus::idle(message);
            true
        })
    }

    pub async fn join_game(&self) -> Result<()> {
        let contract = self.require_contract()?;
        let Some(epoch) = self.begin_busy("Joining game...") else {
            warn!("join requested while another transaction is pending");
            return Ok(());
        };

        let result = async {
            let stake = contract.stake_amount().await?;
            self.update(|s| {
                if s.epoch == epoch {
                    s.stake = stake;
                }
            });
            info!(stake = %stake, "joining game");
            contract.join_game(stake).await
        }
        .await;

        match result {
            Ok(tx_hash) => {
                info!(tx_hash = %hex_hash(&tx_hash), "joined game");
                let message = self.confirmed_message("Joined the game!", &tx_hash);
                if !self.finish_busy(epoch, message) {
                    debug!("join confirmed after the session ended");
                    return Ok(());
                }
                if let Err(err) = self.refresh_state().await {
                    debug!(error = %err, "refresh after join failed");
                }
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "join failed");
                if !self.finish_busy(epoch, status::join_failure_message(&err)) {
                    debug!("join failure arrived after the session ended");
                }
                Err(err)
            }
        }
    }

    /// Submits a move. Legality is left to the contract; callers only offer
    /// open cells.
    pub async fn make_move(&self, row: u8, col: u8) -> Result<()> {
        let contract = self.require_contract()?;
        let Some(epoch) = self.begin_busy("Submitting move...") else {
            warn!(row, col, "move requested while another transaction is pending");
            return Ok(());
        };

        match contract.make_move(row, col).await {
            Ok(tx_hash) => {
                info!(row, col, tx_hash = %hex_hash(&tx_hash), "move confirmed");
                let message = self.confirmed_message("Move confirmed", &tx_hash);
                if !self.finish_busy(epoch, message) {
                    debug!(row, col, "move confirmed after the session ended");
                    return Ok(());
                }
                if let Err(err) = self.refresh_state().await {
                    debug!(error = %err, "refresh after move failed");
                }
                Ok(())
            }
            Err(err) => {
                error!(row, col, error = %err, "move failed");
                if !self.finish_busy(epoch, status::failure_message(&err)) {
                    debug!(row, col, "move failure arrived after the session ended");
                }
                Err(err)
            }
        }
    }

    fn confirmed_message(&self, prefix: &str, tx_hash: &ethers::types::TxHash) -> String {
        match self.deployment.network.explorer_tx_url(&hex_hash(tx_hash)) {
            Some(url) => format!("{prefix} {url}"),
            None => prefix.to_string(),
        }
    }

    /// Asks the wallet to add and switch to the target network. A live
    /// session is re-initialized against it afterwards.
    pub async fn add_network(self: &Arc<Self>) -> Result<()> {
        let network = self.deployment.network.with_env_rpc_url();
        self.set_message(format!("Requesting {network} from wallet..."));
        if let Err(err) = self.wallet.add_network(&network).await {
            error!(error = %err, network = %network, "add network failed");
            self.set_message(status::init_failure_message(&err, &network));
            return Err(err);
        }
        info!(network = %network, url = %network.rpc_url, "network added");
        self.set_message(format!("Network {network} added"));
        if self.session_account().is_some() {
            self.initialize().await?;
        }
        Ok(())
    }

    /// Ends the session. A transaction still in flight keeps `busy` set
    /// until it settles, so it cannot be submitted a second time.
    pub fn disconnect(&self) {
        self.teardown();
        self.update(|s| {
            s.session = None;
            s.view = None;
            s.network_warning = None;
            s.last_synced = None;
            s.status.message = CONNECT_PROMPT.to_string();
        });
        info!("wallet disconnected");
    }
}
