use crate::{
    contract::GameContract,
    controller::{
        ControllerEvent,
        ControllerSnapshot,
        Deployment,
        GameSyncController,
    },
    game::{
        BoardCodes,
        ChainEvent,
    },
    network::NetworkConfig,
    wallets::{
        WalletError,
        WalletProvider,
    },
};
use async_trait::async_trait;
use color_eyre::eyre::{
    Report,
    Result,
    eyre,
};
use ethers::types::{
    Address,
    TxHash,
    U256,
};
use std::{
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::sync::{
    Notify,
    mpsc,
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

/// A failure a fake can be told to return.
#[derive(Clone, Debug)]
pub enum FakeFailure {
    Rejected,
    Message(String),
}

impl FakeFailure {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    fn to_report(&self) -> Report {
        match self {
            Self::Rejected => WalletError::Rejected.into(),
            Self::Message(message) => eyre!("{message}"),
        }
    }
}

#[derive(Default)]
struct ChainState {
    board: BoardCodes,
    turn: u8,
    phase: u8,
    stake: U256,
    read_failure: Option<String>,
    tx_failure: Option<FakeFailure>,
    joins: Vec<U256>,
    moves: Vec<(u8, u8)>,
    tx_count: u64,
}

/// In-memory contract. Transactions apply no game rules; tests set the
/// resulting state explicitly.
#[derive(Default)]
pub struct FakeContract {
    chain: Mutex<ChainState>,
    sink: Mutex<Option<mpsc::UnboundedSender<ChainEvent>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pending: AtomicUsize,
    stake_gate: Mutex<Option<Arc<Notify>>>,
    pending_stake_reads: AtomicUsize,
}

impl FakeContract {
    pub fn set_board(&self, board: BoardCodes) {
        lock(&self.chain).board = board;
    }

    pub fn set_turn(&self, turn: u8) {
        lock(&self.chain).turn = turn;
    }

    pub fn set_phase(&self, phase: u8) {
        lock(&self.chain).phase = phase;
    }

    pub fn set_stake(&self, stake: U256) {
        lock(&self.chain).stake = stake;
    }

    pub fn fail_reads_with(&self, message: &str) {
        lock(&self.chain).read_failure = Some(message.to_string());
    }

    pub fn clear_read_failure(&self) {
        lock(&self.chain).read_failure = None;
    }

    pub fn fail_transactions_with(&self, failure: FakeFailure) {
        lock(&self.chain).tx_failure = Some(failure);
    }

    pub fn clear_transaction_failure(&self) {
        lock(&self.chain).tx_failure = None;
    }

    /// Makes subsequent transactions wait until the returned handle is
    /// notified.
    pub fn hold_transactions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.gate) = Some(gate.clone());
        gate
    }

    pub async fn wait_for_pending_transaction(&self) {
        wait_until(|| self.pending.load(Ordering::SeqCst) > 0).await;
    }

    /// Makes the next stake read wait until the returned handle is notified.
    pub fn hold_next_stake_read(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.stake_gate) = Some(gate.clone());
        gate
    }

    pub async fn wait_for_pending_stake_read(&self) {
        wait_until(|| self.pending_stake_reads.load(Ordering::SeqCst) > 0).await;
    }

    pub fn joins(&self) -> Vec<U256> {
        lock(&self.chain).joins.clone()
    }

    pub fn moves(&self) -> Vec<(u8, u8)> {
        lock(&self.chain).moves.clone()
    }

    pub fn is_watched(&self) -> bool {
        lock(&self.sink).as_ref().is_some_and(|sink| !sink.is_closed())
    }

    pub async fn wait_until_watching(&self) {
        wait_until(|| self.is_watched()).await;
    }

    pub async fn wait_until_unwatched(&self) {
        wait_until(|| !self.is_watched()).await;
    }

    /// Delivers `event` to the active watcher, if any.
    pub fn emit(&self, event: ChainEvent) -> bool {
        lock(&self.sink)
            .as_ref()
            .is_some_and(|sink| sink.send(event).is_ok())
    }

    fn read<T>(&self, pick: impl FnOnce(&ChainState) -> T) -> Result<T> {
        let chain = lock(&self.chain);
        match &chain.read_failure {
            Some(message) => Err(eyre!("{message}")),
            None => Ok(pick(&chain)),
        }
    }

    async fn transact(&self, apply: impl FnOnce(&mut ChainState)) -> Result<TxHash> {
        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            self.pending.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        let mut chain = lock(&self.chain);
        if let Some(failure) = &chain.tx_failure {
            return Err(failure.to_report());
        }
        apply(&mut chain);
        chain.tx_count += 1;
        Ok(TxHash::from_low_u64_be(chain.tx_count))
    }
}

#[async_trait]
impl GameContract for FakeContract {
    fn address(&self) -> Address {
        Address::repeat_byte(0xcc)
    }

    async fn stake_amount(&self) -> Result<U256> {
        let gate = lock(&self.stake_gate).take();
        if let Some(gate) = gate {
            self.pending_stake_reads.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            self.pending_stake_reads.fetch_sub(1, Ordering::SeqCst);
        }
        self.read(|c| c.stake)
    }

    async fn board(&self) -> Result<BoardCodes> {
        self.read(|c| c.board)
    }

    async fn current_turn(&self) -> Result<u8> {
        self.read(|c| c.turn)
    }

    async fn game_state(&self) -> Result<u8> {
        self.read(|c| c.phase)
    }

    async fn join_game(&self, payment: U256) -> Result<TxHash> {
        self.transact(|c| c.joins.push(payment)).await
    }

    async fn make_move(&self, row: u8, col: u8) -> Result<TxHash> {
        self.transact(|c| c.moves.push((row, col))).await
    }

    async fn watch_events(&self, sink: mpsc::UnboundedSender<ChainEvent>) -> Result<()> {
        *lock(&self.sink) = Some(sink.clone());
        sink.closed().await;
        Ok(())
    }
}

struct WalletState {
    account: Address,
    authorized: bool,
    chain_id: u64,
    request_failure: Option<FakeFailure>,
    chain_id_failure: Option<FakeFailure>,
    add_network_failure: Option<FakeFailure>,
    added_networks: Vec<NetworkConfig>,
}

/// Wallet with a single account that becomes authorized on the first
/// successful connection request.
pub struct FakeWallet {
    state: Mutex<WalletState>,
    contract: Arc<FakeContract>,
    binds: AtomicUsize,
}

impl FakeWallet {
    pub fn new(account: Address, contract: Arc<FakeContract>) -> Self {
        Self {
            state: Mutex::new(WalletState {
                account,
                authorized: false,
                chain_id: crate::network::LOCAL_CHAIN_ID,
                request_failure: None,
                chain_id_failure: None,
                add_network_failure: None,
                added_networks: Vec::new(),
            }),
            contract,
            binds: AtomicUsize::new(0),
        }
    }

    pub fn authorize(&self) {
        lock(&self.state).authorized = true;
    }

    pub fn set_account(&self, account: Address) {
        lock(&self.state).account = account;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        lock(&self.state).chain_id = chain_id;
    }

    pub fn fail_requests_with(&self, failure: FakeFailure) {
        lock(&self.state).request_failure = Some(failure);
    }

    pub fn fail_chain_id_with(&self, failure: FakeFailure) {
        lock(&self.state).chain_id_failure = Some(failure);
    }

    pub fn fail_add_network_with(&self, failure: FakeFailure) {
        lock(&self.state).add_network_failure = Some(failure);
    }

    pub fn added_networks(&self) -> Vec<NetworkConfig> {
        lock(&self.state).added_networks.clone()
    }

    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    fn label(&self) -> String {
        String::from("fake wallet")
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        let state = lock(&self.state);
        Ok(if state.authorized {
            vec![state.account]
        } else {
            Vec::new()
        })
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let mut state = lock(&self.state);
        if let Some(failure) = &state.request_failure {
            return Err(failure.to_report());
        }
        state.authorized = true;
        Ok(vec![state.account])
    }

    async fn chain_id(&self) -> Result<u64> {
        let state = lock(&self.state);
        match &state.chain_id_failure {
            Some(failure) => Err(failure.to_report()),
            None => Ok(state.chain_id),
        }
    }

    async fn add_network(&self, network: &NetworkConfig) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(failure) = &state.add_network_failure {
            return Err(failure.to_report());
        }
        state.chain_id = network.chain_id;
        state.added_networks.push(network.clone());
        Ok(())
    }

    async fn bind_game(&self, _address: Address) -> Result<Arc<dyn GameContract>> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        let contract: Arc<dyn GameContract> = self.contract.clone();
        Ok(contract)
    }
}

pub struct TestContext {
    wallet: Arc<FakeWallet>,
    contract: Arc<FakeContract>,
    controller: Arc<GameSyncController>,
}

impl TestContext {
    pub fn new() -> Self {
        let contract = Arc::new(FakeContract::default());
        let wallet = Arc::new(FakeWallet::new(Self::alice(), contract.clone()));
        let deployment = Deployment {
            contract_address: contract.address(),
            network: NetworkConfig::local("http://127.0.0.1:8545"),
        };
        let controller = GameSyncController::new(wallet.clone(), deployment);
        Self {
            wallet,
            contract,
            controller,
        }
    }

    pub fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    pub fn bob() -> Address {
        Address::repeat_byte(0xb0)
    }

    pub fn wallet(&self) -> Arc<FakeWallet> {
        self.wallet.clone()
    }

    pub fn contract(&self) -> Arc<FakeContract> {
        self.contract.clone()
    }

    pub fn controller(&self) -> Arc<GameSyncController> {
        self.controller.clone()
    }

    /// Connects the wallet and waits for the event watcher to attach.
    pub async fn connect(&self) {
        self.controller.connect_wallet().await.unwrap();
        self.contract.wait_until_watching().await;
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Every snapshot already queued on `events`, oldest first.
pub fn drain_snapshots(
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
) -> Vec<ControllerSnapshot> {
    let mut snapshots = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ControllerEvent::StateChanged(snapshot) = event {
            snapshots.push(snapshot);
        }
    }
    snapshots
}

pub async fn next_snapshot_matching(
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    predicate: impl Fn(&ControllerSnapshot) -> bool,
) -> ControllerSnapshot {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Some(ControllerEvent::StateChanged(snapshot)) if predicate(&snapshot) => {
                    return snapshot;
                }
                Some(_) => continue,
                None => panic!("controller event channel closed"),
            }
        }
    })
    .await
    .expect("no matching snapshot in time")
}
