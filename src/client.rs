use crate::{
    controller::{
        ControllerEvent,
        Deployment,
        GameSyncController,
    },
    network::{
        NativeCurrency,
        NetworkConfig,
    },
    ui,
    wallets::{
        self,
        KeystoreWallet,
        RpcWallet,
        WalletProvider,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use ethers::types::Address;
use std::{
    future::Future,
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{
    debug,
    error,
    info,
    warn,
};

pub use crate::network::{
    DEFAULT_LOCAL_RPC_URL,
    DEFAULT_SEPOLIA_RPC_URL,
};

pub const CONTRACT_ENV: &str = "TICTACTOE_CONTRACT";
pub const DEFAULT_LOG_DIR: &str = "~/.tictactoe/logs";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkPreset {
    Local,
    Sepolia,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WalletConfig {
    /// Encrypted key file, unlocked with a terminal password prompt.
    Keystore { name: String, dir: PathBuf },
    /// Node or wallet daemon that holds the keys and signs on request.
    Rpc { url: String },
}

impl WalletConfig {
    fn prompts_on_terminal(&self) -> bool {
        matches!(self, WalletConfig::Keystore { .. })
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub deployment: Deployment,
    pub wallet: WalletConfig,
}

/// Resolves the target chain from a preset and/or explicit overrides. Without
/// a preset both the RPC URL and chain id are required.
pub fn select_network(
    preset: Option<NetworkPreset>,
    rpc_url: Option<String>,
    chain_id: Option<u64>,
) -> Result<NetworkConfig> {
    let network = match preset {
        Some(NetworkPreset::Local) => {
            NetworkConfig::local(DEFAULT_LOCAL_RPC_URL).with_rpc_override(rpc_url)
        }
        Some(NetworkPreset::Sepolia) => {
            NetworkConfig::sepolia(DEFAULT_SEPOLIA_RPC_URL).with_rpc_override(rpc_url)
        }
        None => {
            let (Some(rpc_url), Some(chain_id)) = (rpc_url, chain_id) else {
                return Err(eyre!(
                    "Select a network with --local or --sepolia, or pass both --rpc-url and --chain-id"
                ));
            };
            return Ok(NetworkConfig {
                chain_id,
                name: format!("Chain {chain_id}"),
                currency: NativeCurrency::ether(),
                rpc_url,
                explorer_url: None,
            });
        }
    };
    match chain_id {
        Some(id) if id != network.chain_id => Err(eyre!(
            "--chain-id {id} conflicts with the selected network {network}"
        )),
        _ => Ok(network),
    }
}

/// Contract address from the flag, falling back to `TICTACTOE_CONTRACT`.
pub fn resolve_contract_address(flag: Option<String>) -> Result<Address> {
    let raw = match flag {
        Some(raw) => raw,
        None => std::env::var(CONTRACT_ENV).map_err(|_| {
            eyre!("Specify --contract <address> or set {CONTRACT_ENV}")
        })?,
    };
    Address::from_str(raw.trim())
        .wrap_err_with(|| format!("Invalid contract address '{raw}'"))
}

pub fn resolve_log_dir(dir: Option<&str>) -> PathBuf {
    let raw = dir.unwrap_or(DEFAULT_LOG_DIR);
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

pub fn build_wallet(config: &AppConfig) -> Result<Arc<dyn WalletProvider>> {
    match &config.wallet {
        WalletConfig::Keystore { name, dir } => {
            let descriptor = wallets::find_wallet(dir, name)?;
            let wallet =
                KeystoreWallet::with_terminal_prompt(descriptor, &config.deployment.network)?;
            Ok(Arc::new(wallet))
        }
        WalletConfig::Rpc { url } => Ok(Arc::new(RpcWallet::new(url.clone())?)),
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let wallet = build_wallet(&config)?;
    let controller = GameSyncController::new(wallet, config.deployment.clone());
    let mut controller_events = controller.subscribe();
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!(
        network = %config.deployment.network,
        contract = ?config.deployment.contract_address,
        "Starting UI"
    );
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(
        &controller,
        &config.wallet,
        &mut ui_state,
        &mut input_events,
        &mut controller_events,
    )
    .await;
    ui::terminal_exit(&mut ui_state)?;
    controller.disconnect();
    res
}

fn spawn_action<F, Fut>(controller: &Arc<GameSyncController>, label: &'static str, action: F)
where
    F: FnOnce(Arc<GameSyncController>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let fut = action(controller.clone());
    tokio::spawn(async move {
        // the controller has already put the failure on the status line
        if let Err(e) = fut.await {
            debug!(action = label, error = %e, "action failed");
        }
    });
}

/// Keystore unlocking prompts on the terminal, so the UI steps aside for it.
async fn connect_with_prompt(
    controller: &Arc<GameSyncController>,
    ui_state: &mut ui::UiState,
    input_events: &ui::InputEventReceiver,
) -> Result<()> {
    input_events.pause();
    ui::terminal_exit(ui_state)?;
    let result = controller.connect_wallet().await;
    ui::terminal_enter(ui_state)?;
    input_events.resume();
    if let Err(e) = result {
        error!(error = %e, "wallet connection failed");
    }
    ui::draw(ui_state, &controller.snapshot()).wrap_err("draw after wallet unlock failed")
}

async fn run_loop(
    controller: &Arc<GameSyncController>,
    wallet: &WalletConfig,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
    controller_events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
) -> Result<()> {
    info!("Running app loop");
    spawn_action(controller, "start", |c| async move { c.start().await });
    ui::draw(ui_state, &controller.snapshot()).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            maybe_event = controller_events.recv() => {
                match maybe_event {
                    Some(ControllerEvent::StateChanged(snapshot)) => {
                        ui::draw(ui_state, &snapshot)
                            .wrap_err("draw after state change failed")?;
                    }
                    Some(ControllerEvent::Chain(event)) => {
                        debug!(?event, "chain event observed");
                    }
                    None => {
                        warn!("controller event channel closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {
                        ui::draw(ui_state, &controller.snapshot())
                            .wrap_err("redraw failed")?;
                    }
                    ui::UserEvent::Connect => {
                        let needs_prompt = wallet.prompts_on_terminal()
                            && controller.snapshot().account().is_none();
                        if needs_prompt {
                            connect_with_prompt(controller, ui_state, input_events).await?;
                        } else {
                            spawn_action(controller, "connect", |c| async move {
                                c.connect_wallet().await
                            });
                        }
                    }
                    ui::UserEvent::Disconnect => controller.disconnect(),
                    ui::UserEvent::AddNetwork => {
                        spawn_action(controller, "add_network", |c| async move {
                            c.add_network().await
                        });
                    }
                    ui::UserEvent::Refresh => {
                        spawn_action(controller, "refresh", |c| async move {
                            c.refresh_state().await
                        });
                    }
                    ui::UserEvent::Join => {
                        spawn_action(controller, "join", |c| async move { c.join_game().await });
                    }
                    ui::UserEvent::MakeMove { row, col } => {
                        spawn_action(controller, "move", move |c| async move {
                            c.make_move(row, col).await
                        });
                    }
                }
            }
        }
    }
    info!("Leaving app loop");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::network::{
        LOCAL_CHAIN_ID,
        SEPOLIA_CHAIN_ID,
    };

    #[test]
    fn select_network__local_preset_uses_default_url() {
        let network = select_network(Some(NetworkPreset::Local), None, None).unwrap();
        assert_eq!(network.chain_id, LOCAL_CHAIN_ID);
        assert_eq!(network.rpc_url, DEFAULT_LOCAL_RPC_URL);
    }

    #[test]
    fn select_network__preset_accepts_url_override() {
        // given
        let url = Some(String::from("https://sepolia.example.org"));

        // when
        let network = select_network(Some(NetworkPreset::Sepolia), url, Some(SEPOLIA_CHAIN_ID))
            .unwrap();

        // then
        assert_eq!(network.chain_id, SEPOLIA_CHAIN_ID);
        assert_eq!(network.rpc_url, "https://sepolia.example.org");
        assert!(network.explorer_url.is_some());
    }

    #[test]
    fn select_network__conflicting_chain_id_is_rejected() {
        let err = select_network(Some(NetworkPreset::Local), None, Some(1)).unwrap_err();
        assert!(err.to_string().contains("--chain-id 1"));
    }

    #[test]
    fn select_network__custom_requires_url_and_chain_id() {
        assert!(select_network(None, Some(String::from("http://node:8545")), None).is_err());
        assert!(select_network(None, None, Some(5)).is_err());

        let network =
            select_network(None, Some(String::from("http://node:8545")), Some(5)).unwrap();
        assert_eq!(network.chain_id, 5);
        assert_eq!(network.name, "Chain 5");
        assert!(network.explorer_url.is_none());
    }

    #[test]
    fn resolve_contract_address__parses_flag() {
        let address = resolve_contract_address(Some(String::from(
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        )))
        .unwrap();
        assert_eq!(
            address,
            Address::from_str("0x5fbdb2315678afecb367f032d93f642f64180aa3").unwrap()
        );
    }

    #[test]
    fn resolve_contract_address__rejects_garbage() {
        let err = resolve_contract_address(Some(String::from("not-an-address"))).unwrap_err();
        assert!(err.to_string().contains("Invalid contract address"));
    }

    #[test]
    fn resolve_log_dir__expands_home() {
        let dir = resolve_log_dir(None);
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert_eq!(resolve_log_dir(Some("/tmp/logs")), PathBuf::from("/tmp/logs"));
    }
}
