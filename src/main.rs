use color_eyre::eyre::{
    Result,
    eyre,
};
use tictactoe_dapp::{
    client::{
        self,
        NetworkPreset,
        WalletConfig,
    },
    controller::Deployment,
    wallets,
};

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: tictactoe [--local | --sepolia] [--rpc-url <url>] [--chain-id <id>]\n\
         [--contract <address>] [--wallet <name> [--wallet-dir <path>] | --wallet-rpc <url>]\n\
         [--log-dir <path>]\n\
         \n\
         Flags:\n\
           --local              Play against a local node (default RPC {})\n\
           --sepolia            Play on Sepolia (default RPC {})\n\
           --rpc-url <url>      Override the RPC URL; with --chain-id selects a custom network\n\
           --chain-id <id>      Chain id of a custom network\n\
           --contract <address> Game contract address (falls back to ${})\n\
           --wallet <name>      Keystore to play with\n\
           --wallet-dir <path>  Keystore directory (defaults to ~/.foundry/keystores)\n\
           --wallet-rpc <url>   Sign through a node or wallet daemon instead of a keystore\n\
           --log-dir <path>     Where log files go (defaults to {})\n\
         \n\
         ${} overrides the RPC URL sent when adding the network to the wallet.",
        client::DEFAULT_LOCAL_RPC_URL,
        client::DEFAULT_SEPOLIA_RPC_URL,
        client::CONTRACT_ENV,
        client::DEFAULT_LOG_DIR,
        tictactoe_dapp::network::RPC_URL_ENV,
    );
    std::process::exit(0);
}

fn once<T>(slot: &mut Option<T>, value: T, flag: &str) -> Result<()> {
    if slot.is_some() {
        return Err(eyre!("{flag} may only be specified once"));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_cli_args() -> Result<(client::AppConfig, Option<String>)> {
    let mut args = std::env::args().skip(1);
    let mut preset: Option<NetworkPreset> = None;
    let mut rpc_url: Option<String> = None;
    let mut chain_id: Option<u64> = None;
    let mut contract: Option<String> = None;
    let mut wallet_name: Option<String> = None;
    let mut wallet_dir: Option<String> = None;
    let mut wallet_rpc: Option<String> = None;
    let mut log_dir: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--local" | "--sepolia" => {
                if preset.is_some() {
                    return Err(eyre!(
                        "Multiple network flags provided; choose one of --local/--sepolia"
                    ));
                }
                preset = Some(if arg == "--local" {
                    NetworkPreset::Local
                } else {
                    NetworkPreset::Sepolia
                });
            }
            "--rpc-url" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--rpc-url requires a URL argument"))?;
                once(&mut rpc_url, url, "--rpc-url")?;
            }
            "--chain-id" => {
                let raw = args
                    .next()
                    .ok_or_else(|| eyre!("--chain-id requires a number"))?;
                let id = raw
                    .parse::<u64>()
                    .map_err(|_| eyre!("--chain-id expects a number, got '{raw}'"))?;
                once(&mut chain_id, id, "--chain-id")?;
            }
            "--contract" => {
                let address = args
                    .next()
                    .ok_or_else(|| eyre!("--contract requires an address"))?;
                once(&mut contract, address, "--contract")?;
            }
            "--wallet" => {
                let name = args
                    .next()
                    .ok_or_else(|| eyre!("--wallet requires a wallet name"))?;
                once(&mut wallet_name, name, "--wallet")?;
            }
            "--wallet-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--wallet-dir requires a path argument"))?;
                once(&mut wallet_dir, dir, "--wallet-dir")?;
            }
            "--wallet-rpc" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--wallet-rpc requires a URL argument"))?;
                once(&mut wallet_rpc, url, "--wallet-rpc")?;
            }
            "--log-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--log-dir requires a path argument"))?;
                once(&mut log_dir, dir, "--log-dir")?;
            }
            "--help" | "-h" => print_usage_and_exit(),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    let network = client::select_network(preset, rpc_url, chain_id)?;
    let contract_address = client::resolve_contract_address(contract)?;

    let wallet = match (wallet_name, wallet_rpc) {
        (Some(_), Some(_)) => {
            return Err(eyre!("Use either --wallet or --wallet-rpc, not both"));
        }
        (Some(name), None) => WalletConfig::Keystore {
            name,
            dir: wallets::resolve_wallet_dir(wallet_dir.as_deref())?,
        },
        (None, Some(url)) => WalletConfig::Rpc { url },
        (None, None) => {
            return Err(eyre!(
                "Specify --wallet <name> for a keystore or --wallet-rpc <url>"
            ));
        }
    };

    let config = client::AppConfig {
        deployment: Deployment {
            contract_address,
            network,
        },
        wallet,
    };
    Ok((config, log_dir))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    let (app_config, log_dir) = parse_cli_args()?;
    let _log_guard = tictactoe_dapp::init_tracing(&client::resolve_log_dir(log_dir.as_deref()))?;
    tracing::info!("starting tic-tac-toe client");
    client::run_app(app_config).await
}
