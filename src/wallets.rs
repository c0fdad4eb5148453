use crate::{
    contract::{
        EthersGameContract,
        GameContract,
    },
    network::NetworkConfig,
};
use async_trait::async_trait;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use eth_keystore::decrypt_key;
use ethers::{
    core::k256::ecdsa::SigningKey,
    middleware::SignerMiddleware,
    providers::{
        Http,
        Middleware,
        Provider,
        ProviderError,
        RpcError,
    },
    signers::{
        LocalWallet,
        MnemonicBuilder,
        Signer,
        coins_bip39::English,
    },
    types::Address,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        Mutex,
        PoisonError,
        RwLock,
    },
    time::Duration,
};
use thiserror::Error;
use tracing::{
    info,
    warn,
};

const PROVIDER_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// EIP-1193 "user rejected the request".
const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("User rejected the request")]
    Rejected,
    #[error("Wallet is not connected")]
    NotConnected,
    #[error("Wallet returned no accounts")]
    NoAccounts,
    #[error("Unsupported chain: {url} reports chain id {actual}, expected {expected}")]
    UnsupportedChain {
        url: String,
        expected: u64,
        actual: u64,
    },
}

/// Everything the client needs from a wallet: account access, chain
/// information, network management and a signer to bind contracts with.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn label(&self) -> String;

    /// Accounts already authorized for this client; never prompts.
    async fn accounts(&self) -> Result<Vec<Address>>;

    /// Asks the wallet for account access, prompting the user if needed.
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    async fn chain_id(&self) -> Result<u64>;

    async fn add_network(&self, network: &NetworkConfig) -> Result<()>;

    /// Contract handle whose transactions are signed by the connected account.
    async fn bind_game(&self, address: Address) -> Result<Arc<dyn GameContract>>;
}

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;
pub type PasswordPrompt = Arc<dyn Fn(&str) -> std::io::Result<String> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".foundry").join("keystores"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).wrap_err("Failed to read keystore directory")? {
        let entry = entry.wrap_err("Failed to read keystore entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(?path, "skipping keystore with non UTF-8 name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let name = name.trim_end_matches(".json").to_owned();
        wallets.push(WalletDescriptor::new(name, path));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    let wallets = list_wallets(dir)?;
    wallets
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| eyre!("Wallet '{name}' not found in {}", dir.to_string_lossy()))
}

fn connect_provider(url: &str) -> Result<Provider<Http>> {
    let provider = Provider::<Http>::try_from(url)
        .wrap_err_with(|| format!("Invalid RPC URL {url}"))?;
    Ok(provider.interval(PROVIDER_POLL_INTERVAL))
}

/// Keystore-backed wallet: decrypts a local key file on first account request
/// and signs transactions itself.
pub struct KeystoreWallet {
    descriptor: WalletDescriptor,
    prompt: PasswordPrompt,
    provider: RwLock<Provider<Http>>,
    signer: Mutex<Option<LocalWallet>>,
}

impl KeystoreWallet {
    pub fn new(
        descriptor: WalletDescriptor,
        network: &NetworkConfig,
        prompt: PasswordPrompt,
    ) -> Result<Self> {
        Ok(Self {
            descriptor,
            prompt,
            provider: RwLock::new(connect_provider(&network.rpc_url)?),
            signer: Mutex::new(None),
        })
    }

    pub fn with_terminal_prompt(
        descriptor: WalletDescriptor,
        network: &NetworkConfig,
    ) -> Result<Self> {
        Self::new(
            descriptor,
            network,
            Arc::new(|prompt: &str| rpassword::prompt_password(prompt)),
        )
    }

    fn provider(&self) -> Provider<Http> {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn unlocked(&self) -> Option<LocalWallet> {
        self.signer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn unlock(&self) -> Result<LocalWallet> {
        let descriptor = self.descriptor.clone();
        let prompt = self.prompt.clone();
        tokio::task::spawn_blocking(move || {
            let message = format!("Enter password for wallet '{}': ", descriptor.name);
            let password = prompt(&message).wrap_err("Failed to read wallet password")?;
            if password.is_empty() {
                return Err(WalletError::Rejected.into());
            }
            let secret = decrypt_key(&descriptor.path, password.as_bytes())
                .map_err(|_| eyre!("Invalid password for wallet '{}'", descriptor.name))?;
            signer_from_secret(&descriptor.name, &secret)
        })
        .await
        .wrap_err("Wallet unlock task failed")?
    }
}

fn signer_from_secret(name: &str, secret: &[u8]) -> Result<LocalWallet> {
    if let Ok(key) = SigningKey::from_slice(secret) {
        return Ok(LocalWallet::from(key));
    }

    if let Ok(mnemonic) = std::str::from_utf8(secret) {
        let word_count = mnemonic.split_whitespace().count();
        if word_count >= 12 {
            let wallet = MnemonicBuilder::<English>::default()
                .phrase(mnemonic)
                .build()
                .wrap_err_with(|| format!("Wallet '{name}' holds an invalid mnemonic"))?;
            return Ok(wallet);
        }
    }

    Err(eyre!("Wallet '{name}' contained unsupported key material"))
}

#[async_trait]
impl WalletProvider for KeystoreWallet {
    fn label(&self) -> String {
        format!("keystore '{}'", self.descriptor.name)
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.unlocked().map(|w| w.address()).into_iter().collect())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        if let Some(wallet) = self.unlocked() {
            return Ok(vec![wallet.address()]);
        }
        let wallet = self.unlock().await?;
        let address = wallet.address();
        info!(wallet = %self.descriptor.name, ?address, "keystore unlocked");
        *self.signer.lock().unwrap_or_else(PoisonError::into_inner) = Some(wallet);
        Ok(vec![address])
    }

    async fn chain_id(&self) -> Result<u64> {
        let chain_id = self.provider().get_chainid().await?;
        Ok(chain_id.as_u64())
    }

    async fn add_network(&self, network: &NetworkConfig) -> Result<()> {
        let provider = connect_provider(&network.rpc_url)?;
        let actual = provider
            .get_chainid()
            .await
            .wrap_err_with(|| format!("Failed to reach {}", network.rpc_url))?
            .as_u64();
        if actual != network.chain_id {
            return Err(WalletError::UnsupportedChain {
                url: network.rpc_url.clone(),
                expected: network.chain_id,
                actual,
            }
            .into());
        }
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = provider;
        info!(network = %network, url = %network.rpc_url, "keystore wallet switched network");
        Ok(())
    }

    async fn bind_game(&self, address: Address) -> Result<Arc<dyn GameContract>> {
        let signer = self.unlocked().ok_or(WalletError::NotConnected)?;
        let chain_id = self.chain_id().await?;
        let client: SignerClient =
            SignerMiddleware::new(self.provider(), signer.with_chain_id(chain_id));
        Ok(Arc::new(EthersGameContract::new(address, Arc::new(client))))
    }
}

/// Wallet reached over JSON-RPC (e.g. a desktop wallet exposing an EIP-1193
/// endpoint). Signing and confirmation prompts happen inside that wallet.
pub struct RpcWallet {
    url: String,
    provider: Provider<Http>,
    selected: Mutex<Option<Address>>,
}

impl RpcWallet {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let provider = connect_provider(&url)?;
        Ok(Self {
            url,
            provider,
            selected: Mutex::new(None),
        })
    }

    fn selected(&self) -> Option<Address> {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn select(&self, accounts: &[Address]) {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner) =
            accounts.first().copied();
    }
}

fn wallet_request_failure(err: ProviderError) -> color_eyre::eyre::Report {
    match err.as_error_response() {
        Some(response) if response.code == USER_REJECTED_CODE => WalletError::Rejected.into(),
        _ => err.into(),
    }
}

#[async_trait]
impl WalletProvider for RpcWallet {
    fn label(&self) -> String {
        format!("wallet at {}", self.url)
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        let accounts = self.provider.get_accounts().await?;
        self.select(&accounts);
        Ok(accounts)
    }

    async fn request_accounts(&self) -> Result<Vec<Address>> {
        let accounts: Vec<Address> = self
            .provider
            .request("eth_requestAccounts", serde_json::json!([]))
            .await
            .map_err(wallet_request_failure)?;
        if accounts.is_empty() {
            return Err(WalletError::NoAccounts.into());
        }
        self.select(&accounts);
        Ok(accounts)
    }

    async fn chain_id(&self) -> Result<u64> {
        let chain_id = self.provider.get_chainid().await?;
        Ok(chain_id.as_u64())
    }

    async fn add_network(&self, network: &NetworkConfig) -> Result<()> {
        let params = network.add_chain_parameters();
        info!(
            params = %serde_json::to_string(&params)?,
            "requesting wallet_addEthereumChain"
        );
        let _: serde_json::Value = self
            .provider
            .request("wallet_addEthereumChain", [params.clone()])
            .await
            .map_err(wallet_request_failure)?;
        let _: serde_json::Value = self
            .provider
            .request(
                "wallet_switchEthereumChain",
                [serde_json::json!({ "chainId": params.chain_id })],
            )
            .await
            .map_err(wallet_request_failure)?;
        Ok(())
    }

    async fn bind_game(&self, address: Address) -> Result<Arc<dyn GameContract>> {
        let account = self.selected().ok_or(WalletError::NotConnected)?;
        let client = self.provider.clone().with_sender(account);
        Ok(Arc::new(EthersGameContract::new(address, Arc::new(client))))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn list_wallets__skips_hidden_files_and_directories() {
        // given
        let dir = TempDir::new("keystores").unwrap();
        fs::write(dir.path().join("bob"), "{}").unwrap();
        fs::write(dir.path().join("alice.json"), "{}").unwrap();
        fs::write(dir.path().join(".DS_Store"), "").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        // when
        let wallets = list_wallets(dir.path()).unwrap();

        // then
        let names: Vec<_> = wallets.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn list_wallets__missing_dir_is_empty() {
        let dir = TempDir::new("keystores").unwrap();
        let wallets = list_wallets(&dir.path().join("absent")).unwrap();
        assert!(wallets.is_empty());
    }

    #[test]
    fn find_wallet__reports_unknown_name() {
        let dir = TempDir::new("keystores").unwrap();
        fs::write(dir.path().join("alice"), "{}").unwrap();

        let err = find_wallet(dir.path(), "carol").unwrap_err();

        assert!(err.to_string().contains("Wallet 'carol' not found"));
    }

    #[test]
    fn resolve_wallet_dir__expands_tilde() {
        let home = std::env::var("HOME").unwrap();
        let dir = resolve_wallet_dir(Some("~/keys")).unwrap();
        assert_eq!(dir, PathBuf::from(home).join("keys"));
    }

    #[test]
    fn signer_from_secret__accepts_raw_private_key() {
        let secret = [7u8; 32];
        let wallet = signer_from_secret("test", &secret).unwrap();
        let expected = LocalWallet::from_bytes(&secret).unwrap();
        assert_eq!(wallet.address(), expected.address());
    }

    #[test]
    fn signer_from_secret__derives_first_account_from_mnemonic() {
        // given
        let phrase = "test test test test test test test test test test test junk";

        // when
        let wallet = signer_from_secret("dev", phrase.as_bytes()).unwrap();

        // then
        let expected: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
            .parse()
            .unwrap();
        assert_eq!(wallet.address(), expected);
    }

    #[test]
    fn signer_from_secret__rejects_garbage() {
        let err = signer_from_secret("test", b"short").unwrap_err();
        assert!(err.to_string().contains("unsupported key material"));
    }

    #[tokio::test]
    async fn keystore_wallet__empty_password_is_a_rejection() {
        // given
        let dir = TempDir::new("keystores").unwrap();
        let descriptor = WalletDescriptor::new("alice", dir.path().join("alice"));
        let network = NetworkConfig::local(crate::network::DEFAULT_LOCAL_RPC_URL);
        let prompt: PasswordPrompt = Arc::new(|_: &str| Ok(String::new()));
        let wallet = KeystoreWallet::new(descriptor, &network, prompt).unwrap();

        // when
        let err = wallet.request_accounts().await.unwrap_err();

        // then
        assert!(matches!(
            err.downcast_ref::<WalletError>(),
            Some(WalletError::Rejected)
        ));
        assert!(wallet.accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keystore_wallet__bind_requires_unlock() {
        let dir = TempDir::new("keystores").unwrap();
        let descriptor = WalletDescriptor::new("alice", dir.path().join("alice"));
        let network = NetworkConfig::local(crate::network::DEFAULT_LOCAL_RPC_URL);
        let prompt: PasswordPrompt = Arc::new(|_: &str| Ok(String::new()));
        let wallet = KeystoreWallet::new(descriptor, &network, prompt).unwrap();

        let err = match wallet.bind_game(Address::zero()).await {
            Ok(_) => panic!("binding without an unlocked signer must fail"),
            Err(err) => err,
        };

        assert!(matches!(
            err.downcast_ref::<WalletError>(),
            Some(WalletError::NotConnected)
        ));
    }
}
