use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// Read when the wallet is asked to add the network, not at startup.
pub const RPC_URL_ENV: &str = "TICTACTOE_RPC_URL";

pub const DEFAULT_LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_SEPOLIA_RPC_URL: &str = "https://rpc.sepolia.org";
pub const LOCAL_CHAIN_ID: u64 = 31_337;
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
const SEPOLIA_EXPLORER_URL: &str = "https://sepolia.etherscan.io";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl NativeCurrency {
    pub fn ether() -> Self {
        Self {
            name: String::from("Ether"),
            symbol: String::from("ETH"),
            decimals: 18,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub currency: NativeCurrency,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
}

impl NetworkConfig {
    pub fn local(rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id: LOCAL_CHAIN_ID,
            name: String::from("Local"),
            currency: NativeCurrency::ether(),
            rpc_url: rpc_url.into(),
            explorer_url: None,
        }
    }

    pub fn sepolia(rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id: SEPOLIA_CHAIN_ID,
            name: String::from("Sepolia"),
            currency: NativeCurrency {
                name: String::from("Sepolia Ether"),
                symbol: String::from("ETH"),
                decimals: 18,
            },
            rpc_url: rpc_url.into(),
            explorer_url: Some(SEPOLIA_EXPLORER_URL.to_string()),
        }
    }

    /// Copy of this network whose RPC URL comes from the environment when
    /// set. Queried at call time so an edited `.env`/shell wins.
    pub fn with_env_rpc_url(&self) -> Self {
        self.with_rpc_override(std::env::var(RPC_URL_ENV).ok())
    }

    pub fn with_rpc_override(&self, rpc_url: Option<String>) -> Self {
        let mut network = self.clone();
        if let Some(url) = rpc_url.filter(|u| !u.trim().is_empty()) {
            network.rpc_url = url.trim().to_string();
        }
        network
    }

    /// EIP-3085 `wallet_addEthereumChain` parameter object.
    pub fn add_chain_parameters(&self) -> AddEthereumChainParameter {
        AddEthereumChainParameter {
            chain_id: format!("{:#x}", self.chain_id),
            chain_name: self.name.clone(),
            native_currency: self.currency.clone(),
            rpc_urls: vec![self.rpc_url.clone()],
            block_explorer_urls: self.explorer_url.iter().cloned().collect(),
        }
    }

    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        self.explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }
}

impl fmt::Display for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (chain id {})", self.name, self.chain_id)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEthereumChainParameter {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_explorer_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn add_chain_parameters__serializes_in_wallet_shape() {
        // given
        let network = NetworkConfig::sepolia("https://rpc.example");

        // when
        let json = serde_json::to_value(network.add_chain_parameters()).unwrap();

        // then
        assert_eq!(
            json,
            serde_json::json!({
                "chainId": "0xaa36a7",
                "chainName": "Sepolia",
                "nativeCurrency": { "name": "Sepolia Ether", "symbol": "ETH", "decimals": 18 },
                "rpcUrls": ["https://rpc.example"],
                "blockExplorerUrls": ["https://sepolia.etherscan.io"],
            })
        );
    }

    #[test]
    fn add_chain_parameters__omits_missing_explorer() {
        let json =
            serde_json::to_value(NetworkConfig::local("http://x").add_chain_parameters())
                .unwrap();
        assert_eq!(json["chainId"], "0x7a69");
        assert!(json.get("blockExplorerUrls").is_none());
    }

    #[test]
    fn with_rpc_override__prefers_non_blank_value() {
        let network = NetworkConfig::local(DEFAULT_LOCAL_RPC_URL);

        let overridden = network.with_rpc_override(Some(" http://node:8545 ".into()));
        let blank = network.with_rpc_override(Some("  ".into()));
        let unset = network.with_rpc_override(None);

        assert_eq!(overridden.rpc_url, "http://node:8545");
        assert_eq!(blank.rpc_url, DEFAULT_LOCAL_RPC_URL);
        assert_eq!(unset, network);
    }

    #[test]
    fn explorer_tx_url__joins_base_and_hash() {
        let network = NetworkConfig::sepolia(DEFAULT_SEPOLIA_RPC_URL);
        assert_eq!(
            network.explorer_tx_url("0xabc").as_deref(),
            Some("https://sepolia.etherscan.io/tx/0xabc")
        );
        assert_eq!(NetworkConfig::local("http://x").explorer_tx_url("0xabc"), None);
    }
}
