use crate::{
    network::NetworkConfig,
    wallets::WalletError,
};
use color_eyre::eyre::Report;

pub const TRANSACTION_CANCELLED: &str = "Transaction cancelled";

const REJECTION_MARKERS: [&str; 5] = [
    "user rejected",
    "user denied",
    "rejected by user",
    "action_rejected",
    "code: 4001",
];

const UNSUPPORTED_CHAIN_MARKERS: [&str; 3] =
    ["unsupported chain", "chain not supported", "unrecognized chain"];

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UiStatus {
    pub busy: bool,
    pub message: String,
}

impl UiStatus {
    pub fn idle(message: impl Into<String>) -> Self {
        Self {
            busy: false,
            message: message.into(),
        }
    }

    pub fn working(message: impl Into<String>) -> Self {
        Self {
            busy: true,
            message: message.into(),
        }
    }
}

fn chain_text(err: &Report) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
        .to_lowercase()
}

pub fn is_user_rejection(err: &Report) -> bool {
    let typed = err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<WalletError>(), Some(WalletError::Rejected)));
    if typed {
        return true;
    }
    let text = chain_text(err);
    REJECTION_MARKERS.iter().any(|marker| text.contains(marker))
}

pub fn is_unsupported_chain(err: &Report) -> bool {
    let typed = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<WalletError>(),
            Some(WalletError::UnsupportedChain { .. })
        )
    });
    if typed {
        return true;
    }
    let text = chain_text(err);
    UNSUPPORTED_CHAIN_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

/// Message shown for a failure that gets no special treatment: the error's
/// own text, unmodified.
pub fn failure_message(err: &Report) -> String {
    err.to_string()
}

pub fn join_failure_message(err: &Report) -> String {
    if is_user_rejection(err) {
        TRANSACTION_CANCELLED.to_string()
    } else {
        failure_message(err)
    }
}

pub fn init_failure_message(err: &Report, network: &NetworkConfig) -> String {
    if is_unsupported_chain(err) {
        unsupported_network_message(network)
    } else {
        failure_message(err)
    }
}

pub fn unsupported_network_message(network: &NetworkConfig) -> String {
    format!("Unsupported network. Add or switch to {network}")
}

pub fn chain_mismatch_message(network: &NetworkConfig, actual_chain_id: u64) -> String {
    format!(
        "Wallet is on chain {actual_chain_id}; please switch to {network} (press n to add it)"
    )
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use color_eyre::eyre::{
        WrapErr,
        eyre,
    };

    fn network() -> NetworkConfig {
        NetworkConfig::local("http://127.0.0.1:8545")
    }

    #[test]
    fn join_failure_message__typed_rejection_is_cancelled() {
        let err: Report = WalletError::Rejected.into();
        assert_eq!(join_failure_message(&err), TRANSACTION_CANCELLED);
    }

    #[test]
    fn join_failure_message__wrapped_rejection_is_cancelled() {
        let err = Err::<(), _>(WalletError::Rejected)
            .wrap_err("signing failed")
            .unwrap_err();
        assert_eq!(join_failure_message(&err), TRANSACTION_CANCELLED);
    }

    #[test]
    fn join_failure_message__rpc_rejection_text_is_cancelled() {
        let err = eyre!("(code: 4001, message: User rejected the request., data: None)");
        assert_eq!(join_failure_message(&err), TRANSACTION_CANCELLED);

        let err = eyre!("MetaMask Tx Signature: User denied transaction signature.");
        assert_eq!(join_failure_message(&err), TRANSACTION_CANCELLED);
    }

    #[test]
    fn join_failure_message__passes_other_errors_through() {
        let err = eyre!("insufficient funds for gas * price + value");
        assert_eq!(
            join_failure_message(&err),
            "insufficient funds for gas * price + value"
        );
    }

    #[test]
    fn init_failure_message__classifies_unsupported_chain() {
        let err: Report = WalletError::UnsupportedChain {
            url: "http://x".into(),
            expected: 31_337,
            actual: 1,
        }
        .into();
        assert_eq!(
            init_failure_message(&err, &network()),
            "Unsupported network. Add or switch to Local (chain id 31337)"
        );

        let err = eyre!("Unsupported chain id 5");
        assert_eq!(
            init_failure_message(&err, &network()),
            unsupported_network_message(&network())
        );
    }

    #[test]
    fn init_failure_message__passes_other_errors_through() {
        let err = eyre!("connection refused");
        assert_eq!(init_failure_message(&err, &network()), "connection refused");
    }
}
