pub mod client;
pub mod contract;
pub mod controller;
pub mod game;
pub mod network;
pub mod status;
pub mod ui;
pub mod wallets;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub mod tictactoe_types {
    use ethers::contract::abigen;

    abigen!(
        TicTacToe,
        r#"[
            function stakeAmount() external view returns (uint256)
            function getBoard() external view returns (uint8[3][3])
            function currentTurn() external view returns (uint8)
            function gameState() external view returns (uint8)
            function joinGame() external payable
            function makeMove(uint8 row, uint8 col) external
            event GameStarted(address indexed playerX, address indexed playerO)
            event MoveMade(address indexed player, uint8 row, uint8 col)
            event GameEnded(address winner, bool isDraw)
        ]"#
    );
}

use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::path::Path;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

pub const LOG_FILE_PREFIX: &str = "tictactoe.log";

/// Routes tracing output to a daily rolling file; the terminal belongs to the
/// UI. Keep the returned guard alive for the lifetime of the process.
pub fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {e}"))?;
    Ok(guard)
}
