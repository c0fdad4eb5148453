use crate::{
    game::{
        BoardCodes,
        ChainEvent,
    },
    tictactoe_types::{
        TicTacToe,
        TicTacToeEvents,
    },
};
use async_trait::async_trait;
use color_eyre::eyre::{
    Report,
    Result,
    eyre,
};
use ethers::{
    contract::{
        ContractCall,
        ContractError,
    },
    providers::Middleware,
    types::{
        Address,
        TxHash,
        U64,
        U256,
    },
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{
    debug,
    info,
    warn,
};

/// The slice of the tic-tac-toe contract the client consumes.
#[async_trait]
pub trait GameContract: Send + Sync {
    fn address(&self) -> Address;

    async fn stake_amount(&self) -> Result<U256>;

    async fn board(&self) -> Result<BoardCodes>;

    async fn current_turn(&self) -> Result<u8>;

    async fn game_state(&self) -> Result<u8>;

    /// Pays `payment` to join and resolves once the transaction is mined.
    async fn join_game(&self, payment: U256) -> Result<TxHash>;

    async fn make_move(&self, row: u8, col: u8) -> Result<TxHash>;

    /// Forwards `GameStarted`, `MoveMade` and `GameEnded` into `sink` until
    /// the receiving side goes away.
    async fn watch_events(&self, sink: mpsc::UnboundedSender<ChainEvent>) -> Result<()>;
}

pub struct EthersGameContract<M> {
    contract: TicTacToe<M>,
}

impl<M: Middleware + 'static> EthersGameContract<M> {
    pub fn new(address: Address, client: Arc<M>) -> Self {
        Self {
            contract: TicTacToe::new(address, client),
        }
    }
}

#[async_trait]
impl<M> GameContract for EthersGameContract<M>
where
    M: Middleware + 'static,
{
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn stake_amount(&self) -> Result<U256> {
        self.contract
            .stake_amount()
            .call()
            .await
            .map_err(contract_failure)
    }

    async fn board(&self) -> Result<BoardCodes> {
        self.contract
            .get_board()
            .call()
            .await
            .map_err(contract_failure)
    }

    async fn current_turn(&self) -> Result<u8> {
        self.contract
            .current_turn()
            .call()
            .await
            .map_err(contract_failure)
    }

    async fn game_state(&self) -> Result<u8> {
        self.contract
            .game_state()
            .call()
            .await
            .map_err(contract_failure)
    }

    async fn join_game(&self, payment: U256) -> Result<TxHash> {
        let call = self.contract.join_game().value(payment);
        send_and_confirm(call, "joinGame").await
    }

    async fn make_move(&self, row: u8, col: u8) -> Result<TxHash> {
        let call = self.contract.make_move(row, col);
        send_and_confirm(call, "makeMove").await
    }

    async fn watch_events(&self, sink: mpsc::UnboundedSender<ChainEvent>) -> Result<()> {
        let events = self.contract.events();
        let mut stream = Box::pin(events.stream().await.map_err(contract_failure)?);
        debug!(contract = ?self.contract.address(), "watching contract events");
        while let Some(next) = stream.next().await {
            match next {
                Ok(event) => {
                    if sink.send(ChainEvent::from(event)).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to decode contract event"),
            }
        }
        Ok(())
    }
}

async fn send_and_confirm<M: Middleware + 'static>(
    call: ContractCall<M, ()>,
    label: &'static str,
) -> Result<TxHash> {
    let pending = call.send().await.map_err(contract_failure)?;
    let tx_hash = pending.tx_hash();
    info!(method = label, tx_hash = %hex_hash(&tx_hash), "transaction submitted");
    let receipt = pending
        .await?
        .ok_or_else(|| eyre!("Transaction {} was dropped", hex_hash(&tx_hash)))?;
    if receipt.status == Some(U64::zero()) {
        return Err(eyre!("Transaction {} reverted", hex_hash(&tx_hash)));
    }
    info!(
        method = label,
        tx_hash = %hex_hash(&tx_hash),
        block = ?receipt.block_number,
        "transaction confirmed"
    );
    Ok(tx_hash)
}

fn contract_failure<M: Middleware>(err: ContractError<M>) -> Report {
    if let Some(reason) = err.decode_revert::<String>() {
        return eyre!("Transaction reverted: {reason}");
    }
    eyre!("{err}")
}

pub fn hex_hash(hash: &TxHash) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

impl From<TicTacToeEvents> for ChainEvent {
    fn from(event: TicTacToeEvents) -> Self {
        match event {
            TicTacToeEvents::GameStartedFilter(e) => ChainEvent::GameStarted {
                player_x: e.player_x,
                player_o: e.player_o,
            },
            TicTacToeEvents::MoveMadeFilter(e) => ChainEvent::MoveMade {
                player: e.player,
                row: e.row,
                col: e.col,
            },
            TicTacToeEvents::GameEndedFilter(e) => ChainEvent::GameEnded {
                winner: e.winner,
                is_draw: e.is_draw,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::tictactoe_types::{
        GameEndedFilter,
        GameStartedFilter,
    };

    #[test]
    fn chain_event__from_game_ended_keeps_draw_flag() {
        // given
        let event = TicTacToeEvents::GameEndedFilter(GameEndedFilter {
            winner: Address::zero(),
            is_draw: true,
        });

        // when
        let mapped = ChainEvent::from(event);

        // then
        assert_eq!(
            mapped,
            ChainEvent::GameEnded {
                winner: Address::zero(),
                is_draw: true
            }
        );
    }

    #[test]
    fn chain_event__from_game_started_keeps_players() {
        let x = Address::repeat_byte(1);
        let o = Address::repeat_byte(2);
        let mapped = ChainEvent::from(TicTacToeEvents::GameStartedFilter(
            GameStartedFilter {
                player_x: x,
                player_o: o,
            },
        ));
        assert_eq!(
            mapped,
            ChainEvent::GameStarted {
                player_x: x,
                player_o: o
            }
        );
    }

    #[test]
    fn hex_hash__is_full_length() {
        let hash = TxHash::repeat_byte(0xab);
        let rendered = hex_hash(&hash);
        assert_eq!(rendered.len(), 66);
        assert!(rendered.starts_with("0xabab"));
    }
}
