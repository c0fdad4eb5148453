use ethers::types::{
    Address,
    U256,
};
use std::fmt;
use thiserror::Error;

pub const BOARD_SIZE: usize = 3;

pub type BoardCodes = [[u8; BOARD_SIZE]; BOARD_SIZE];

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("Unknown game phase code {0}")]
    Phase(u8),
    #[error("Unknown turn code {0}")]
    Turn(u8),
    #[error("Unknown cell code {code} at row {row}, column {col}")]
    Cell { row: usize, col: usize, code: u8 },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Mark {
    #[default]
    X,
    O,
}

impl TryFrom<u8> for Mark {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Mark::X),
            1 => Ok(Mark::O),
            other => Err(DecodeError::Turn(other)),
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mark::X => "X",
            Mark::O => "O",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Cell {
    #[default]
    Empty,
    X,
    O,
}

impl Cell {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Cell::Empty),
            1 => Some(Cell::X),
            2 => Some(Cell::O),
            _ => None,
        }
    }

    pub fn is_empty(self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Cell::Empty => " ",
            Cell::X => "X",
            Cell::O => "O",
        }
    }
}

/// Lifecycle stage as reported by the contract. Transitions are only ever
/// observed, never driven locally.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Phase {
    #[default]
    Waiting,
    Playing,
    Completed,
}

impl TryFrom<u8> for Phase {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Phase::Waiting),
            1 => Ok(Phase::Playing),
            2 => Ok(Phase::Completed),
            other => Err(DecodeError::Phase(other)),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Waiting => "Waiting for players",
            Phase::Playing => "In progress",
            Phase::Completed => "Completed",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    pub fn from_codes(codes: &BoardCodes) -> Result<Self, DecodeError> {
        let mut cells = [[Cell::Empty; BOARD_SIZE]; BOARD_SIZE];
        for (row, row_codes) in codes.iter().enumerate() {
            for (col, code) in row_codes.iter().enumerate() {
                cells[row][col] = Cell::from_code(*code).ok_or(DecodeError::Cell {
                    row,
                    col,
                    code: *code,
                })?;
            }
        }
        Ok(Self { cells })
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<Cell> {
        self.cells.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn rows(&self) -> &[[Cell; BOARD_SIZE]; BOARD_SIZE] {
        &self.cells
    }

    pub fn is_clear(&self) -> bool {
        self.cells.iter().flatten().all(|c| c.is_empty())
    }
}

/// The three fields read on every refresh, still in contract encoding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RawGameState {
    pub board: BoardCodes,
    pub turn: u8,
    pub phase: u8,
}

/// Renderable projection of the last successful contract read.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GameView {
    pub board: Board,
    pub turn: Mark,
    pub phase: Phase,
    pub stake_amount: String,
}

impl GameView {
    /// `decimals` is the native currency's, used to format the stake.
    pub fn project(
        raw: &RawGameState,
        stake_wei: U256,
        decimals: u8,
    ) -> Result<Self, DecodeError> {
        Ok(Self {
            board: Board::from_codes(&raw.board)?,
            turn: Mark::try_from(raw.turn)?,
            phase: Phase::try_from(raw.phase)?,
            stake_amount: format_stake(stake_wei, decimals),
        })
    }

    /// Whether a move at `(row, col)` may be offered to the player. The
    /// contract still has the final word.
    pub fn is_open_cell(&self, row: usize, col: usize) -> bool {
        self.phase == Phase::Playing
            && self.board.cell(row, col).is_some_and(Cell::is_empty)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChainEvent {
    GameStarted { player_x: Address, player_o: Address },
    MoveMade { player: Address, row: u8, col: u8 },
    GameEnded { winner: Address, is_draw: bool },
}

/// Formats a base-unit amount with `decimals` fractional digits, trailing
/// zeros trimmed.
pub fn format_stake(amount: U256, decimals: u8) -> String {
    let width = usize::from(decimals);
    let unit = U256::exp10(width);
    let whole = amount / unit;
    let fractional = amount % unit;
    if fractional.is_zero() {
        whole.to_string()
    } else {
        let digits = format!("{:0>width$}", fractional.to_string());
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    }
}

pub fn short_address(address: &Address) -> String {
    let encoded = hex::encode(address.as_bytes());
    format!("0x{}…{}", &encoded[..4], &encoded[encoded.len() - 4..])
}
