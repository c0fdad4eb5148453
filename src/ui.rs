use crate::{
    controller::ControllerSnapshot,
    game::{
        BOARD_SIZE,
        Cell,
        GameView,
        Phase,
        short_address,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::{
    io::stdout,
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::sync::mpsc;

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UserEvent {
    Quit,
    Connect,
    Disconnect,
    AddNetwork,
    Refresh,
    Join,
    MakeMove { row: u8, col: u8 },
    Redraw,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
enum Mode {
    #[default]
    Normal,
    QuitModal,
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    cursor: (usize, usize),
    // cached from the last drawn snapshot so key handling can guard actions
    view: Option<GameView>,
    connected: bool,
    busy: bool,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

impl UiState {
    pub fn cursor(&self) -> (usize, usize) {
        self.cursor
    }

    /// Caches the parts of `snap` that key handling depends on.
    pub fn observe(&mut self, snap: &ControllerSnapshot) {
        self.view = snap.view.clone();
        self.connected = snap.account().is_some();
        self.busy = snap.status.busy;
    }

    fn can_join(&self) -> bool {
        self.connected
            && !self.busy
            && self.view.as_ref().is_some_and(|v| v.phase == Phase::Waiting)
    }

    fn move_at(&self, row: usize, col: usize) -> Option<UserEvent> {
        if !self.connected || self.busy {
            return None;
        }
        let view = self.view.as_ref()?;
        view.is_open_cell(row, col).then_some(UserEvent::MakeMove {
            row: row as u8,
            col: col as u8,
        })
    }

    fn shift_cursor(&mut self, d_row: isize, d_col: isize) {
        let clamp = |v: usize, d: isize| {
            v.saturating_add_signed(d).min(BOARD_SIZE - 1)
        };
        self.cursor = (clamp(self.cursor.0, d_row), clamp(self.cursor.1, d_col));
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit(state: &mut UiState) -> Result<()> {
    state.terminal = None;
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &ControllerSnapshot) -> Result<()> {
    state.observe(snap);
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| render(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

/// Terminal input read on a dedicated thread. Reading can be paused while
/// something else (a password prompt) owns the terminal.
pub struct InputEventReceiver {
    rx: mpsc::UnboundedReceiver<std::io::Result<Event>>,
    paused: Arc<AtomicBool>,
}

impl InputEventReceiver {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    let paused = Arc::new(AtomicBool::new(false));
    let reader_paused = paused.clone();
    std::thread::spawn(move || {
        loop {
            if reader_paused.load(Ordering::SeqCst) {
                std::thread::sleep(INPUT_POLL_INTERVAL);
                continue;
            }
            let next = match event::poll(INPUT_POLL_INTERVAL) {
                Ok(false) => {
                    if tx.is_closed() {
                        break;
                    }
                    continue;
                }
                Ok(true) => event::read(),
                Err(e) => Err(e),
            };
            let failed = next.is_err();
            if tx.send(next).is_err() || failed {
                break;
            }
        }
    });
    InputEventReceiver { rx, paused }
}

pub async fn next_raw_event(input: &mut InputEventReceiver) -> Result<Event> {
    match input.rx.recv().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("Terminal input stream closed")),
    }
}

/// Maps a terminal event onto a user intent. Actions the current view does
/// not offer (joining outside the waiting phase, moving onto a taken cell,
/// anything while busy) produce nothing.
pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let k = match event {
        Event::Key(k) if k.kind == KeyEventKind::Press => k,
        Event::Resize(..) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    // raw mode swallows SIGINT
    if k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }
    if state.mode == Mode::QuitModal {
        return match k.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        };
    }
    match k.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('c') => Some(UserEvent::Connect),
        KeyCode::Char('d') => Some(UserEvent::Disconnect),
        KeyCode::Char('n') => Some(UserEvent::AddNetwork),
        KeyCode::Char('r') => Some(UserEvent::Refresh),
        KeyCode::Char('j') => state.can_join().then_some(UserEvent::Join),
        KeyCode::Up => {
            state.shift_cursor(-1, 0);
            Some(UserEvent::Redraw)
        }
        KeyCode::Down => {
            state.shift_cursor(1, 0);
            Some(UserEvent::Redraw)
        }
        KeyCode::Left => {
            state.shift_cursor(0, -1);
            Some(UserEvent::Redraw)
        }
        KeyCode::Right => {
            state.shift_cursor(0, 1);
            Some(UserEvent::Redraw)
        }
        KeyCode::Enter | KeyCode::Char(' ') => {
            let (row, col) = state.cursor;
            state.move_at(row, col)
        }
        KeyCode::Char(c @ '1'..='9') => {
            let idx = c as usize - '1' as usize;
            let (row, col) = (idx / BOARD_SIZE, idx % BOARD_SIZE);
            state.cursor = (row, col);
            state.move_at(row, col).or(Some(UserEvent::Redraw))
        }
        _ => None,
    }
}

pub fn render(f: &mut Frame, state: &UiState, snap: &ControllerSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),  // wallet + network
            Constraint::Min(11),    // game
            Constraint::Length(3),  // status
            Constraint::Length(3),  // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    draw_game(f, chunks[1], state, snap);
    draw_status(f, chunks[2], snap);
    draw_help(f, chunks[3]);
    draw_modals(f, state);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &ControllerSnapshot) {
    let account = match snap.account() {
        Some(address) => short_address(&address),
        None => String::from("not connected"),
    };
    let synced = match snap.last_synced {
        Some(at) => at.format("%H:%M:%S").to_string(),
        None => String::from("never"),
    };
    let mut lines = vec![Line::from(format!(
        "Wallet: {} ({}) | Network: {} | Synced: {}",
        account, snap.wallet_label, snap.network, synced
    ))];
    if let Some(warning) = &snap.network_warning {
        lines.push(Line::styled(
            warning.clone(),
            Style::default().fg(Color::Yellow),
        ));
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Wallet"));
    f.render_widget(widget, area);
}

fn draw_game(f: &mut Frame, area: Rect, state: &UiState, snap: &ControllerSnapshot) {
    let block = Block::default().borders(Borders::ALL).title("Tic-Tac-Toe");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let symbol = &snap.network.currency.symbol;
    let mut lines: Vec<Line> = Vec::new();
    match (snap.account(), &snap.view) {
        (None, _) => {
            lines.push(button("Connect Wallet", true));
            lines.push(Line::styled(
                "press c to connect",
                Style::default().fg(Color::DarkGray),
            ));
        }
        (Some(_), None) => {
            lines.push(Line::from("Loading game state..."));
        }
        (Some(_), Some(view)) => match view.phase {
            Phase::Waiting => {
                lines.push(Line::from(format!("Status: {}", view.phase)));
                lines.push(Line::from(format!(
                    "Stake: {} {}",
                    view.stake_amount, symbol
                )));
                lines.push(Line::from(""));
                lines.push(button("Join Game", !snap.status.busy));
            }
            Phase::Playing => {
                lines.push(Line::from(format!("Current Turn: {}", view.turn)));
                lines.push(Line::from(format!(
                    "Stake: {} {}",
                    view.stake_amount, symbol
                )));
                lines.push(Line::from(""));
                lines.extend(board_lines(view, Some(state.cursor), !snap.status.busy));
            }
            Phase::Completed => {
                lines.push(Line::styled(
                    "Game Over",
                    Style::default().add_modifier(Modifier::BOLD),
                ));
                lines.push(Line::from(""));
                lines.extend(board_lines(view, None, false));
            }
        },
    }
    f.render_widget(Paragraph::new(lines), inner);
}

fn button(label: &str, enabled: bool) -> Line<'static> {
    let style = if enabled {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Line::styled(format!("[ {label} ]"), style)
}

fn board_lines(view: &GameView, cursor: Option<(usize, usize)>, enabled: bool) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for (r, row) in view.board.rows().iter().enumerate() {
        if r > 0 {
            lines.push(Line::from("───┼───┼───"));
        }
        let mut spans = Vec::new();
        for (c, cell) in row.iter().enumerate() {
            if c > 0 {
                spans.push(Span::raw("│"));
            }
            let mut style = match cell {
                Cell::X => Style::default().fg(Color::Cyan),
                Cell::O => Style::default().fg(Color::Magenta),
                Cell::Empty if enabled && view.is_open_cell(r, c) => Style::default(),
                Cell::Empty => Style::default().fg(Color::DarkGray),
            };
            if cursor == Some((r, c)) {
                style = style.add_modifier(Modifier::REVERSED);
            }
            let glyph = match cell {
                Cell::Empty => format!(" {} ", r * BOARD_SIZE + c + 1),
                _ => format!(" {} ", cell.symbol()),
            };
            let glyph = if cell.is_empty() && !enabled {
                String::from("   ")
            } else {
                glyph
            };
            spans.push(Span::styled(glyph, style));
        }
        lines.push(Line::from(spans));
    }
    lines
}

fn draw_status(f: &mut Frame, area: Rect, snap: &ControllerSnapshot) {
    let (title, style) = if snap.status.busy {
        ("Status (working...)", Style::default().fg(Color::Yellow))
    } else {
        ("Status", Style::default().fg(Color::Green))
    };
    let message = if snap.status.message.trim().is_empty() {
        "Ready"
    } else {
        snap.status.message.as_str()
    };
    let widget = Paragraph::new(message.to_string())
        .wrap(Wrap { trim: false })
        .style(style)
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help = Paragraph::new(
        "c connect | j join | ←/→/↑/↓ select | Enter/1-9 move | r refresh | n add network | d disconnect | q quit",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    match state.mode {
        Mode::QuitModal => {
            let area = centered_rect(40, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Confirm Quit");
            let p = Paragraph::new("Quit the game? (Y/N)");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::Normal => {}
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1])[1]
}
