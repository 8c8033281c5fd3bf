use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ranklist::config::{Config, open_log_file};
use ranklist::crawl::HttpFetchClient;
use ranklist::engine::FetchEngine;
use ranklist::populate::Ranklist;
use ranklist::roster::{self, RosterStore};
use ranklist::schema::ColumnSchema;
use ranklist::state::{AppState, CellState, Delta, DeltaSink, Screen, apply_delta};

const STAT_COLUMN_WIDTH: u16 = 16;

struct App {
    state: AppState,
    should_quit: bool,
    ranklist: Ranklist,
    store: Arc<RosterStore>,
}

impl App {
    fn on_key(&mut self, key: KeyEvent) {
        if self.state.form.is_some() {
            self.on_form_key(key);
            return;
        }
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('r') | KeyCode::Char('R') => self.reload(),
            KeyCode::Tab => self.state.toggle_screen(),
            KeyCode::Char('j') | KeyCode::Down => self.state.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.state.select_prev(),
            KeyCode::Char('l') | KeyCode::Right => self.state.scroll_right(),
            KeyCode::Char('h') | KeyCode::Left => self.state.scroll_left(),
            KeyCode::Char('a') if self.state.screen == Screen::Roster => {
                self.state.begin_edit(self.ranklist.schema(), None)
            }
            KeyCode::Char('e') | KeyCode::Enter if self.state.screen == Screen::Roster => {
                if !self.state.roster.is_empty() {
                    let idx = self.state.roster_selected;
                    self.state.begin_edit(self.ranklist.schema(), Some(idx));
                }
            }
            KeyCode::Char('x') if self.state.screen == Screen::Roster => self.delete_selected(),
            KeyCode::Char('?') => self.state.help_overlay = !self.state.help_overlay,
            _ => {}
        }
    }

    fn on_form_key(&mut self, key: KeyEvent) {
        let Some(form) = self.state.form.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Esc => self.state.form = None,
            KeyCode::Tab | KeyCode::Down => form.focus_next(),
            KeyCode::BackTab | KeyCode::Up => form.focus_prev(),
            KeyCode::Backspace => form.pop_char(),
            KeyCode::Char(ch) => form.push_char(ch),
            KeyCode::Enter => {
                let index = form.index;
                let entry = form.to_entry();
                self.state.form = None;
                if entry.is_blank() {
                    self.state.push_log("[INFO] Empty entry discarded");
                    return;
                }
                let mut updated = self.state.roster.clone();
                let idx = roster::upsert(&mut updated, index, entry);
                if self.persist(updated) {
                    self.state.roster_selected = idx;
                }
            }
            _ => {}
        }
    }

    fn delete_selected(&mut self) {
        let mut updated = self.state.roster.clone();
        if roster::remove(&mut updated, self.state.roster_selected).is_some() {
            self.persist(updated);
        }
    }

    fn persist(&mut self, updated: Vec<roster::RosterEntry>) -> bool {
        match self.store.save(&updated) {
            Ok(()) => {
                self.reload();
                true
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "roster save failed");
                self.state.push_log(format!("[WARN] Roster save failed: {err:#}"));
                false
            }
        }
    }

    fn reload(&mut self) {
        match self.ranklist.reload() {
            Ok(reload) => {
                self.state.set_roster(reload.roster);
                self.state.push_log(format!(
                    "[INFO] Reload #{}: {} rows, {} lookups",
                    reload.report.pass, reload.report.rows, reload.report.tasks
                ));
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "roster load failed");
                self.state.set_roster(Vec::new());
                self.state.push_log(format!("[WARN] Roster load failed: {err:#}"));
            }
        }
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    let config = Config::from_env();
    let log_warning = init_logging(&config)
        .err()
        .map(|err| format!("[WARN] File logging disabled: {err:#}"));
    if let Some(warning) = &log_warning {
        eprintln!("{warning}");
    }

    let roster_path = config
        .roster_path
        .clone()
        .context("no roster path: set RANKLIST_ROSTER or HOME")?;
    let store = Arc::new(RosterStore::new(roster_path));
    let schema = Arc::new(ColumnSchema::standard().clone());

    let (tx, rx) = mpsc::channel();
    let client = HttpFetchClient::new(config.http_timeout, config.crawl_service_url.clone())?;
    let engine = FetchEngine::start(config.workers, Arc::new(client), Arc::new(DeltaSink::new(tx)));
    info!(
        workers = engine.worker_count(),
        roster = %store.path().display(),
        "ranklist starting"
    );
    let ranklist = Ranklist::new(engine, Arc::clone(&schema), store.clone());

    let mut app = App {
        state: AppState::new(&schema),
        should_quit: false,
        ranklist,
        store,
    };
    if let Some(warning) = log_warning {
        app.state.push_log(warning);
    }
    app.reload();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app, rx);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    info!("ranklist exiting");
    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let Some(path) = config.log_file.as_ref() else {
        return Ok(());
    };
    let file = open_log_file(path)?;
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|err| anyhow::anyhow!("install subscriber: {err}"))
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    rx: mpsc::Receiver<Delta>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(delta) = rx.try_recv() {
            apply_delta(&mut app.state, delta);
        }

        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            app.on_key(key);
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(1),
            Constraint::Length(5),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let header = Paragraph::new(header_text(app))
        .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    match app.state.screen {
        Screen::Ranklist => render_grid(frame, chunks[1], &app.state),
        Screen::Roster => render_roster(frame, chunks[1], app),
    }

    let console = Paragraph::new(console_text(&app.state))
        .block(Block::default().title("Console").borders(Borders::ALL));
    frame.render_widget(console, chunks[2]);

    let footer = Paragraph::new(footer_text(&app.state)).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, chunks[3]);

    if app.state.form.is_some() {
        render_form(frame, frame.size(), &app.state);
    }
    if app.state.help_overlay {
        render_help_overlay(frame, frame.size());
    }
}

fn header_text(app: &App) -> String {
    let state = &app.state;
    let screen = match state.screen {
        Screen::Ranklist => "RANKLIST",
        Screen::Roster => "ROSTER",
    };
    let reloaded = state
        .last_reload
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        " {screen} | pass #{} | {} pending | {} failed | reloaded {reloaded}",
        state.grid.pass(),
        app.ranklist.engine().pending(),
        state.grid.count_state(CellState::Failed),
    )
}

fn footer_text(state: &AppState) -> String {
    if state.form.is_some() {
        return "Tab/↓ Next | ↑ Prev | Enter Save | Esc Cancel".to_string();
    }
    match state.screen {
        Screen::Ranklist => {
            "Tab Roster | r Reload | j/k/↑/↓ Move | h/l Scroll | ? Help | q Quit".to_string()
        }
        Screen::Roster => {
            "Tab Ranklist | a Add | e/Enter Edit | x Delete | r Reload | ? Help | q Quit"
                .to_string()
        }
    }
}

fn cell_style(state: CellState) -> Style {
    match state {
        CellState::Loading => Style::default().fg(Color::DarkGray),
        CellState::Failed => Style::default().fg(Color::Red),
        CellState::Populated | CellState::Empty => Style::default(),
    }
}

fn render_grid(frame: &mut Frame, area: Rect, state: &AppState) {
    let grid = &state.grid;
    if grid.row_count() == 0 {
        let empty = Paragraph::new("Roster is empty. Press Tab, then a to add someone.")
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, area);
        return;
    }

    let start = state.column_offset.min(state.titles.len().saturating_sub(1));
    let columns: Vec<usize> = (start..state.titles.len()).collect();
    let widths: Vec<Constraint> = columns
        .iter()
        .map(|_| Constraint::Length(STAT_COLUMN_WIDTH))
        .collect();

    let header = Row::new(
        columns
            .iter()
            .map(|&c| Cell::from(state.titles[c].clone())),
    )
    .style(Style::default().add_modifier(Modifier::BOLD));

    let visible = area.height.saturating_sub(1) as usize;
    let (first, last) = visible_range(state.selected, grid.row_count(), visible);
    let rows = (first..last).map(|row| {
        let cells = columns.iter().map(|&column| {
            Cell::from(grid.cell(row, column).to_string())
                .style(cell_style(grid.cell_state(row, column)))
        });
        let style = if row == state.selected {
            Style::default().bg(Color::DarkGray)
        } else {
            Style::default()
        };
        Row::new(cells).style(style)
    });

    let table = Table::new(rows, widths).header(header).column_spacing(1);
    frame.render_widget(table, area);
}

fn render_roster(frame: &mut Frame, area: Rect, app: &App) {
    let state = &app.state;
    if state.roster.is_empty() {
        let empty = Paragraph::new("No roster entries. Press a to add one.")
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(empty, area);
        return;
    }

    let fields = app.ranklist.schema().fields();
    let header = Row::new(fields.iter().map(|f| Cell::from(f.clone())))
        .style(Style::default().add_modifier(Modifier::BOLD));
    let widths: Vec<Constraint> = fields
        .iter()
        .map(|_| Constraint::Length(STAT_COLUMN_WIDTH))
        .collect();

    let visible = area.height.saturating_sub(1) as usize;
    let (first, last) = visible_range(state.roster_selected, state.roster.len(), visible);
    let rows = (first..last).map(|idx| {
        let entry = &state.roster[idx];
        let cells = fields
            .iter()
            .map(|f| Cell::from(entry.get(f).unwrap_or("-").to_string()));
        let style = if idx == state.roster_selected {
            Style::default().bg(Color::DarkGray)
        } else {
            Style::default()
        };
        Row::new(cells).style(style)
    });

    let table = Table::new(rows, widths).header(header).column_spacing(1);
    frame.render_widget(table, area);
}

fn render_form(frame: &mut Frame, area: Rect, state: &AppState) {
    let Some(form) = state.form.as_ref() else {
        return;
    };
    let popup_area = centered_rect(50, 60, area);
    frame.render_widget(Clear, popup_area);

    let title = match form.index {
        Some(idx) => format!("Edit #{}", idx + 1),
        None => "Add".to_string(),
    };
    let lines: Vec<Line> = form
        .fields
        .iter()
        .enumerate()
        .map(|(i, (field, value))| {
            let marker = if i == form.focus { "> " } else { "  " };
            let style = if i == form.focus {
                Style::default().add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Line::styled(format!("{marker}{field:<12} {value}"), style)
        })
        .collect();

    let paragraph =
        Paragraph::new(lines).block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(paragraph, popup_area);
}

fn visible_range(selected: usize, total: usize, visible: usize) -> (usize, usize) {
    if total == 0 {
        return (0, 0);
    }
    if total <= visible {
        return (0, total);
    }

    let mut start = selected.saturating_sub(visible / 2);
    if start + visible > total {
        start = total - visible;
    }
    (start, start + visible)
}

fn console_text(state: &AppState) -> String {
    if state.logs.is_empty() {
        return "No alerts yet".to_string();
    }
    let skip = state.logs.len().saturating_sub(3);
    state
        .logs
        .iter()
        .skip(skip)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 60, area);
    frame.render_widget(Clear, popup_area);

    let text = [
        "Ranklist - Help",
        "",
        "Global:",
        "  Tab          Switch Ranklist / Roster",
        "  r            Reload and refetch",
        "  j/k or ↑/↓   Move",
        "  ?            Toggle help",
        "  q            Quit",
        "",
        "Ranklist:",
        "  h/l or ←/→   Scroll columns",
        "",
        "Roster:",
        "  a            Add entry",
        "  e / Enter    Edit entry",
        "  x            Delete entry",
    ]
    .join("\n");

    let help = Paragraph::new(text)
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);

    horizontal[1]
}
