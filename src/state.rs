use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

use chrono::{DateTime, Local};

use crate::engine::{CellSink, FAILED_TEXT, FetchTask, LOADING_TEXT, PassId};
use crate::fetch::FetchError;
use crate::roster::RosterEntry;
use crate::schema::ColumnSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Ranklist,
    Roster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Empty,
    Loading,
    Failed,
    Populated,
}

/// Cell text for the pass that last reset it. Writes carrying any other pass
/// are refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    pass: PassId,
    columns: usize,
    rows: Vec<Vec<String>>,
}

impl Grid {
    pub fn new(columns: usize) -> Self {
        Self {
            pass: 0,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn reset(&mut self, pass: PassId, rows: usize) {
        self.pass = pass;
        self.rows = vec![vec![String::new(); self.columns]; rows];
    }

    /// Returns `false` when the write was dropped (stale pass or out of range).
    pub fn set(&mut self, pass: PassId, row: usize, column: usize, text: String) -> bool {
        if pass != self.pass {
            return false;
        }
        let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(column)) else {
            return false;
        };
        *cell = text;
        true
    }

    pub fn pass(&self) -> PassId {
        self.pass
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn cell_state(&self, row: usize, column: usize) -> CellState {
        match self.cell(row, column) {
            "" => CellState::Empty,
            LOADING_TEXT => CellState::Loading,
            FAILED_TEXT => CellState::Failed,
            _ => CellState::Populated,
        }
    }

    pub fn count_state(&self, state: CellState) -> usize {
        (0..self.rows.len())
            .flat_map(|row| (0..self.columns).map(move |column| (row, column)))
            .filter(|&(row, column)| self.cell_state(row, column) == state)
            .count()
    }
}

impl CellSink for Mutex<Grid> {
    fn begin_pass(&self, pass: PassId, rows: usize) {
        if let Ok(mut grid) = self.lock() {
            grid.reset(pass, rows);
        }
    }

    fn set_cell_text(&self, pass: PassId, row: usize, column: usize, text: String) {
        if let Ok(mut grid) = self.lock() {
            grid.set(pass, row, column, text);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    BeginPass {
        pass: PassId,
        rows: usize,
    },
    SetCell {
        pass: PassId,
        row: usize,
        column: usize,
        text: String,
    },
    Log(String),
}

/// Forwards engine output to the UI thread, which applies it in order.
pub struct DeltaSink {
    tx: Sender<Delta>,
}

impl DeltaSink {
    pub fn new(tx: Sender<Delta>) -> Self {
        Self { tx }
    }
}

impl CellSink for DeltaSink {
    fn begin_pass(&self, pass: PassId, rows: usize) {
        let _ = self.tx.send(Delta::BeginPass { pass, rows });
    }

    fn set_cell_text(&self, pass: PassId, row: usize, column: usize, text: String) {
        let _ = self.tx.send(Delta::SetCell {
            pass,
            row,
            column,
            text,
        });
    }

    fn task_failed(&self, task: &FetchTask, err: &FetchError) {
        let _ = self.tx.send(Delta::Log(format!(
            "[WARN] {} {} {}: {err}",
            task.platform,
            task.handle,
            task.kind.label()
        )));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditForm {
    /// Roster index being edited; `None` adds a new entry.
    pub index: Option<usize>,
    pub fields: Vec<(String, String)>,
    pub focus: usize,
}

impl EditForm {
    pub fn new(schema: &ColumnSchema, index: Option<usize>, entry: Option<&RosterEntry>) -> Self {
        let fields = schema
            .fields()
            .iter()
            .map(|field| {
                let value = entry
                    .and_then(|e| e.get(field))
                    .unwrap_or_default()
                    .to_string();
                (field.clone(), value)
            })
            .collect();
        Self {
            index,
            fields,
            focus: 0,
        }
    }

    pub fn focus_next(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + 1) % self.fields.len();
        }
    }

    pub fn focus_prev(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + self.fields.len() - 1) % self.fields.len();
        }
    }

    pub fn push_char(&mut self, ch: char) {
        if let Some((_, value)) = self.fields.get_mut(self.focus) {
            value.push(ch);
        }
    }

    pub fn pop_char(&mut self) {
        if let Some((_, value)) = self.fields.get_mut(self.focus) {
            value.pop();
        }
    }

    pub fn to_entry(&self) -> RosterEntry {
        let mut entry = RosterEntry::new();
        for (field, value) in &self.fields {
            entry.set(field, value);
        }
        entry.normalized()
    }
}

pub struct AppState {
    pub screen: Screen,
    pub grid: Grid,
    pub titles: Vec<String>,
    pub roster: Vec<RosterEntry>,
    pub selected: usize,
    pub roster_selected: usize,
    pub column_offset: usize,
    pub form: Option<EditForm>,
    pub help_overlay: bool,
    pub last_reload: Option<DateTime<Local>>,
    pub logs: VecDeque<String>,
}

impl AppState {
    pub fn new(schema: &ColumnSchema) -> Self {
        Self {
            screen: Screen::Ranklist,
            grid: Grid::new(schema.len()),
            titles: schema.titles().map(str::to_string).collect(),
            roster: Vec::new(),
            selected: 0,
            roster_selected: 0,
            column_offset: 0,
            form: None,
            help_overlay: false,
            last_reload: None,
            logs: VecDeque::new(),
        }
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        const MAX_LOGS: usize = 200;
        self.logs.push_back(msg.into());
        while self.logs.len() > MAX_LOGS {
            self.logs.pop_front();
        }
    }

    pub fn toggle_screen(&mut self) {
        self.screen = match self.screen {
            Screen::Ranklist => Screen::Roster,
            Screen::Roster => Screen::Ranklist,
        };
    }

    pub fn select_next(&mut self) {
        match self.screen {
            Screen::Ranklist => {
                if self.selected + 1 < self.grid.row_count() {
                    self.selected += 1;
                }
            }
            Screen::Roster => {
                if self.roster_selected + 1 < self.roster.len() {
                    self.roster_selected += 1;
                }
            }
        }
    }

    pub fn select_prev(&mut self) {
        match self.screen {
            Screen::Ranklist => self.selected = self.selected.saturating_sub(1),
            Screen::Roster => self.roster_selected = self.roster_selected.saturating_sub(1),
        }
    }

    pub fn scroll_right(&mut self) {
        if self.column_offset + 1 < self.titles.len() {
            self.column_offset += 1;
        }
    }

    pub fn scroll_left(&mut self) {
        self.column_offset = self.column_offset.saturating_sub(1);
    }

    /// Adopts a fresh roster snapshot and keeps selections in range.
    pub fn set_roster(&mut self, roster: Vec<RosterEntry>) {
        self.roster = roster;
        let last = self.roster.len().saturating_sub(1);
        self.roster_selected = self.roster_selected.min(last);
        self.selected = self.selected.min(last);
        self.last_reload = Some(Local::now());
    }

    pub fn begin_edit(&mut self, schema: &ColumnSchema, index: Option<usize>) {
        let entry = index.and_then(|idx| self.roster.get(idx));
        self.form = Some(EditForm::new(schema, index, entry));
    }
}

pub fn apply_delta(state: &mut AppState, delta: Delta) {
    match delta {
        Delta::BeginPass { pass, rows } => {
            state.grid.reset(pass, rows);
            state.selected = state.selected.min(rows.saturating_sub(1));
        }
        Delta::SetCell {
            pass,
            row,
            column,
            text,
        } => {
            state.grid.set(pass, row, column, text);
        }
        Delta::Log(msg) => state.push_log(msg),
    }
}
