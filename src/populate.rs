use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::engine::{FetchEngine, PassId};
use crate::roster::{RosterEntry, RosterSource};
use crate::schema::{ColumnSchema, NAME_FIELD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub pass: PassId,
    pub rows: usize,
    pub tasks: usize,
}

/// Runs one grid population pass over `roster`. Every static cell is written
/// before the first lookup is queued; no call here waits on the network.
pub fn populate(engine: &FetchEngine, schema: &ColumnSchema, roster: &[RosterEntry]) -> PassReport {
    let pass = engine.begin_pass(roster.len());
    let sink = engine.sink();

    for (row, entry) in roster.iter().enumerate() {
        for field in schema.fields() {
            let (Some(value), Some(column)) = (entry.get(field), schema.field_column(field)) else {
                continue;
            };
            sink.set_cell_text(pass, row, column, value.to_string());
        }
        for (field, _) in entry.fields() {
            if schema.field_column(field).is_none() {
                debug!(row, field, "roster field has no column");
            }
        }
    }

    let mut tasks = 0;
    for (row, entry) in roster.iter().enumerate() {
        for field in schema.fields() {
            if field == NAME_FIELD {
                continue;
            }
            let Some(handle) = entry.get(field) else {
                continue;
            };
            tasks += engine.dispatch(pass, row, field, handle, schema.derived_columns(field));
        }
    }

    info!(pass, rows = roster.len(), tasks, "grid populated");
    PassReport {
        pass,
        rows: roster.len(),
        tasks,
    }
}

pub struct Reload {
    pub report: PassReport,
    pub roster: Vec<RosterEntry>,
}

/// Ties the engine to a roster source and a column schema.
pub struct Ranklist {
    engine: FetchEngine,
    schema: Arc<ColumnSchema>,
    source: Arc<dyn RosterSource>,
}

impl Ranklist {
    pub fn new(engine: FetchEngine, schema: Arc<ColumnSchema>, source: Arc<dyn RosterSource>) -> Self {
        Self {
            engine,
            schema,
            source,
        }
    }

    pub fn engine(&self) -> &FetchEngine {
        &self.engine
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    /// Clears the grid, reads the roster and repopulates. When the roster
    /// cannot be read the grid is left empty and the error is returned.
    pub fn reload(&self) -> Result<Reload> {
        let roster = match self.source.load_roster() {
            Ok(roster) => roster,
            Err(err) => {
                self.engine.begin_pass(0);
                return Err(err);
            }
        };
        let report = populate(&self.engine, &self.schema, &roster);
        Ok(Reload { report, roster })
    }

    pub fn shutdown(self) {
        self.engine.shutdown();
    }
}
