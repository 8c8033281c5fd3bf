use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ranklist::engine::{FAILED_TEXT, FetchEngine, LOADING_TEXT};
use ranklist::fetch::{ContestRecord, FetchClient, FetchError, SubmitRecord};
use ranklist::populate::populate;
use ranklist::roster::RosterEntry;
use ranklist::schema::{ColumnSchema, PlatformSpec, StatKind};
use ranklist::state::{AppState, Delta, DeltaSink, apply_delta};

const WAIT: Duration = Duration::from_secs(5);

fn scenario_schema() -> ColumnSchema {
    ColumnSchema::from_platforms(&[PlatformSpec {
        name: "codeforces",
        stats: &[StatKind::Rating, StatKind::SolvedCount],
    }])
}

fn alice_roster() -> Vec<RosterEntry> {
    vec![
        RosterEntry::new()
            .with("name", "A")
            .with("codeforces", "alice"),
    ]
}

/// Holds the first contest lookup until released; submit lookups always fail.
struct HeldClient {
    hold_next: AtomicBool,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl FetchClient for HeldClient {
    fn fetch_contest_record(&self, _: &str, _: &str) -> Result<ContestRecord, FetchError> {
        if self.hold_next.swap(false, Ordering::SeqCst) {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv_timeout(WAIT);
        }
        Ok(ContestRecord {
            rating: 1500,
            contest_count: 12,
        })
    }

    fn fetch_submit_record(&self, platform: &str, _: &str) -> Result<SubmitRecord, FetchError> {
        Err(FetchError::unavailable(platform, "connection reset"))
    }
}

#[test]
fn back_to_back_passes_through_delta_channel() {
    let schema = scenario_schema();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let client = Arc::new(HeldClient {
        hold_next: AtomicBool::new(true),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let (tx, rx) = mpsc::channel();
    let engine = FetchEngine::start(1, client, Arc::new(DeltaSink::new(tx)));

    let first = populate(&engine, &schema, &alice_roster());
    entered_rx
        .recv_timeout(WAIT)
        .expect("worker should pick up the rating lookup");
    let second = populate(&engine, &schema, &alice_roster());
    assert!(second.pass > first.pass);
    release_tx.send(()).unwrap();
    engine.shutdown();

    let deltas: Vec<Delta> = rx.try_iter().collect();
    assert_eq!(
        deltas.first(),
        Some(&Delta::BeginPass {
            pass: first.pass,
            rows: 1
        })
    );
    let second_start = deltas
        .iter()
        .position(|d| matches!(d, Delta::BeginPass { pass, .. } if *pass == second.pass))
        .expect("second pass began");

    let mut state = AppState::new(&schema);
    let mut stale = Vec::new();
    for (idx, delta) in deltas.into_iter().enumerate() {
        if idx > second_start
            && let Delta::SetCell { pass, text, .. } = &delta
            && *pass == first.pass
        {
            let before = state.grid.clone();
            stale.push(text.clone());
            apply_delta(&mut state, delta);
            assert_eq!(state.grid, before, "stale write must not change the grid");
            continue;
        }
        apply_delta(&mut state, delta);
    }

    // The held lookup finishes after the second pass began; the queued
    // solved-count lookup of the first pass is skipped.
    assert_eq!(stale, vec!["1500".to_string()]);

    let cell = |title: &str| {
        state
            .grid
            .cell(0, schema.index_of(title).expect("column"))
            .to_string()
    };
    assert_eq!(state.grid.pass(), second.pass);
    assert_eq!(state.grid.row_count(), 1);
    assert_eq!(cell("name"), "A");
    assert_eq!(cell("codeforces"), "alice");
    assert_eq!(cell("codeforces rating"), "1500");
    assert_eq!(cell("codeforces solved-count"), FAILED_TEXT);

    let warnings: Vec<&String> = state.logs.iter().filter(|l| l.starts_with("[WARN]")).collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].starts_with("[WARN] codeforces alice solved-count:"));
    assert!(warnings[0].contains("connection reset"));
}

#[test]
fn begin_pass_delta_clears_cells_and_clamps_selection() {
    let schema = scenario_schema();
    let mut state = AppState::new(&schema);
    apply_delta(&mut state, Delta::BeginPass { pass: 1, rows: 3 });
    apply_delta(
        &mut state,
        Delta::SetCell {
            pass: 1,
            row: 2,
            column: 0,
            text: LOADING_TEXT.to_string(),
        },
    );
    state.selected = 2;

    apply_delta(&mut state, Delta::BeginPass { pass: 2, rows: 1 });
    assert_eq!(state.selected, 0);
    assert_eq!(state.grid.row_count(), 1);
    assert_eq!(state.grid.cell(0, 0), "");

    apply_delta(
        &mut state,
        Delta::SetCell {
            pass: 1,
            row: 0,
            column: 0,
            text: "late".to_string(),
        },
    );
    assert_eq!(state.grid.cell(0, 0), "");
}
