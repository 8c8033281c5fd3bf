use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ranklist::engine::{CellSink, FAILED_TEXT, FetchEngine, FetchTask, LOADING_TEXT, PassId};
use ranklist::fetch::{ContestRecord, FetchClient, FetchError, SubmitRecord};
use ranklist::schema::{ColumnSchema, DerivedColumn, StatKind};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Write {
    pass: PassId,
    row: usize,
    column: usize,
    text: String,
}

#[derive(Default)]
struct Recorder {
    writes: Mutex<Vec<Write>>,
    failures: AtomicUsize,
}

impl Recorder {
    fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    fn by_cell(&self) -> HashMap<(usize, usize), Vec<String>> {
        let mut cells: HashMap<(usize, usize), Vec<String>> = HashMap::new();
        for w in self.writes() {
            cells.entry((w.row, w.column)).or_default().push(w.text);
        }
        cells
    }
}

impl CellSink for Recorder {
    fn begin_pass(&self, _pass: PassId, _rows: usize) {}

    fn set_cell_text(&self, pass: PassId, row: usize, column: usize, text: String) {
        self.writes.lock().unwrap().push(Write {
            pass,
            row,
            column,
            text,
        });
    }

    fn task_failed(&self, _task: &FetchTask, _err: &FetchError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingClient {
    contest_calls: AtomicUsize,
    submit_calls: AtomicUsize,
}

impl FetchClient for CountingClient {
    fn fetch_contest_record(&self, _: &str, handle: &str) -> Result<ContestRecord, FetchError> {
        self.contest_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ContestRecord {
            rating: 1000 + handle.len() as i64,
            contest_count: 7,
        })
    }

    fn fetch_submit_record(&self, platform: &str, handle: &str) -> Result<SubmitRecord, FetchError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if handle.starts_with("bad") {
            return Err(FetchError::unavailable(platform, "connection reset"));
        }
        Ok(SubmitRecord {
            accepted_count: 3,
            submitted_count: 9,
        })
    }
}

struct FailingClient;

impl FetchClient for FailingClient {
    fn fetch_contest_record(&self, platform: &str, _: &str) -> Result<ContestRecord, FetchError> {
        Err(FetchError::unavailable(platform, "timed out"))
    }

    fn fetch_submit_record(&self, platform: &str, _: &str) -> Result<SubmitRecord, FetchError> {
        Err(FetchError::malformed(platform, "expected value at line 1"))
    }
}

#[test]
fn dispatch_launches_one_task_per_defined_column() {
    let schema = ColumnSchema::standard();
    let client = Arc::new(CountingClient::default());
    let sink = Arc::new(Recorder::default());
    let engine = FetchEngine::start(4, client.clone(), sink.clone());
    let pass = engine.begin_pass(2);

    let launched_cf = engine.dispatch(pass, 0, "codeforces", "alice", schema.derived_columns("codeforces"));
    let launched_lg = engine.dispatch(pass, 1, "luogu", "bob", schema.derived_columns("luogu"));
    let launched_none = engine.dispatch(pass, 1, "topcoder", "bob", schema.derived_columns("topcoder"));
    assert_eq!(launched_cf, 3);
    assert_eq!(launched_lg, 1);
    assert_eq!(launched_none, 0);
    assert!(engine.wait_idle(WAIT));

    assert_eq!(client.contest_calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.submit_calls.load(Ordering::SeqCst), 2);

    let cells = sink.by_cell();
    assert_eq!(cells.len(), 4);
    let lg_col = schema.index_of("luogu solved-count").unwrap();
    assert_eq!(cells[&(1, lg_col)], vec![LOADING_TEXT.to_string(), "3/9".to_string()]);
    engine.shutdown();
}

#[test]
fn each_cell_sees_loading_then_exactly_one_terminal_write() {
    let schema = ColumnSchema::standard();
    let sink = Arc::new(Recorder::default());
    let engine = FetchEngine::start(3, Arc::new(CountingClient::default()), sink.clone());
    let rows = 25;
    let pass = engine.begin_pass(rows);
    for row in 0..rows {
        let handle = if row % 4 == 0 { format!("bad{row}") } else { format!("user{row}") };
        engine.dispatch(pass, row, "codeforces", &handle, schema.derived_columns("codeforces"));
    }
    assert!(engine.wait_idle(WAIT));

    let cells = sink.by_cell();
    assert_eq!(cells.len(), rows * 3);
    for (cell, texts) in cells {
        assert_eq!(texts.len(), 2, "cell {cell:?} got {texts:?}");
        assert_eq!(texts[0], LOADING_TEXT);
        assert_ne!(texts[1], LOADING_TEXT);
    }
    // Only the solved-count lookups of the "bad" handles fail.
    assert_eq!(sink.failures.load(Ordering::SeqCst), 7);
    engine.shutdown();
}

#[test]
fn always_failing_client_marks_every_cell_failed() {
    let schema = ColumnSchema::standard();
    let sink = Arc::new(Recorder::default());
    let engine = FetchEngine::start(2, Arc::new(FailingClient), sink.clone());
    let pass = engine.begin_pass(1);
    let mut launched = 0;
    for platform in ["atcoder", "codeforces", "nowcoder", "leetcode", "luogu", "vjudge"] {
        launched += engine.dispatch(pass, 0, platform, "x", schema.derived_columns(platform));
    }
    assert_eq!(launched, 11);
    engine.shutdown();

    let cells = sink.by_cell();
    assert_eq!(cells.len(), 11);
    for texts in cells.values() {
        assert_eq!(texts.last().map(String::as_str), Some(FAILED_TEXT));
    }
    assert_eq!(sink.failures.load(Ordering::SeqCst), 11);
}

struct GateClient {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
    calls: AtomicUsize,
}

impl FetchClient for GateClient {
    fn fetch_contest_record(&self, _: &str, _: &str) -> Result<ContestRecord, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv_timeout(WAIT);
        Ok(ContestRecord {
            rating: 1234,
            contest_count: 1,
        })
    }

    fn fetch_submit_record(&self, platform: &str, _: &str) -> Result<SubmitRecord, FetchError> {
        Err(FetchError::Unsupported {
            platform: platform.to_string(),
        })
    }
}

#[test]
fn queued_task_of_superseded_pass_is_skipped() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let client = Arc::new(GateClient {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(Recorder::default());
    let engine = FetchEngine::start(1, client.clone(), sink.clone());
    let target = [DerivedColumn {
        kind: StatKind::Rating,
        column: 2,
    }];

    let first = engine.begin_pass(2);
    engine.dispatch(first, 0, "atcoder", "a", &target);
    entered_rx.recv_timeout(WAIT).expect("worker should pick up the first task");
    engine.dispatch(first, 1, "atcoder", "b", &target);
    assert_eq!(engine.pending(), 2);
    assert!(!engine.wait_idle(Duration::from_millis(50)));

    let second = engine.begin_pass(0);
    assert!(second > first);
    release_tx.send(()).unwrap();
    assert!(engine.wait_idle(WAIT));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);

    let row1: Vec<String> = sink
        .writes()
        .into_iter()
        .filter(|w| w.row == 1)
        .map(|w| w.text)
        .collect();
    assert_eq!(row1, vec![LOADING_TEXT.to_string()]);
    engine.shutdown();
}
