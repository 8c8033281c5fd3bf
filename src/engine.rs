use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::fetch::{FetchClient, FetchError};
use crate::schema::{DerivedColumn, StatKind};

pub const LOADING_TEXT: &str = "Loading...";
pub const FAILED_TEXT: &str = "CRAWLING FAILED";

pub type PassId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub pass: PassId,
    pub platform: String,
    pub handle: String,
    pub row: usize,
    pub column: usize,
    pub kind: StatKind,
}

/// Display surface the engine reports into. Implementations are called from
/// the dispatching thread and from every worker concurrently.
pub trait CellSink: Send + Sync {
    fn begin_pass(&self, pass: PassId, rows: usize);

    fn set_cell_text(&self, pass: PassId, row: usize, column: usize, text: String);

    fn task_failed(&self, _task: &FetchTask, _err: &FetchError) {}
}

pub fn report_loading(task: &FetchTask, sink: &dyn CellSink) {
    sink.set_cell_text(task.pass, task.row, task.column, LOADING_TEXT.to_string());
}

pub fn fetch_text(
    client: &dyn FetchClient,
    platform: &str,
    handle: &str,
    kind: StatKind,
) -> Result<String, FetchError> {
    match kind {
        StatKind::Rating => client
            .fetch_contest_record(platform, handle)
            .map(|record| record.rating.to_string()),
        StatKind::ContestCount => client
            .fetch_contest_record(platform, handle)
            .map(|record| record.contest_count.to_string()),
        StatKind::SolvedCount => client
            .fetch_submit_record(platform, handle)
            .map(|record| format!("{}/{}", record.accepted_count, record.submitted_count)),
    }
}

/// Performs the task's single fetch and writes its terminal text. Errors end
/// here: they are logged, reported to the sink and shown as `FAILED_TEXT`.
pub fn run_task(task: &FetchTask, client: &dyn FetchClient, sink: &dyn CellSink) {
    let text = match fetch_text(client, &task.platform, &task.handle, task.kind) {
        Ok(text) => text,
        Err(err) => {
            warn!(
                platform = %task.platform,
                handle = %task.handle,
                stat = task.kind.label(),
                error = %err,
                "fetch failed"
            );
            sink.task_failed(task, &err);
            FAILED_TEXT.to_string()
        }
    };
    sink.set_cell_text(task.pass, task.row, task.column, text);
}

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self, n: usize) {
        if let Ok(mut count) = self.count.lock() {
            *count += n;
        }
    }

    fn done(&self) {
        if let Ok(mut count) = self.count.lock() {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.idle.notify_all();
            }
        }
    }

    fn get(&self) -> usize {
        self.count.lock().map(|c| *c).unwrap_or(0)
    }
}

struct Shared {
    client: Arc<dyn FetchClient>,
    sink: Arc<dyn CellSink>,
    current_pass: AtomicU64,
    pending: Pending,
}

pub struct FetchEngine {
    queue: Option<Sender<FetchTask>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl FetchEngine {
    pub fn start(workers: usize, client: Arc<dyn FetchClient>, sink: Arc<dyn CellSink>) -> Self {
        let (tx, rx) = mpsc::channel::<FetchTask>();
        let rx = Arc::new(Mutex::new(rx));
        let shared = Arc::new(Shared {
            client,
            sink,
            current_pass: AtomicU64::new(0),
            pending: Pending::default(),
        });

        let handles = (0..workers.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("fetch-worker-{id}"))
                    .spawn(move || worker_loop(id, rx, shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(error = %err, "failed to spawn fetch worker");
                    None
                }
            })
            .collect();

        Self {
            queue: Some(tx),
            workers: handles,
            shared,
        }
    }

    pub fn sink(&self) -> &dyn CellSink {
        self.shared.sink.as_ref()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Starts a new pass and clears the sink. Tasks of earlier passes still
    /// in the queue are skipped from here on.
    pub fn begin_pass(&self, rows: usize) -> PassId {
        let pass = self.shared.current_pass.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.sink.begin_pass(pass, rows);
        debug!(pass, rows, "pass started");
        pass
    }

    pub fn current_pass(&self) -> PassId {
        self.shared.current_pass.load(Ordering::Acquire)
    }

    /// Queues one task per target without waiting for any of them. Returns how
    /// many were queued; a target that could not be queued is failed in place.
    pub fn dispatch(
        &self,
        pass: PassId,
        row: usize,
        platform: &str,
        handle: &str,
        targets: &[DerivedColumn],
    ) -> usize {
        let mut queued = 0;
        for target in targets {
            let task = FetchTask {
                pass,
                platform: platform.to_string(),
                handle: handle.to_string(),
                row,
                column: target.column,
                kind: target.kind,
            };
            report_loading(&task, self.sink());
            self.shared.pending.add(1);

            let sent = match &self.queue {
                Some(tx) => tx.send(task).map_err(|err| err.0),
                None => Err(task),
            };
            match sent {
                Ok(()) => queued += 1,
                Err(task) => {
                    let err = FetchError::unavailable(&task.platform, "fetch engine is shut down");
                    self.sink().task_failed(&task, &err);
                    self.sink()
                        .set_cell_text(task.pass, task.row, task.column, FAILED_TEXT.to_string());
                    self.shared.pending.done();
                }
            }
        }
        queued
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.get()
    }

    /// Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let Ok(guard) = self.shared.pending.count.lock() else {
            return false;
        };
        match self
            .shared
            .pending
            .idle
            .wait_timeout_while(guard, timeout, |count| *count > 0)
        {
            Ok((_, result)) => !result.timed_out(),
            Err(_) => false,
        }
    }

    pub fn shutdown(mut self) {
        self.queue.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for FetchEngine {
    fn drop(&mut self) {
        // Workers exit on their own once the queue is closed; an in-flight
        // request is not waited for.
        self.queue.take();
    }
}

fn worker_loop(id: usize, rx: Arc<Mutex<Receiver<FetchTask>>>, shared: Arc<Shared>) {
    loop {
        let task = {
            let Ok(guard) = rx.lock() else {
                return;
            };
            match guard.recv() {
                Ok(task) => task,
                Err(_) => return,
            }
        };

        let current = shared.current_pass.load(Ordering::Acquire);
        if task.pass != current {
            debug!(
                worker = id,
                task_pass = task.pass,
                current,
                "skipping task from superseded pass"
            );
        } else {
            run_task(&task, shared.client.as_ref(), shared.sink.as_ref());
        }
        shared.pending.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ContestRecord, SubmitRecord};

    #[derive(Default)]
    struct Recorder {
        writes: Mutex<Vec<(PassId, usize, usize, String)>>,
        failures: Mutex<Vec<String>>,
    }

    impl CellSink for Recorder {
        fn begin_pass(&self, _pass: PassId, _rows: usize) {}

        fn set_cell_text(&self, pass: PassId, row: usize, column: usize, text: String) {
            self.writes.lock().unwrap().push((pass, row, column, text));
        }

        fn task_failed(&self, task: &FetchTask, err: &FetchError) {
            self.failures
                .lock()
                .unwrap()
                .push(format!("{}:{} {err}", task.platform, task.handle));
        }
    }

    struct Fixed;

    impl FetchClient for Fixed {
        fn fetch_contest_record(&self, _: &str, _: &str) -> Result<ContestRecord, FetchError> {
            Ok(ContestRecord {
                rating: 2100,
                contest_count: 37,
            })
        }

        fn fetch_submit_record(&self, platform: &str, _: &str) -> Result<SubmitRecord, FetchError> {
            Err(FetchError::malformed(platform, "unexpected token"))
        }
    }

    fn task(kind: StatKind) -> FetchTask {
        FetchTask {
            pass: 1,
            platform: "codeforces".to_string(),
            handle: "tourist".to_string(),
            row: 0,
            column: 5,
            kind,
        }
    }

    #[test]
    fn contest_count_is_rendered_as_integer() {
        let text = fetch_text(&Fixed, "atcoder", "x", StatKind::ContestCount).unwrap();
        assert_eq!(text, "37");
    }

    #[test]
    fn run_task_writes_value_once() {
        let sink = Recorder::default();
        run_task(&task(StatKind::Rating), &Fixed, &sink);
        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.as_slice(), &[(1, 0, 5, "2100".to_string())]);
        assert!(sink.failures.lock().unwrap().is_empty());
    }

    #[test]
    fn run_task_reports_failure_and_writes_marker() {
        let sink = Recorder::default();
        run_task(&task(StatKind::SolvedCount), &Fixed, &sink);
        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].3, FAILED_TEXT);
        let failures = sink.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("malformed codeforces response"));
    }

    #[test]
    fn dispatch_after_shutdown_still_terminates_cell() {
        let sink = Arc::new(Recorder::default());
        let mut engine = FetchEngine::start(1, Arc::new(Fixed), sink.clone());
        engine.queue.take();
        let pass = engine.begin_pass(1);
        let targets = [DerivedColumn {
            kind: StatKind::Rating,
            column: 2,
        }];
        assert_eq!(engine.dispatch(pass, 0, "atcoder", "x", &targets), 0);
        let texts: Vec<String> = sink
            .writes
            .lock()
            .unwrap()
            .iter()
            .map(|w| w.3.clone())
            .collect();
        assert_eq!(texts, vec![LOADING_TEXT.to_string(), FAILED_TEXT.to_string()]);
        assert_eq!(engine.pending(), 0);
    }
}
