//! Batch coordinator.
//!
//! Drives one batch from a resolved worklist to a completed ledger. A run
//! executes on its own named thread so [`Coordinator::submit`] returns at
//! once; items are transformed on a dedicated rayon pool sized to the
//! requested worker count.
//!
//! ```text
//! submit ─▶ ledger.begin ─▶ [run thread]
//!                            for each item:
//!                              acquire slot  (blocks while `workers` items are in flight)
//!                              stop requested? ─▶ count the rest as processed, stop dispatching
//!                              pool.spawn ─▶ stop requested? ─▶ count as processed
//!                                            backend.apply (panics caught)
//!                                            ledger.record
//!                                            release slot
//!                            wait for every dispatched item
//!                            ledger.finish, clear the stop flag
//! ```
//!
//! Slots are the tokens of a bounded `crossbeam-channel`. Without them every
//! item would be queued on the pool up front and the pre-dispatch check
//! would never see a stop request.
//!
//! A run never fails as a whole. Each item is attempted at most once and its
//! error, or panic, becomes an [`Outcome::Failed`] for that item alone.

use crate::cancel::CancellationToken;
use crate::ledger::{AlreadyRunning, Ledger};
use crate::transform::{ArgumentError, Outcome, TransformBackend, WorkItem};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ArgumentError),
    #[error(transparent)]
    AlreadyRunning(#[from] AlreadyRunning),
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to start batch thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Handle to a submitted run.
#[derive(Debug)]
pub struct RunHandle {
    thread: Option<JoinHandle<()>>,
}

impl RunHandle {
    fn finished() -> Self {
        Self { thread: None }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Block until the run has completed.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            // The run thread itself never panics; item panics are caught.
            let _ = thread.join();
        }
    }
}

pub struct Coordinator {
    ledger: Arc<Ledger>,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(ledger: Arc<Ledger>, cancel: CancellationToken) -> Self {
        Self { ledger, cancel }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Start a run over `items` in the background.
    ///
    /// `excluded` is the number of selected files filtered out during
    /// resolution; it becomes the total when `items` is empty, in which case
    /// the run is already completed when this returns.
    pub fn submit(
        &self,
        items: Vec<WorkItem>,
        excluded: usize,
        backend: Arc<dyn TransformBackend>,
        workers: usize,
    ) -> Result<RunHandle, BatchError> {
        if items.is_empty() {
            self.ledger.begin(0, excluded)?;
            self.cancel.clear();
            tracing::info!(excluded, "Nothing to transform");
            return Ok(RunHandle::finished());
        }

        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("media-batch-worker-{i}"))
            .build()?;
        self.ledger.begin(items.len(), excluded)?;

        tracing::info!(
            operation = backend.name(),
            items = items.len(),
            excluded,
            workers,
            "Batch started"
        );

        let total = items.len();
        let run = {
            let ledger = Arc::clone(&self.ledger);
            let cancel = self.cancel.clone();
            move || run_batch(items, backend, &pool, workers, &ledger, &cancel)
        };
        match thread::Builder::new()
            .name("media-batch-run".into())
            .spawn(run)
        {
            Ok(thread) => Ok(RunHandle {
                thread: Some(thread),
            }),
            Err(err) => {
                self.ledger.record_unattempted(total);
                self.ledger.finish();
                self.cancel.clear();
                Err(BatchError::Spawn(err))
            }
        }
    }
}

fn run_batch(
    items: Vec<WorkItem>,
    backend: Arc<dyn TransformBackend>,
    pool: &rayon::ThreadPool,
    workers: usize,
    ledger: &Arc<Ledger>,
    cancel: &CancellationToken,
) {
    let started = Instant::now();
    let total = items.len();
    let (slot_tx, slot_rx) = crossbeam_channel::bounded::<()>(workers);
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<()>();
    let mut dispatched = 0;

    for (index, item) in items.into_iter().enumerate() {
        // Both ends live on this thread, so the send only blocks, never fails.
        let _ = slot_tx.send(());
        if cancel.is_stopped() {
            let remaining = total - index;
            ledger.record_unattempted(remaining);
            tracing::info!(remaining, "Stop requested, not dispatching remaining items");
            break;
        }

        dispatched += 1;
        let backend = Arc::clone(&backend);
        let ledger = Arc::clone(ledger);
        let cancel = cancel.clone();
        let slot_rx = slot_rx.clone();
        let done_tx = done_tx.clone();
        pool.spawn(move || {
            execute(&item, backend.as_ref(), &ledger, &cancel);
            let _ = slot_rx.recv();
            let _ = done_tx.send(());
        });
    }
    drop(done_tx);

    for _ in 0..dispatched {
        if done_rx.recv().is_err() {
            break;
        }
    }

    ledger.finish();
    cancel.clear();

    let snapshot = ledger.snapshot();
    tracing::info!(
        operation = backend.name(),
        total,
        failed = snapshot.failed_files.len(),
        skipped = snapshot.skipped_files.len(),
        original_size = snapshot.original_size,
        final_size = snapshot.final_size,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Batch completed"
    );
}

/// Transform one item and record its outcome.
fn execute(
    item: &WorkItem,
    backend: &dyn TransformBackend,
    ledger: &Ledger,
    cancel: &CancellationToken,
) {
    if cancel.is_stopped() {
        ledger.record_unattempted(1);
        return;
    }
    ledger.set_current(&item.path);

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| backend.apply(item))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => Outcome::from(err),
        Err(payload) => Outcome::Failed {
            reason: format!("panicked: {}", panic_message(payload.as_ref())),
        },
    };

    match &outcome {
        Outcome::Failed { reason } => {
            tracing::error!(path = %item.path.display(), reason = %reason, "Item failed");
        }
        Outcome::SkippedExisting { existing } => {
            tracing::debug!(
                path = %item.path.display(),
                existing = %existing.display(),
                "Output exists, skipped"
            );
        }
        Outcome::SuccessExpanded { outputs, .. } => {
            tracing::debug!(path = %item.path.display(), outputs = outputs.len(), "Expanded");
        }
        Outcome::Success { final_size } => {
            tracing::debug!(path = %item.path.display(), before = item.size, after = final_size, "Done");
        }
    }
    ledger.record(&item.path, item.size, &outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RunStatus;
    use crate::transform::BackendError;
    use crate::transform::backend::tests::{MockBackend, item};
    use std::path::PathBuf;
    use std::time::Duration;

    fn coordinator() -> Coordinator {
        Coordinator::new(Arc::new(Ledger::new()), CancellationToken::new())
    }

    fn items(count: usize) -> Vec<WorkItem> {
        (0..count)
            .map(|i| item(&format!("/photos/{i:04}.jpg"), 100))
            .collect()
    }

    /// Backend that fails one path with a backend error.
    struct ErroringBackend;

    impl TransformBackend for ErroringBackend {
        fn name(&self) -> &'static str {
            "erroring"
        }

        fn apply(&self, _item: &WorkItem) -> Result<Outcome, BackendError> {
            Err(BackendError::ToolUnavailable("magick".into()))
        }
    }

    #[test]
    fn processes_every_item() {
        let coordinator = coordinator();
        let backend = Arc::new(MockBackend::new());

        coordinator
            .submit(items(50), 0, backend.clone(), 4)
            .unwrap()
            .join();

        let snapshot = coordinator.ledger().snapshot();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.total, 50);
        assert_eq!(snapshot.processed, 50);
        assert_eq!(snapshot.original_size, 5000);
        assert_eq!(snapshot.final_size, 2500);
        assert!(snapshot.current_file.is_empty());
        assert_eq!(backend.get_applied().len(), 50);
    }

    #[test]
    fn failed_item_keeps_its_size_on_both_sides() {
        let coordinator = coordinator();
        let backend = Arc::new(MockBackend::new());
        backend.set_outcome("/a/1.jpg", Outcome::Success { final_size: 50 });
        backend.set_outcome(
            "/a/2.jpg",
            Outcome::Failed {
                reason: "exit 1".into(),
            },
        );
        backend.set_outcome("/a/3.jpg", Outcome::Success { final_size: 150 });
        let work = vec![
            item("/a/1.jpg", 100),
            item("/a/2.jpg", 200),
            item("/a/3.jpg", 300),
        ];

        coordinator.submit(work, 0, backend, 2).unwrap().join();

        let snapshot = coordinator.ledger().snapshot();
        assert_eq!(snapshot.processed, 3);
        assert_eq!(snapshot.original_size, 600);
        assert_eq!(snapshot.final_size, 400);
        assert_eq!(snapshot.failed_files, vec![PathBuf::from("/a/2.jpg")]);
    }

    #[test]
    fn panic_fails_only_that_item() {
        let coordinator = coordinator();
        let backend = Arc::new(MockBackend::new());
        backend.panic_on("/photos/0003.jpg");

        coordinator
            .submit(items(8), 0, backend.clone(), 2)
            .unwrap()
            .join();

        let snapshot = coordinator.ledger().snapshot();
        assert_eq!(snapshot.processed, 8);
        assert_eq!(
            snapshot.failed_files,
            vec![PathBuf::from("/photos/0003.jpg")]
        );
        assert_eq!(backend.get_applied().len(), 8);
    }

    #[test]
    fn backend_errors_become_failures() {
        let coordinator = coordinator();
        coordinator
            .submit(items(3), 0, Arc::new(ErroringBackend), 3)
            .unwrap()
            .join();
        let snapshot = coordinator.ledger().snapshot();
        assert_eq!(snapshot.failed_files.len(), 3);
        assert_eq!(snapshot.original_size, snapshot.final_size);
    }

    #[test]
    fn stop_request_accounts_for_undispatched_items() {
        let coordinator = coordinator();
        let backend = Arc::new(MockBackend::with_delay(Duration::from_millis(20)));

        let handle = coordinator
            .submit(items(40), 0, backend.clone(), 1)
            .unwrap();
        coordinator.cancellation().request_stop();
        handle.join();

        let snapshot = coordinator.ledger().snapshot();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.processed, snapshot.total);
        assert!(backend.get_applied().len() < 40);
        assert!(snapshot.failed_files.is_empty());
        assert!(!coordinator.cancellation().is_stopped());
    }

    #[test]
    fn stop_before_start_attempts_nothing() {
        let coordinator = coordinator();
        coordinator.cancellation().request_stop();
        let backend = Arc::new(MockBackend::new());

        coordinator
            .submit(items(5), 0, backend.clone(), 2)
            .unwrap()
            .join();

        let snapshot = coordinator.ledger().snapshot();
        assert_eq!(snapshot.processed, 5);
        assert_eq!(snapshot.original_size, 0);
        assert!(backend.get_applied().is_empty());
        assert!(!coordinator.cancellation().is_stopped());
    }

    #[test]
    fn item_dispatched_before_stop_is_not_applied() {
        // The pre-dispatch check has already passed; the worker's own check
        // is the only thing standing between the stop and the backend.
        let ledger = Ledger::new();
        ledger.begin(2, 0).unwrap();
        let cancel = CancellationToken::new();
        let backend = MockBackend::new();

        execute(&item("/photos/first.jpg", 100), &backend, &ledger, &cancel);
        cancel.request_stop();
        execute(&item("/photos/queued.jpg", 100), &backend, &ledger, &cancel);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.original_size, 100);
        assert!(snapshot.skipped_files.is_empty());
        assert!(snapshot.failed_files.is_empty());
        assert_eq!(backend.get_applied(), vec![PathBuf::from("/photos/first.jpg")]);
    }

    /// Requests a stop from inside every item it is handed.
    struct StoppingBackend {
        cancel: CancellationToken,
        applied: std::sync::Mutex<Vec<PathBuf>>,
    }

    impl TransformBackend for StoppingBackend {
        fn name(&self) -> &'static str {
            "stopping"
        }

        fn apply(&self, item: &WorkItem) -> Result<Outcome, BackendError> {
            self.applied.lock().unwrap().push(item.path.clone());
            self.cancel.request_stop();
            Ok(Outcome::Success {
                final_size: item.size,
            })
        }
    }

    #[test]
    fn stop_from_inside_a_run_leaves_later_items_untouched() {
        let coordinator = coordinator();
        let backend = Arc::new(StoppingBackend {
            cancel: coordinator.cancellation().clone(),
            applied: std::sync::Mutex::new(Vec::new()),
        });

        coordinator
            .submit(items(20), 0, backend.clone(), 2)
            .unwrap()
            .join();

        let snapshot = coordinator.ledger().snapshot();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.processed, 20);
        // At most the two items in flight when the stop landed ran.
        assert!(backend.applied.lock().unwrap().len() <= 2);
        assert_eq!(snapshot.original_size, 100 * backend.applied.lock().unwrap().len() as u64);
    }

    #[test]
    fn second_submit_while_running_is_rejected() {
        let coordinator = coordinator();
        let backend = Arc::new(MockBackend::with_delay(Duration::from_millis(50)));
        let handle = coordinator
            .submit(items(4), 0, backend.clone(), 1)
            .unwrap();

        let err = coordinator.submit(items(1), 0, backend, 1).unwrap_err();
        assert!(matches!(err, BatchError::AlreadyRunning(_)));

        handle.join();
        assert_eq!(coordinator.ledger().snapshot().total, 4);
    }

    #[test]
    fn empty_worklist_completes_immediately() {
        let coordinator = coordinator();
        let handle = coordinator
            .submit(Vec::new(), 7, Arc::new(MockBackend::new()), 4)
            .unwrap();
        assert!(handle.is_finished());

        let snapshot = coordinator.ledger().snapshot();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.total, 7);
        assert_eq!(snapshot.processed, 7);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
