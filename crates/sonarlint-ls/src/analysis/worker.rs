//
// analysis/worker.rs
//
// Single-worker queue that runs analysis batches strictly one at a time
//

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::batch::AnalysisBatch;
use super::watcher::DirtyFiles;
use crate::uri;

/// How long shutdown waits for the running batch before abandoning it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A submitted batch together with its cancellation token
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    pub batch: AnalysisBatch,
    pub token: CancellationToken,
}

/// Runs one task to completion. Implemented by the task executor.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &AnalysisTask) -> anyhow::Result<()>;
}

/// Caller-side view of a submitted batch
#[derive(Debug, Clone)]
pub struct AnalysisHandle {
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

impl AnalysisHandle {
    /// A handle for work that never needed to run
    pub fn completed() -> Self {
        let (_, done) = watch::channel(true);
        Self {
            token: CancellationToken::new(),
            done,
        }
    }

    pub fn is_done(&self) -> bool {
        // A dropped sender means the task will never run (worker gone)
        *self.done.borrow() || self.done.has_changed().is_err()
    }

    /// Request cooperative cancellation. A no-op once the batch finished.
    pub fn cancel(&self) {
        if !self.is_done() {
            self.token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the batch finished, failed, or was skipped
    pub async fn wait(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|d| *d).await;
    }
}

struct QueuedTask {
    task: AnalysisTask,
    done: watch::Sender<bool>,
}

/// Dedicated analysis worker fed through an unbounded queue.
///
/// Batches run in submission order. Each one is spawned on its own task and
/// joined, so a panicking engine is logged without killing the worker.
pub struct AnalysisQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    shutdown_token: CancellationToken,
    current: Arc<Mutex<Option<CancellationToken>>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisQueue {
    /// Creates the queue and starts its worker
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self::start(runner, None)
    }

    /// Like [`new`](Self::new), but files of a batch that is cancelled
    /// before its results are applied go back into `dirty`.
    pub fn with_requeue(runner: Arc<dyn TaskRunner>, dirty: Arc<DirtyFiles>) -> Self {
        Self::start(runner, Some(dirty))
    }

    fn start(runner: Arc<dyn TaskRunner>, requeue: Option<Arc<DirtyFiles>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown_token = CancellationToken::new();
        let current = Arc::new(Mutex::new(None));
        let worker = Worker {
            runner,
            shutdown: shutdown_token.clone(),
            current: current.clone(),
            requeue,
        };
        let handle = tokio::spawn(worker.run(rx));
        Self {
            tx,
            shutdown_token,
            current,
            worker_handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a batch for analysis.
    ///
    /// Files without a `file:` URI are skipped with a warning. Returns an
    /// already-completed handle when nothing remains to analyze.
    pub fn submit(&self, batch: AnalysisBatch) -> AnalysisHandle {
        let batch = batch.retain(|f| {
            if uri::has_file_scheme(&f.uri) {
                true
            } else {
                log::warn!("URI '{}' is not in local filesystem, analysis not supported", f.uri);
                false
            }
        });
        match batch.files() {
            [] => return AnalysisHandle::completed(),
            [only] => log::debug!("Queuing analysis of file '{}' (version {})", only.uri, only.version),
            files => log::debug!("Queuing analysis of {} files", files.len()),
        }

        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        let queued = QueuedTask {
            task: AnalysisTask {
                batch,
                token: token.clone(),
            },
            done: done_tx,
        };
        if self.tx.send(queued).is_err() {
            log::warn!("Analysis worker stopped, batch dropped");
        }
        AnalysisHandle {
            token,
            done: done_rx,
        }
    }

    /// Stop the worker: cancel the running batch, drop queued ones, join.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        if let Ok(current) = self.current.lock() {
            if let Some(token) = current.as_ref() {
                token.cancel();
            }
        }
        let handle = self.worker_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(mut handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                log::warn!("Analysis worker did not stop within {:?}, aborting", SHUTDOWN_GRACE);
                handle.abort();
            }
        }
    }
}

struct Worker {
    runner: Arc<dyn TaskRunner>,
    shutdown: CancellationToken,
    current: Arc<Mutex<Option<CancellationToken>>>,
    requeue: Option<Arc<DirtyFiles>>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<QueuedTask>) {
        log::info!("Analysis worker started");
        loop {
            let queued = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(queued) => queued,
                    None => break,
                },
            };
            let QueuedTask { task, done } = queued;

            if task.token.is_cancelled() {
                log::debug!("Skipping cancelled analysis of {} files", task.batch.len());
                self.return_to_dirty(&task.batch);
                let _ = done.send(true);
                continue;
            }

            if let Ok(mut slot) = self.current.lock() {
                *slot = Some(task.token.clone());
            }

            let token = task.token.clone();
            let batch = task.batch.clone();
            let runner = self.runner.clone();
            let join = tokio::spawn(async move { runner.run(&task).await });
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if token.is_cancelled() => {
                    log::debug!("Analysis ended after cancellation: {:#}", e);
                    self.return_to_dirty(&batch);
                }
                Ok(Err(e)) => log::error!("Analysis failed: {:#}", e),
                Err(e) => log::error!("Analysis task panicked: {}", e),
            }

            if let Ok(mut slot) = self.current.lock() {
                *slot = None;
            }
            let _ = done.send(true);
        }
        log::info!("Analysis worker stopped");
    }

    /// Files of a batch cancelled before its results were applied are still
    /// unanalyzed. A newer mark in the table wins.
    fn return_to_dirty(&self, batch: &AnalysisBatch) {
        let Some(dirty) = self.requeue.as_ref() else {
            return;
        };
        if self.shutdown.is_cancelled() {
            return;
        }
        log::debug!("Returning {} files to the dirty table", batch.len());
        for uri in batch.uris() {
            dirty.restore(uri.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{LanguageKind, OpenFile};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower_lsp::lsp_types::Url;

    fn batch(paths: &[&str]) -> AnalysisBatch {
        AnalysisBatch::new(paths.iter().map(|p| {
            OpenFile::new(Url::parse(p).unwrap(), 1, LanguageKind::Python, "")
        }))
    }

    /// Records overlap and order; behavior keyed by the first file name
    #[derive(Default)]
    struct RecordingRunner {
        running: AtomicUsize,
        max_running: AtomicUsize,
        order: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskRunner for RecordingRunner {
        async fn run(&self, task: &AnalysisTask) -> anyhow::Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            let name = task.batch.files()[0].uri.path().to_string();
            self.order.lock().unwrap().push(name.clone());
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            match name.as_str() {
                "/fail.py" => Err(anyhow::anyhow!("engine exploded")),
                "/panic.py" => panic!("engine panicked"),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_run_one_at_a_time_in_order() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = AnalysisQueue::new(runner.clone());
        let handles: Vec<_> = ["file:///1.py", "file:///2.py", "file:///3.py"]
            .iter()
            .map(|p| queue.submit(batch(&[*p])))
            .collect();
        for h in &handles {
            h.wait().await;
        }
        assert_eq!(runner.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(*runner.order.lock().unwrap(), vec!["/1.py", "/2.py", "/3.py"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_survives_failure_and_panic() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = AnalysisQueue::new(runner.clone());
        queue.submit(batch(&["file:///fail.py"])).wait().await;
        queue.submit(batch(&["file:///panic.py"])).wait().await;
        let last = queue.submit(batch(&["file:///ok.py"]));
        last.wait().await;
        assert!(last.is_done());
        assert_eq!(runner.order.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_non_file_uris_are_filtered() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = AnalysisQueue::new(runner.clone());
        let handle = queue.submit(batch(&["untitled:Untitled-1", "git:/ws/a.py"]));
        assert!(handle.is_done());
        handle.wait().await;
        assert!(runner.order.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_is_skipped() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = AnalysisQueue::new(runner.clone());
        let first = queue.submit(batch(&["file:///1.py"]));
        let second = queue.submit(batch(&["file:///2.py"]));
        second.cancel();
        first.wait().await;
        second.wait().await;
        assert_eq!(*runner.order.lock().unwrap(), vec!["/1.py"]);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = AnalysisQueue::new(runner);
        let handle = queue.submit(batch(&["file:///1.py"]));
        handle.wait().await;
        handle.cancel();
        assert!(!handle.is_cancelled());
        assert!(AnalysisHandle::completed().is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_pending_handles() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = AnalysisQueue::new(runner);
        let first = queue.submit(batch(&["file:///1.py"]));
        let second = queue.submit(batch(&["file:///2.py"]));
        queue.shutdown().await;
        first.wait().await;
        second.wait().await;
        assert!(second.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_batch_returns_files_to_dirty_table() {
        let runner = Arc::new(RecordingRunner::default());
        let dirty = Arc::new(DirtyFiles::new());
        let queue = AnalysisQueue::with_requeue(runner.clone(), dirty.clone());
        let first = queue.submit(batch(&["file:///1.py"]));
        let second = queue.submit(batch(&["file:///2.py", "file:///3.py"]));
        second.cancel();
        first.wait().await;
        second.wait().await;

        assert_eq!(*runner.order.lock().unwrap(), vec!["/1.py"]);
        assert!(dirty.contains(&Url::parse("file:///2.py").unwrap()));
        assert!(dirty.contains(&Url::parse("file:///3.py").unwrap()));
        assert!(!dirty.contains(&Url::parse("file:///1.py").unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_batch_keeps_newer_mark() {
        let runner = Arc::new(RecordingRunner::default());
        let dirty = Arc::new(DirtyFiles::new());
        let queue = AnalysisQueue::with_requeue(runner.clone(), dirty.clone());
        let uri = Url::parse("file:///fail.py").unwrap();

        let handle = queue.submit(batch(&["file:///fail.py"]));
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        let edited_at = tokio::time::Instant::now();
        dirty.mark_at(uri.clone(), edited_at);
        handle.wait().await;

        assert!(dirty.contains(&uri));
        assert!(dirty.take_if_unchanged(&uri, edited_at));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_not_returned_without_cancellation() {
        let runner = Arc::new(RecordingRunner::default());
        let dirty = Arc::new(DirtyFiles::new());
        let queue = AnalysisQueue::with_requeue(runner, dirty.clone());
        queue.submit(batch(&["file:///fail.py"])).wait().await;
        assert!(dirty.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_does_not_return_files() {
        let runner = Arc::new(RecordingRunner::default());
        let dirty = Arc::new(DirtyFiles::new());
        let queue = AnalysisQueue::with_requeue(runner, dirty.clone());
        let first = queue.submit(batch(&["file:///fail.py"]));
        queue.submit(batch(&["file:///2.py"]));
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shutdown().await;
        first.wait().await;
        assert!(dirty.is_empty());
    }
}
