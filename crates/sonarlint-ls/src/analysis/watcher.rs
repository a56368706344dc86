//
// analysis/watcher.rs
//
// Dirty-file table and the debounce loop that turns quiet files into batches
//

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

use super::batch::AnalysisBatch;
use super::worker::{AnalysisHandle, AnalysisQueue};
use crate::registry::{NotebookRegistry, OpenFileRegistry};

/// Files with unanalyzed changes and the time of their last event
#[derive(Debug, Default)]
pub struct DirtyFiles {
    entries: DashMap<Url, Instant>,
}

impl DirtyFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, uri: Url) {
        self.mark_at(uri, Instant::now());
    }

    pub fn mark_at(&self, uri: Url, at: Instant) {
        self.entries.insert(uri, at);
    }

    /// Mark `uri` again unless it was re-marked in the meantime
    pub fn restore(&self, uri: Url) {
        self.entries.entry(uri).or_insert_with(Instant::now);
    }

    pub fn remove(&self, uri: &Url) {
        self.entries.remove(uri);
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.entries.contains_key(uri)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Entries idle for strictly longer than `quiet`, with their timestamps
    pub fn ready(&self, now: Instant, quiet: Duration) -> Vec<(Url, Instant)> {
        self.entries
            .iter()
            .filter(|e| now.saturating_duration_since(*e.value()) > quiet)
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Remove the entry only if it was not re-marked since `seen`
    pub fn take_if_unchanged(&self, uri: &Url, seen: Instant) -> bool {
        self.entries.remove_if(uri, |_, at| *at == seen).is_some()
    }
}

/// Polls the dirty table and submits debounced batches.
///
/// Only one watcher batch is in flight at a time. When files become ready
/// while the previous one still runs, that batch is asked to cancel and the
/// ready files stay dirty until a later tick sees it finished.
pub struct EventWatcher {
    dirty: Arc<DirtyFiles>,
    files: Arc<dyn OpenFileRegistry>,
    notebooks: Arc<dyn NotebookRegistry>,
    queue: Arc<AnalysisQueue>,
    quiet_period: Duration,
    poll_interval: Duration,
    in_flight: Mutex<Option<AnalysisHandle>>,
}

impl EventWatcher {
    pub fn new(
        dirty: Arc<DirtyFiles>,
        files: Arc<dyn OpenFileRegistry>,
        notebooks: Arc<dyn NotebookRegistry>,
        queue: Arc<AnalysisQueue>,
        quiet_period: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            dirty,
            files,
            notebooks,
            queue,
            quiet_period,
            poll_interval,
            in_flight: Mutex::new(None),
        }
    }

    /// One polling tick
    pub fn check_timers(&self, now: Instant) {
        let ready = self.dirty.ready(now, self.quiet_period);
        if ready.is_empty() {
            return;
        }

        let Ok(mut in_flight) = self.in_flight.lock() else {
            return;
        };
        if let Some(previous) = in_flight.as_ref() {
            if !previous.is_done() {
                log::debug!("Attempt to cancel previous analysis...");
                previous.cancel();
                return;
            }
        }

        let mut files = Vec::with_capacity(ready.len());
        for (uri, seen) in ready {
            if !self.dirty.take_if_unchanged(&uri, seen) {
                // Re-marked since the scan; its quiet period restarted
                continue;
            }
            match self.files.get(&uri).or_else(|| self.notebooks.get(&uri)) {
                Some(file) => files.push(file),
                None => log::trace!("Dropping dirty entry for {}, no longer open", uri),
            }
        }
        if files.is_empty() {
            return;
        }
        *in_flight = Some(self.queue.submit(AnalysisBatch::new(files)));
    }

    /// Start the polling loop. Stops when `shutdown` is cancelled.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            log::debug!("Analysis trigger watcher started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(watcher.poll_interval) => {
                        watcher.check_timers(Instant::now());
                    }
                }
            }
            log::debug!("Analysis trigger watcher stopped");
        })
    }

    /// Handle of the last batch this watcher submitted
    pub fn in_flight(&self) -> Option<AnalysisHandle> {
        self.in_flight.lock().ok().and_then(|h| h.clone())
    }

    /// Cancel the watcher's in-flight batch, if any
    pub fn cancel_in_flight(&self) {
        if let Ok(in_flight) = self.in_flight.lock() {
            if let Some(handle) = in_flight.as_ref() {
                handle.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeEngine, StaticFiles};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_requires_strictly_longer_than_quiet() {
        let dirty = DirtyFiles::new();
        let t0 = Instant::now();
        dirty.mark_at(url("file:///a.ts"), t0);
        let quiet = Duration::from_millis(2000);

        assert!(dirty.ready(t0 + Duration::from_millis(1999), quiet).is_empty());
        assert!(dirty.ready(t0 + Duration::from_millis(2000), quiet).is_empty());
        assert_eq!(dirty.ready(t0 + Duration::from_millis(2001), quiet).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_if_unchanged_respects_remark() {
        let dirty = DirtyFiles::new();
        let uri = url("file:///a.ts");
        let t0 = Instant::now();
        dirty.mark_at(uri.clone(), t0);
        dirty.mark_at(uri.clone(), t0 + Duration::from_millis(10));

        assert!(!dirty.take_if_unchanged(&uri, t0));
        assert!(dirty.contains(&uri));
        assert!(dirty.take_if_unchanged(&uri, t0 + Duration::from_millis(10)));
        assert!(dirty.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_keeps_newer_mark() {
        let dirty = DirtyFiles::new();
        let edited = url("file:///a.ts");
        let t0 = Instant::now();
        dirty.mark_at(edited.clone(), t0);

        tokio::time::advance(Duration::from_millis(500)).await;
        dirty.restore(edited.clone());
        dirty.restore(url("file:///b.ts"));

        assert!(dirty.take_if_unchanged(&edited, t0));
        assert!(dirty.contains(&url("file:///b.ts")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_files_are_submitted_once() {
        let engine = FakeEngine::new();
        let files = StaticFiles::with_files(&["file:///ws/a.ts", "file:///ws/b.ts"]);
        let queue = Arc::new(engine.queue());
        let dirty = Arc::new(DirtyFiles::new());
        let watcher = EventWatcher::new(
            dirty.clone(),
            files.clone(),
            files.clone(),
            queue,
            Duration::from_millis(2000),
            Duration::from_millis(200),
        );

        let t0 = Instant::now();
        dirty.mark_at(url("file:///ws/a.ts"), t0);
        dirty.mark_at(url("file:///ws/b.ts"), t0 + Duration::from_millis(1000));

        watcher.check_timers(t0 + Duration::from_millis(2100));
        assert!(!dirty.contains(&url("file:///ws/a.ts")));
        assert!(dirty.contains(&url("file:///ws/b.ts")));
        watcher.in_flight().unwrap().wait().await;

        watcher.check_timers(t0 + Duration::from_millis(2200));
        watcher.check_timers(t0 + Duration::from_millis(3100));
        engine.wait_for_batches(2).await;

        let batches = engine.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![url("file:///ws/a.ts")]);
        assert_eq!(batches[1], vec![url("file:///ws/b.ts")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_batch_is_cancelled_and_files_stay_dirty() {
        let engine = FakeEngine::new();
        let gate = engine.block();
        let files = StaticFiles::with_files(&["file:///ws/a.ts", "file:///ws/b.ts"]);
        let dirty = Arc::new(DirtyFiles::new());
        let watcher = EventWatcher::new(
            dirty.clone(),
            files.clone(),
            files.clone(),
            Arc::new(engine.queue()),
            Duration::from_millis(2000),
            Duration::from_millis(200),
        );

        let t0 = Instant::now();
        dirty.mark_at(url("file:///ws/a.ts"), t0);
        watcher.check_timers(t0 + Duration::from_millis(2001));
        engine.wait_for_started(1).await;

        dirty.mark_at(url("file:///ws/b.ts"), t0);
        watcher.check_timers(t0 + Duration::from_millis(2201));
        // Deferred, not dropped
        assert!(dirty.contains(&url("file:///ws/b.ts")));
        assert!(engine.last_token_cancelled());

        gate.notify_one();
        watcher.in_flight().unwrap().wait().await;
        watcher.check_timers(t0 + Duration::from_millis(2401));
        assert!(!dirty.contains(&url("file:///ws/b.ts")));
        engine.wait_for_batches(2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_file_entry_is_dropped() {
        let engine = FakeEngine::new();
        let files = StaticFiles::with_files(&[]);
        let dirty = Arc::new(DirtyFiles::new());
        let watcher = EventWatcher::new(
            dirty.clone(),
            files.clone(),
            files.clone(),
            Arc::new(engine.queue()),
            Duration::from_millis(2000),
            Duration::from_millis(200),
        );
        let t0 = Instant::now();
        dirty.mark_at(url("file:///ws/gone.ts"), t0);
        watcher.check_timers(t0 + Duration::from_millis(2500));
        assert!(dirty.is_empty());
        tokio::task::yield_now().await;
        assert!(engine.batches().is_empty());
    }
}
