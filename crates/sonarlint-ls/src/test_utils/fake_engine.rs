//
// test_utils/fake_engine.rs
//
// Scripted analysis engine that records every call
//

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

use crate::analysis::engine::{finding_channel, AnalysisEngine, FindingListener};
use crate::analysis::worker::{AnalysisQueue, AnalysisTask, TaskRunner};
use crate::analysis::AnalysisBatch;
use crate::findings::RawFinding;
use crate::registry::OpenFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Error,
    Panic,
}

struct Inner {
    emitted: Mutex<Vec<(Url, RawFinding)>>,
    failure: Mutex<Option<(Failure, String)>>,
    gate: Mutex<Option<Arc<Notify>>>,
    honor_cancellation: AtomicBool,
    batches: Mutex<Vec<Vec<Url>>>,
    tasks: Mutex<Vec<AnalysisBatch>>,
    tokens: Mutex<Vec<CancellationToken>>,
    started: watch::Sender<usize>,
    finished: watch::Sender<usize>,
}

/// Cheap to clone; clones share the same script and recordings.
///
/// Used directly as a [`TaskRunner`] it stands in for the whole executor;
/// wrapped by the real executor it acts as the engine only.
#[derive(Clone)]
pub struct FakeEngine {
    inner: Arc<Inner>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                emitted: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
                gate: Mutex::new(None),
                honor_cancellation: AtomicBool::new(false),
                batches: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                tokens: Mutex::new(Vec::new()),
                started: watch::channel(0).0,
                finished: watch::channel(0).0,
            }),
        }
    }

    /// Report `finding` for `uri` on every run
    pub fn emit(&self, uri: &str, finding: RawFinding) {
        let uri = Url::parse(uri).expect("valid test uri");
        self.inner.emitted.lock().unwrap().push((uri, finding));
    }

    /// Make every run fail after reporting its findings
    pub fn fail_with(&self, message: &str) {
        *self.inner.failure.lock().unwrap() = Some((Failure::Error, message.to_string()));
    }

    /// Make every run panic
    pub fn panic_with(&self, message: &str) {
        *self.inner.failure.lock().unwrap() = Some((Failure::Panic, message.to_string()));
    }

    pub fn succeed(&self) {
        *self.inner.failure.lock().unwrap() = None;
    }

    /// Block the next run until the returned gate is notified. The run does
    /// not react to cancellation while blocked unless
    /// [`honor_cancellation`](Self::honor_cancellation) is set.
    pub fn block(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.inner.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Make runs stop early and fail once their token is cancelled, the way
    /// a real analyzer reports an interrupted analysis
    pub fn honor_cancellation(&self) {
        self.inner.honor_cancellation.store(true, Ordering::SeqCst);
    }

    /// A queue whose worker runs batches straight through this engine
    pub fn queue(&self) -> AnalysisQueue {
        AnalysisQueue::new(Arc::new(self.clone()))
    }

    /// URIs handed to the engine, one entry per run
    pub fn batches(&self) -> Vec<Vec<Url>> {
        self.inner.batches.lock().unwrap().clone()
    }

    /// Batches received through the task-runner path
    pub fn tasks(&self) -> Vec<AnalysisBatch> {
        self.inner.tasks.lock().unwrap().clone()
    }

    pub fn last_batch(&self) -> Option<AnalysisBatch> {
        self.inner.tasks.lock().unwrap().last().cloned()
    }

    pub fn fetch_flags(&self) -> Vec<bool> {
        self.tasks().iter().map(|b| b.fetch_server_findings()).collect()
    }

    pub fn last_token_cancelled(&self) -> bool {
        self.inner
            .tokens
            .lock()
            .unwrap()
            .last()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    pub fn started(&self) -> usize {
        *self.inner.started.borrow()
    }

    pub async fn wait_for_started(&self, n: usize) {
        let mut rx = self.inner.started.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Wait until `n` runs returned (successfully or not)
    pub async fn wait_for_batches(&self, n: usize) {
        let mut rx = self.inner.finished.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    fn finish(&self) {
        self.inner.finished.send_modify(|count| *count += 1);
    }
}

#[async_trait]
impl AnalysisEngine for FakeEngine {
    async fn analyze(
        &self,
        files: &[OpenFile],
        listener: FindingListener,
        token: CancellationToken,
    ) -> anyhow::Result<()> {
        self.inner
            .batches
            .lock()
            .unwrap()
            .push(files.iter().map(|f| f.uri.clone()).collect());
        self.inner.tokens.lock().unwrap().push(token.clone());
        self.inner.started.send_modify(|count| *count += 1);

        let emitted = self.inner.emitted.lock().unwrap().clone();
        for (uri, finding) in emitted {
            listener.handle(uri, finding);
        }

        let honor = self.inner.honor_cancellation.load(Ordering::SeqCst);
        let gate = self.inner.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            if honor {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = token.cancelled() => {}
                }
            } else {
                gate.notified().await;
            }
        }
        if honor && token.is_cancelled() {
            self.finish();
            return Err(anyhow::anyhow!("analysis interrupted"));
        }

        let failure = self.inner.failure.lock().unwrap().clone();
        self.finish();
        match failure {
            None => Ok(()),
            Some((Failure::Error, message)) => Err(anyhow::anyhow!(message)),
            Some((Failure::Panic, message)) => panic!("{}", message),
        }
    }
}

#[async_trait]
impl TaskRunner for FakeEngine {
    async fn run(&self, task: &AnalysisTask) -> anyhow::Result<()> {
        self.inner.tasks.lock().unwrap().push(task.batch.clone());
        let (listener, _rx) = finding_channel();
        self.analyze(task.batch.files(), listener, task.token.clone())
            .await
    }
}
