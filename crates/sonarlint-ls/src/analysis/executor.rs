//
// analysis/executor.rs
//
// Runs one batch: engine, reconciliation, cache update, publication
//

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tower_lsp::lsp_types::Url;
use uuid::Uuid;

use super::batch::AnalysisBatch;
use super::engine::{finding_channel, AnalysisEngine};
use super::worker::{AnalysisTask, TaskRunner};
use crate::diagnostics::{AnalysisProgress, DiagnosticPublisher, DiagnosticsSink};
use crate::findings::{FindingCache, IssueReconciler, RawFinding, TrackedFinding};
use crate::hashing;
use crate::registry::OpenFile;

pub struct AnalysisTaskExecutor {
    engine: Arc<dyn AnalysisEngine>,
    reconciler: Option<Arc<IssueReconciler>>,
    issues: Arc<FindingCache>,
    hotspots: Arc<FindingCache>,
    publisher: Arc<DiagnosticPublisher>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl AnalysisTaskExecutor {
    pub fn new(
        engine: Arc<dyn AnalysisEngine>,
        reconciler: Option<Arc<IssueReconciler>>,
        issues: Arc<FindingCache>,
        hotspots: Arc<FindingCache>,
        publisher: Arc<DiagnosticPublisher>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            engine,
            reconciler,
            issues,
            hotspots,
            publisher,
            sink,
        }
    }

    async fn execute(&self, task: &AnalysisTask, progress: Option<&str>) -> anyhow::Result<()> {
        let batch = &task.batch;
        let generations: HashMap<Url, Generations> = batch
            .uris()
            .map(|uri| {
                let generations = Generations {
                    issues: self.issues.generation(uri),
                    hotspots: self.hotspots.generation(uri),
                };
                (uri.clone(), generations)
            })
            .collect();
        let (listener, mut rx) = finding_channel();
        self.engine
            .analyze(batch.files(), listener, task.token.clone())
            .await
            .with_context(|| format!("Analysis of {} files failed", batch.len()))?;

        // The engine has returned; everything it reported is already queued
        let mut by_file: HashMap<Url, Vec<RawFinding>> =
            batch.uris().map(|uri| (uri.clone(), Vec::new())).collect();
        while let Ok((uri, finding)) = rx.try_recv() {
            match by_file.get_mut(&uri) {
                Some(findings) => findings.push(finding),
                None => log::debug!("Ignoring finding for {}, not part of the batch", uri),
            }
        }

        let total = batch.len();
        let mut applied = Vec::with_capacity(total);
        for (n, file) in batch.files().iter().enumerate() {
            let findings = by_file.remove(&file.uri).unwrap_or_default();
            let generation = generations.get(&file.uri).copied().unwrap_or_default();
            if self.process_file(file, findings, batch, generation).await {
                applied.push(&file.uri);
            }
            if let Some(token) = progress {
                self.sink
                    .report_progress(token, AnalysisProgress::Report { analyzed: n + 1, total })
                    .await;
            }
        }

        for uri in applied {
            self.publisher.publish(uri, batch.hotspots_only()).await;
        }
        Ok(())
    }

    /// Whether results for `file` still describe what the editor holds.
    /// Hotspot scans may cover files that were never opened.
    fn still_open(&self, file: &OpenFile, batch: &AnalysisBatch) -> bool {
        match self.publisher.open_version(&file.uri) {
            Some(current) => current >= file.version,
            None => batch.hotspots_only(),
        }
    }

    /// Reconcile and cache the findings of one file. Returns false when the
    /// results were dropped because the file was closed or reopened meanwhile.
    async fn process_file(
        &self,
        file: &OpenFile,
        mut findings: Vec<RawFinding>,
        batch: &AnalysisBatch,
        generation: Generations,
    ) -> bool {
        if !self.still_open(file, batch) {
            log::debug!("Dropping results for {}, closed during analysis", file.uri);
            return false;
        }
        for finding in &mut findings {
            hashing::fill_missing_hashes(finding, &file.content);
        }
        let (hotspots, issues): (Vec<RawFinding>, Vec<RawFinding>) =
            findings.into_iter().partition(RawFinding::is_hotspot);

        log::trace!(
            "{}: {} issues, {} hotspots (version {})",
            file.uri,
            issues.len(),
            hotspots.len(),
            file.version
        );

        let hotspots = match &self.reconciler {
            Some(reconciler) => reconciler.reconcile_hotspots(&file.uri, hotspots).await,
            None => unreconciled(hotspots),
        };
        let stored = self
            .hotspots
            .put_if_current(file.uri.clone(), generation.hotspots, file.version, hotspots);

        if batch.hotspots_only() || !stored {
            return stored;
        }
        let issues = match &self.reconciler {
            Some(reconciler) => {
                reconciler
                    .reconcile(&file.uri, issues, batch.fetch_server_findings())
                    .await
            }
            None => unreconciled(issues),
        };
        self.issues
            .put_if_current(file.uri.clone(), generation.issues, file.version, issues)
    }
}

/// Cache generations of one file captured before the engine ran
#[derive(Debug, Clone, Copy, Default)]
struct Generations {
    issues: u64,
    hotspots: u64,
}

fn unreconciled(findings: Vec<RawFinding>) -> Vec<TrackedFinding> {
    findings.into_iter().map(TrackedFinding::unreconciled).collect()
}

#[async_trait]
impl TaskRunner for AnalysisTaskExecutor {
    async fn run(&self, task: &AnalysisTask) -> anyhow::Result<()> {
        let progress = task
            .batch
            .show_progress()
            .then(|| format!("sonarlint/analysis/{}", Uuid::new_v4()));
        if let Some(token) = &progress {
            self.sink
                .report_progress(token, AnalysisProgress::Begin { total: task.batch.len() })
                .await;
        }

        let result = self.execute(task, progress.as_deref()).await;

        if let Some(token) = &progress {
            self.sink.report_progress(token, AnalysisProgress::End).await;
        }
        result
    }
}
