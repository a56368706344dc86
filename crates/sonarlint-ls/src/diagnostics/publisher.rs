//
// diagnostics/publisher.rs
//
// Projects cached findings into editor diagnostics
//

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Position, Range, Url};

use super::taint::TaintVulnerabilitiesCache;
use crate::findings::{FindingCache, Flow, HotspotReviewStatus, TextRange, TrackedFinding};
use crate::registry::{NotebookRegistry, OpenFileRegistry};
use crate::uri;

pub const SONARLINT_SOURCE: &str = "sonarlint";
pub const REMOTE_SOURCE: &str = "remote";

const SECRETS_RULE_PREFIX: &str = "secrets";
const ITEM_LOCATION: &str = "location";
const ITEM_FLOW: &str = "flow";

/// Progress of a batch that asked for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisProgress {
    Begin { total: usize },
    Report { analyzed: usize, total: usize },
    End,
}

/// Outbound notifications towards the editor
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    /// Replace all diagnostics of `uri`
    async fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: Option<i32>);

    /// Replace all security hotspots of `uri`
    async fn publish_security_hotspots(&self, uri: Url, hotspots: Vec<Diagnostic>);

    async fn show_first_secret_detection_notification(&self);

    async fn report_progress(&self, _token: &str, _progress: AnalysisProgress) {}
}

/// Round-trip payload carried in `Diagnostic::data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticData {
    pub entry_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_issue_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HotspotReviewStatus>,
}

pub struct DiagnosticPublisher {
    sink: Arc<dyn DiagnosticsSink>,
    issues: Arc<FindingCache>,
    hotspots: Arc<FindingCache>,
    taint: Arc<TaintVulnerabilitiesCache>,
    files: Arc<dyn OpenFileRegistry>,
    notebooks: Arc<dyn NotebookRegistry>,
    first_secret_detected: AtomicBool,
    focus_on_new_code: AtomicBool,
    ignore_secondary_locations: AtomicBool,
}

impl DiagnosticPublisher {
    pub fn new(
        sink: Arc<dyn DiagnosticsSink>,
        issues: Arc<FindingCache>,
        hotspots: Arc<FindingCache>,
        taint: Arc<TaintVulnerabilitiesCache>,
        files: Arc<dyn OpenFileRegistry>,
        notebooks: Arc<dyn NotebookRegistry>,
    ) -> Self {
        Self {
            sink,
            issues,
            hotspots,
            taint,
            files,
            notebooks,
            first_secret_detected: AtomicBool::new(false),
            focus_on_new_code: AtomicBool::new(false),
            ignore_secondary_locations: AtomicBool::new(false),
        }
    }

    /// Seed the sticky first-secret flag (e.g. from persisted client state)
    pub fn initialize(&self, first_secret_detected: bool) {
        self.first_secret_detected
            .store(first_secret_detected, Ordering::SeqCst);
    }

    pub fn set_focus_on_new_code(&self, focus: bool) {
        self.focus_on_new_code.store(focus, Ordering::SeqCst);
    }

    pub fn is_focus_on_new_code(&self) -> bool {
        self.focus_on_new_code.load(Ordering::SeqCst)
    }

    pub fn set_show_secondary_locations(&self, show: bool) {
        self.ignore_secondary_locations.store(!show, Ordering::SeqCst);
    }

    /// Version of `uri` if it is open as a file or a notebook
    pub fn open_version(&self, uri: &Url) -> Option<i32> {
        self.files
            .get(uri)
            .or_else(|| self.notebooks.get(uri))
            .map(|f| f.version)
    }

    /// Drop every cached finding of `uri`, server taint included
    pub fn forget(&self, uri: &Url) {
        self.issues.clear(uri);
        self.hotspots.clear(uri);
        self.taint.clear(uri);
    }

    /// Drop cached findings of files under `folder` that are not open,
    /// such as the results of a hotspot scan
    pub fn forget_folder(&self, folder: &Url) {
        let closed_in_folder =
            |file: &Url| uri::relative_path(folder, file).is_some() && self.open_version(file).is_none();
        self.issues.clear_where(closed_in_folder);
        self.hotspots.clear_where(closed_in_folder);
    }

    /// Publish the diagnostics and hotspots of one file.
    ///
    /// With `only_hotspots`, code-issue diagnostics are left as they are.
    /// Caches recorded for an older document version are not published.
    pub async fn publish(&self, uri: &Url, only_hotspots: bool) {
        if self.notebooks.is_notebook(uri) {
            return;
        }
        let current_version = self.files.get(uri).map(|f| f.version);
        let focus = self.is_focus_on_new_code();
        let ignore_secondary = self.ignore_secondary_locations.load(Ordering::SeqCst);

        if !only_hotspots {
            if self.issues.is_stale(uri, current_version) {
                log::trace!("Skipping stale diagnostics for {}", uri);
            } else {
                let issues = self.issues.get(uri, current_version);
                let has_secret = issues
                    .values()
                    .any(|f| f.finding.rule_key.starts_with(SECRETS_RULE_PREFIX));
                if has_secret && !self.first_secret_detected.swap(true, Ordering::SeqCst) {
                    self.sink.show_first_secret_detection_notification().await;
                }

                let mut diagnostics: Vec<Diagnostic> = issues
                    .values()
                    .map(|f| prepare_diagnostic(f, ignore_secondary, focus))
                    .chain(self.taint.get_as_diagnostics(uri, focus))
                    .collect();
                diagnostics.sort_by(by_line_number);
                self.sink
                    .publish_diagnostics(uri.clone(), diagnostics, current_version)
                    .await;
            }
        }

        if self.hotspots.is_stale(uri, current_version) {
            log::trace!("Skipping stale hotspots for {}", uri);
            return;
        }
        let mut hotspots: Vec<Diagnostic> = self
            .hotspots
            .get(uri, current_version)
            .values()
            .map(|f| prepare_diagnostic(f, ignore_secondary, focus))
            .collect();
        hotspots.sort_by(by_line_number);
        self.sink.publish_security_hotspots(uri.clone(), hotspots).await;
    }

    /// Clear everything the editor shows for `uri`
    pub async fn publish_empty(&self, uri: &Url) {
        self.sink
            .publish_diagnostics(uri.clone(), Vec::new(), None)
            .await;
        self.sink
            .publish_security_hotspots(uri.clone(), Vec::new())
            .await;
    }
}

pub fn prepare_diagnostic(tracked: &TrackedFinding, ignore_secondary: bool, focus_on_new_code: bool) -> Diagnostic {
    let finding = &tracked.finding;
    let severity = if focus_on_new_code && !tracked.on_new_code {
        DiagnosticSeverity::HINT
    } else {
        DiagnosticSeverity::WARNING
    };
    let source = if tracked.server_key().is_some() && tracked.is_hotspot() {
        REMOTE_SOURCE
    } else {
        SONARLINT_SOURCE
    };
    let data = DiagnosticData {
        entry_key: tracked.entry_key(),
        server_issue_key: tracked.server_key().map(str::to_string),
        status: tracked.review_status,
    };
    Diagnostic {
        range: to_range(finding.text_range),
        severity: Some(severity),
        code: Some(NumberOrString::String(finding.rule_key.clone())),
        source: Some(source.to_string()),
        message: message(&finding.message, &finding.flows, ignore_secondary),
        data: serde_json::to_value(data).ok(),
        ..Default::default()
    }
}

/// Message with a pluralized suffix counting secondary locations or flows
pub fn message(text: &str, flows: &[Flow], ignore_secondary: bool) -> String {
    match flows {
        [] => text.to_string(),
        _ if ignore_secondary => text.to_string(),
        [only] => with_suffix(text, only.locations.len(), ITEM_LOCATION),
        _ if flows.iter().all(|f| f.locations.len() == 1) => with_suffix(text, flows.len(), ITEM_LOCATION),
        _ => with_suffix(text, flows.len(), ITEM_FLOW),
    }
}

fn with_suffix(text: &str, count: usize, item: &str) -> String {
    let plural = if count == 1 { "" } else { "s" };
    format!("{text} (+{count} {item}{plural})")
}

/// Engine range (1-based lines) to editor range (0-based lines)
pub fn to_range(range: Option<TextRange>) -> Range {
    match range {
        Some(r) => Range::new(
            Position::new(r.start_line.saturating_sub(1), r.start_line_offset),
            Position::new(r.end_line.saturating_sub(1), r.end_line_offset),
        ),
        None => Range::default(),
    }
}

/// Ascending start line, ties broken by message
pub fn by_line_number(a: &Diagnostic, b: &Diagnostic) -> CmpOrdering {
    a.range
        .start
        .line
        .cmp(&b.range.start.line)
        .then_with(|| a.message.cmp(&b.message))
}
