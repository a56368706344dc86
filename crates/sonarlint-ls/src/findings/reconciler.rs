//
// findings/reconciler.rs
//
// Matches freshly produced findings against known ones through the tracking service
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::Url;
use uuid::Uuid;

use super::types::{FindingOrigin, IssueSeverity, RawFinding, TextRange, TrackedFinding};
use crate::registry::WorkspaceFolderRegistry;
use crate::uri;

/// Local resolution of a finding that the server does not know about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    WontFix,
    FalsePositive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRangeWithHash {
    pub start_line: u32,
    pub start_line_offset: u32,
    pub end_line: u32,
    pub end_line_offset: u32,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineWithHash {
    pub number: u32,
    pub hash: String,
}

/// Lightweight descriptor sent to the tracker instead of file content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTrackedFinding {
    pub id: Option<Uuid>,
    pub severity: IssueSeverity,
    pub text_range_with_hash: Option<TextRangeWithHash>,
    pub line_with_hash: Option<LineWithHash>,
    pub rule_key: String,
    pub message: String,
}

impl ClientTrackedFinding {
    pub fn from_raw(finding: &RawFinding) -> Self {
        let text_range_with_hash = match (finding.text_range, &finding.range_hash) {
            (Some(TextRange { start_line, start_line_offset, end_line, end_line_offset }), Some(hash)) => {
                Some(TextRangeWithHash {
                    start_line,
                    start_line_offset,
                    end_line,
                    end_line_offset,
                    hash: hash.clone(),
                })
            }
            _ => None,
        };
        let line_with_hash = match (finding.line(), &finding.line_hash) {
            (Some(number), Some(hash)) => Some(LineWithHash {
                number,
                hash: hash.clone(),
            }),
            _ => None,
        };
        Self {
            id: None,
            severity: finding.severity,
            text_range_with_hash,
            line_with_hash,
            rule_key: finding.rule_key.clone(),
            message: finding.message.clone(),
        }
    }

    pub fn line(&self) -> Option<u32> {
        self.line_with_hash
            .as_ref()
            .map(|l| l.number)
            .or_else(|| self.text_range_with_hash.as_ref().map(|r| r.start_line))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMatchedFinding {
    pub id: Uuid,
    pub server_key: String,
    pub resolved: bool,
    pub on_new_code: bool,
    pub overridden_severity: Option<IssueSeverity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalOnlyFinding {
    pub id: Uuid,
    pub resolution_status: Option<ResolutionStatus>,
}

/// Tracker answer for one submitted descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingMatch {
    ServerMatched(ServerMatchedFinding),
    LocalOnly(LocalOnlyFinding),
}

pub type FindingsByPath<T> = HashMap<PathBuf, Vec<T>>;

/// Authority on finding correspondence across runs (remote backend or local store).
///
/// Responses are index-aligned with the submitted descriptors, per path.
#[async_trait]
pub trait TrackingService: Send + Sync {
    async fn match_findings(
        &self,
        folder: &Url,
        findings_by_path: FindingsByPath<ClientTrackedFinding>,
        fetch_server_findings: bool,
    ) -> anyhow::Result<FindingsByPath<FindingMatch>>;

    /// Hotspot tracking. `None` means the service does not track hotspots
    /// and they are published without reconciliation.
    async fn match_hotspots(
        &self,
        _folder: &Url,
        _path: &Path,
        _hotspots: &[ClientTrackedFinding],
    ) -> anyhow::Result<Option<Vec<FindingMatch>>> {
        Ok(None)
    }
}

/// Adapts tracker responses into tracked findings for one file at a time
pub struct IssueReconciler {
    tracker: Arc<dyn TrackingService>,
    folders: Arc<dyn WorkspaceFolderRegistry>,
    timeout: Duration,
}

impl IssueReconciler {
    pub fn new(
        tracker: Arc<dyn TrackingService>,
        folders: Arc<dyn WorkspaceFolderRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            tracker,
            folders,
            timeout,
        }
    }

    /// Reconcile the code issues of one file. Resolved findings are dropped.
    ///
    /// Falls back to unreconciled findings when the file has no workspace
    /// folder, or when the tracker fails, times out or answers with a list
    /// that is not index-aligned with the input.
    pub async fn reconcile(
        &self,
        file: &Url,
        findings: Vec<RawFinding>,
        fetch_server_findings: bool,
    ) -> Vec<TrackedFinding> {
        if findings.is_empty() {
            return Vec::new();
        }
        let Some((folder, path)) = self.locate(file) else {
            log::debug!("No workspace folder for {}, findings left unreconciled", file);
            return unreconciled(findings);
        };

        let descriptors: Vec<ClientTrackedFinding> =
            findings.iter().map(ClientTrackedFinding::from_raw).collect();
        let request = HashMap::from([(path.clone(), descriptors)]);

        let response = tokio::time::timeout(
            self.timeout,
            self.tracker
                .match_findings(&folder, request, fetch_server_findings),
        )
        .await;

        let matches = match response {
            Ok(Ok(mut by_path)) => by_path.remove(&path).unwrap_or_default(),
            Ok(Err(e)) => {
                log::warn!("Issue tracking failed for {}: {:#}", file, e);
                return unreconciled(findings);
            }
            Err(_) => {
                log::warn!("Issue tracking for {} timed out after {:?}", file, self.timeout);
                return unreconciled(findings);
            }
        };

        if matches.len() != findings.len() {
            log::warn!(
                "Tracker returned {} matches for {} findings in {}, findings left unreconciled",
                matches.len(),
                findings.len(),
                file
            );
            return unreconciled(findings);
        }

        zip_matches(findings, matches)
    }

    /// Reconcile hotspots through the tracker's hotspot extension point.
    pub async fn reconcile_hotspots(&self, file: &Url, hotspots: Vec<RawFinding>) -> Vec<TrackedFinding> {
        if hotspots.is_empty() {
            return Vec::new();
        }
        let Some((folder, path)) = self.locate(file) else {
            return unreconciled(hotspots);
        };

        let descriptors: Vec<ClientTrackedFinding> =
            hotspots.iter().map(ClientTrackedFinding::from_raw).collect();
        let response = tokio::time::timeout(
            self.timeout,
            self.tracker.match_hotspots(&folder, &path, &descriptors),
        )
        .await;

        match response {
            Ok(Ok(Some(matches))) if matches.len() == hotspots.len() => zip_matches(hotspots, matches),
            Ok(Ok(Some(matches))) => {
                log::warn!(
                    "Tracker returned {} matches for {} hotspots in {}",
                    matches.len(),
                    hotspots.len(),
                    file
                );
                unreconciled(hotspots)
            }
            Ok(Ok(None)) => unreconciled(hotspots),
            Ok(Err(e)) => {
                log::warn!("Hotspot tracking failed for {}: {:#}", file, e);
                unreconciled(hotspots)
            }
            Err(_) => {
                log::warn!("Hotspot tracking for {} timed out after {:?}", file, self.timeout);
                unreconciled(hotspots)
            }
        }
    }

    fn locate(&self, file: &Url) -> Option<(Url, PathBuf)> {
        let folder = self.folders.find_folder_for_file(file)?;
        let path = uri::relative_path(&folder, file)?;
        Some((folder, path))
    }
}

fn unreconciled(findings: Vec<RawFinding>) -> Vec<TrackedFinding> {
    findings.into_iter().map(TrackedFinding::unreconciled).collect()
}

/// Pair findings with tracker matches by position and drop resolved ones.
pub fn zip_matches(findings: Vec<RawFinding>, matches: Vec<FindingMatch>) -> Vec<TrackedFinding> {
    findings
        .into_iter()
        .zip(matches)
        .map(|(finding, matched)| track(finding, matched))
        .filter(|tracked| !tracked.resolved)
        .collect()
}

fn track(finding: RawFinding, matched: FindingMatch) -> TrackedFinding {
    match matched {
        FindingMatch::ServerMatched(server) => TrackedFinding {
            id: server.id,
            severity: server.overridden_severity.unwrap_or(finding.severity),
            finding,
            origin: FindingOrigin::ServerMatched {
                server_key: server.server_key,
            },
            resolved: server.resolved,
            on_new_code: server.on_new_code,
            review_status: None,
        },
        FindingMatch::LocalOnly(local) => TrackedFinding {
            id: local.id,
            severity: finding.severity,
            finding,
            origin: FindingOrigin::LocalOnly,
            resolved: local.resolution_status.is_some(),
            on_new_code: true,
            review_status: None,
        },
    }
}
