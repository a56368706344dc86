//
// findings/local_tracker.rs
//
// In-process tracking service for workspaces without a remote backend
//
// Remembers the findings of the previous run per (folder, path) and hands
// out the same identity to the finding that best corresponds to each one.
//

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use tower_lsp::lsp_types::Url;
use uuid::Uuid;

use super::reconciler::{
    ClientTrackedFinding, FindingMatch, FindingsByPath, LocalOnlyFinding, ResolutionStatus,
    TrackingService,
};

#[derive(Debug, Clone)]
struct KnownFinding {
    id: Uuid,
    descriptor: ClientTrackedFinding,
}

#[derive(Debug, Default)]
pub struct LocalIssueTracker {
    known: DashMap<(Url, PathBuf), Vec<KnownFinding>>,
    resolutions: DashMap<Uuid, ResolutionStatus>,
}

impl LocalIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or clear, with `None`) the local resolution of a finding
    pub fn set_resolution(&self, id: Uuid, status: Option<ResolutionStatus>) {
        match status {
            Some(status) => {
                self.resolutions.insert(id, status);
            }
            None => {
                self.resolutions.remove(&id);
            }
        }
    }

    pub fn resolution(&self, id: &Uuid) -> Option<ResolutionStatus> {
        self.resolutions.get(id).map(|s| *s)
    }

    /// Forget everything known about a file
    pub fn forget(&self, folder: &Url, path: &PathBuf) {
        if let Some((_, previous)) = self.known.remove(&(folder.clone(), path.clone())) {
            for known in previous {
                self.resolutions.remove(&known.id);
            }
        }
    }

    fn track_file(&self, folder: &Url, path: PathBuf, incoming: Vec<ClientTrackedFinding>) -> Vec<FindingMatch> {
        let key = (folder.clone(), path);
        let previous = self.known.get(&key).map(|k| k.clone()).unwrap_or_default();
        let ids = match_identities(&previous, &incoming);

        let matches = ids
            .iter()
            .map(|id| {
                FindingMatch::LocalOnly(LocalOnlyFinding {
                    id: *id,
                    resolution_status: self.resolution(id),
                })
            })
            .collect();

        let known = ids
            .into_iter()
            .zip(incoming)
            .map(|(id, descriptor)| KnownFinding { id, descriptor })
            .collect();
        self.known.insert(key, known);
        matches
    }
}

#[async_trait]
impl TrackingService for LocalIssueTracker {
    async fn match_findings(
        &self,
        folder: &Url,
        findings_by_path: FindingsByPath<ClientTrackedFinding>,
        _fetch_server_findings: bool,
    ) -> anyhow::Result<FindingsByPath<FindingMatch>> {
        Ok(findings_by_path
            .into_iter()
            .map(|(path, incoming)| {
                let matches = self.track_file(folder, path.clone(), incoming);
                (path, matches)
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    RangeOnSameLine,
    Range,
    Line,
}

impl Pass {
    const ALL: [Pass; 3] = [Pass::RangeOnSameLine, Pass::Range, Pass::Line];

    fn matches(self, old: &ClientTrackedFinding, new: &ClientTrackedFinding) -> bool {
        match self {
            Pass::RangeOnSameLine => range_hash(old).is_some() && range_hash(old) == range_hash(new) && old.line() == new.line(),
            Pass::Range => range_hash(old).is_some() && range_hash(old) == range_hash(new),
            Pass::Line => line_hash(old).is_some() && line_hash(old) == line_hash(new),
        }
    }
}

fn range_hash(d: &ClientTrackedFinding) -> Option<&str> {
    d.text_range_with_hash.as_ref().map(|r| r.hash.as_str())
}

fn line_hash(d: &ClientTrackedFinding) -> Option<&str> {
    d.line_with_hash.as_ref().map(|l| l.hash.as_str())
}

/// Assign an identity to each incoming finding.
///
/// Candidates must share the rule key. Passes run from strictest to loosest:
/// range hash on the same line, range hash anywhere (moved code), line hash,
/// then same message on the nearest line. Each previous finding is claimed
/// at most once; leftovers get a fresh id.
fn match_identities(previous: &[KnownFinding], incoming: &[ClientTrackedFinding]) -> Vec<Uuid> {
    let mut assigned: Vec<Option<Uuid>> = vec![None; incoming.len()];
    let mut claimed = vec![false; previous.len()];

    for pass in Pass::ALL {
        for (i, new) in incoming.iter().enumerate() {
            if assigned[i].is_some() {
                continue;
            }
            let candidate = previous.iter().enumerate().position(|(j, old)| {
                !claimed[j] && old.descriptor.rule_key == new.rule_key && pass.matches(&old.descriptor, new)
            });
            if let Some(j) = candidate {
                claimed[j] = true;
                assigned[i] = Some(previous[j].id);
            }
        }
    }

    for (i, new) in incoming.iter().enumerate() {
        if assigned[i].is_some() {
            continue;
        }
        let nearest = previous
            .iter()
            .enumerate()
            .filter(|(j, old)| {
                !claimed[*j]
                    && old.descriptor.rule_key == new.rule_key
                    && old.descriptor.message == new.message
            })
            .min_by_key(|(_, old)| line_distance(old.descriptor.line(), new.line()))
            .map(|(j, _)| j);
        if let Some(j) = nearest {
            claimed[j] = true;
            assigned[i] = Some(previous[j].id);
        }
    }

    assigned
        .into_iter()
        .map(|id| id.unwrap_or_else(Uuid::new_v4))
        .collect()
}

fn line_distance(a: Option<u32>, b: Option<u32>) -> u32 {
    match (a, b) {
        (Some(a), Some(b)) => a.abs_diff(b),
        (None, None) => 0,
        _ => u32::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::reconciler::{LineWithHash, TextRangeWithHash};
    use crate::findings::IssueSeverity;
    use std::collections::HashMap;

    fn folder() -> Url {
        Url::parse("file:///ws").unwrap()
    }

    fn descriptor(rule: &str, line: u32, range_hash: &str, line_hash: &str) -> ClientTrackedFinding {
        ClientTrackedFinding {
            id: None,
            severity: IssueSeverity::Major,
            text_range_with_hash: Some(TextRangeWithHash {
                start_line: line,
                start_line_offset: 0,
                end_line: line,
                end_line_offset: 5,
                hash: range_hash.to_string(),
            }),
            line_with_hash: Some(LineWithHash {
                number: line,
                hash: line_hash.to_string(),
            }),
            rule_key: rule.to_string(),
            message: format!("{rule} message"),
        }
    }

    async fn track(tracker: &LocalIssueTracker, findings: Vec<ClientTrackedFinding>) -> Vec<FindingMatch> {
        let path = PathBuf::from("a.py");
        let mut response = tracker
            .match_findings(&folder(), HashMap::from([(path.clone(), findings)]), false)
            .await
            .unwrap();
        response.remove(&path).unwrap()
    }

    fn ids(matches: &[FindingMatch]) -> Vec<Uuid> {
        matches
            .iter()
            .map(|m| match m {
                FindingMatch::LocalOnly(l) => l.id,
                FindingMatch::ServerMatched(s) => s.id,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_identity_stable_across_identical_runs() {
        let tracker = LocalIssueTracker::new();
        let run = vec![descriptor("a", 1, "h1", "l1"), descriptor("b", 2, "h2", "l2")];
        let first = ids(&track(&tracker, run.clone()).await);
        let second = ids(&track(&tracker, run).await);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_identity_follows_moved_code() {
        let tracker = LocalIssueTracker::new();
        let first = ids(&track(&tracker, vec![descriptor("a", 10, "h1", "l1")]).await);
        // Three lines inserted above: same range hash, different line
        let second = ids(&track(&tracker, vec![descriptor("a", 13, "h1", "l1")]).await);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_identity_falls_back_to_line_hash() {
        let tracker = LocalIssueTracker::new();
        let first = ids(&track(&tracker, vec![descriptor("a", 4, "h1", "l1")]).await);
        let second = ids(&track(&tracker, vec![descriptor("a", 4, "h-edited", "l1")]).await);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_identity_falls_back_to_nearest_message() {
        let tracker = LocalIssueTracker::new();
        let first = ids(
            &track(
                &tracker,
                vec![descriptor("a", 5, "h1", "l1"), descriptor("a", 50, "h2", "l2")],
            )
            .await,
        );
        let second = ids(&track(&tracker, vec![descriptor("a", 48, "x", "y")]).await);
        assert_eq!(second, vec![first[1]]);
    }

    #[tokio::test]
    async fn test_different_rule_gets_new_identity() {
        let tracker = LocalIssueTracker::new();
        let first = ids(&track(&tracker, vec![descriptor("a", 1, "h1", "l1")]).await);
        let second = ids(&track(&tracker, vec![descriptor("b", 1, "h1", "l1")]).await);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_each_previous_finding_claimed_once() {
        let tracker = LocalIssueTracker::new();
        let first = ids(&track(&tracker, vec![descriptor("a", 1, "h1", "l1")]).await);
        let second = ids(
            &track(
                &tracker,
                vec![descriptor("a", 1, "h1", "l1"), descriptor("a", 2, "h1", "l1")],
            )
            .await,
        );
        assert_eq!(second[0], first[0]);
        assert_ne!(second[1], first[0]);
    }

    #[tokio::test]
    async fn test_resolution_is_reported_on_later_matches() {
        let tracker = LocalIssueTracker::new();
        let first = track(&tracker, vec![descriptor("a", 1, "h1", "l1")]).await;
        let id = ids(&first)[0];
        tracker.set_resolution(id, Some(ResolutionStatus::WontFix));

        let second = track(&tracker, vec![descriptor("a", 1, "h1", "l1")]).await;
        assert_eq!(
            second[0],
            FindingMatch::LocalOnly(LocalOnlyFinding {
                id,
                resolution_status: Some(ResolutionStatus::WontFix),
            })
        );

        tracker.set_resolution(id, None);
        assert!(tracker.resolution(&id).is_none());
    }

    #[tokio::test]
    async fn test_forget_resets_identities() {
        let tracker = LocalIssueTracker::new();
        let first = ids(&track(&tracker, vec![descriptor("a", 1, "h1", "l1")]).await);
        tracker.forget(&folder(), &PathBuf::from("a.py"));
        let second = ids(&track(&tracker, vec![descriptor("a", 1, "h1", "l1")]).await);
        assert_ne!(first, second);
    }

    #[test]
    fn test_line_distance() {
        assert_eq!(line_distance(Some(3), Some(7)), 4);
        assert_eq!(line_distance(None, None), 0);
        assert_eq!(line_distance(Some(1), None), u32::MAX);
    }
}
