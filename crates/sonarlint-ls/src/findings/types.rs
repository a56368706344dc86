//
// findings/types.rs
//
// Raw and tracked finding types shared by the engine, reconciler, cache and publisher
//

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity as reported by the analysis engine (or overridden by the server)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueSeverity {
    Blocker,
    Critical,
    #[default]
    Major,
    Minor,
    Info,
}

/// What kind of analyzer output a finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    #[default]
    Issue,
    Hotspot,
    Taint,
}

/// Review status of a security hotspot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HotspotReviewStatus {
    ToReview,
    Safe,
    Fixed,
    Acknowledged,
}

/// Text range in engine coordinates: 1-based lines, 0-based character offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRange {
    pub start_line: u32,
    pub start_line_offset: u32,
    pub end_line: u32,
    pub end_line_offset: u32,
}

impl TextRange {
    pub fn new(start_line: u32, start_line_offset: u32, end_line: u32, end_line_offset: u32) -> Self {
        Self {
            start_line,
            start_line_offset,
            end_line,
            end_line_offset,
        }
    }
}

/// One secondary location inside a flow
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowLocation {
    #[serde(default)]
    pub text_range: Option<TextRange>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default)]
    pub locations: Vec<FlowLocation>,
}

/// A finding as produced by the analysis engine for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFinding {
    pub rule_key: String,
    #[serde(default)]
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default)]
    pub text_range: Option<TextRange>,
    /// Hash of the text covered by `text_range`
    #[serde(default)]
    pub range_hash: Option<String>,
    /// Hash of the full start line
    #[serde(default)]
    pub line_hash: Option<String>,
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[serde(default)]
    pub kind: FindingKind,
}

impl RawFinding {
    pub fn new(rule_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule_key: rule_key.into(),
            severity: IssueSeverity::default(),
            message: message.into(),
            text_range: None,
            range_hash: None,
            line_hash: None,
            flows: Vec::new(),
            kind: FindingKind::Issue,
        }
    }

    pub fn with_range(mut self, range: TextRange) -> Self {
        self.text_range = Some(range);
        self
    }

    pub fn with_kind(mut self, kind: FindingKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_flows(mut self, flows: Vec<Flow>) -> Self {
        self.flows = flows;
        self
    }

    /// Start line (1-based), if the finding has a location
    pub fn line(&self) -> Option<u32> {
        self.text_range.map(|r| r.start_line)
    }

    pub fn is_hotspot(&self) -> bool {
        self.kind == FindingKind::Hotspot
    }
}

/// Where a tracked finding's identity came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingOrigin {
    /// Not passed through a tracker; identity is fresh for this run
    Unreconciled,
    /// Matched to a finding known by the server
    ServerMatched { server_key: String },
    /// Known only locally (tracked across runs but absent on the server)
    LocalOnly,
}

/// A raw finding enriched with reconciliation metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFinding {
    pub id: Uuid,
    pub finding: RawFinding,
    /// Effective severity: server override when present, engine severity otherwise
    pub severity: IssueSeverity,
    pub origin: FindingOrigin,
    pub resolved: bool,
    pub on_new_code: bool,
    pub review_status: Option<HotspotReviewStatus>,
}

impl TrackedFinding {
    /// Wrap a raw finding that did not go through a tracker
    pub fn unreconciled(finding: RawFinding) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity: finding.severity,
            finding,
            origin: FindingOrigin::Unreconciled,
            resolved: false,
            on_new_code: true,
            review_status: None,
        }
    }

    /// Key used for cache entries and the diagnostic data payload
    pub fn entry_key(&self) -> String {
        self.id.to_string()
    }

    pub fn server_key(&self) -> Option<&str> {
        match &self.origin {
            FindingOrigin::ServerMatched { server_key } => Some(server_key),
            _ => None,
        }
    }

    pub fn is_reconciled(&self) -> bool {
        self.origin != FindingOrigin::Unreconciled
    }

    pub fn is_hotspot(&self) -> bool {
        self.finding.is_hotspot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_finding_deserializes_with_defaults() {
        let json = r#"{"ruleKey":"python:S1481","message":"Remove unused x"}"#;
        let finding: RawFinding = serde_json::from_str(json).unwrap();
        assert_eq!(finding.rule_key, "python:S1481");
        assert_eq!(finding.severity, IssueSeverity::Major);
        assert_eq!(finding.kind, FindingKind::Issue);
        assert!(finding.text_range.is_none());
        assert!(finding.flows.is_empty());
    }

    #[test]
    fn test_raw_finding_deserializes_range_and_kind() {
        let json = r#"{
            "ruleKey": "java:S4790",
            "severity": "CRITICAL",
            "message": "Weak hash",
            "kind": "hotspot",
            "textRange": {"startLine": 3, "startLineOffset": 4, "endLine": 3, "endLineOffset": 9}
        }"#;
        let finding: RawFinding = serde_json::from_str(json).unwrap();
        assert!(finding.is_hotspot());
        assert_eq!(finding.severity, IssueSeverity::Critical);
        assert_eq!(finding.line(), Some(3));
    }

    #[test]
    fn test_unreconciled_has_fresh_identity() {
        let raw = RawFinding::new("r", "m");
        let a = TrackedFinding::unreconciled(raw.clone());
        let b = TrackedFinding::unreconciled(raw);
        assert_ne!(a.id, b.id);
        assert!(!a.is_reconciled());
        assert!(a.server_key().is_none());
    }

    #[test]
    fn test_server_key_only_for_server_matched() {
        let mut tracked = TrackedFinding::unreconciled(RawFinding::new("r", "m"));
        tracked.origin = FindingOrigin::ServerMatched {
            server_key: "AX-1".to_string(),
        };
        assert_eq!(tracked.server_key(), Some("AX-1"));
        tracked.origin = FindingOrigin::LocalOnly;
        assert_eq!(tracked.server_key(), None);
        assert!(tracked.is_reconciled());
    }
}
