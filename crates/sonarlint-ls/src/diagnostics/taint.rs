//
// diagnostics/taint.rs
//
// Taint vulnerabilities reported by the last server-side analysis
//

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Url};

use super::publisher::{message, to_range, DiagnosticData};
use crate::findings::{Flow, IssueSeverity, TextRange};

pub const SONARQUBE_TAINT_SOURCE: &str = "Latest SonarQube Analysis";
pub const SONARCLOUD_TAINT_SOURCE: &str = "Latest SonarCloud Analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerKind {
    #[default]
    SonarQube,
    SonarCloud,
}

impl ServerKind {
    pub fn source(&self) -> &'static str {
        match self {
            ServerKind::SonarQube => SONARQUBE_TAINT_SOURCE,
            ServerKind::SonarCloud => SONARCLOUD_TAINT_SOURCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaintVulnerability {
    pub key: String,
    pub rule_key: String,
    #[serde(default)]
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default)]
    pub text_range: Option<TextRange>,
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default = "default_true")]
    pub on_new_code: bool,
    #[serde(default)]
    pub server: ServerKind,
}

fn default_true() -> bool {
    true
}

/// Taint vulnerabilities per file, replaced wholesale when the server reports
#[derive(Debug, Default)]
pub struct TaintVulnerabilitiesCache {
    by_file: DashMap<Url, Vec<TaintVulnerability>>,
}

impl TaintVulnerabilitiesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, uri: Url, vulnerabilities: Vec<TaintVulnerability>) {
        self.by_file.insert(uri, vulnerabilities);
    }

    pub fn get(&self, uri: &Url) -> Vec<TaintVulnerability> {
        self.by_file.get(uri).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn clear(&self, uri: &Url) {
        self.by_file.remove(uri);
    }

    /// Unresolved vulnerabilities of `uri` as diagnostics
    pub fn get_as_diagnostics(&self, uri: &Url, focus_on_new_code: bool) -> Vec<Diagnostic> {
        let Some(vulnerabilities) = self.by_file.get(uri) else {
            return Vec::new();
        };
        vulnerabilities
            .iter()
            .filter(|v| !v.resolved)
            .map(|v| convert(v, focus_on_new_code))
            .collect()
    }
}

fn convert(taint: &TaintVulnerability, focus_on_new_code: bool) -> Diagnostic {
    let severity = if focus_on_new_code && !taint.on_new_code {
        DiagnosticSeverity::HINT
    } else {
        DiagnosticSeverity::WARNING
    };
    let data = DiagnosticData {
        entry_key: taint.key.clone(),
        server_issue_key: Some(taint.key.clone()),
        status: None,
    };
    Diagnostic {
        range: to_range(taint.text_range),
        severity: Some(severity),
        code: Some(NumberOrString::String(taint.rule_key.clone())),
        source: Some(taint.server.source().to_string()),
        message: message(&taint.message, &taint.flows, false),
        data: serde_json::to_value(data).ok(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> Url {
        Url::parse("file:///ws/app.java").unwrap()
    }

    fn taint(key: &str, line: u32) -> TaintVulnerability {
        TaintVulnerability {
            key: key.to_string(),
            rule_key: "javasecurity:S3649".to_string(),
            severity: IssueSeverity::Blocker,
            message: "SQL injection".to_string(),
            text_range: Some(TextRange::new(line, 2, line, 10)),
            flows: Vec::new(),
            resolved: false,
            on_new_code: true,
            server: ServerKind::SonarQube,
        }
    }

    #[test]
    fn test_resolved_taints_are_hidden() {
        let cache = TaintVulnerabilitiesCache::new();
        let mut resolved = taint("AX-2", 4);
        resolved.resolved = true;
        cache.put(uri(), vec![taint("AX-1", 3), resolved]);

        let diagnostics = cache.get_as_diagnostics(&uri(), false);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].range.start.line, 2);
        assert_eq!(diagnostics[0].source.as_deref(), Some(SONARQUBE_TAINT_SOURCE));
    }

    #[test]
    fn test_source_follows_server_kind() {
        let cache = TaintVulnerabilitiesCache::new();
        let mut cloud = taint("AX-1", 1);
        cloud.server = ServerKind::SonarCloud;
        cloud.on_new_code = false;
        cache.put(uri(), vec![cloud]);

        let diagnostics = cache.get_as_diagnostics(&uri(), true);
        assert_eq!(diagnostics[0].source.as_deref(), Some(SONARCLOUD_TAINT_SOURCE));
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::HINT));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{"key":"AX-9","ruleKey":"r","message":"m"}"#;
        let t: TaintVulnerability = serde_json::from_str(json).unwrap();
        assert!(t.on_new_code);
        assert!(!t.resolved);
        assert_eq!(t.server, ServerKind::SonarQube);
    }

    #[test]
    fn test_clear() {
        let cache = TaintVulnerabilitiesCache::new();
        cache.put(uri(), vec![taint("AX-1", 1)]);
        cache.clear(&uri());
        assert!(cache.get(&uri()).is_empty());
        assert!(cache.get_as_diagnostics(&uri(), false).is_empty());
    }
}
