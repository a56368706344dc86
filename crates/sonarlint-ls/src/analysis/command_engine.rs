//
// analysis/command_engine.rs
//
// Analysis engine backed by an external analyzer process
//
// The configured command is run with the batch's file paths appended. It
// prints one JSON finding per line on stdout:
//
//   {"file": "/abs/path.py", "ruleKey": "python:S1481", "message": "...",
//    "textRange": {"startLine": 3, ...}, "kind": "issue"}
//
// `uri` may be given instead of `file`. With a single-file batch both may be
// omitted.
//

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

use super::engine::{AnalysisEngine, FindingListener};
use crate::config::{AnalyzerSettings, WorkspaceSettings};
use crate::findings::RawFinding;
use crate::registry::OpenFile;

#[derive(Debug, Deserialize)]
struct FindingLine {
    #[serde(default)]
    uri: Option<Url>,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(flatten)]
    finding: RawFinding,
}

#[derive(Debug, Default)]
struct EngineSettings {
    analyzer: AnalyzerSettings,
    excluded_rules: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct CommandEngine {
    settings: RwLock<EngineSettings>,
}

impl CommandEngine {
    pub fn new(analyzer: AnalyzerSettings) -> Self {
        Self {
            settings: RwLock::new(EngineSettings {
                analyzer,
                excluded_rules: BTreeSet::new(),
            }),
        }
    }

    /// Pick up analyzer command and rule exclusions from new settings
    pub fn update(&self, settings: &WorkspaceSettings) {
        if let Ok(mut current) = self.settings.write() {
            current.analyzer = settings.analyzer.clone();
            current.excluded_rules = settings.excluded_rules.clone();
        }
    }

    fn snapshot(&self) -> (AnalyzerSettings, BTreeSet<String>) {
        self.settings
            .read()
            .map(|s| (s.analyzer.clone(), s.excluded_rules.clone()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl AnalysisEngine for CommandEngine {
    async fn analyze(
        &self,
        files: &[OpenFile],
        listener: FindingListener,
        token: CancellationToken,
    ) -> Result<()> {
        let (analyzer, excluded_rules) = self.snapshot();
        let Some(program) = analyzer.command.clone() else {
            log::debug!("No analyzer command configured, skipping {} files", files.len());
            return Ok(());
        };

        let paths: Vec<PathBuf> = files
            .iter()
            .filter_map(|f| f.uri.to_file_path().ok())
            .collect();
        if paths.is_empty() {
            return Ok(());
        }

        let mut cmd = Command::new(&program);
        cmd.args(&analyzer.args)
            .args(&paths)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn analyzer {}", program.display()))?;

        let timeout = analyzer.timeout();
        let output = tokio::select! {
            _ = token.cancelled() => {
                return Err(anyhow!("Analyzer run cancelled"));
            }
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(result) => result.context("Failed to run analyzer")?,
                Err(_) => return Err(anyhow!("Analyzer timed out after {timeout:?}")),
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Analyzer failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let single = match files {
            [only] => Some(&only.uri),
            _ => None,
        };
        for (n, line) in stdout.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: FindingLine = match serde_json::from_str(line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("Ignoring malformed analyzer output on line {}: {}", n + 1, e);
                    continue;
                }
            };
            if excluded_rules.contains(&parsed.finding.rule_key) {
                continue;
            }
            let uri = match (parsed.uri, parsed.file) {
                (Some(uri), _) => Some(uri),
                (None, Some(path)) => Url::from_file_path(&path).ok(),
                (None, None) => single.cloned(),
            };
            match uri {
                Some(uri) => listener.handle(uri, parsed.finding),
                None => log::warn!("Analyzer finding on line {} has no file, ignored", n + 1),
            }
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::analysis::engine::finding_channel;
    use crate::registry::LanguageKind;

    fn sh(script: &str) -> AnalyzerSettings {
        AnalyzerSettings {
            command: Some(PathBuf::from("sh")),
            args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            timeout_ms: 5_000,
        }
    }

    fn open_file(dir: &tempfile::TempDir, name: &str) -> OpenFile {
        let path = dir.path().join(name);
        std::fs::write(&path, "x = 1\n").unwrap();
        OpenFile::new(Url::from_file_path(&path).unwrap(), 1, LanguageKind::Python, "x = 1\n")
    }

    async fn collect(engine: &CommandEngine, files: &[OpenFile]) -> Result<Vec<(Url, RawFinding)>> {
        let (listener, mut rx) = finding_channel();
        engine.analyze(files, listener, CancellationToken::new()).await?;
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_parses_findings_for_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_file(&dir, "a.py");
        let engine = CommandEngine::new(sh(
            r#"echo '{"ruleKey":"python:S1481","message":"Remove x","textRange":{"startLine":1,"startLineOffset":0,"endLine":1,"endLineOffset":1}}'"#,
        ));

        let found = collect(&engine, &[file.clone()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, file.uri);
        assert_eq!(found[0].1.rule_key, "python:S1481");
        assert_eq!(found[0].1.line(), Some(1));
    }

    #[tokio::test]
    async fn test_routes_by_file_path_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let a = open_file(&dir, "a.py");
        let b = open_file(&dir, "b.py");
        let script = r#"for f in "$@"; do printf '{"file":"%s","ruleKey":"r","message":"m"}\n' "$f"; done; echo 'not json'"#;
        let engine = CommandEngine::new(sh(script));

        let found = collect(&engine, &[a.clone(), b.clone()]).await.unwrap();
        let uris: Vec<Url> = found.into_iter().map(|(u, _)| u).collect();
        assert_eq!(uris, vec![a.uri, b.uri]);
    }

    #[tokio::test]
    async fn test_excluded_rules_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_file(&dir, "a.py");
        let engine = CommandEngine::new(AnalyzerSettings::default());
        let mut settings = WorkspaceSettings::default();
        settings.analyzer = sh(r#"echo '{"ruleKey":"off:rule","message":"m"}'; echo '{"ruleKey":"on:rule","message":"m"}'"#);
        settings.excluded_rules.insert("off:rule".to_string());
        engine.update(&settings);

        let found = collect(&engine, &[file]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.rule_key, "on:rule");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_file(&dir, "a.py");
        let engine = CommandEngine::new(sh("echo boom >&2; exit 3"));
        let err = collect(&engine, &[file]).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_file(&dir, "a.py");
        let mut settings = sh("sleep 5");
        settings.timeout_ms = 50;
        let engine = CommandEngine::new(settings);
        let err = collect(&engine, &[file]).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_file(&dir, "a.py");
        let engine = CommandEngine::new(sh("sleep 5"));
        let (listener, _rx) = finding_channel();
        let token = CancellationToken::new();
        token.cancel();
        let err = engine.analyze(&[file], listener, token).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_missing_command_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_file(&dir, "a.py");
        let engine = CommandEngine::default();
        assert!(collect(&engine, &[file]).await.unwrap().is_empty());
    }
}
