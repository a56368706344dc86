//
// config.rs
//
// Scheduler timing, analyzer command and client settings
//

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Timing knobs for the debounce watcher and the tracking collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Minimum idle time after the last change before a file is analyzed
    pub quiet_period_ms: u64,
    /// Watcher wake-up period
    pub poll_interval_ms: u64,
    /// Upper bound on a single tracking-service call
    pub tracking_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 2000,
            poll_interval_ms: 200,
            tracking_timeout_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tracking_timeout(&self) -> Duration {
        Duration::from_millis(self.tracking_timeout_ms)
    }
}

/// External analyzer process settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerSettings {
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_ms: 60_000,
        }
    }
}

impl AnalyzerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Connected-mode binding of a folder to a remote project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBinding {
    pub connection_id: String,
    pub project_key: String,
}

/// Workspace-wide settings from the `sonarlint` configuration section
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceSettings {
    pub excluded_rules: BTreeSet<String>,
    pub included_rules: BTreeSet<String>,
    pub rule_parameters: BTreeMap<String, BTreeMap<String, String>>,
    pub focus_on_new_code: bool,
    pub show_secondary_locations: bool,
    pub analyzer: AnalyzerSettings,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            excluded_rules: BTreeSet::new(),
            included_rules: BTreeSet::new(),
            rule_parameters: BTreeMap::new(),
            focus_on_new_code: false,
            show_secondary_locations: true,
            analyzer: AnalyzerSettings::default(),
        }
    }
}

impl WorkspaceSettings {
    /// Whether the effective rule set changed, which invalidates previous results
    pub fn rules_changed(&self, other: &Self) -> bool {
        self.excluded_rules != other.excluded_rules
            || self.included_rules != other.included_rules
            || self.rule_parameters != other.rule_parameters
    }
}

/// Per-folder settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderSettings {
    pub path_to_compile_commands: Option<String>,
    pub project_binding: Option<ProjectBinding>,
}

impl FolderSettings {
    pub fn compile_commands_changed(&self, other: &Self) -> bool {
        self.path_to_compile_commands != other.path_to_compile_commands
    }
}

/// Parse workspace settings from the client configuration payload.
///
/// Reads the `sonarlint` section; absent fields keep their defaults. Returns
/// `None` when the section is missing.
///
/// ```
/// use serde_json::json;
/// let settings = json!({
///     "sonarlint": {
///         "rules": { "python:S1481": { "level": "off" } },
///         "focusOnNewCode": true,
///         "analyzer": { "command": "/usr/bin/analyzer", "args": ["--json"] }
///     }
/// });
/// let cfg = sonarlint_ls::config::parse_workspace_settings(&settings).unwrap();
/// assert!(cfg.excluded_rules.contains("python:S1481"));
/// assert!(cfg.focus_on_new_code);
/// ```
pub fn parse_workspace_settings(settings: &serde_json::Value) -> Option<WorkspaceSettings> {
    let section = settings.get("sonarlint")?;
    let mut config = WorkspaceSettings::default();

    if let Some(rules) = section.get("rules").and_then(|v| v.as_object()) {
        for (key, rule) in rules {
            match rule.get("level").and_then(|v| v.as_str()) {
                Some("off") => {
                    config.excluded_rules.insert(key.clone());
                }
                Some("on") => {
                    config.included_rules.insert(key.clone());
                }
                _ => {}
            }
            if let Some(params) = rule.get("parameters").and_then(|v| v.as_object()) {
                let params: BTreeMap<String, String> = params
                    .iter()
                    .map(|(k, v)| {
                        let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                        (k.clone(), value)
                    })
                    .collect();
                config.rule_parameters.insert(key.clone(), params);
            }
        }
    }
    if let Some(v) = section.get("focusOnNewCode").and_then(|v| v.as_bool()) {
        config.focus_on_new_code = v;
    }
    if let Some(v) = section.get("showSecondaryLocations").and_then(|v| v.as_bool()) {
        config.show_secondary_locations = v;
    }

    if let Some(analyzer) = section.get("analyzer") {
        if let Some(v) = analyzer.get("command").and_then(|v| v.as_str()) {
            if !v.is_empty() {
                config.analyzer.command = Some(PathBuf::from(v));
            }
        }
        if let Some(args) = analyzer.get("args").and_then(|v| v.as_array()) {
            config.analyzer.args = args
                .iter()
                .filter_map(|a| a.as_str().map(str::to_string))
                .collect();
        }
        if let Some(v) = analyzer.get("timeoutMs").and_then(|v| v.as_u64()) {
            config.analyzer.timeout_ms = v;
        }
    }

    log::trace!(
        "Parsed settings: {} excluded rules, {} included rules, focus_on_new_code={}",
        config.excluded_rules.len(),
        config.included_rules.len(),
        config.focus_on_new_code
    );

    Some(config)
}

/// Parse folder-level settings from the same `sonarlint` section.
pub fn parse_folder_settings(settings: &serde_json::Value) -> FolderSettings {
    let mut folder = FolderSettings::default();
    let Some(section) = settings.get("sonarlint") else {
        return folder;
    };

    if let Some(v) = section.get("pathToCompileCommands").and_then(|v| v.as_str()) {
        folder.path_to_compile_commands = Some(v.to_string());
    }
    if let Some(project) = section.get("connectedMode").and_then(|v| v.get("project")) {
        let connection_id = project.get("connectionId").and_then(|v| v.as_str());
        let project_key = project.get("projectKey").and_then(|v| v.as_str());
        if let (Some(connection_id), Some(project_key)) = (connection_id, project_key) {
            folder.project_binding = Some(ProjectBinding {
                connection_id: connection_id.to_string(),
                project_key: project_key.to_string(),
            });
        }
    }
    folder
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.quiet_period(), Duration::from_millis(2000));
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.tracking_timeout_ms, 10_000);
    }

    #[test]
    fn test_missing_section() {
        assert!(parse_workspace_settings(&json!({"other": {}})).is_none());
        assert_eq!(parse_folder_settings(&json!({})), FolderSettings::default());
    }

    #[test]
    fn test_parse_rules() {
        let settings = json!({
            "sonarlint": {
                "rules": {
                    "python:S1481": { "level": "off" },
                    "python:S107": { "level": "on", "parameters": { "max": 5, "name": "x" } }
                }
            }
        });
        let cfg = parse_workspace_settings(&settings).unwrap();
        assert!(cfg.excluded_rules.contains("python:S1481"));
        assert!(cfg.included_rules.contains("python:S107"));
        let params = &cfg.rule_parameters["python:S107"];
        assert_eq!(params["max"], "5");
        assert_eq!(params["name"], "x");
        assert!(cfg.show_secondary_locations);
    }

    #[test]
    fn test_parse_analyzer() {
        let settings = json!({
            "sonarlint": {
                "analyzer": { "command": "/opt/analyzer", "args": ["--json", 3], "timeoutMs": 500 }
            }
        });
        let cfg = parse_workspace_settings(&settings).unwrap();
        assert_eq!(cfg.analyzer.command, Some(PathBuf::from("/opt/analyzer")));
        assert_eq!(cfg.analyzer.args, vec!["--json".to_string()]);
        assert_eq!(cfg.analyzer.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_rules_changed() {
        let a = WorkspaceSettings::default();
        let mut b = WorkspaceSettings::default();
        assert!(!a.rules_changed(&b));

        b.focus_on_new_code = true;
        assert!(!a.rules_changed(&b));

        b.excluded_rules.insert("java:S100".to_string());
        assert!(a.rules_changed(&b));

        let mut c = WorkspaceSettings::default();
        c.rule_parameters
            .insert("java:S100".to_string(), BTreeMap::from([("format".to_string(), "x".to_string())]));
        assert!(a.rules_changed(&c));
    }

    #[test]
    fn test_parse_folder_settings() {
        let settings = json!({
            "sonarlint": {
                "pathToCompileCommands": "/ws/build/compile_commands.json",
                "connectedMode": { "project": { "connectionId": "sq", "projectKey": "my-proj" } }
            }
        });
        let folder = parse_folder_settings(&settings);
        assert_eq!(
            folder.path_to_compile_commands.as_deref(),
            Some("/ws/build/compile_commands.json")
        );
        assert_eq!(folder.project_binding.unwrap().project_key, "my-proj");
    }

    #[test]
    fn test_compile_commands_changed() {
        let a = FolderSettings::default();
        let b = FolderSettings {
            path_to_compile_commands: Some("cc.json".to_string()),
            project_binding: None,
        };
        assert!(a.compile_commands_changed(&b));
        assert!(!b.compile_commands_changed(&b.clone()));
    }
}
