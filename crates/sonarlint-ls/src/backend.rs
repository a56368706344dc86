//
// backend.rs
//
// tower-lsp front end wiring the editor to the analysis scheduler
//

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::analysis::{
    AnalysisBatch, AnalysisScheduler, AnalysisTaskExecutor, CommandEngine, ServerMode,
};
use crate::config::{
    parse_folder_settings, parse_workspace_settings, FolderSettings, SchedulerConfig,
    WorkspaceSettings,
};
use crate::diagnostics::{
    AnalysisProgress, DiagnosticPublisher, DiagnosticsSink, TaintVulnerabilitiesCache,
    TaintVulnerability,
};
use crate::findings::{FindingCache, IssueReconciler, LocalIssueTracker, ResolutionStatus};
use crate::registry::{
    LanguageKind, OpenFile, OpenFileRegistry, OpenFiles, OpenNotebooks, WorkspaceFolderRegistry,
    WorkspaceFolders,
};
use crate::uri;

enum PublishSecurityHotspots {}

impl Notification for PublishSecurityHotspots {
    type Params = PublishDiagnosticsParams;
    const METHOD: &'static str = "sonarlint/publishSecurityHotspots";
}

enum ShowFirstSecretNotification {}

impl Notification for ShowFirstSecretNotification {
    type Params = ();
    const METHOD: &'static str = "sonarlint/showNotificationForFirstSecretsIssue";
}

/// Sends analysis results to the editor
struct LspDiagnosticsSink {
    client: Client,
}

#[tower_lsp::async_trait]
impl DiagnosticsSink for LspDiagnosticsSink {
    async fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: Option<i32>) {
        self.client.publish_diagnostics(uri, diagnostics, version).await;
    }

    async fn publish_security_hotspots(&self, uri: Url, hotspots: Vec<Diagnostic>) {
        self.client
            .send_notification::<PublishSecurityHotspots>(PublishDiagnosticsParams {
                uri,
                diagnostics: hotspots,
                version: None,
            })
            .await;
    }

    async fn show_first_secret_detection_notification(&self) {
        self.client
            .send_notification::<ShowFirstSecretNotification>(())
            .await;
    }

    async fn report_progress(&self, token: &str, progress: AnalysisProgress) {
        let token = NumberOrString::String(token.to_string());
        let value = match progress {
            AnalysisProgress::Begin { total } => {
                let created = self
                    .client
                    .send_request::<request::WorkDoneProgressCreate>(WorkDoneProgressCreateParams {
                        token: token.clone(),
                    })
                    .await;
                if let Err(e) = created {
                    log::debug!("Client did not accept progress token: {}", e);
                }
                WorkDoneProgress::Begin(WorkDoneProgressBegin {
                    title: "SonarLint".to_string(),
                    cancellable: Some(false),
                    message: Some(format!("Analyzing {} files", total)),
                    percentage: Some(0),
                })
            }
            AnalysisProgress::Report { analyzed, total } => {
                let percentage = if total == 0 { 100 } else { analyzed * 100 / total };
                WorkDoneProgress::Report(WorkDoneProgressReport {
                    cancellable: Some(false),
                    message: Some(format!("{}/{} files", analyzed, total)),
                    percentage: Some(percentage as u32),
                })
            }
            AnalysisProgress::End => WorkDoneProgress::End(WorkDoneProgressEnd { message: None }),
        };
        self.client
            .send_notification::<notification::Progress>(ProgressParams {
                token,
                value: ProgressParamsValue::WorkDone(value),
            })
            .await;
    }
}

#[derive(Debug, Deserialize)]
struct UriParams {
    uri: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClasspathUpdateParams {
    project_uri: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerModeChangeParams {
    server_mode: ServerMode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanFolderForHotspotsParams {
    folder_uri: Url,
    documents: Vec<TextDocumentItem>,
}

#[derive(Debug, Deserialize)]
struct NotebookParams {
    uri: Url,
    version: i32,
    text: String,
}

#[derive(Debug, Deserialize)]
struct TaintVulnerabilitiesParams {
    uri: Url,
    vulnerabilities: Vec<TaintVulnerability>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeIssueStatusParams {
    file_uri: Url,
    issue_id: String,
    new_status: Option<ResolutionStatus>,
}

pub struct Backend {
    files: Arc<OpenFiles>,
    notebooks: Arc<OpenNotebooks>,
    folders: Arc<WorkspaceFolders>,
    issues: Arc<FindingCache>,
    hotspots: Arc<FindingCache>,
    taint: Arc<TaintVulnerabilitiesCache>,
    engine: Arc<CommandEngine>,
    tracker: Arc<LocalIssueTracker>,
    publisher: Arc<DiagnosticPublisher>,
    scheduler: AnalysisScheduler,
    settings: RwLock<Option<WorkspaceSettings>>,
    folder_settings: RwLock<HashMap<Option<Url>, FolderSettings>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        let config = SchedulerConfig::default();
        let files = Arc::new(OpenFiles::new());
        let notebooks = Arc::new(OpenNotebooks::new());
        let folders = Arc::new(WorkspaceFolders::new());
        let issues = Arc::new(FindingCache::new());
        let hotspots = Arc::new(FindingCache::new());
        let taint = Arc::new(TaintVulnerabilitiesCache::new());
        let sink: Arc<dyn DiagnosticsSink> = Arc::new(LspDiagnosticsSink { client });

        let publisher = Arc::new(DiagnosticPublisher::new(
            sink.clone(),
            issues.clone(),
            hotspots.clone(),
            taint.clone(),
            files.clone(),
            notebooks.clone(),
        ));
        let engine = Arc::new(CommandEngine::default());
        let tracker = Arc::new(LocalIssueTracker::new());
        let reconciler = Arc::new(IssueReconciler::new(
            tracker.clone(),
            folders.clone(),
            config.tracking_timeout(),
        ));
        let executor = Arc::new(AnalysisTaskExecutor::new(
            engine.clone(),
            Some(reconciler),
            issues.clone(),
            hotspots.clone(),
            publisher.clone(),
            sink,
        ));
        let scheduler = AnalysisScheduler::new(
            &config,
            executor,
            files.clone(),
            notebooks.clone(),
            folders.clone(),
        );

        Self {
            files,
            notebooks,
            folders,
            issues,
            hotspots,
            taint,
            engine,
            tracker,
            publisher,
            scheduler,
            settings: RwLock::new(None),
            folder_settings: RwLock::new(HashMap::new()),
        }
    }

    async fn forget_file(&self, uri: &Url) {
        self.scheduler.notify_closed(uri);
        self.publisher.forget(uri);
        self.publisher.publish_empty(uri).await;
    }

    /// Drop results cached for an earlier lifetime of `uri`, such as a
    /// hotspot scan made while it was closed
    fn start_fresh(&self, uri: &Url) {
        self.issues.clear(uri);
        self.hotspots.clear(uri);
    }

    async fn apply_folder_settings(&self, settings: &serde_json::Value) {
        let new = parse_folder_settings(settings);
        let mut targets: Vec<Option<Url>> = self.folders.all().into_iter().map(Some).collect();
        if targets.is_empty() {
            targets.push(None);
        }

        let mut known = self.folder_settings.write().await;
        for folder in targets {
            if let Some(folder) = &folder {
                self.folders.set_binding(folder, new.project_binding.clone());
            }
            let old = known.insert(folder.clone(), new.clone());
            self.scheduler
                .on_folder_settings_change(folder.as_ref(), old.as_ref(), &new);
        }
    }

    async fn handle_hotspot_event(&self, params: UriParams) {
        log::trace!("Hotspot event for {}", params.uri);
        self.scheduler.notify_hotspot_event(&params.uri);
    }

    async fn handle_classpath_update(&self, params: ClasspathUpdateParams) {
        log::debug!("Classpath changed for project {}", params.project_uri);
        self.scheduler.did_classpath_update();
    }

    async fn handle_server_mode_change(&self, params: ServerModeChangeParams) {
        log::debug!("Java server mode changed to {:?}", params.server_mode);
        self.scheduler.did_server_mode_change(params.server_mode);
    }

    async fn handle_scan_for_hotspots(&self, params: ScanFolderForHotspotsParams) {
        log::info!(
            "Scanning {} files in {} for hotspots",
            params.documents.len(),
            params.folder_uri
        );
        let files = params
            .documents
            .into_iter()
            .map(|doc| {
                OpenFile::new(
                    doc.uri,
                    doc.version,
                    LanguageKind::from_language_id(&doc.language_id),
                    doc.text,
                )
            })
            .collect();
        self.scheduler.scan_for_hotspots_in_files(files);
    }

    async fn handle_notebook_open(&self, params: NotebookParams) {
        let notebook = self.notebooks.open(params.uri, params.version, params.text);
        self.start_fresh(&notebook.uri);
        self.scheduler.notify_opened(notebook);
    }

    async fn handle_notebook_close(&self, params: UriParams) {
        self.notebooks.close(&params.uri);
        self.forget_file(&params.uri).await;
    }

    async fn handle_taint_vulnerabilities(&self, params: TaintVulnerabilitiesParams) {
        log::debug!(
            "Received {} taint vulnerabilities for {}",
            params.vulnerabilities.len(),
            params.uri
        );
        self.taint.put(params.uri.clone(), params.vulnerabilities);
        self.publisher.publish(&params.uri, false).await;
    }

    async fn handle_change_issue_status(&self, params: ChangeIssueStatusParams) {
        let Some(tracked) = self
            .issues
            .find(&params.file_uri, &params.issue_id)
            .or_else(|| self.hotspots.find(&params.file_uri, &params.issue_id))
        else {
            log::warn!("Ignoring status change for unknown issue '{}'", params.issue_id);
            return;
        };
        self.tracker.set_resolution(tracked.id, params.new_status);
        if let Some(file) = self.files.get(&params.file_uri) {
            self.scheduler.analyze_async(AnalysisBatch::new([file]));
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing sonarlint-ls");

        if let Some(folders) = params.workspace_folders {
            for folder in folders {
                log::info!("Adding workspace folder: {}", folder.uri);
                self.folders.add(folder.uri);
            }
        } else if let Some(root_uri) = params.root_uri {
            log::info!("Adding root URI as workspace folder: {}", root_uri);
            self.folders.add(root_uri);
        }

        let first_secret_detected = params
            .initialization_options
            .as_ref()
            .and_then(|o| o.get("firstSecretDetected"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        self.publisher.initialize(first_secret_detected);

        if let Some(options) = &params.initialization_options {
            if let Some(settings) = parse_workspace_settings(options) {
                self.engine.update(&settings);
                self.publisher.set_focus_on_new_code(settings.focus_on_new_code);
                self.publisher
                    .set_show_secondary_locations(settings.show_secondary_locations);
                *self.settings.write().await = Some(settings);
            }
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                workspace: Some(WorkspaceServerCapabilities {
                    workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                        supported: Some(true),
                        change_notifications: Some(OneOf::Left(true)),
                    }),
                    file_operations: Some(WorkspaceFileOperationsServerCapabilities {
                        did_delete: Some(FileOperationRegistrationOptions {
                            filters: vec![FileOperationFilter {
                                scheme: Some("file".to_string()),
                                pattern: FileOperationPattern {
                                    glob: "**/*".to_string(),
                                    matches: Some(FileOperationPatternKind::File),
                                    options: None,
                                },
                            }],
                        }),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("sonarlint-ls"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("sonarlint-ls initialized");
        self.scheduler.initialize();
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("Shutting down sonarlint-ls");
        self.scheduler.shutdown().await;
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        let file = self
            .files
            .open(doc.uri, &doc.language_id, doc.version, doc.text);
        self.start_fresh(&file.uri);
        self.scheduler.notify_opened(file);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        // Full sync: the last change carries the whole document
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        if self
            .files
            .change(&uri, params.text_document.version, change.text)
            .is_some()
        {
            self.scheduler.notify_changed(&uri);
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.files.close(&uri);
        self.forget_file(&uri).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        log::trace!("Configuration changed");

        let Some(new) = parse_workspace_settings(&params.settings) else {
            log::warn!("Configuration change without a 'sonarlint' section, keeping current settings");
            return;
        };

        self.engine.update(&new);
        self.publisher.set_focus_on_new_code(new.focus_on_new_code);
        self.publisher
            .set_show_secondary_locations(new.show_secondary_locations);

        let old = self.settings.write().await.replace(new.clone());
        self.scheduler
            .on_workspace_settings_change(old.as_ref(), &new);
        self.apply_folder_settings(&params.settings).await;
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        for folder in params.event.removed {
            log::info!("Removing workspace folder: {}", folder.uri);
            self.folders.remove(&folder.uri);
            self.publisher.forget_folder(&folder.uri);
            self.folder_settings.write().await.remove(&Some(folder.uri));
        }
        for folder in params.event.added {
            log::info!("Adding workspace folder: {}", folder.uri);
            self.folders.add(folder.uri);
        }
    }

    async fn did_delete_files(&self, params: DeleteFilesParams) {
        for file in params.files {
            let Ok(uri) = Url::parse(&file.uri) else {
                continue;
            };
            self.publisher.forget(&uri);
            self.publisher.publish_empty(&uri).await;
            let Some(folder) = self.folders.find_folder_for_file(&uri) else {
                continue;
            };
            if let Some(path) = uri::relative_path(&folder, &uri) {
                log::trace!("Forgetting tracked findings of deleted file {}", uri);
                self.tracker.forget(&folder, &path);
            }
        }
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::build(Backend::new)
        .custom_method("sonarlint/didReceiveHotspotEvent", Backend::handle_hotspot_event)
        .custom_method("sonarlint/didClasspathUpdate", Backend::handle_classpath_update)
        .custom_method(
            "sonarlint/didJavaServerModeChange",
            Backend::handle_server_mode_change,
        )
        .custom_method(
            "sonarlint/scanFolderForHotspots",
            Backend::handle_scan_for_hotspots,
        )
        .custom_method("sonarlint/didOpenNotebook", Backend::handle_notebook_open)
        .custom_method("sonarlint/didCloseNotebook", Backend::handle_notebook_close)
        .custom_method(
            "sonarlint/didReceiveTaintVulnerabilities",
            Backend::handle_taint_vulnerabilities,
        )
        .custom_method(
            "sonarlint/changeIssueStatus",
            Backend::handle_change_issue_status,
        )
        .finish();
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}
