//
// analysis/scheduler.rs
//
// Entry point for every analysis trigger
//
// Open events are analyzed right away. Change and hotspot events only mark
// the file dirty; the watcher turns quiet files into batches. Everything
// funnels into one queue so the engine never runs twice at once.
//

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

use super::batch::AnalysisBatch;
use super::watcher::{DirtyFiles, EventWatcher};
use super::worker::{AnalysisHandle, AnalysisQueue, TaskRunner};
use crate::config::{FolderSettings, SchedulerConfig, WorkspaceSettings};
use crate::registry::{
    LanguageKind, NotebookRegistry, OpenFile, OpenFileRegistry, WorkspaceFolderRegistry,
};

/// Mode of the companion Java language server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMode {
    #[serde(rename = "LightWeight")]
    Lightweight,
    Hybrid,
    Standard,
}

pub struct AnalysisScheduler {
    dirty: Arc<DirtyFiles>,
    queue: Arc<AnalysisQueue>,
    watcher: Arc<EventWatcher>,
    files: Arc<dyn OpenFileRegistry>,
    notebooks: Arc<dyn NotebookRegistry>,
    folders: Arc<dyn WorkspaceFolderRegistry>,
    watcher_shutdown: CancellationToken,
    watcher_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisScheduler {
    /// Creates the scheduler and starts its analysis worker. The watcher
    /// loop starts with [`initialize`](Self::initialize).
    pub fn new(
        config: &SchedulerConfig,
        runner: Arc<dyn TaskRunner>,
        files: Arc<dyn OpenFileRegistry>,
        notebooks: Arc<dyn NotebookRegistry>,
        folders: Arc<dyn WorkspaceFolderRegistry>,
    ) -> Self {
        let dirty = Arc::new(DirtyFiles::new());
        let queue = Arc::new(AnalysisQueue::with_requeue(runner, dirty.clone()));
        let watcher = Arc::new(EventWatcher::new(
            dirty.clone(),
            files.clone(),
            notebooks.clone(),
            queue.clone(),
            config.quiet_period(),
            config.poll_interval(),
        ));
        Self {
            dirty,
            queue,
            watcher,
            files,
            notebooks,
            folders,
            watcher_shutdown: CancellationToken::new(),
            watcher_handle: Mutex::new(None),
        }
    }

    pub fn initialize(&self) {
        let Ok(mut handle) = self.watcher_handle.lock() else {
            return;
        };
        if handle.is_none() {
            *handle = Some(self.watcher.spawn(self.watcher_shutdown.clone()));
        }
    }

    /// Stop the watcher, drop pending dirty entries, cancel in-flight work
    /// and release the worker.
    pub async fn shutdown(&self) {
        self.watcher_shutdown.cancel();
        let handle = self.watcher_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("Analysis trigger watcher ended abnormally: {}", e);
            }
        }
        self.watcher.cancel_in_flight();
        self.queue.shutdown().await;
        // After the worker stopped, so nothing cancelled can be returned to it
        self.dirty.clear();
    }

    pub fn dirty_files(&self) -> &DirtyFiles {
        &self.dirty
    }

    /// Analyze a freshly opened file immediately, fetching server findings
    pub fn notify_opened(&self, file: OpenFile) -> AnalysisHandle {
        self.dirty.remove(&file.uri);
        self.analyze_async(AnalysisBatch::new([file]).with_fetch_server_findings())
    }

    pub fn notify_changed(&self, uri: &Url) {
        self.dirty.mark(uri.clone());
    }

    pub fn notify_hotspot_event(&self, uri: &Url) {
        self.dirty.mark(uri.clone());
    }

    pub fn notify_closed(&self, uri: &Url) {
        self.dirty.remove(uri);
    }

    pub fn analyze_async(&self, batch: AnalysisBatch) -> AnalysisHandle {
        self.queue.submit(batch)
    }

    /// Re-analyze open files whose workspace folder is `folder`; `None`
    /// selects files outside every folder.
    pub fn analyze_all_open_files_in_folder(&self, folder: Option<&Url>) -> AnalysisHandle {
        let files = self.open_files(|f| self.belongs_to_folder(folder, &f.uri));
        self.analyze_async(AnalysisBatch::new(files))
    }

    pub fn analyze_all_unbound_open_files(&self) -> AnalysisHandle {
        let files = self.open_files(|f| !self.folders.is_bound(&f.uri));
        self.analyze_async(AnalysisBatch::new(files))
    }

    pub fn analyze_all_open_notebooks(&self) -> AnalysisHandle {
        let mut notebooks = self.notebooks.all();
        notebooks.sort_by(|a, b| a.uri.cmp(&b.uri));
        self.analyze_async(AnalysisBatch::new(notebooks))
    }

    pub fn analyze_all_open_files_of_kind(&self, kind: &LanguageKind) -> AnalysisHandle {
        let files = self.open_files(|f| f.language == *kind);
        self.analyze_async(AnalysisBatch::new(files))
    }

    pub fn analyze_all_open_c_or_cpp_files_in_folder(&self, folder: Option<&Url>) -> AnalysisHandle {
        let files = self.open_files(|f| f.language.is_c_or_cpp() && self.belongs_to_folder(folder, &f.uri));
        self.analyze_async(AnalysisBatch::new(files))
    }

    pub fn scan_for_hotspots_in_files(&self, files: Vec<OpenFile>) -> AnalysisHandle {
        self.analyze_async(AnalysisBatch::new(files).with_hotspots_only().with_progress())
    }

    pub fn did_classpath_update(&self) -> AnalysisHandle {
        self.analyze_all_open_files_of_kind(&LanguageKind::Java)
    }

    pub fn did_server_mode_change(&self, mode: ServerMode) -> AnalysisHandle {
        if mode == ServerMode::Standard {
            self.analyze_all_open_files_of_kind(&LanguageKind::Java)
        } else {
            AnalysisHandle::completed()
        }
    }

    /// Re-analyze when the effective rule set changed. The initial load
    /// (`old` is `None`) is not a change.
    pub fn on_workspace_settings_change(&self, old: Option<&WorkspaceSettings>, new: &WorkspaceSettings) {
        let Some(old) = old else {
            return;
        };
        if old.rules_changed(new) {
            log::debug!("Rule configuration changed, re-analyzing open files");
            self.analyze_all_unbound_open_files();
            self.analyze_all_open_notebooks();
        }
    }

    pub fn on_folder_settings_change(
        &self,
        folder: Option<&Url>,
        old: Option<&FolderSettings>,
        new: &FolderSettings,
    ) {
        let Some(old) = old else {
            return;
        };
        if old.compile_commands_changed(new) {
            self.analyze_all_open_c_or_cpp_files_in_folder(folder);
        }
    }

    fn belongs_to_folder(&self, folder: Option<&Url>, uri: &Url) -> bool {
        self.folders.find_folder_for_file(uri).as_ref() == folder
    }

    fn open_files(&self, keep: impl Fn(&OpenFile) -> bool) -> Vec<OpenFile> {
        let mut files: Vec<OpenFile> = self.files.all().into_iter().filter(|f| keep(f)).collect();
        files.sort_by(|a, b| a.uri.cmp(&b.uri));
        files
    }
}
