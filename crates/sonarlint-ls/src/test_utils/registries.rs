//
// test_utils/registries.rs
//
// In-memory editor state with direct setters
//

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tower_lsp::lsp_types::Url;

use crate::registry::{
    LanguageKind, NotebookRegistry, OpenFile, OpenFileRegistry, WorkspaceFolderRegistry,
};
use crate::uri;

fn url(s: &str) -> Url {
    Url::parse(s).expect("valid test uri")
}

#[derive(Debug, Default)]
pub struct StaticFiles {
    files: DashMap<Url, OpenFile>,
    notebooks: DashMap<Url, OpenFile>,
}

impl StaticFiles {
    /// Python files at version 1 with empty content
    pub fn with_files(uris: &[&str]) -> Arc<Self> {
        let files = Self::default();
        for uri in uris {
            files.open(uri, LanguageKind::Python);
        }
        Arc::new(files)
    }

    pub fn open(&self, uri: &str, language: LanguageKind) -> OpenFile {
        let file = OpenFile::new(url(uri), 1, language, "");
        self.files.insert(file.uri.clone(), file.clone());
        file
    }

    /// Snapshot of an open file; panics if it was never opened
    pub fn file(&self, uri: &str) -> OpenFile {
        self.files
            .get(&url(uri))
            .map(|f| f.clone())
            .unwrap_or_else(|| panic!("{} is not open", uri))
    }

    pub fn set_content(&self, uri: &str, content: &str) {
        if let Some(mut file) = self.files.get_mut(&url(uri)) {
            file.content = content.into();
        }
    }

    pub fn set_version(&self, uri: &Url, version: i32) {
        if let Some(mut file) = self.files.get_mut(uri) {
            file.version = version;
        }
        if let Some(mut notebook) = self.notebooks.get_mut(uri) {
            notebook.version = version;
        }
    }

    pub fn add_notebook(&self, uri: &str) -> OpenFile {
        let notebook = OpenFile::new(url(uri), 1, LanguageKind::Notebook, "");
        self.notebooks.insert(notebook.uri.clone(), notebook.clone());
        notebook
    }

    pub fn close(&self, uri: &Url) {
        self.files.remove(uri);
        self.notebooks.remove(uri);
    }
}

impl OpenFileRegistry for StaticFiles {
    fn get(&self, uri: &Url) -> Option<OpenFile> {
        self.files.get(uri).map(|f| f.clone())
    }

    fn all(&self) -> Vec<OpenFile> {
        self.files.iter().map(|f| f.value().clone()).collect()
    }
}

impl NotebookRegistry for StaticFiles {
    fn get(&self, uri: &Url) -> Option<OpenFile> {
        self.notebooks.get(uri).map(|f| f.clone())
    }

    fn all(&self) -> Vec<OpenFile> {
        self.notebooks.iter().map(|f| f.value().clone()).collect()
    }

    fn is_notebook(&self, uri: &Url) -> bool {
        uri::is_notebook_cell(uri) || self.notebooks.contains_key(uri)
    }
}

#[derive(Debug, Default)]
pub struct StaticFolders {
    folders: Vec<Url>,
    bound: Mutex<HashSet<Url>>,
}

impl StaticFolders {
    pub fn new(folders: Vec<Url>) -> Self {
        Self {
            folders,
            bound: Mutex::new(HashSet::new()),
        }
    }

    /// Mark `folder` as bound to a remote project
    pub fn with_binding(self, folder: Url) -> Self {
        self.bound.lock().unwrap().insert(folder);
        self
    }
}

impl WorkspaceFolderRegistry for StaticFolders {
    fn find_folder_for_file(&self, uri: &Url) -> Option<Url> {
        self.folders
            .iter()
            .filter(|folder| uri::relative_path(folder, uri).is_some())
            .max_by_key(|folder| folder.path().len())
            .cloned()
    }

    fn is_bound(&self, uri: &Url) -> bool {
        self.find_folder_for_file(uri)
            .map(|folder| self.bound.lock().unwrap().contains(&folder))
            .unwrap_or(false)
    }
}
