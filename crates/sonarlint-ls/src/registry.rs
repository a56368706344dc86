//
// registry.rs
//
// Open-file, open-notebook and workspace-folder registries
//
// The scheduler and publisher only see these through the traits below; the
// in-memory implementations are what the language server wires in.
//

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tower_lsp::lsp_types::Url;

use crate::config::ProjectBinding;
use crate::uri;

/// Language of an open document, derived from the editor's language id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LanguageKind {
    Java,
    C,
    Cpp,
    Python,
    JavaScript,
    TypeScript,
    Notebook,
    Other(String),
}

impl LanguageKind {
    pub fn from_language_id(id: &str) -> Self {
        match id {
            "java" => LanguageKind::Java,
            "c" => LanguageKind::C,
            "cpp" | "c++" | "objective-c" | "objective-cpp" => LanguageKind::Cpp,
            "python" => LanguageKind::Python,
            "javascript" | "javascriptreact" => LanguageKind::JavaScript,
            "typescript" | "typescriptreact" => LanguageKind::TypeScript,
            "ipynb" | "jupyter" => LanguageKind::Notebook,
            other => LanguageKind::Other(other.to_string()),
        }
    }

    pub fn is_c_or_cpp(&self) -> bool {
        matches!(self, LanguageKind::C | LanguageKind::Cpp)
    }
}

/// Snapshot of an open document at a given version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFile {
    pub uri: Url,
    pub version: i32,
    pub language: LanguageKind,
    pub content: Arc<str>,
}

impl OpenFile {
    pub fn new(uri: Url, version: i32, language: LanguageKind, content: impl Into<Arc<str>>) -> Self {
        Self {
            uri,
            version,
            language,
            content: content.into(),
        }
    }
}

pub trait OpenFileRegistry: Send + Sync {
    fn get(&self, uri: &Url) -> Option<OpenFile>;
    fn all(&self) -> Vec<OpenFile>;
}

pub trait NotebookRegistry: Send + Sync {
    fn get(&self, uri: &Url) -> Option<OpenFile>;
    fn all(&self) -> Vec<OpenFile>;
    fn is_notebook(&self, uri: &Url) -> bool;
}

pub trait WorkspaceFolderRegistry: Send + Sync {
    fn find_folder_for_file(&self, uri: &Url) -> Option<Url>;
    /// Whether the file's folder is bound to a remote project
    fn is_bound(&self, uri: &Url) -> bool;
}

/// Open text documents keyed by URI
#[derive(Debug, Default)]
pub struct OpenFiles {
    files: DashMap<Url, OpenFile>,
}

impl OpenFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, uri: Url, language_id: &str, version: i32, text: String) -> OpenFile {
        let file = OpenFile::new(uri.clone(), version, LanguageKind::from_language_id(language_id), text);
        self.files.insert(uri, file.clone());
        file
    }

    /// Replace content and version. Returns `None` for files that are not open.
    pub fn change(&self, uri: &Url, version: i32, text: String) -> Option<OpenFile> {
        let mut entry = self.files.get_mut(uri)?;
        entry.version = version;
        entry.content = text.into();
        Some(entry.clone())
    }

    pub fn close(&self, uri: &Url) -> Option<OpenFile> {
        self.files.remove(uri).map(|(_, file)| file)
    }
}

impl OpenFileRegistry for OpenFiles {
    fn get(&self, uri: &Url) -> Option<OpenFile> {
        self.files.get(uri).map(|f| f.clone())
    }

    fn all(&self) -> Vec<OpenFile> {
        self.files.iter().map(|f| f.value().clone()).collect()
    }
}

/// Open notebooks, each flattened to a single analyzable document
#[derive(Debug, Default)]
pub struct OpenNotebooks {
    notebooks: DashMap<Url, OpenFile>,
}

impl OpenNotebooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, uri: Url, version: i32, text: String) -> OpenFile {
        let file = OpenFile::new(uri.clone(), version, LanguageKind::Notebook, text);
        self.notebooks.insert(uri, file.clone());
        file
    }

    pub fn close(&self, uri: &Url) -> Option<OpenFile> {
        self.notebooks.remove(uri).map(|(_, file)| file)
    }
}

impl NotebookRegistry for OpenNotebooks {
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

/// Workspace folders and their project bindings
#[derive(Debug, Default)]
pub struct WorkspaceFolders {
    folders: RwLock<Vec<Url>>,
    bindings: RwLock<HashMap<Url, ProjectBinding>>,
}

impl WorkspaceFolders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, folder: Url) {
        if let Ok(mut folders) = self.folders.write() {
            if !folders.contains(&folder) {
                folders.push(folder);
            }
        }
    }

    pub fn remove(&self, folder: &Url) {
        if let Ok(mut folders) = self.folders.write() {
            folders.retain(|f| f != folder);
        }
        if let Ok(mut bindings) = self.bindings.write() {
            bindings.remove(folder);
        }
    }

    pub fn all(&self) -> Vec<Url> {
        self.folders.read().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn set_binding(&self, folder: &Url, binding: Option<ProjectBinding>) {
        if let Ok(mut bindings) = self.bindings.write() {
            match binding {
                Some(b) => {
                    bindings.insert(folder.clone(), b);
                }
                None => {
                    bindings.remove(folder);
                }
            }
        }
    }
}

impl WorkspaceFolderRegistry for WorkspaceFolders {
    /// Deepest registered folder containing the file
    fn find_folder_for_file(&self, uri: &Url) -> Option<Url> {
        let folders = self.folders.read().ok()?;
        folders
            .iter()
            .filter(|folder| uri::relative_path(folder, uri).is_some())
            .max_by_key(|folder| folder.path().len())
            .cloned()
    }

    fn is_bound(&self, uri: &Url) -> bool {
        let Some(folder) = self.find_folder_for_file(uri) else {
            return false;
        };
        self.bindings
            .read()
            .map(|b| b.contains_key(&folder))
            .unwrap_or(false)
    }
}
