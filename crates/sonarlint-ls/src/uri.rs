//
// uri.rs
//
// URI helpers for scheme checks and folder-relative paths
//

use std::path::PathBuf;

use tower_lsp::lsp_types::Url;

pub const FILE_SCHEME: &str = "file";

/// Scheme used by VS Code for individual notebook cells
pub const NOTEBOOK_CELL_SCHEME: &str = "vscode-notebook-cell";

/// Only local-filesystem URIs can be handed to the analysis engine.
pub fn has_file_scheme(uri: &Url) -> bool {
    uri.scheme() == FILE_SCHEME
}

pub fn is_notebook_cell(uri: &Url) -> bool {
    uri.scheme() == NOTEBOOK_CELL_SCHEME
}

/// Path of `file` relative to `folder`, or `None` when the file lies outside it.
pub fn relative_path(folder: &Url, file: &Url) -> Option<PathBuf> {
    let folder_path = folder.to_file_path().ok()?;
    let file_path = file.to_file_path().ok()?;
    file_path
        .strip_prefix(&folder_path)
        .ok()
        .map(|p| p.to_path_buf())
}
