//
// analysis/batch.rs
//
// Immutable description of one analysis run
//

use std::collections::HashSet;

use tower_lsp::lsp_types::Url;

use crate::registry::OpenFile;

/// Files to analyze plus the flags controlling how results are handled.
///
/// Files are deduplicated by URI, first occurrence wins. Builders consume
/// the batch; there is no way to mutate one after submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisBatch {
    files: Vec<OpenFile>,
    fetch_server_findings: bool,
    hotspots_only: bool,
    show_progress: bool,
}

impl AnalysisBatch {
    pub fn new(files: impl IntoIterator<Item = OpenFile>) -> Self {
        let mut seen = HashSet::new();
        let files = files
            .into_iter()
            .filter(|f| seen.insert(f.uri.clone()))
            .collect();
        Self {
            files,
            fetch_server_findings: false,
            hotspots_only: false,
            show_progress: false,
        }
    }

    pub fn with_fetch_server_findings(mut self) -> Self {
        self.fetch_server_findings = true;
        self
    }

    pub fn with_hotspots_only(mut self) -> Self {
        self.hotspots_only = true;
        self
    }

    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    pub fn files(&self) -> &[OpenFile] {
        &self.files
    }

    pub fn uris(&self) -> impl Iterator<Item = &Url> {
        self.files.iter().map(|f| &f.uri)
    }

    pub fn fetch_server_findings(&self) -> bool {
        self.fetch_server_findings
    }

    pub fn hotspots_only(&self) -> bool {
        self.hotspots_only
    }

    pub fn show_progress(&self) -> bool {
        self.show_progress
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Same flags, restricted to the files accepted by `keep`
    pub(crate) fn retain(mut self, keep: impl FnMut(&OpenFile) -> bool) -> Self {
        self.files.retain(keep);
        self
    }
}
