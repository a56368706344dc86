//
// test_utils/recording_sink.rs
//
// Diagnostics sink that keeps everything it is sent
//

use std::sync::Mutex;

use async_trait::async_trait;
use tower_lsp::lsp_types::{Diagnostic, Url};

use crate::diagnostics::{AnalysisProgress, DiagnosticsSink};

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Diagnostics {
        uri: Url,
        diagnostics: Vec<Diagnostic>,
        version: Option<i32>,
    },
    Hotspots {
        uri: Url,
        hotspots: Vec<Diagnostic>,
    },
    FirstSecret,
    Progress {
        token: String,
        progress: AnalysisProgress,
    },
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Latest diagnostics published for `uri`
    pub fn diagnostics_for(&self, uri: &Url) -> Option<Vec<Diagnostic>> {
        self.events().into_iter().rev().find_map(|event| match event {
            SinkEvent::Diagnostics { uri: u, diagnostics, .. } if &u == uri => Some(diagnostics),
            _ => None,
        })
    }

    /// Latest hotspots published for `uri`
    pub fn hotspots_for(&self, uri: &Url) -> Option<Vec<Diagnostic>> {
        self.events().into_iter().rev().find_map(|event| match event {
            SinkEvent::Hotspots { uri: u, hotspots } if &u == uri => Some(hotspots),
            _ => None,
        })
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl DiagnosticsSink for RecordingSink {
    async fn publish_diagnostics(&self, uri: Url, diagnostics: Vec<Diagnostic>, version: Option<i32>) {
        self.record(SinkEvent::Diagnostics {
            uri,
            diagnostics,
            version,
        });
    }

    async fn publish_security_hotspots(&self, uri: Url, hotspots: Vec<Diagnostic>) {
        self.record(SinkEvent::Hotspots { uri, hotspots });
    }

    async fn show_first_secret_detection_notification(&self) {
        self.record(SinkEvent::FirstSecret);
    }

    async fn report_progress(&self, token: &str, progress: AnalysisProgress) {
        self.record(SinkEvent::Progress {
            token: token.to_string(),
            progress,
        });
    }
}
