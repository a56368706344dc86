//
// test_utils/fake_tracker.rs
//
// Tracking service returning canned matches
//

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tower_lsp::lsp_types::Url;

use crate::findings::{ClientTrackedFinding, FindingMatch, FindingsByPath, TrackingService};

#[derive(Debug, Clone)]
pub struct TrackerCall {
    pub folder: Url,
    pub path: PathBuf,
    pub descriptors: Vec<ClientTrackedFinding>,
    pub fetch_server_findings: bool,
}

#[derive(Debug, Clone)]
enum Behavior {
    Respond(Vec<FindingMatch>),
    Fail,
    Hang,
}

pub struct FakeTracker {
    behavior: Behavior,
    calls: Arc<Mutex<Vec<TrackerCall>>>,
}

impl FakeTracker {
    /// Answer every path with the same `matches`
    pub fn responding(matches: Vec<FindingMatch>) -> Self {
        Self::with_behavior(Behavior::Respond(matches))
    }

    pub fn failing() -> Self {
        Self::with_behavior(Behavior::Fail)
    }

    /// Never answer
    pub fn hanging() -> Self {
        Self::with_behavior(Behavior::Hang)
    }

    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared log of requests, still readable after the tracker is moved
    pub fn calls(&self) -> Arc<Mutex<Vec<TrackerCall>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl TrackingService for FakeTracker {
    async fn match_findings(
        &self,
        folder: &Url,
        findings_by_path: FindingsByPath<ClientTrackedFinding>,
        fetch_server_findings: bool,
    ) -> anyhow::Result<FindingsByPath<FindingMatch>> {
        {
            let mut calls = self.calls.lock().unwrap();
            for (path, descriptors) in &findings_by_path {
                calls.push(TrackerCall {
                    folder: folder.clone(),
                    path: path.clone(),
                    descriptors: descriptors.clone(),
                    fetch_server_findings,
                });
            }
        }

        match &self.behavior {
            Behavior::Respond(matches) => Ok(findings_by_path
                .into_keys()
                .map(|path| (path, matches.clone()))
                .collect()),
            Behavior::Fail => Err(anyhow::anyhow!("tracking service unavailable")),
            Behavior::Hang => std::future::pending().await,
        }
    }
}
