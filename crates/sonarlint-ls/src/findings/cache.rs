//
// findings/cache.rs
//
// Per-file finding cache, versioned by document version
//

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use tower_lsp::lsp_types::Url;

use super::types::TrackedFinding;

/// Findings of one file keyed by entry key, in engine order
pub type FindingMap = IndexMap<String, TrackedFinding>;

#[derive(Debug, Clone)]
struct VersionedFindings {
    version: i32,
    findings: Arc<FindingMap>,
}

/// Latest tracked findings per file.
///
/// A `put` swaps the whole set for a file in one map insert, so readers see
/// either the previous set or the new one, never a mix. Local issues and
/// hotspots live in separate instances.
///
/// Every `clear` of a file starts a new generation for it. Analyses capture
/// the generation before running and store through
/// [`put_if_current`](Self::put_if_current), so results computed before a
/// close cannot land after it.
#[derive(Debug, Default)]
pub struct FindingCache {
    inner: DashMap<Url, VersionedFindings>,
    // Locked before `inner` whenever both are held
    generations: DashMap<Url, u64>,
}

impl FindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the findings of `uri` with the result of analyzing `version`.
    ///
    /// Results for a version older than the one already recorded are
    /// discarded; returns whether the set was stored.
    pub fn put(&self, uri: Url, version: i32, findings: Vec<TrackedFinding>) -> bool {
        let map: FindingMap = findings
            .into_iter()
            .map(|f| (f.entry_key(), f))
            .collect();

        match self.inner.entry(uri) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().version > version {
                    log::trace!(
                        "Discarding findings for {} at version {} (cache holds {})",
                        occupied.key(),
                        version,
                        occupied.get().version
                    );
                    return false;
                }
                occupied.insert(VersionedFindings {
                    version,
                    findings: Arc::new(map),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(VersionedFindings {
                    version,
                    findings: Arc::new(map),
                });
            }
        }
        true
    }

    /// Store findings computed during `generation`. Returns false without
    /// touching the cache when `uri` was cleared since.
    pub fn put_if_current(
        &self,
        uri: Url,
        generation: u64,
        version: i32,
        findings: Vec<TrackedFinding>,
    ) -> bool {
        let current = self.generations.entry(uri.clone()).or_insert(0);
        if *current != generation {
            log::trace!("Discarding findings for {}, cleared during analysis", uri);
            return false;
        }
        self.put(uri, version, findings)
    }

    pub fn generation(&self, uri: &Url) -> u64 {
        self.generations.get(uri).map(|g| *g).unwrap_or(0)
    }

    /// Latest findings for `uri`. Empty when nothing is recorded or when the
    /// recorded version is older than `current_version`.
    pub fn get(&self, uri: &Url, current_version: Option<i32>) -> Arc<FindingMap> {
        match self.inner.get(uri) {
            Some(entry) if !Self::outdated(entry.version, current_version) => entry.findings.clone(),
            _ => Arc::new(FindingMap::new()),
        }
    }

    /// Whether a recorded set exists but predates `current_version`
    pub fn is_stale(&self, uri: &Url, current_version: Option<i32>) -> bool {
        self.inner
            .get(uri)
            .map(|entry| Self::outdated(entry.version, current_version))
            .unwrap_or(false)
    }

    pub fn version(&self, uri: &Url) -> Option<i32> {
        self.inner.get(uri).map(|entry| entry.version)
    }

    /// Look up a single finding by entry key, regardless of staleness
    pub fn find(&self, uri: &Url, entry_key: &str) -> Option<TrackedFinding> {
        self.inner
            .get(uri)
            .and_then(|entry| entry.findings.get(entry_key).cloned())
    }

    /// Drop the findings of `uri` and start a new generation for it
    pub fn clear(&self, uri: &Url) {
        let mut generation = self.generations.entry(uri.clone()).or_insert(0);
        *generation += 1;
        self.inner.remove(uri);
    }

    /// Clear every file matching `matches`
    pub fn clear_where(&self, matches: impl Fn(&Url) -> bool) {
        let uris: Vec<Url> = self
            .inner
            .iter()
            .filter(|entry| matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for uri in uris {
            self.clear(&uri);
        }
    }

    fn outdated(recorded: i32, current: Option<i32>) -> bool {
        current.map(|current| recorded < current).unwrap_or(false)
    }
}
