//
// findings/mod.rs
//
// Finding model, identity tracking and per-file caches
//

pub mod cache;
pub mod local_tracker;
pub mod reconciler;
pub mod types;

pub use cache::{FindingCache, FindingMap};
pub use local_tracker::LocalIssueTracker;
pub use reconciler::{
    ClientTrackedFinding, FindingMatch, FindingsByPath, IssueReconciler, LineWithHash,
    LocalOnlyFinding, ResolutionStatus, ServerMatchedFinding, TextRangeWithHash, TrackingService,
};
pub use types::{
    Flow, FlowLocation, FindingKind, FindingOrigin, HotspotReviewStatus, IssueSeverity, RawFinding,
    TextRange, TrackedFinding,
};
