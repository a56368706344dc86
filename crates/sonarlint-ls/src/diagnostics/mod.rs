//
// diagnostics/mod.rs
//
// Diagnostic publication and the server-side taint cache
//

pub mod publisher;
pub mod taint;

pub use publisher::{
    AnalysisProgress, DiagnosticData, DiagnosticPublisher, DiagnosticsSink, REMOTE_SOURCE,
    SONARLINT_SOURCE,
};
pub use taint::{ServerKind, TaintVulnerabilitiesCache, TaintVulnerability};
