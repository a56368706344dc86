//
// lib.rs
//
// Analysis scheduling and finding reconciliation for the SonarLint language
// server. The binary entry point lives in main.rs; integration tests link
// against this library.
//

pub mod analysis;
pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod findings;
pub mod hashing;
pub mod registry;
// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
pub mod uri;
