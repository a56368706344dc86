//
// test_utils/mod.rs
//
// Test doubles for the scheduler's collaborators. Compiled for unit tests
// and under the `test-support` feature so integration tests can drive the
// real scheduler against a scripted engine.
//

pub mod fake_engine;
pub mod fake_tracker;
pub mod recording_sink;
pub mod registries;

pub use fake_engine::FakeEngine;
pub use fake_tracker::{FakeTracker, TrackerCall};
pub use recording_sink::{RecordingSink, SinkEvent};
pub use registries::{StaticFiles, StaticFolders};
