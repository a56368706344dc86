//
// analysis/mod.rs
//
// Analysis scheduling: debounce, single-worker queue, batch execution
//

pub mod batch;
pub mod command_engine;
pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod watcher;
pub mod worker;

pub use batch::AnalysisBatch;
pub use command_engine::CommandEngine;
pub use engine::{finding_channel, AnalysisEngine, FindingListener};
pub use executor::AnalysisTaskExecutor;
pub use scheduler::{AnalysisScheduler, ServerMode};
pub use watcher::{DirtyFiles, EventWatcher};
pub use worker::{AnalysisHandle, AnalysisQueue, AnalysisTask, TaskRunner};
