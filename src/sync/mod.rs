//! The synchronization engine: snapshot normalization, reconciliation
//! against the live store, archival of vanished threads and deduplicated
//! attachment downloads.

pub mod archiver;
pub mod dedup;
pub mod engine;
pub mod normalizer;
pub mod reconciler;
pub mod scheduler;

pub use dedup::DownloadExecutor;
pub use engine::{CycleOutcome, SyncEngine, SyncSettings};
pub use scheduler::Scheduler;
