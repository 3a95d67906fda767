//! Synchronization orchestrator for issuecache.
//!
//! Composes the GitHub fetch client with a [`LocalStore`] and drives sync
//! passes: full or incremental by watermark, streaming reconciliation,
//! bounded retries, progress events and cancellation.
//!
//! [`LocalStore`]: issuecache_store::LocalStore

pub mod engine;
pub mod error;
pub mod progress;
pub mod retry;
pub mod state;

pub use engine::{Clock, SyncEngine, SyncMode, SyncReport, SyncRequest, SystemClock};
pub use error::SyncError;
pub use progress::{progress_channel, ProgressPhase, ProgressSender, SyncEvent, SyncProgress};
pub use retry::RetryPolicy;
pub use state::SyncPhase;
