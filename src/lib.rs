// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod config;
pub mod dedup;
pub mod extract;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod worker;

// ---- Re-exports for stable public API ----
pub use crate::dedup::{compute_fingerprint, DedupService};
pub use crate::queue::{EnqueueOutcome, JobHandler, JobQueue, QueueConfig};
pub use crate::scheduler::{Scheduler, TriggerError};
pub use crate::store::MemoryStore;
pub use crate::worker::{IngestWorker, JobOutcome, WorkerError};
