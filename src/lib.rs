// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod model;
pub mod queue;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::dispatch::{spawn_workers, BackoffPolicy, DispatchOutcome, Dispatcher, ResultSink};
pub use crate::error::{EnqueueError, FailureKind, StoreError};
pub use crate::model::{AnalysisResult, RecordId, StoredResult};
pub use crate::queue::{DeadLetterEntry, DeadLetterSink, MemoryDeadLetter, TracingDeadLetter};
pub use crate::store::ResultStore;
