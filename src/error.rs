//! Failure taxonomy for the ingestion pipeline.
//!
//! Every raw I/O failure is converted into one of these types before it
//! crosses a component boundary. The transient/permanent split drives the
//! dispatcher's retry decision:
//!
//! - **Transient** (connection refused, timeout, serialization-busy) is
//!   retried with backoff.
//! - **Permanent** (malformed record) is surfaced immediately, never retried.

use thiserror::Error;

use crate::model::AnalysisResult;

/// The kind of a store failure, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Safe to retry with backoff (connection, timeout, serialization-busy).
    Transient,
    /// Requires no retry: the record itself is the problem.
    Permanent,
}

/// Failure from the result store's write/query path.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying connection could not be established or the
    /// operation timed out. Retryable.
    #[error("store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// A required field is missing/empty or `data` is not representable
    /// as the store's JSON payload. Not retryable.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::Unavailable { .. } => FailureKind::Transient,
            StoreError::InvalidRecord(_) => FailureKind::Permanent,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

/// Classify a raw sqlx failure into the pipeline taxonomy.
///
/// SQLSTATE class 22 (data exception) and 23 (integrity violation) mean
/// the record itself cannot be stored. Everything else (pool exhaustion,
/// broken connections, serialization conflicts in class 40, shutdown in
/// class 57) is treated as a store outage and retried.
pub fn classify_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
        if code.starts_with("22") || code.starts_with("23") {
            return StoreError::InvalidRecord(format!("rejected by store ({code}): {db}"));
        }
        let message = format!("database error ({code})");
        return StoreError::Unavailable {
            message,
            source: Some(err),
        };
    }
    // Io, Tls, Protocol, PoolTimedOut, PoolClosed, and the rest: outage.
    let message = err.to_string();
    StoreError::Unavailable {
        message,
        source: Some(err),
    }
}

/// Failure to hand a result to the bounded queue.
///
/// Both variants give the item back so the caller can hold on to it;
/// `QueueFull` is a backpressure signal, not a terminal error.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("queue full")]
    QueueFull(AnalysisResult),

    #[error("queue closed")]
    Closed(AnalysisResult),
}

impl EnqueueError {
    /// Recover the result that could not be enqueued.
    pub fn into_inner(self) -> AnalysisResult {
        match self {
            EnqueueError::QueueFull(r) | EnqueueError::Closed(r) => r,
        }
    }
}
