// tests/common/mod.rs
// Shared mocks for the pipeline integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use stock_analysis_ingest::{AnalysisResult, RecordId, ResultSink, StoreError};

/// Scriptable in-memory stand-in for the result store: fails the first
/// `fail_first` write calls with a transient error (or every call with a
/// permanent one), records everything that lands.
pub struct MemorySink {
    fail_first: u32,
    always_invalid: bool,
    calls: AtomicU32,
    written: Mutex<Vec<AnalysisResult>>,
}

impl MemorySink {
    pub fn ok() -> Self {
        Self::transient_then_ok(0)
    }

    pub fn transient_then_ok(fail_first: u32) -> Self {
        Self {
            fail_first,
            always_invalid: false,
            calls: AtomicU32::new(0),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn always_transient() -> Self {
        Self::transient_then_ok(u32::MAX)
    }

    pub fn always_invalid() -> Self {
        Self {
            fail_first: 0,
            always_invalid: true,
            calls: AtomicU32::new(0),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Total write calls observed, successful or not.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<AnalysisResult> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn write(&self, result: &AnalysisResult) -> Result<RecordId, StoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_invalid {
            return Err(StoreError::InvalidRecord("unstorable payload".into()));
        }
        if n <= self.fail_first {
            return Err(StoreError::unavailable("connection refused"));
        }
        let mut written = self.written.lock();
        written.push(result.clone());
        Ok(written.len() as RecordId)
    }
}
