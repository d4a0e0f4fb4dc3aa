// src/model.rs
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StoreError;

/// Store-assigned surrogate key (`serial`).
pub type RecordId = i32;

/// One unit of ingested analysis output. Immutable once persisted;
/// corrections arrive as new rows.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnalysisResult {
    pub symbol: String, // e.g., "AAPL"
    pub source: String, // producer of the analysis, e.g., "sentiment-v2"
    pub timestamp: DateTime<Utc>,
    pub data: Value, // opaque JSON object payload
}

impl AnalysisResult {
    pub fn new(
        symbol: impl Into<String>,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: Value,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            source: source.into(),
            timestamp,
            data,
        }
    }

    /// Check the record against the storage contract: identifiers must be
    /// non-empty and `data` must be a JSON object. Runs before any row
    /// reaches the store, so malformed payloads never cost a connection.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.symbol.trim().is_empty() {
            return Err(StoreError::InvalidRecord("empty symbol".into()));
        }
        if self.source.trim().is_empty() {
            return Err(StoreError::InvalidRecord("empty source".into()));
        }
        if !self.data.is_object() {
            return Err(StoreError::InvalidRecord(format!(
                "data must be a JSON object, got {}",
                json_type_name(&self.data)
            )));
        }
        Ok(())
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A persisted row, as read back from `analysis_results`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, sqlx::FromRow)]
pub struct StoredResult {
    pub id: RecordId,
    pub symbol: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub created_at: Option<DateTime<Utc>>,
}

impl StoredResult {
    /// The logical record, without store-assigned columns.
    pub fn as_result(&self) -> AnalysisResult {
        AnalysisResult {
            symbol: self.symbol.clone(),
            source: self.source.clone(),
            timestamp: self.timestamp,
            data: self.data.clone(),
        }
    }
}
