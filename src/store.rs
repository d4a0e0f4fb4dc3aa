//! PostgreSQL-backed result store.
//!
//! The storage contract is the `analysis_results` table: append-only
//! rows keyed by `(symbol, source, timestamp)` with a `jsonb` payload.
//! No uniqueness is enforced: duplicate ingestion of the same logical
//! result produces duplicate rows, and readers query by time range.
//!
//! Three indexes back the supported query patterns: a composite btree
//! on `(symbol, timestamp)` for range scans, a btree on `source` for
//! equality lookups, and a GIN index on `data` for containment and
//! key-existence queries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::dispatch::ResultSink;
use crate::error::{classify_sqlx_error, StoreError};
use crate::model::{AnalysisResult, RecordId, StoredResult};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS analysis_results (
        id          serial PRIMARY KEY,
        symbol      text NOT NULL,
        source      text NOT NULL,
        "timestamp" timestamptz NOT NULL,
        data        jsonb NOT NULL,
        created_at  timestamptz DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_analysis_results_symbol_ts
        ON analysis_results (symbol, "timestamp")
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_analysis_results_source
        ON analysis_results (source)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_analysis_results_data
        ON analysis_results USING gin (data)
    "#,
];

/// Shared, bounded connection pool around `analysis_results`.
///
/// Cloning is cheap; all clones share the same pool, and the pool caps
/// concurrent connections across every dispatcher worker.
#[derive(Clone)]
pub struct ResultStore {
    pool: PgPool,
}

impl ResultStore {
    /// Connect with a bounded pool. Connections are acquired per
    /// operation and released on every exit path by the pool itself.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared wiring).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table and its indexes if absent. Safe to call on
    /// every process start.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(classify_sqlx_error)?;
        }
        tracing::info!("analysis_results schema ready");
        Ok(())
    }

    /// Insert one record and return its assigned id. No deduplication:
    /// calling this twice with the same record stores two rows.
    pub async fn write(&self, result: &AnalysisResult) -> Result<RecordId, StoreError> {
        result.validate()?;
        let id: RecordId = sqlx::query_scalar(
            r#"
            INSERT INTO analysis_results (symbol, source, "timestamp", data)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&result.symbol)
        .bind(&result.source)
        .bind(result.timestamp)
        .bind(&result.data)
        .fetch_one(&self.pool)
        .await
        .map_err(classify_sqlx_error)?;
        Ok(id)
    }

    /// All results for `symbol` with `from <= timestamp <= to`, oldest
    /// first. Served by the `(symbol, timestamp)` index.
    pub async fn results_for_symbol(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredResult>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT id, symbol, source, "timestamp", data, created_at
            FROM analysis_results
            WHERE symbol = $1 AND "timestamp" BETWEEN $2 AND $3
            ORDER BY "timestamp"
            "#,
        )
        .bind(symbol)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)
    }

    /// All results produced by `source`, newest first. Served by the
    /// `source` index.
    pub async fn results_from_source(
        &self,
        source: &str,
    ) -> Result<Vec<StoredResult>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT id, symbol, source, "timestamp", data, created_at
            FROM analysis_results
            WHERE source = $1
            ORDER BY "timestamp" DESC
            "#,
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)
    }

    /// Results whose payload contains top-level key `key`. Served by
    /// the GIN index.
    pub async fn results_with_key(&self, key: &str) -> Result<Vec<StoredResult>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT id, symbol, source, "timestamp", data, created_at
            FROM analysis_results
            WHERE data ? $1
            ORDER BY "timestamp" DESC
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)
    }

    /// Results whose payload contains `fragment` (jsonb containment).
    pub async fn results_containing(
        &self,
        fragment: &Value,
    ) -> Result<Vec<StoredResult>, StoreError> {
        sqlx::query_as(
            r#"
            SELECT id, symbol, source, "timestamp", data, created_at
            FROM analysis_results
            WHERE data @> $1
            ORDER BY "timestamp" DESC
            "#,
        )
        .bind(fragment)
        .fetch_all(&self.pool)
        .await
        .map_err(classify_sqlx_error)
    }

    /// Close the pool. Call only after dispatcher workers have drained.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ResultSink for ResultStore {
    async fn write(&self, result: &AnalysisResult) -> Result<RecordId, StoreError> {
        ResultStore::write(self, result).await
    }
}
