// src/ingest/sources.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Raw record as returned by an upstream analysis producer. Fields are
/// optional at the wire level; mapping into an `AnalysisResult` decides
/// what is required.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RawAnalysisRecord {
    pub symbol: Option<String>,
    pub source: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: Option<serde_json::Value>,
}

/// Pull API over an upstream analysis producer.
///
/// `fetch_since(None)` returns the full restartable sequence;
/// `fetch_since(Some(ts))` returns records strictly newer than `ts`, so
/// a restarted poller resumes from its high-water mark. Fetch failures
/// are transient: the poller retries on its next tick.
#[async_trait]
pub trait AnalysisSource: Send + Sync {
    async fn fetch_since(&self, cursor: Option<DateTime<Utc>>) -> Result<Vec<RawAnalysisRecord>>;
    fn name(&self) -> &str;
}

/// HTTP JSON source: `GET {url}?since=<rfc3339>` returning an array of
/// raw records.
pub struct HttpAnalysisSource {
    name: String,
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpAnalysisSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[async_trait]
impl AnalysisSource for HttpAnalysisSource {
    async fn fetch_since(&self, cursor: Option<DateTime<Utc>>) -> Result<Vec<RawAnalysisRecord>> {
        let mut req = self.client.get(&self.url).timeout(self.timeout);
        if let Some(ts) = cursor {
            req = req.query(&[("since", ts.to_rfc3339())]);
        }
        let rsp = req
            .send()
            .await
            .with_context(|| format!("fetching analysis batch from {}", self.url))?
            .error_for_status()
            .context("upstream returned error status")?;
        let records = rsp
            .json::<Vec<RawAnalysisRecord>>()
            .await
            .context("decoding analysis batch")?;
        Ok(records)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
