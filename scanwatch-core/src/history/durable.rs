//! Durable history sink: a remote row-per-scan table

use super::entry::DurableRow;
use crate::config::ScanConfig;
use crate::error::HistoryError;

use log::{debug, warn};
use std::future::Future;
use std::time::{Duration, Instant};

const HISTORY_TABLE: &str = "scan_history";

/// Slow, durable side of the history. Writes are best-effort inserts keyed by
/// analysis id; reads return the most recent rows first.
pub trait DurableSink: Send + Sync {
    fn insert(&self, row: &DurableRow) -> impl Future<Output = Result<(), HistoryError>> + Send;

    fn recent(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<DurableRow>, HistoryError>> + Send;
}

/// PostgREST-style table endpoint (`{base}/rest/v1/scan_history`)
pub struct RestHistorySink {
    http: reqwest::Client,
    table_url: String,
    api_key: Option<String>,
}

impl RestHistorySink {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("HTTP client build failed ({}), using defaults", e);
                reqwest::Client::new()
            });

        Self {
            http,
            table_url: format!(
                "{}/rest/v1/{}",
                base_url.trim_end_matches('/'),
                HISTORY_TABLE
            ),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    /// `None` when no durable URL is configured (local-only mode)
    pub fn from_config(config: &ScanConfig) -> Option<Self> {
        config.history_url.as_deref().map(|url| {
            Self::new(url, config.history_key.clone(), config.http_timeout())
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => req
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }

    async fn send(
        &self,
        what: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<String, HistoryError> {
        let start = Instant::now();
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| HistoryError::Http(e.to_string()))?;

        let status = resp.status();
        debug!(
            "history {} HTTP {} ({} ms)",
            what,
            status.as_u16(),
            start.elapsed().as_millis()
        );

        let body = resp
            .text()
            .await
            .map_err(|e| HistoryError::Http(format!("reading body: {}", e)))?;

        if !status.is_success() {
            return Err(HistoryError::Http(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.chars().take(256).collect::<String>()
            )));
        }
        Ok(body)
    }
}

impl DurableSink for RestHistorySink {
    async fn insert(&self, row: &DurableRow) -> Result<(), HistoryError> {
        // Upsert so re-recording an analysis id replaces the older row.
        let req = self
            .http
            .post(&self.table_url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);
        self.send("insert", req).await.map(|_| ())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DurableRow>, HistoryError> {
        let limit = limit.to_string();
        let req = self.http.get(&self.table_url).query(&[
            ("select", "*"),
            ("order", "created_at.desc"),
            ("limit", limit.as_str()),
        ]);
        let body = self.send("read", req).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_url_is_built_from_base() {
        let sink = RestHistorySink::new("https://db.example/", None, Duration::from_secs(1));
        assert_eq!(sink.table_url(), "https://db.example/rest/v1/scan_history");
    }

    #[test]
    fn unconfigured_history_url_means_local_only() {
        let cfg = ScanConfig::default();
        assert!(RestHistorySink::from_config(&cfg).is_none());
    }
}
