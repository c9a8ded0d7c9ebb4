//! reqwest implementation of [`AnalysisClient`]

use super::wire::{
    error_message, parse_analysis_json, parse_metadata_json, parse_search_json,
    parse_submission_json,
};
use super::{AnalysisClient, AnalysisReport, SearchRecord};

use crate::config::ScanConfig;
use crate::error::ClientError;
use crate::model::{AnalysisHandle, AssetKind, FileUpload, Metadata, ScanKind};
use crate::sync::lock_or_recover;

use log::{debug, warn};
use reqwest::StatusCode;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const RATE_LIMIT_COOLDOWN_SECS: u64 = 60;
const LOGGED_BODY_CHARS: usize = 1024;

/// Analysis engine client speaking the v3 JSON API, directly or through a proxy
pub struct HttpAnalysisClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rate_limit_until: Mutex<Option<Instant>>,
}

enum Body {
    Found(String),
    NotFound,
}

impl HttpAnalysisClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("HTTP client build failed ({}), using defaults", e);
                reqwest::Client::new()
            });

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            rate_limit_until: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.http_timeout(),
        )
    }

    fn is_rate_limited(&self) -> bool {
        match *lock_or_recover(&self.rate_limit_until) {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    fn set_rate_limited(&self) {
        *lock_or_recover(&self.rate_limit_until) =
            Some(Instant::now() + Duration::from_secs(RATE_LIMIT_COOLDOWN_SECS));
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => req.header("x-apikey", key),
            None => req,
        }
    }

    /// Send a request and read the body, mapping status codes onto `ClientError`.
    /// 404 is reported as `Body::NotFound` so callers can choose what it means.
    async fn execute(
        &self,
        what: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<Body, ClientError> {
        if self.is_rate_limited() {
            return Err(ClientError::RateLimited);
        }

        let start = Instant::now();
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| ClientError::Network(describe_transport_error(&e)))?;

        let status = resp.status();
        let elapsed_ms = start.elapsed().as_millis();
        debug!("{} HTTP {} ({} ms)", what, status.as_u16(), elapsed_ms);

        let headers = resp.headers();
        let rate_rem = headers
            .get("x-rate-limit-remaining")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");
        if !rate_rem.is_empty() {
            debug!("{} x-rate-limit-remaining={}", what, rate_rem);
        }

        if status == StatusCode::NOT_FOUND {
            return Ok(Body::NotFound);
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ClientError::Network(format!("reading body: {}", e)))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(
                "{} rate limited. elapsed={}ms body: {}",
                what,
                elapsed_ms,
                body.chars().take(LOGGED_BODY_CHARS).collect::<String>()
            );
            self.set_rate_limited();
            return Err(ClientError::RateLimited);
        }

        if !status.is_success() {
            warn!(
                "{} HTTP {}. elapsed={}ms body: {}",
                what,
                status.as_u16(),
                elapsed_ms,
                body.chars().take(LOGGED_BODY_CHARS).collect::<String>()
            );
            let message = error_message(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request rejected")
                    .to_string()
            });
            return Err(ClientError::ServerRejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Body::Found(body))
    }

    /// Like `execute`, but a 404 is a rejection rather than an empty result
    async fn execute_found(
        &self,
        what: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<String, ClientError> {
        match self.execute(what, req).await? {
            Body::Found(body) => Ok(body),
            Body::NotFound => Err(ClientError::ServerRejected {
                status: 404,
                message: format!("{} not found", what),
            }),
        }
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "engine unreachable".to_string()
    } else {
        e.to_string()
    }
}

fn malformed(e: serde_json::Error) -> ClientError {
    ClientError::Malformed(e.to_string())
}

impl AnalysisClient for HttpAnalysisClient {
    async fn submit_url(&self, url: &str) -> Result<AnalysisHandle, ClientError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ClientError::InvalidInput("URL is empty".to_string()));
        }

        let req = self.http.post(self.url("/urls")).form(&[("url", url)]);
        let body = self.execute_found("submit url", req).await?;
        parse_submission_json(&body, ScanKind::Url).map_err(malformed)
    }

    async fn submit_file(
        &self,
        upload: &FileUpload,
        max_size: u64,
    ) -> Result<AnalysisHandle, ClientError> {
        let size = upload.size.max(upload.bytes.len() as u64);
        if size > max_size {
            return Err(ClientError::TooLarge {
                size,
                limit: max_size,
            });
        }

        let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.filename.clone());
        let form = reqwest::multipart::Form::new().part("file", part);
        let req = self.http.post(self.url("/files")).multipart(form);

        let body = self.execute_found("submit file", req).await?;
        parse_submission_json(&body, ScanKind::File).map_err(malformed)
    }

    async fn fetch_analysis(&self, handle: &AnalysisHandle) -> Result<AnalysisReport, ClientError> {
        let req = self
            .http
            .get(self.url(&format!("/analyses/{}", handle.id)));
        let body = self.execute_found("fetch analysis", req).await?;
        parse_analysis_json(&body, handle).map_err(malformed)
    }

    async fn fetch_metadata(
        &self,
        kind: AssetKind,
        identifier: &str,
    ) -> Result<Option<Metadata>, ClientError> {
        let path = format!("/{}/{}", kind.path_segment(), identifier);
        let req = self.http.get(self.url(&path));
        match self.execute("fetch metadata", req).await? {
            Body::Found(body) => parse_metadata_json(&body, kind, identifier).map_err(malformed),
            Body::NotFound => Ok(None),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchRecord>, ClientError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ClientError::InvalidInput("Search query is empty".to_string()));
        }

        let req = self.http.get(self.url("/search")).query(&[("query", query)]);
        match self.execute("search", req).await? {
            Body::Found(body) => parse_search_json(&body).map_err(malformed),
            Body::NotFound => Ok(Vec::new()),
        }
    }
}
