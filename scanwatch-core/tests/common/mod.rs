//! Scripted engine client and in-memory durable sink shared by the
//! integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use scanwatch_core::client::{AnalysisClient, AnalysisReport, SearchRecord};
use scanwatch_core::error::{ClientError, HistoryError};
use scanwatch_core::history::{DurableRow, DurableSink};
use scanwatch_core::model::{
    AnalysisHandle, AnalysisStatus, AssetKind, EngineVerdict, FileUpload, Metadata, ScanKind,
    ScanResult, VerdictCounts,
};

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

pub fn counts(harmless: u32, malicious: u32) -> VerdictCounts {
    VerdictCounts {
        harmless,
        malicious,
        ..VerdictCounts::default()
    }
}

/// Completed result whose per-engine detail agrees with `verdict_counts`
pub fn completed(id: &str, kind: ScanKind, verdict_counts: VerdictCounts) -> ScanResult {
    let mut per_engine_results = std::collections::BTreeMap::new();
    for i in 0..verdict_counts.malicious {
        per_engine_results.insert(
            format!("Engine{i}"),
            EngineVerdict {
                category: "malicious".to_string(),
                verdict_label: Some("malware".to_string()),
            },
        );
    }
    per_engine_results.insert(
        "CleanEngine".to_string(),
        EngineVerdict {
            category: "harmless".to_string(),
            verdict_label: Some("clean".to_string()),
        },
    );
    ScanResult {
        id: id.to_string(),
        kind,
        verdict_counts,
        per_engine_results,
        completed_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        sha256: None,
        url_id: Some(format!("url-{id}")),
    }
}

pub fn metadata_for(kind: AssetKind, identifier: &str) -> Metadata {
    Metadata::from_value(
        kind,
        identifier,
        serde_json::json!({ "title": "Example Domain", "reputation": 0 }),
    )
    .unwrap()
}

/// Engine double. Submissions hand out ids in order (default `abc123`); each
/// handle replays its own scripted polls and then stays `InProgress`.
#[derive(Default)]
pub struct FakeClient {
    submit_ids: Mutex<VecDeque<String>>,
    polls: Mutex<HashMap<String, VecDeque<Result<AnalysisReport, ClientError>>>>,
    poll_delays: Mutex<HashMap<String, Duration>>,
    submit_error: Mutex<Option<ClientError>>,
    metadata: Mutex<Option<Metadata>>,
    metadata_error: Mutex<Option<ClientError>>,
    search_hits: Mutex<Vec<SearchRecord>>,
    calls: Mutex<Vec<String>>,
    completed_fetches: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_submission(self, id: &str) -> Self {
        self.submit_ids.lock().unwrap().push_back(id.to_string());
        self
    }

    pub fn polls(self, id: &str, reports: Vec<AnalysisReport>) -> Self {
        self.poll_outcomes(id, reports.into_iter().map(Ok).collect())
    }

    /// Like `polls`, but any fetch may fail at the transport level
    pub fn poll_outcomes(self, id: &str, outcomes: Vec<Result<AnalysisReport, ClientError>>) -> Self {
        self.polls
            .lock()
            .unwrap()
            .insert(id.to_string(), outcomes.into());
        self
    }

    /// Every fetch of `id` takes `delay` before answering
    pub fn poll_delay(self, id: &str, delay: Duration) -> Self {
        self.poll_delays
            .lock()
            .unwrap()
            .insert(id.to_string(), delay);
        self
    }

    pub fn submit_error(self, err: ClientError) -> Self {
        *self.submit_error.lock().unwrap() = Some(err);
        self
    }

    pub fn metadata(self, metadata: Metadata) -> Self {
        *self.metadata.lock().unwrap() = Some(metadata);
        self
    }

    pub fn metadata_error(self, err: ClientError) -> Self {
        *self.metadata_error.lock().unwrap() = Some(err);
        self
    }

    pub fn search_hits(self, hits: Vec<SearchRecord>) -> Self {
        *self.search_hits.lock().unwrap() = hits;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Fetches that ran to completion, i.e. were not dropped mid-flight
    pub fn completed_fetches(&self) -> usize {
        self.completed_fetches.load(Ordering::SeqCst)
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn submission(&self) -> Result<String, ClientError> {
        if let Some(err) = self.submit_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .submit_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "abc123".to_string()))
    }
}

impl AnalysisClient for FakeClient {
    async fn submit_url(&self, url: &str) -> Result<AnalysisHandle, ClientError> {
        self.log(format!("submit_url:{url}"));
        Ok(AnalysisHandle::new(self.submission()?, ScanKind::Url))
    }

    async fn submit_file(
        &self,
        upload: &FileUpload,
        max_size: u64,
    ) -> Result<AnalysisHandle, ClientError> {
        self.log(format!("submit_file:{}", upload.filename));
        if upload.size > max_size {
            return Err(ClientError::TooLarge {
                size: upload.size,
                limit: max_size,
            });
        }
        Ok(AnalysisHandle::new(self.submission()?, ScanKind::File))
    }

    async fn fetch_analysis(&self, handle: &AnalysisHandle) -> Result<AnalysisReport, ClientError> {
        self.log(format!("fetch_analysis:{}", handle.id));
        let delay = self.poll_delays.lock().unwrap().get(&handle.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.completed_fetches.fetch_add(1, Ordering::SeqCst);

        let next = self
            .polls
            .lock()
            .unwrap()
            .get_mut(&handle.id)
            .and_then(|q| q.pop_front());
        next.unwrap_or_else(|| Ok(AnalysisReport::pending(AnalysisStatus::InProgress)))
    }

    async fn fetch_metadata(
        &self,
        kind: AssetKind,
        identifier: &str,
    ) -> Result<Option<Metadata>, ClientError> {
        self.log(format!("fetch_metadata:{}/{}", kind.path_segment(), identifier));
        if let Some(err) = self.metadata_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.metadata.lock().unwrap().clone())
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchRecord>, ClientError> {
        self.log(format!("search:{query}"));
        Ok(self.search_hits.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct SinkState {
    rows: Mutex<Vec<DurableRow>>,
    offline: AtomicBool,
    reads: AtomicUsize,
    insert_delay: Mutex<Option<Duration>>,
    read_delay: Mutex<Option<Duration>>,
}

/// Durable sink kept in memory. Clones share the same rows, so two stores can
/// stand in for two sessions against one database.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<SinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Each insert lands only after `delay`
    pub fn set_insert_delay(&self, delay: Duration) {
        *self.state.insert_delay.lock().unwrap() = Some(delay);
    }

    /// Reads snapshot the rows at once but answer after `delay`
    pub fn set_read_delay(&self, delay: Duration) {
        *self.state.read_delay.lock().unwrap() = Some(delay);
    }

    pub fn rows(&self) -> Vec<DurableRow> {
        self.state.rows.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), HistoryError> {
        if self.state.offline.load(Ordering::SeqCst) {
            return Err(HistoryError::Http("connection refused".to_string()));
        }
        Ok(())
    }
}

impl DurableSink for MemorySink {
    async fn insert(&self, row: &DurableRow) -> Result<(), HistoryError> {
        self.check_online()?;
        let delay = *self.state.insert_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut rows = self.state.rows.lock().unwrap();
        rows.retain(|r| r.analysis_id != row.analysis_id);
        rows.push(row.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DurableRow>, HistoryError> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut rows = self.rows();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);

        let delay = *self.state.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }
}
