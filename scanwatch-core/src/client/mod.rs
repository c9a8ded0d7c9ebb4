//! Remote analysis engine client
//!
//! Every operation is a single request/response round trip. Nothing here
//! retries; callers decide what a failure means.

mod http;
mod wire;

pub use http::HttpAnalysisClient;
pub use wire::{parse_analysis_json, parse_metadata_json, parse_search_json, parse_submission_json};

use crate::error::ClientError;
use crate::model::{AnalysisHandle, AnalysisStatus, AssetKind, FileUpload, Metadata, ScanResult};
use std::future::Future;

/// One poll of an analysis
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub status: AnalysisStatus,
    /// Present only when `status` is `Completed`
    pub result: Option<ScanResult>,
    /// Engine-provided reason when `status` is `Failed`
    pub failure: Option<String>,
}

impl AnalysisReport {
    pub fn pending(status: AnalysisStatus) -> Self {
        Self {
            status,
            result: None,
            failure: None,
        }
    }

    pub fn completed(result: ScanResult) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            result: Some(result),
            failure: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: AnalysisStatus::Failed,
            result: None,
            failure: Some(reason.into()),
        }
    }
}

/// A pre-analyzed record returned by free-text search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    pub result: ScanResult,
    /// Attributes the engine returned with the record
    pub metadata: Option<Metadata>,
}

/// Request/response operations against the analysis engine.
///
/// # Thread Safety
/// Implementations are shared between the orchestrator and its spawned scan
/// tasks, so they must be `Send + Sync` and return `Send` futures.
///
/// # Cancellation
/// Callers cancel by dropping the returned future. Implementations must not
/// rely on a call running to completion.
pub trait AnalysisClient: Send + Sync {
    fn submit_url(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<AnalysisHandle, ClientError>> + Send;

    /// Upload a file. `max_size` is enforced by the caller first and checked
    /// again here; uploads are never chunked or resumed.
    fn submit_file(
        &self,
        upload: &FileUpload,
        max_size: u64,
    ) -> impl Future<Output = Result<AnalysisHandle, ClientError>> + Send;

    fn fetch_analysis(
        &self,
        handle: &AnalysisHandle,
    ) -> impl Future<Output = Result<AnalysisReport, ClientError>> + Send;

    /// `Ok(None)` means the engine has nothing for this identifier
    fn fetch_metadata(
        &self,
        kind: AssetKind,
        identifier: &str,
    ) -> impl Future<Output = Result<Option<Metadata>, ClientError>> + Send;

    fn search(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<Vec<SearchRecord>, ClientError>> + Send;
}
