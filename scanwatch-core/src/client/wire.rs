//! JSON shapes of the engine's v3 API and their mapping onto the model

use super::{AnalysisReport, SearchRecord};
use crate::model::{
    AnalysisHandle, AnalysisStatus, AssetKind, EngineVerdict, Metadata, ScanKind, ScanResult,
    VerdictCounts,
};

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    data: SubmissionData,
}

#[derive(Debug, Deserialize)]
struct SubmissionData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    data: AnalysisData,
    #[serde(default)]
    meta: Option<AnalysisMeta>,
}

#[derive(Debug, Deserialize)]
struct AnalysisData {
    id: String,
    attributes: AnalysisAttributes,
}

#[derive(Debug, Deserialize)]
struct AnalysisAttributes {
    status: String,
    #[serde(default)]
    stats: VerdictCounts,
    #[serde(default)]
    results: HashMap<String, WireEngineResult>,
    #[serde(default)]
    date: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEngineResult {
    category: String,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisMeta {
    #[serde(default)]
    file_info: Option<FileInfo>,
    #[serde(default)]
    url_info: Option<UrlInfo>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UrlInfo {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    data: WireObject,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<WireObject>,
}

#[derive(Debug, Deserialize)]
struct WireObject {
    id: String,
    #[serde(rename = "type")]
    object_type: String,
    #[serde(default)]
    attributes: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

fn parse_status(raw: &str) -> Option<AnalysisStatus> {
    match raw {
        "queued" => Some(AnalysisStatus::Queued),
        "in-progress" | "in_progress" | "running" => Some(AnalysisStatus::InProgress),
        "completed" => Some(AnalysisStatus::Completed),
        "failed" | "error" => Some(AnalysisStatus::Failed),
        _ => None,
    }
}

fn timestamp_or_now(secs: Option<i64>) -> DateTime<Utc> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
        .unwrap_or_else(Utc::now)
}

fn engine_results(raw: HashMap<String, WireEngineResult>) -> BTreeMap<String, EngineVerdict> {
    raw.into_iter()
        .map(|(vendor, r)| {
            (
                vendor,
                EngineVerdict {
                    category: r.category,
                    verdict_label: r.result,
                },
            )
        })
        .collect()
}

fn warn_if_inconsistent(result: &ScanResult) {
    if !result.is_consistent() {
        log::warn!(
            "Analysis {} reports {} malicious but no engine result is malicious",
            result.id,
            result.verdict_counts.malicious
        );
    }
}

/// Test-support helper: parse a submission response into a handle.
#[doc(hidden)]
pub fn parse_submission_json(
    json: &str,
    kind: ScanKind,
) -> Result<AnalysisHandle, serde_json::Error> {
    let resp: SubmissionResponse = serde_json::from_str(json)?;
    Ok(AnalysisHandle::new(resp.data.id, kind))
}

/// Test-support helper: parse an analysis poll response.
///
/// An unknown status string is treated as `InProgress` so the poll budget,
/// not the parser, decides when to give up.
#[doc(hidden)]
pub fn parse_analysis_json(
    json: &str,
    handle: &AnalysisHandle,
) -> Result<AnalysisReport, serde_json::Error> {
    let resp: AnalysisResponse = serde_json::from_str(json)?;
    let attrs = resp.data.attributes;

    let status = parse_status(&attrs.status).unwrap_or_else(|| {
        log::debug!(
            "Unknown analysis status {:?} for {}, treating as in progress",
            attrs.status,
            handle.id
        );
        AnalysisStatus::InProgress
    });

    match status {
        AnalysisStatus::Completed => {
            let meta = resp.meta.unwrap_or_default();
            let result = ScanResult {
                id: resp.data.id,
                kind: handle.kind,
                verdict_counts: attrs.stats,
                per_engine_results: engine_results(attrs.results),
                completed_at: timestamp_or_now(attrs.date),
                sha256: meta.file_info.and_then(|f| f.sha256),
                url_id: meta.url_info.and_then(|u| u.id),
            };
            warn_if_inconsistent(&result);
            Ok(AnalysisReport::completed(result))
        }
        AnalysisStatus::Failed => Ok(AnalysisReport::failed(
            attrs
                .error
                .unwrap_or_else(|| "engine reported failure".to_string()),
        )),
        pending => Ok(AnalysisReport::pending(pending)),
    }
}

/// Test-support helper: parse an object lookup into metadata.
///
/// Returns `Ok(None)` when the object carries no attribute map.
#[doc(hidden)]
pub fn parse_metadata_json(
    json: &str,
    kind: AssetKind,
    identifier: &str,
) -> Result<Option<Metadata>, serde_json::Error> {
    let resp: ObjectResponse = serde_json::from_str(json)?;
    Ok(Metadata::from_value(kind, identifier, resp.data.attributes))
}

/// Test-support helper: parse a search response into completed records.
///
/// Objects of types without analysis stats (comments, collections) are skipped.
#[doc(hidden)]
pub fn parse_search_json(json: &str) -> Result<Vec<SearchRecord>, serde_json::Error> {
    let resp: SearchResponse = serde_json::from_str(json)?;
    let mut records = Vec::with_capacity(resp.data.len());

    for obj in resp.data {
        let Some(asset) = AssetKind::from_object_type(&obj.object_type) else {
            log::debug!("Skipping search hit of type {}", obj.object_type);
            continue;
        };

        let stats: VerdictCounts = obj
            .attributes
            .get("last_analysis_stats")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let results: HashMap<String, WireEngineResult> = obj
            .attributes
            .get("last_analysis_results")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let date = obj
            .attributes
            .get("last_analysis_date")
            .and_then(|v| v.as_i64());

        let result = ScanResult {
            id: obj.id.clone(),
            kind: ScanKind::Search,
            verdict_counts: stats,
            per_engine_results: engine_results(results),
            completed_at: timestamp_or_now(date),
            sha256: (asset == AssetKind::Files).then(|| obj.id.clone()),
            url_id: (asset == AssetKind::Urls).then(|| obj.id.clone()),
        };
        warn_if_inconsistent(&result);

        let metadata = Metadata::from_value(asset, obj.id, obj.attributes);
        records.push(SearchRecord { result, metadata });
    }

    Ok(records)
}

/// Pull the engine's error message out of a non-success body, if it has one
pub(super) fn error_message(body: &str) -> Option<String> {
    let resp: ErrorResponse = serde_json::from_str(body).ok()?;
    Some(match resp.error.code {
        Some(code) if !code.is_empty() => format!("{}: {}", code, resp.error.message),
        _ => resp.error.message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenated_in_progress_is_recognized() {
        assert_eq!(parse_status("in-progress"), Some(AnalysisStatus::InProgress));
        assert_eq!(parse_status("bogus"), None);
    }

    #[test]
    fn error_message_includes_code() {
        let body = r#"{"error": {"code": "QuotaExceededError", "message": "Quota exceeded"}}"#;
        assert_eq!(
            error_message(body).as_deref(),
            Some("QuotaExceededError: Quota exceeded")
        );
        assert_eq!(error_message("<html>bad gateway</html>"), None);
    }

    #[test]
    fn unknown_status_is_pending() {
        let handle = AnalysisHandle::new("x", ScanKind::Url);
        let json = r#"{"data": {"id": "x", "attributes": {"status": "warming-up"}}}"#;
        let report = parse_analysis_json(json, &handle).unwrap();
        assert_eq!(report.status, AnalysisStatus::InProgress);
        assert!(report.result.is_none());
    }

    #[test]
    fn failed_status_carries_reason() {
        let handle = AnalysisHandle::new("x", ScanKind::File);
        let json = r#"{"data": {"id": "x", "attributes": {"status": "failed", "error": "corrupt archive"}}}"#;
        let report = parse_analysis_json(json, &handle).unwrap();
        assert_eq!(report.status, AnalysisStatus::Failed);
        assert_eq!(report.failure.as_deref(), Some("corrupt archive"));
    }
}
