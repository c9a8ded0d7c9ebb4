//! Scan data model shared by the client, poller, history and orchestrator

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// What the user asked to scan. Exactly one payload per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanRequest {
    Url(String),
    File(FileUpload),
    Query(String),
}

impl ScanRequest {
    pub fn kind(&self) -> ScanKind {
        match self {
            ScanRequest::Url(_) => ScanKind::Url,
            ScanRequest::File(_) => ScanKind::File,
            ScanRequest::Query(_) => ScanKind::Search,
        }
    }

    /// Name shown in history for this request
    pub fn display_name(&self) -> String {
        match self {
            ScanRequest::Url(url) => url.trim().to_string(),
            ScanRequest::File(upload) => upload.filename.clone(),
            ScanRequest::Query(query) => query.trim().to_string(),
        }
    }
}

/// An uploaded file held in memory
#[derive(Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Declared size; may differ from `bytes.len()` for streamed selections
    pub size: u64,
}

impl FileUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self {
            filename: filename.into(),
            bytes,
            size,
        }
    }

    /// Read a file from disk into an upload
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).with_context(|| format!("Cannot read '{}'", path.display()))?;
        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(filename, bytes))
    }
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("filename", &self.filename)
            .field("size", &self.size)
            .finish()
    }
}

/// Input mode of a scan; also recorded on history entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    Url,
    File,
    Search,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Url => "url",
            ScanKind::File => "file",
            ScanKind::Search => "search",
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque analysis id returned by the engine on submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisHandle {
    pub id: String,
    /// Which submission produced the id; carried onto the completed result
    pub kind: ScanKind,
    pub submitted_at: DateTime<Utc>,
}

impl AnalysisHandle {
    pub fn new(id: impl Into<String>, kind: ScanKind) -> Self {
        Self {
            id: id.into(),
            kind,
            submitted_at: Utc::now(),
        }
    }
}

/// Engine-reported analysis state. Only `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

/// Per-category engine tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    #[serde(default)]
    pub harmless: u32,
    #[serde(default)]
    pub suspicious: u32,
    #[serde(default)]
    pub malicious: u32,
    #[serde(default)]
    pub undetected: u32,
}

impl VerdictCounts {
    pub fn total_detections(&self) -> u32 {
        self.malicious.saturating_add(self.suspicious)
    }

    pub fn total_engines(&self) -> u32 {
        self.malicious
            .saturating_add(self.suspicious)
            .saturating_add(self.harmless)
            .saturating_add(self.undetected)
    }

    pub fn verdict(&self) -> Verdict {
        if self.malicious > 0 {
            Verdict::Malicious
        } else if self.suspicious > 0 {
            Verdict::Suspicious
        } else if self.total_engines() > 0 {
            Verdict::Clean
        } else {
            Verdict::Unknown
        }
    }
}

/// Summary verdict derived from the counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unknown,
    Clean,
    Suspicious,
    Malicious,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Unknown => write!(f, "Unknown"),
            Verdict::Clean => write!(f, "Clean"),
            Verdict::Suspicious => write!(f, "Suspicious"),
            Verdict::Malicious => write!(f, "Malicious"),
        }
    }
}

/// One vendor's opinion on the scanned object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVerdict {
    pub category: String,
    pub verdict_label: Option<String>,
}

/// A completed analysis. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: String,
    pub kind: ScanKind,
    pub verdict_counts: VerdictCounts,
    #[serde(default)]
    pub per_engine_results: BTreeMap<String, EngineVerdict>,
    pub completed_at: DateTime<Utc>,
    /// Content hash reported for file analyses
    #[serde(default)]
    pub sha256: Option<String>,
    /// Canonical URL id reported for URL analyses
    #[serde(default)]
    pub url_id: Option<String>,
}

impl ScanResult {
    /// Engines that put the object in the `malicious` category
    pub fn malicious_engines(&self) -> impl Iterator<Item = &str> {
        self.per_engine_results
            .iter()
            .filter(|(_, v)| v.category == "malicious")
            .map(|(name, _)| name.as_str())
    }

    /// Summary counts and per-engine detail agree on malicious detections.
    /// A result without per-engine detail is treated as consistent.
    pub fn is_consistent(&self) -> bool {
        if self.verdict_counts.malicious == 0 || self.per_engine_results.is_empty() {
            return true;
        }
        self.malicious_engines().next().is_some()
    }
}

/// Asset families the engine keeps metadata for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Files,
    Urls,
    Domains,
    IpAddresses,
}

impl AssetKind {
    /// Path segment used by the metadata endpoint
    pub fn path_segment(&self) -> &'static str {
        match self {
            AssetKind::Files => "files",
            AssetKind::Urls => "urls",
            AssetKind::Domains => "domains",
            AssetKind::IpAddresses => "ip_addresses",
        }
    }

    /// Map an engine object `type` (singular) to its asset kind
    pub fn from_object_type(object_type: &str) -> Option<Self> {
        match object_type {
            "file" | "files" => Some(AssetKind::Files),
            "url" | "urls" => Some(AssetKind::Urls),
            "domain" | "domains" => Some(AssetKind::Domains),
            "ip_address" | "ip_addresses" => Some(AssetKind::IpAddresses),
            _ => None,
        }
    }
}

/// Engine-reported attributes for an asset. Carried, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub kind: AssetKind,
    pub identifier: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Metadata {
    /// Build from an untyped value; only JSON objects are accepted
    pub fn from_value(
        kind: AssetKind,
        identifier: impl Into<String>,
        attributes: serde_json::Value,
    ) -> Option<Self> {
        match attributes {
            serde_json::Value::Object(attributes) => Some(Self {
                kind,
                identifier: identifier.into(),
                attributes,
            }),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }
}
