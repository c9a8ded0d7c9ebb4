use crate::model::{Metadata, ScanKind, ScanResult, VerdictCounts};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub local_id: String,
    /// Set once the durable sink acknowledges the write
    #[serde(default)]
    pub remote_id: Option<String>,
    pub name: String,
    pub kind: ScanKind,
    pub verdict_counts: VerdictCounts,
    pub result: ScanResult,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub(crate) fn new(
        result: ScanResult,
        metadata: Option<Metadata>,
        name: String,
        kind: ScanKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            local_id: uuid::Uuid::new_v4().to_string(),
            remote_id: None,
            name,
            kind,
            verdict_counts: result.verdict_counts,
            result,
            metadata,
            created_at,
        }
    }

    /// Identity used for de-duplication: `remote_id ?? local_id`
    pub fn key(&self) -> &str {
        self.remote_id.as_deref().unwrap_or(&self.local_id)
    }

    /// Redisplay a past scan without re-scanning
    pub fn restore(&self) -> (ScanResult, Option<Metadata>) {
        (self.result.clone(), self.metadata.clone())
    }
}

/// Row shape of the durable `scan_history` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRow {
    pub analysis_id: String,
    #[serde(default)]
    pub local_id: Option<String>,
    pub name: String,
    pub kind: ScanKind,
    pub verdict_counts: VerdictCounts,
    pub result: ScanResult,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

impl DurableRow {
    pub fn from_entry(entry: &HistoryEntry) -> Self {
        Self {
            analysis_id: entry.result.id.clone(),
            local_id: Some(entry.local_id.clone()),
            name: entry.name.clone(),
            kind: entry.kind,
            verdict_counts: entry.verdict_counts,
            result: entry.result.clone(),
            metadata: entry.metadata.clone(),
            created_at: entry.created_at,
        }
    }

    pub fn into_entry(self) -> HistoryEntry {
        HistoryEntry {
            local_id: self
                .local_id
                .unwrap_or_else(|| format!("remote:{}", self.analysis_id)),
            remote_id: Some(self.analysis_id),
            name: self.name,
            kind: self.kind,
            verdict_counts: self.verdict_counts,
            result: self.result,
            metadata: self.metadata,
            created_at: self.created_at,
        }
    }
}
