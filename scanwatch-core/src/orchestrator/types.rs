use crate::client::SearchRecord;
use crate::error::ScanError;
use crate::history::HistoryEntry;
use crate::model::{AnalysisHandle, Metadata, ScanKind, ScanResult};
use crate::poller::PollProgress;

/// Where the active scan is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    #[default]
    Idle,
    Submitting,
    Polling,
    Enriching,
    Completed,
    Failed,
}

impl ScanPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanPhase::Completed | ScanPhase::Failed)
    }

    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ScanPhase::Submitting | ScanPhase::Polling | ScanPhase::Enriching
        )
    }
}

/// Poll progress as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub attempt: u32,
    pub max_attempts: u32,
    pub percent: u8,
    /// Always true: the percentage counts polls, the engine reports no progress
    pub approximate: bool,
}

impl From<PollProgress> for ScanProgress {
    fn from(p: PollProgress) -> Self {
        Self {
            attempt: p.attempt,
            max_attempts: p.max_attempts,
            percent: p.percent,
            approximate: true,
        }
    }
}

/// Published state of the orchestrator. Every field belongs to the scan
/// identified by `generation`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanView {
    pub generation: u64,
    pub mode: Option<ScanKind>,
    pub phase: ScanPhase,
    pub progress: Option<ScanProgress>,
    pub error: Option<ScanError>,
    pub handle: Option<AnalysisHandle>,
    /// Completed result; the primary hit in search mode
    pub result: Option<ScanResult>,
    pub metadata: Option<Metadata>,
    /// Every search hit, primary first
    pub hits: Vec<SearchRecord>,
    /// History entry written for this scan
    pub entry: Option<HistoryEntry>,
}

impl ScanView {
    pub(super) fn starting(generation: u64, mode: ScanKind) -> Self {
        Self {
            generation,
            mode: Some(mode),
            phase: ScanPhase::Submitting,
            ..Self::default()
        }
    }

    pub fn can_retry(&self) -> bool {
        self.phase == ScanPhase::Failed
    }
}
