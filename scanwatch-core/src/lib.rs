//! scanwatch core library
//! Submits URLs and files to a remote analysis engine, polls for verdicts,
//! enriches completed results and keeps a short scan history

pub mod client;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod hashing;
pub mod history;
pub mod model;
pub mod orchestrator;
pub mod poller;
mod sync;

pub use client::{AnalysisClient, AnalysisReport, HttpAnalysisClient, SearchRecord};
pub use config::{PollSettings, ScanConfig};
pub use error::{ClientError, HistoryError, ScanError};
pub use history::{HistoryEntry, HistoryStore, RestHistorySink, SessionCache};
pub use model::{
    AnalysisHandle, AnalysisStatus, AssetKind, FileUpload, Metadata, ScanKind, ScanRequest,
    ScanResult, Verdict, VerdictCounts,
};
pub use orchestrator::{wait_for_terminal, ScanOrchestrator, ScanPhase, ScanView};
pub use poller::Poller;

/// Get the library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
