//! Scan orchestration: one active pipeline, published through a watch channel

mod service;
mod types;

pub use service::{wait_for_terminal, ScanOrchestrator};
pub use types::{ScanPhase, ScanProgress, ScanView};
