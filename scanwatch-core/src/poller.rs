//! Interval-driven status polling with an attempt budget
//!
//! The loop waits one interval, asks the engine for the analysis, and either
//! finishes (Completed/Failed), reports progress and waits again, or gives up
//! once `max_attempts` polls came back non-terminal. Both the wait and the
//! request race the cancellation token, so an abort drops any in-flight
//! request and no response is observed after cancellation.

use crate::client::AnalysisClient;
use crate::config::PollSettings;
use crate::error::ScanError;
use crate::model::{AnalysisHandle, AnalysisStatus, ScanResult};

use tokio_util::sync::CancellationToken;

/// Progress after a non-terminal poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProgress {
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: AnalysisStatus,
    /// Linear estimate from the attempt count, not engine progress
    pub percent: u8,
}

/// `min(100, attempt / max_attempts * 100)`
pub fn progress_percent(attempt: u32, max_attempts: u32) -> u8 {
    if max_attempts == 0 {
        return 100;
    }
    let pct = u64::from(attempt) * 100 / u64::from(max_attempts);
    pct.min(100) as u8
}

#[derive(Debug, Clone, Copy)]
pub struct Poller {
    settings: PollSettings,
}

impl Poller {
    pub fn new(settings: PollSettings) -> Self {
        Self { settings }
    }

    /// Poll `handle` until it completes, fails, times out, or `cancel` fires.
    pub async fn run<C, F>(
        &self,
        client: &C,
        handle: &AnalysisHandle,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<ScanResult, ScanError>
    where
        C: AnalysisClient,
        F: FnMut(PollProgress) + Send,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let interval = self.settings.interval();

        for attempt in 1..=max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanError::Aborted),
                _ = tokio::time::sleep(interval) => {}
            }

            let report = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanError::Aborted),
                report = client.fetch_analysis(handle) => report,
            };

            let report = report.map_err(|e| {
                log::warn!("Poll {} for {} failed: {}", attempt, handle.id, e);
                ScanError::from(e)
            })?;

            log::debug!(
                "Poll {}/{} for {}: {:?}",
                attempt,
                max_attempts,
                handle.id,
                report.status
            );

            match report.status {
                AnalysisStatus::Completed => {
                    return report.result.ok_or_else(|| {
                        ScanError::Transport("completed analysis carried no result".to_string())
                    });
                }
                AnalysisStatus::Failed => {
                    return Err(ScanError::Failed(
                        report
                            .failure
                            .unwrap_or_else(|| "engine reported failure".to_string()),
                    ));
                }
                status => on_progress(PollProgress {
                    attempt,
                    max_attempts,
                    status,
                    percent: progress_percent(attempt, max_attempts),
                }),
            }
        }

        log::warn!(
            "Analysis {} still pending after {} polls",
            handle.id,
            max_attempts
        );
        Err(ScanError::Timeout {
            attempts: max_attempts,
        })
    }
}
