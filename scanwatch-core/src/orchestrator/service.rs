use super::types::{ScanPhase, ScanProgress, ScanView};

use crate::client::AnalysisClient;
use crate::enrichment::enrich;
use crate::error::ScanError;
use crate::hashing::sha256_hex;
use crate::history::{DurableSink, HistoryStore};
use crate::model::{FileUpload, ScanKind, ScanRequest};
use crate::poller::Poller;
use crate::sync::lock_or_recover;

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The scan currently allowed to publish
struct ActiveScan {
    generation: u64,
    token: CancellationToken,
    last_request: Option<ScanRequest>,
}

struct Shared<C, D> {
    client: Arc<C>,
    history: Arc<HistoryStore<D>>,
    poller: Poller,
    max_file_bytes: u64,
    root: CancellationToken,
    active: Mutex<ActiveScan>,
    view_tx: watch::Sender<ScanView>,
}

/// Runs one scan pipeline at a time: submit, poll, enrich, record.
///
/// Starting a scan cancels whatever was running. Each pipeline runs as a
/// spawned task holding a child token of the orchestrator's root token, and
/// its view updates are dropped unless its generation is still the active one.
pub struct ScanOrchestrator<C, D> {
    shared: Arc<Shared<C, D>>,
}

impl<C, D> ScanOrchestrator<C, D>
where
    C: AnalysisClient + 'static,
    D: DurableSink + 'static,
{
    pub fn new(
        client: Arc<C>,
        history: Arc<HistoryStore<D>>,
        poller: Poller,
        max_file_bytes: u64,
    ) -> Self {
        let root = CancellationToken::new();
        let (view_tx, _) = watch::channel(ScanView::default());
        Self {
            shared: Arc::new(Shared {
                client,
                history,
                poller,
                max_file_bytes,
                active: Mutex::new(ActiveScan {
                    generation: 0,
                    token: root.child_token(),
                    last_request: None,
                }),
                root,
                view_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanView> {
        self.shared.view_tx.subscribe()
    }

    /// Snapshot of the published view
    pub fn view(&self) -> ScanView {
        self.shared.view_tx.borrow().clone()
    }

    pub fn history(&self) -> &Arc<HistoryStore<D>> {
        &self.shared.history
    }

    /// Abort the in-flight scan, reset the view, and start `request`.
    ///
    /// Input is validated before any network call; a rejected request is
    /// published as `Failed` and also returned. Must be called from within a
    /// tokio runtime.
    pub fn start(&self, request: ScanRequest) -> Result<u64, ScanError> {
        let shared = &self.shared;
        let validation = validate(&request, shared.max_file_bytes);

        let (generation, token) = {
            let mut active = lock_or_recover(&shared.active);
            active.token.cancel();
            active.generation += 1;
            active.token = shared.root.child_token();
            active.last_request = Some(request.clone());

            let mut view = ScanView::starting(active.generation, request.kind());
            if let Err(ref e) = validation {
                view.phase = ScanPhase::Failed;
                view.error = Some(e.clone());
            }
            shared.view_tx.send_replace(view);
            (active.generation, active.token.clone())
        };

        if let Err(e) = validation {
            log::info!("Rejected {} scan: {}", request.kind(), e);
            return Err(e);
        }

        log::info!(
            "Starting {} scan #{} for {}",
            request.kind(),
            generation,
            request.display_name()
        );
        let shared = Arc::clone(shared);
        tokio::spawn(async move { shared.run(generation, token, request).await });
        Ok(generation)
    }

    pub fn scan_url(&self, url: impl Into<String>) -> Result<u64, ScanError> {
        self.start(ScanRequest::Url(url.into()))
    }

    pub fn scan_file(&self, upload: FileUpload) -> Result<u64, ScanError> {
        self.start(ScanRequest::File(upload))
    }

    pub fn search(&self, query: impl Into<String>) -> Result<u64, ScanError> {
        self.start(ScanRequest::Query(query.into()))
    }

    /// Re-run the last submitted request from scratch
    pub fn retry(&self) -> Result<u64, ScanError> {
        let last = lock_or_recover(&self.shared.active).last_request.clone();
        match last {
            Some(request) => self.start(request),
            None => Err(ScanError::InvalidInput("nothing to retry".to_string())),
        }
    }

    /// Abort the in-flight scan without starting another
    pub fn cancel(&self) {
        let active = lock_or_recover(&self.shared.active);
        if active.token.is_cancelled() {
            return;
        }
        active.token.cancel();
        log::info!("Cancelled scan #{}", active.generation);
        self.shared.view_tx.send_modify(|view| {
            if view.generation == active.generation && view.phase.is_busy() {
                view.phase = ScanPhase::Idle;
                view.progress = None;
            }
        });
    }
}

impl<C, D> Drop for ScanOrchestrator<C, D> {
    fn drop(&mut self) {
        self.shared.root.cancel();
    }
}

/// Wait until scan `generation` reaches a terminal phase, or is superseded or
/// cancelled. Returns the view at that point.
pub async fn wait_for_terminal(rx: &mut watch::Receiver<ScanView>, generation: u64) -> ScanView {
    let waited = rx
        .wait_for(|v| {
            v.generation != generation || v.phase.is_terminal() || v.phase == ScanPhase::Idle
        })
        .await
        .map(|v| v.clone());
    match waited {
        Ok(view) => view,
        Err(_) => rx.borrow().clone(),
    }
}

fn validate(request: &ScanRequest, max_file_bytes: u64) -> Result<(), ScanError> {
    match request {
        ScanRequest::Url(url) if url.trim().is_empty() => {
            Err(ScanError::InvalidInput("URL is empty".to_string()))
        }
        ScanRequest::Query(query) if query.trim().is_empty() => {
            Err(ScanError::InvalidInput("search query is empty".to_string()))
        }
        ScanRequest::File(upload) => {
            let size = upload.size.max(upload.bytes.len() as u64);
            if size == 0 {
                return Err(ScanError::InvalidInput("no file selected".to_string()));
            }
            if size > max_file_bytes {
                return Err(ScanError::InvalidInput(format!(
                    "file is {} bytes, the limit is {} bytes",
                    size, max_file_bytes
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

impl<C, D> Shared<C, D>
where
    C: AnalysisClient,
    D: DurableSink,
{
    /// Apply `update` only while `generation` is the live scan
    fn publish<F>(&self, generation: u64, token: &CancellationToken, update: F) -> bool
    where
        F: FnOnce(&mut ScanView),
    {
        let active = lock_or_recover(&self.active);
        if active.generation != generation || token.is_cancelled() {
            log::debug!("Dropping stale update from scan #{}", generation);
            return false;
        }
        self.view_tx.send_modify(update);
        true
    }

    async fn run(&self, generation: u64, token: CancellationToken, request: ScanRequest) {
        let outcome = match request {
            ScanRequest::Url(ref url) => {
                let submission = Submission::Url(url.trim());
                self.scan(generation, &token, &request, submission).await
            }
            ScanRequest::File(ref upload) => {
                let submission = Submission::File(upload);
                self.scan(generation, &token, &request, submission).await
            }
            ScanRequest::Query(ref query) => self.search(generation, &token, query.trim()).await,
        };

        match outcome {
            Ok(()) => {}
            Err(ScanError::Aborted) => log::debug!("Scan #{} aborted", generation),
            Err(e) => {
                log::warn!("Scan #{} failed: {}", generation, e);
                self.publish(generation, &token, |view| {
                    view.phase = ScanPhase::Failed;
                    view.progress = None;
                    view.error = Some(e);
                });
            }
        }
    }

    async fn scan(
        &self,
        generation: u64,
        token: &CancellationToken,
        request: &ScanRequest,
        submission: Submission<'_>,
    ) -> Result<(), ScanError> {
        let upload_sha256 = match submission {
            Submission::File(upload) => Some(sha256_hex(&upload.bytes)),
            Submission::Url(_) => None,
        };

        let submitted = match submission {
            Submission::Url(url) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ScanError::Aborted),
                    r = self.client.submit_url(url) => r,
                }
            }
            Submission::File(upload) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ScanError::Aborted),
                    r = self.client.submit_file(upload, self.max_file_bytes) => r,
                }
            }
        };
        let handle = submitted?;
        log::info!("Scan #{} submitted as analysis {}", generation, handle.id);

        let published = handle.clone();
        self.publish(generation, token, move |view| {
            view.phase = ScanPhase::Polling;
            view.handle = Some(published);
        });

        let result = self
            .poller
            .run(self.client.as_ref(), &handle, token, |progress| {
                self.publish(generation, token, |view| {
                    view.progress = Some(ScanProgress::from(progress));
                });
            })
            .await?;

        let completed = result.clone();
        self.publish(generation, token, move |view| {
            view.phase = ScanPhase::Enriching;
            view.result = Some(completed);
        });

        let metadata = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ScanError::Aborted),
            m = enrich(self.client.as_ref(), &result, upload_sha256.as_deref()) => m,
        };

        let entry = self
            .history
            .record_unless_cancelled(
                result,
                metadata.clone(),
                request.display_name(),
                request.kind(),
                token,
            )
            .await
            .ok_or(ScanError::Aborted)?;

        self.publish(generation, token, move |view| {
            view.phase = ScanPhase::Completed;
            view.metadata = metadata;
            view.entry = Some(entry);
        });
        Ok(())
    }

    async fn search(
        &self,
        generation: u64,
        token: &CancellationToken,
        query: &str,
    ) -> Result<(), ScanError> {
        let hits = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ScanError::Aborted),
            r = self.client.search(query) => r?,
        };
        log::info!("Search #{} for '{}' returned {} hit(s)", generation, query, hits.len());

        let entry = match hits.first() {
            Some(primary) => Some(
                self.history
                    .record_unless_cancelled(
                        primary.result.clone(),
                        primary.metadata.clone(),
                        query,
                        ScanKind::Search,
                        token,
                    )
                    .await
                    .ok_or(ScanError::Aborted)?,
            ),
            None if token.is_cancelled() => return Err(ScanError::Aborted),
            None => None,
        };

        self.publish(generation, token, move |view| {
            view.phase = ScanPhase::Completed;
            if let Some(primary) = hits.first() {
                view.result = Some(primary.result.clone());
                view.metadata = primary.metadata.clone();
            }
            view.hits = hits;
            view.entry = entry;
        });
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Submission<'a> {
    Url(&'a str),
    File(&'a FileUpload),
}

#[cfg(test)]
mod tests {
    use super::validate;
    use crate::error::ScanError;
    use crate::model::{FileUpload, ScanRequest};

    #[test]
    fn blank_url_and_query_are_rejected() {
        assert!(matches!(
            validate(&ScanRequest::Url("   ".into()), 10),
            Err(ScanError::InvalidInput(_))
        ));
        assert!(matches!(
            validate(&ScanRequest::Query(String::new()), 10),
            Err(ScanError::InvalidInput(_))
        ));
    }

    #[test]
    fn empty_and_oversized_files_are_rejected() {
        let empty = FileUpload::new("empty.bin", Vec::new());
        assert!(validate(&ScanRequest::File(empty), 10).is_err());

        let big = FileUpload::new("big.bin", vec![0u8; 11]);
        assert!(validate(&ScanRequest::File(big), 10).is_err());

        let ok = FileUpload::new("ok.bin", vec![0u8; 10]);
        assert!(validate(&ScanRequest::File(ok), 10).is_ok());
    }

    #[test]
    fn declared_size_counts_toward_the_cap() {
        let mut upload = FileUpload::new("stream.bin", vec![1, 2, 3]);
        upload.size = 50 * 1024 * 1024;
        assert!(validate(&ScanRequest::File(upload), 32 * 1024 * 1024).is_err());
    }
}
