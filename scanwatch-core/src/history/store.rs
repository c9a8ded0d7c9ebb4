//! Two-tier history: a fast session cache in front of a slow durable sink
//!
//! Entries are identified by `remote_id ?? local_id`. The remote id is the
//! analysis id, assigned once the durable sink acknowledges the write, and a
//! durable row carries the `local_id` it was written with so the two copies of
//! one scan link up on merge.

use super::cache::SessionCache;
use super::durable::{DurableSink, RestHistorySink};
use super::entry::{DurableRow, HistoryEntry};
use crate::config::ScanConfig;
use crate::model::{Metadata, ScanKind, ScanResult};
use crate::sync::lock_or_recover;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Whether `load()` may pull durable rows back in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuppressionState {
    #[default]
    Normal,
    /// Set by `clear()` until the next `record()`. Mirrored by the cache's
    /// cleared marker, so it ends with the session the cache belongs to.
    Suppressed,
}

pub struct HistoryStore<D> {
    cache: SessionCache,
    durable: Option<D>,
    cap: usize,
    state: Mutex<SuppressionState>,
}

impl HistoryStore<RestHistorySink> {
    /// Cache file plus the REST sink when `history_url` is configured
    pub fn from_config(config: &ScanConfig) -> Self {
        let durable = RestHistorySink::from_config(config);
        if durable.is_none() {
            info!("No durable history configured, keeping history locally");
        }
        Self::new(
            SessionCache::new(config.cache_path.clone()),
            durable,
            config.history_cap,
        )
    }
}

impl<D: DurableSink> HistoryStore<D> {
    /// Picks up a suppression left by an earlier `clear` on the same cache
    pub fn new(cache: SessionCache, durable: Option<D>, cap: usize) -> Self {
        let state = if cache.is_marked_cleared() {
            debug!("History was cleared earlier in this session");
            SuppressionState::Suppressed
        } else {
            SuppressionState::Normal
        };
        Self {
            cache,
            durable,
            cap: cap.max(1),
            state: Mutex::new(state),
        }
    }

    pub fn local_only(cache: SessionCache, cap: usize) -> Self {
        Self::new(cache, None, cap)
    }

    pub fn state(&self) -> SuppressionState {
        *lock_or_recover(&self.state)
    }

    fn set_state(&self, state: SuppressionState) {
        let mut current = lock_or_recover(&self.state);
        *current = state;
        if let Err(e) = self
            .cache
            .set_cleared_marker(state == SuppressionState::Suppressed)
        {
            warn!("Failed to persist history suppression: {}", e);
        }
    }

    /// Session cache only, no I/O beyond what the cache already holds
    pub fn cached(&self) -> Vec<HistoryEntry> {
        self.cache.entries()
    }

    /// Record a completed scan. The durable write is best-effort; the cache
    /// write always lands in memory.
    pub async fn record(
        &self,
        result: ScanResult,
        metadata: Option<Metadata>,
        name: impl Into<String>,
        kind: ScanKind,
    ) -> HistoryEntry {
        let mut entry = HistoryEntry::new(result, metadata, name.into(), kind, self.next_timestamp());
        self.write_durable(&mut entry).await;
        self.commit(&entry, || true);
        entry
    }

    /// `record` on behalf of a scan that may be aborted meanwhile.
    ///
    /// Returns `None`, leaving the cache and the suppression state untouched,
    /// if `token` fires before the entry reaches the cache. A durable insert
    /// still in flight at that point is dropped.
    pub async fn record_unless_cancelled(
        &self,
        result: ScanResult,
        metadata: Option<Metadata>,
        name: impl Into<String>,
        kind: ScanKind,
        token: &CancellationToken,
    ) -> Option<HistoryEntry> {
        let mut entry = HistoryEntry::new(result, metadata, name.into(), kind, self.next_timestamp());

        let aborted = tokio::select! {
            biased;
            _ = token.cancelled() => true,
            _ = self.write_durable(&mut entry) => false,
        };

        if !aborted && self.commit(&entry, || !token.is_cancelled()) {
            return Some(entry);
        }
        debug!("Not recording {}: scan was aborted", entry.result.id);
        None
    }

    async fn write_durable(&self, entry: &mut HistoryEntry) {
        if let Some(ref sink) = self.durable {
            match sink.insert(&DurableRow::from_entry(entry)).await {
                Ok(()) => entry.remote_id = Some(entry.result.id.clone()),
                Err(e) => warn!("Durable history write for {} failed: {}", entry.result.id, e),
            }
        }
    }

    /// Place `entry` in the cache by `created_at`, unless `live` says no once
    /// the cache lock is held. Returns whether the entry went in.
    fn commit<F>(&self, entry: &HistoryEntry, live: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let cap = self.cap;
        let mut committed = false;
        let result = self.cache.update(|entries| {
            if !live() {
                return;
            }
            entries.retain(|e| e.key() != entry.key() && e.local_id != entry.local_id);
            let at = entries
                .iter()
                .position(|e| e.created_at < entry.created_at)
                .unwrap_or(entries.len());
            entries.insert(at, entry.clone());
            entries.truncate(cap);
            committed = true;
        });
        if let Err(e) = result {
            warn!("Failed to persist history cache: {}", e);
        }
        if !committed {
            return false;
        }

        self.set_state(SuppressionState::Normal);
        debug!("Recorded {} ({}) as {}", entry.name, entry.kind, entry.key());
        true
    }

    /// Merged history, newest first, at most `cap` entries
    pub async fn load(&self) -> Vec<HistoryEntry> {
        if self.state() == SuppressionState::Suppressed {
            return self.cached();
        }
        let sink = match self.durable {
            Some(ref sink) => sink,
            None => return self.cached(),
        };

        let rows = match sink.recent(self.cap).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Durable history unavailable, using session cache: {}", e);
                return self.cached();
            }
        };

        // clear() may have run while the read was in flight.
        if self.state() == SuppressionState::Suppressed {
            return self.cached();
        }

        let remote: Vec<HistoryEntry> = rows.into_iter().map(DurableRow::into_entry).collect();
        let cap = self.cap;
        match self
            .cache
            .update(move |entries| *entries = reconcile(std::mem::take(entries), remote, cap))
        {
            Ok(merged) => merged,
            Err(e) => {
                warn!("Failed to persist merged history: {}", e);
                self.cached()
            }
        }
    }

    /// Empty the session cache and hide durable rows for the rest of the
    /// session, across reopenings of the same cache. Durable rows are never
    /// deleted.
    pub fn clear(&self) {
        self.set_state(SuppressionState::Suppressed);
        if let Err(e) = self.cache.clear() {
            warn!("Failed to persist cleared history: {}", e);
        }
    }

    pub fn restore(&self, entry: &HistoryEntry) -> (ScanResult, Option<Metadata>) {
        entry.restore()
    }

    /// Strictly after the newest cached entry so insertion order survives
    /// the sort in `reconcile`.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.cache.entries().iter().map(|e| e.created_at).max() {
            Some(newest) if newest >= now => newest + Duration::microseconds(1),
            _ => now,
        }
    }
}

/// Union by key, most recent wins, newest first, capped.
///
/// Local entries that the sink has acknowledged under their `local_id` pick
/// up the sink's id first, so both copies share one key.
pub fn reconcile(
    local: Vec<HistoryEntry>,
    remote: Vec<HistoryEntry>,
    cap: usize,
) -> Vec<HistoryEntry> {
    let linked: HashMap<String, String> = remote
        .iter()
        .filter_map(|r| r.remote_id.clone().map(|id| (r.local_id.clone(), id)))
        .collect();

    let mut by_key: HashMap<String, HistoryEntry> = HashMap::new();
    for mut entry in local.into_iter().chain(remote) {
        if entry.remote_id.is_none() {
            entry.remote_id = linked.get(&entry.local_id).cloned();
        }
        let key = entry.key().to_string();
        match by_key.get(&key) {
            Some(existing) if !supersedes(&entry, existing) => {}
            _ => {
                by_key.insert(key, entry);
            }
        }
    }

    let mut merged: Vec<HistoryEntry> = by_key.into_values().collect();
    merged.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.local_id.cmp(&b.local_id))
    });
    merged.truncate(cap);
    merged
}

fn supersedes(candidate: &HistoryEntry, existing: &HistoryEntry) -> bool {
    if candidate.created_at != existing.created_at {
        return candidate.created_at > existing.created_at;
    }
    candidate.remote_id.is_some() && existing.remote_id.is_none()
}
