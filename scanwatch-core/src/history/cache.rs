//! Ephemeral history list, optionally backed by one JSON file

use super::entry::HistoryEntry;
use crate::error::HistoryError;
use crate::sync::lock_or_recover;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Fast local copy of the history. Always available, even offline.
///
/// A file-backed cache also owns the "cleared" marker (`<stem>.cleared` beside
/// the list), so the flag lives exactly as long as the list it guards.
pub struct SessionCache {
    path: Option<PathBuf>,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl SessionCache {
    /// Open the cache at `path`, starting from whatever list it already holds
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    /// Cache that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn load_from_disk(path: &Path) -> Vec<HistoryEntry> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<Vec<HistoryEntry>>(&content) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "Discarding unreadable history cache {}: {}",
                    path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        lock_or_recover(&self.entries).clone()
    }

    /// Replace the whole list and re-serialize it. The in-memory copy is
    /// updated even when the disk write fails.
    pub fn replace(&self, entries: Vec<HistoryEntry>) -> Result<(), HistoryError> {
        self.update(|current| *current = entries).map(|_| ())
    }

    /// Edit the list under the lock, then re-serialize it in full. The edit
    /// sticks in memory even when the disk write fails.
    pub fn update<F>(&self, edit: F) -> Result<Vec<HistoryEntry>, HistoryError>
    where
        F: FnOnce(&mut Vec<HistoryEntry>),
    {
        let mut guard = lock_or_recover(&self.entries);
        edit(&mut guard);
        let snapshot = guard.clone();

        if let Some(ref path) = self.path {
            let json = serde_json::to_string_pretty(&snapshot)?;
            write_atomically(path, &json)?;
        }
        Ok(snapshot)
    }

    pub fn clear(&self) -> Result<(), HistoryError> {
        self.replace(Vec::new())
    }

    fn marker_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| p.with_extension("cleared"))
    }

    /// Whether a previous `clear` in this session left its marker behind
    pub fn is_marked_cleared(&self) -> bool {
        self.marker_path().map_or(false, |p| p.exists())
    }

    /// Create or remove the cleared marker. No-op for an in-memory cache.
    pub fn set_cleared_marker(&self, cleared: bool) -> Result<(), HistoryError> {
        let marker = match self.marker_path() {
            Some(marker) => marker,
            None => return Ok(()),
        };
        if cleared {
            if let Some(parent) = marker.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&marker, b"")?;
        } else if marker.exists() {
            fs::remove_file(&marker)?;
        }
        Ok(())
    }
}

/// Write to a temp file, then rename over the target
fn write_atomically(path: &Path, contents: &str) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)?;

    if fs::rename(&tmp_path, path).is_ok() {
        return Ok(());
    }

    // rename can fail on Windows if the destination exists.
    let _ = fs::remove_file(path);
    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e.into())
        }
    }
}
