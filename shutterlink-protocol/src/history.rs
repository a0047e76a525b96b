//! Completed-transfer history.
//!
//! Append-only, newest first, capped at the most recent 500 entries and
//! persisted as JSON on every append. The on-disk field names match the
//! log files written by earlier releases.

use crate::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Maximum number of entries retained
pub const MAX_HISTORY_ENTRIES: usize = 500;

/// One completed inbound transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Local>,
    #[serde(rename = "photographer")]
    pub sender: String,
    pub file_count: usize,
    pub total_size: u64,
    pub folder: String,
    /// Day bucket label, when day organization was active
    #[serde(default)]
    pub day: Option<String>,
}

/// Persistent, capped history list.
#[derive(Debug)]
pub struct TransferHistory {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl TransferHistory {
    /// Load history from `path`; missing or unreadable files start empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("discarding unreadable history {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self { path, entries }
    }

    /// Prepend an entry, enforce the cap, and persist.
    pub fn add(&mut self, entry: HistoryEntry) -> Result<()> {
        self.entries.insert(0, entry);
        self.entries.truncate(MAX_HISTORY_ENTRIES);
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    /// Newest-first snapshot.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Drop all entries and persist the empty list.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(sender: &str) -> HistoryEntry {
        HistoryEntry {
            timestamp: Local::now(),
            sender: sender.to_string(),
            file_count: 1,
            total_size: 1024,
            folder: "/data/01 - Ana".to_string(),
            day: None,
        }
    }

    #[test]
    fn newest_entry_first() {
        let temp = TempDir::new().unwrap();
        let mut history = TransferHistory::load(temp.path().join("history.json"));

        history.add(entry("Ana")).unwrap();
        history.add(entry("Mihai")).unwrap();

        assert_eq!(history.entries()[0].sender, "Mihai");
        assert_eq!(history.entries()[1].sender, "Ana");
    }

    #[test]
    fn capped_at_max_entries() {
        let temp = TempDir::new().unwrap();
        let mut history = TransferHistory::load(temp.path().join("history.json"));

        for i in 0..(MAX_HISTORY_ENTRIES + 20) {
            history.add(entry(&format!("p{}", i))).unwrap();
        }

        assert_eq!(history.entries().len(), MAX_HISTORY_ENTRIES);
        // The oldest entries were dropped.
        assert_eq!(
            history.entries()[0].sender,
            format!("p{}", MAX_HISTORY_ENTRIES + 19)
        );
    }

    #[test]
    fn persists_across_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.json");

        {
            let mut history = TransferHistory::load(&path);
            history.add(entry("Ana")).unwrap();
        }

        let history = TransferHistory::load(&path);
        assert_eq!(history.entries().len(), 1);
        assert_eq!(history.entries()[0].sender, "Ana");
    }

    #[test]
    fn wire_compatible_field_names() {
        let value = serde_json::to_value(entry("Ana")).unwrap();
        assert!(value.get("photographer").is_some());
        assert!(value.get("file_count").is_some());
        assert!(value.get("total_size").is_some());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.json");
        std::fs::write(&path, b"[{broken").unwrap();

        let history = TransferHistory::load(&path);
        assert!(history.entries().is_empty());
    }
}
