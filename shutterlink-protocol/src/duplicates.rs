//! Same-day duplicate-send tracking.
//!
//! Files already sent today are keyed by `name|size` in a per-day JSON log.
//! A new scope begins automatically at local midnight: the log file for
//! "today" is distinct from prior days, so a file is never flagged as a
//! duplicate across day boundaries.
//!
//! The guard only classifies; when duplicates exist the caller must obtain
//! an explicit [`DuplicateResolution`] before any network I/O begins.

use crate::Result;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One sent-file record in the day log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentRecord {
    pub name: String,
    pub target: String,
    pub timestamp: DateTime<Local>,
}

/// A candidate file that was already sent today.
#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub path: PathBuf,
    pub name: String,
    pub first_sent_at: DateTime<Local>,
}

/// The caller's choice when duplicates were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateResolution {
    /// Send only the files not seen today
    SendFreshOnly,
    /// Send the full original list anyway
    SendAll,
    /// Abort the whole operation
    Cancel,
}

/// Log key for a file identity.
pub fn file_key(name: &str, size: u64) -> String {
    format!("{}|{}", name, size)
}

/// Tracks which (name, size) pairs were sent to any target today.
#[derive(Debug)]
pub struct DuplicateGuard {
    dir: PathBuf,
    date: NaiveDate,
    entries: HashMap<String, SentRecord>,
}

impl DuplicateGuard {
    /// Open the guard for today's scope, loading any existing log.
    /// A missing or unreadable log starts empty.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let date = Local::now().date_naive();
        let entries = Self::load(&dir, date);
        Self { dir, date, entries }
    }

    fn log_path(dir: &Path, date: NaiveDate) -> PathBuf {
        dir.join(format!("sent-{}.json", date.format("%Y-%m-%d")))
    }

    fn load(dir: &Path, date: NaiveDate) -> HashMap<String, SentRecord> {
        let path = Self::log_path(dir, date);
        if !path.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("discarding unreadable sent log {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(e) => {
                warn!("cannot read sent log {}: {}", path.display(), e);
                HashMap::new()
            }
        }
    }

    /// Switch to a fresh scope when the local date has changed since the
    /// last operation.
    fn roll_over(&mut self) {
        let today = Local::now().date_naive();
        if today != self.date {
            self.date = today;
            self.entries = Self::load(&self.dir, today);
        }
    }

    /// Classify candidates against today's log. Returns the duplicates
    /// (with their original send time, for display) and the fresh files.
    pub fn check_and_partition(
        &mut self,
        candidates: &[PathBuf],
    ) -> Result<(Vec<DuplicateMatch>, Vec<PathBuf>)> {
        self.roll_over();

        let mut duplicates = Vec::new();
        let mut fresh = Vec::new();

        for path in candidates {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let size = std::fs::metadata(path)?.len();

            match self.entries.get(&file_key(&name, size)) {
                Some(record) => duplicates.push(DuplicateMatch {
                    path: path.clone(),
                    name,
                    first_sent_at: record.timestamp,
                }),
                None => fresh.push(path.clone()),
            }
        }

        Ok((duplicates, fresh))
    }

    /// Record a file as sent and persist the scope immediately, so the
    /// entry is durable before the next file starts.
    pub fn record_sent(&mut self, name: &str, size: u64, target: &str) -> Result<()> {
        self.roll_over();

        self.entries.insert(
            file_key(name, size),
            SentRecord {
                name: name.to_string(),
                target: target.to_string(),
                timestamp: Local::now(),
            },
        );
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = Self::log_path(&self.dir, self.date);
        let contents = serde_json::to_string(&self.entries)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Number of records in the current scope.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
