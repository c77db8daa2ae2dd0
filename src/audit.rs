//! Download history: one JSON array on disk, newest entry last.
//!
//! Appends are serialized by the logger's own mutex and written through a
//! temp file, so a crash mid-write leaves the previous history intact. A file
//! that no longer parses is moved aside and a fresh history is started.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;

pub const DEFAULT_LOG_FILE: &str = "download_log.json";
pub const MAX_LOG_ENTRIES: usize = 50_000;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Recorded as the username when the server login is anonymous.
pub const FALLBACK_USERNAME: &str = "system";

const MAX_ATTEMPTS: u32 = 5;
const RETRY_STEP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub station_id: String,
    pub filename: String,
    #[serde(default)]
    pub local_path: String,
    pub status: LogStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Double quotes become single quotes, newlines become spaces, carriage
/// returns are dropped, surrounding whitespace trimmed.
pub fn sanitize(value: &str) -> String {
    value
        .replace('"', "'")
        .replace('\n', " ")
        .replace('\r', "")
        .trim()
        .to_string()
}

/// The name history entries are filed under for a login.
pub fn log_username(username: &str) -> &str {
    match username.trim() {
        "" => FALLBACK_USERNAME,
        name => name,
    }
}

impl LogEntry {
    /// Builds a sanitized entry stamped with the current local time.
    pub fn new(
        username: &str,
        station_id: &str,
        filename: &str,
        local_path: &str,
        status: LogStatus,
        message: &str,
    ) -> Self {
        LogEntry {
            username: sanitize(username),
            station_id: sanitize(station_id),
            filename: sanitize(filename),
            local_path: sanitize(local_path),
            status,
            message: sanitize(message),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    fn key(&self) -> (&str, &str) {
        (&self.station_id, &self.filename)
    }
}

lazy_static! {
    // One append lock per log file for the whole process, shared by every
    // logger instance pointing at that file.
    static ref FILE_LOCKS: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> = Mutex::new(HashMap::new());
}

/// Absolute form of `path` with its directory resolved when it exists, so
/// `log.json`, `./log.json` and a symlinked folder map to one lock.
fn lock_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    match (absolute.parent(), absolute.file_name()) {
        (Some(dir), Some(name)) => fs::canonicalize(dir)
            .map(|dir| dir.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = FILE_LOCKS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    locks.entry(lock_key(path)).or_default().clone()
}

#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    cap: usize,
    retry_step: Duration,
    lock: Arc<Mutex<()>>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        AuditLogger {
            lock: lock_for(&path),
            path,
            cap: MAX_LOG_ENTRIES,
            retry_step: RETRY_STEP,
        }
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self
    }

    pub fn with_retry_step(mut self, step: Duration) -> Self {
        self.retry_step = step;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // A writer that panicked left no partial state behind: every write
        // goes through a temp file.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends one entry. Never fails the caller: after the last attempt the
    /// entry is dropped with an error diagnostic and `false` is returned.
    pub fn append(&self, entry: LogEntry) -> bool {
        let _guard = self.guard();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_append(&entry) {
                Ok(()) => return true,
                Err(e) => {
                    warn!(
                        "[audit] Write attempt {}/{} for {} failed: {}",
                        attempt, MAX_ATTEMPTS, entry.filename, e
                    );
                    if attempt < MAX_ATTEMPTS {
                        thread::sleep(self.retry_step * attempt);
                    }
                }
            }
        }

        error!(
            "[audit] Could not record {} ({:?}) in {} after {} attempts, entry dropped",
            entry.filename,
            entry.status,
            self.path.display(),
            MAX_ATTEMPTS
        );
        false
    }

    fn try_append(&self, entry: &LogEntry) -> Result<(), AuditError> {
        let mut entries = self.load_or_recover()?;
        entries.push(entry.clone());
        if entries.len() > self.cap {
            let excess = entries.len() - self.cap;
            entries.drain(..excess);
        }
        self.replace(&entries)
    }

    fn read_raw(&self) -> Result<Option<String>, AuditError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(AuditError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn load_or_recover(&self) -> Result<Vec<LogEntry>, AuditError> {
        let Some(content) = self.read_raw()? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<LogEntry>>(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                let backup = self.backup_path(Local::now());
                match fs::rename(&self.path, &backup) {
                    Ok(()) => warn!(
                        "[audit] Corrupted log ({}) backed up as: {}",
                        e,
                        backup.display()
                    ),
                    Err(rename_err) => warn!(
                        "[audit] Corrupted log ({}) could not be backed up: {}",
                        e, rename_err
                    ),
                }
                Ok(Vec::new())
            }
        }
    }

    /// `<stem>_backup_<YYYYmmdd_HHMMSS>.json.bak` next to the log file.
    pub fn backup_path(&self, now: DateTime<Local>) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("download_log");
        let name = format!("{}_backup_{}.json.bak", stem, now.format("%Y%m%d_%H%M%S"));
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(DEFAULT_LOG_FILE);
        let thread_tag: String = format!("{:?}", thread::current().id())
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        self.path
            .with_file_name(format!("{}.tmp.{}.{}", file_name, process::id(), thread_tag))
    }

    fn replace(&self, entries: &[LogEntry]) -> Result<(), AuditError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| AuditError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        let temp = self.temp_path();

        if let Err(source) = fs::write(&temp, json) {
            fs::remove_file(&temp).ok();
            return Err(AuditError::Write { path: temp, source });
        }

        // Windows refuses to rename over an existing file.
        if cfg!(windows) && self.path.exists() {
            if let Err(source) = fs::remove_file(&self.path) {
                fs::remove_file(&temp).ok();
                return Err(AuditError::Replace {
                    path: self.path.clone(),
                    source,
                });
            }
        }

        if let Err(source) = fs::rename(&temp, &self.path) {
            fs::remove_file(&temp).ok();
            return Err(AuditError::Replace {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }

    /// Whole history, oldest first. Does not repair a corrupt file.
    pub fn entries(&self) -> Result<Vec<LogEntry>, AuditError> {
        let _guard = self.guard();
        match self.read_raw()? {
            None => Ok(Vec::new()),
            Some(content) => serde_json::from_str(&content).map_err(|source| AuditError::Corrupt {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Most recent entry per (station, filename) for `username`, in the order
    /// those latest entries were appended.
    pub fn latest_statuses(&self, username: &str) -> Result<Vec<LogEntry>, AuditError> {
        let entries = self.entries()?;
        let mut latest: HashMap<(&str, &str), usize> = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            if entry.username == username {
                latest.insert(entry.key(), index);
            }
        }

        let mut indices: Vec<usize> = latest.into_values().collect();
        indices.sort_unstable();
        Ok(indices.into_iter().map(|i| entries[i].clone()).collect())
    }

    /// Files whose most recent attempt by `username` failed, newest first.
    pub fn current_failures(&self, username: &str) -> Result<Vec<LogEntry>, AuditError> {
        let mut failures: Vec<LogEntry> = self
            .latest_statuses(username)?
            .into_iter()
            .filter(|e| e.status == LogStatus::Failed)
            .collect();
        failures.reverse();
        Ok(failures)
    }

    /// Deletes the history file.
    pub fn clear(&self) -> Result<(), AuditError> {
        let _guard = self.guard();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AuditError::Replace {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
