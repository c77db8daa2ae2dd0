//! Per-job state machine: scan each day, filter, then download with a
//! bounded worker pool sized by job volume.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{NaiveDate, NaiveDateTime};
use crossbeam::channel::{self, Receiver};
use log::{debug, error, info, warn};
use rayon::prelude::*;

use crate::audit::{self, AuditLogger, LogEntry, LogStatus};
use crate::connection::{self, ConnectionManager, ConnectionTarget, RemoteSession, DEFAULT_RETRIES};
use crate::control::RunControl;
use crate::discovery;
use crate::error::{ConnectError, DownloadError, JobError, TransferError};
use crate::filename::{self, Selection};

/// Jobs larger than this are split into chunks of `CHUNK_SIZE`.
pub const CHUNK_THRESHOLD: usize = 5000;
pub const CHUNK_SIZE: usize = 2000;
pub const DEFAULT_EXTENSION: &str = "txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub station_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub remote_base: String,
    pub local_root: PathBuf,
    /// Only names with this extension are considered. `None` accepts all.
    pub file_extension: Option<String>,
    /// Retry runs restrict the job to these filenames.
    pub only_filenames: Option<HashSet<String>>,
}

impl DownloadJob {
    pub fn new(
        station_id: impl Into<String>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        remote_base: impl Into<String>,
        local_root: impl Into<PathBuf>,
    ) -> Self {
        DownloadJob {
            station_id: station_id.into().trim().to_string(),
            start,
            end,
            remote_base: remote_base.into(),
            local_root: local_root.into(),
            file_extension: Some(DEFAULT_EXTENSION.to_string()),
            only_filenames: None,
        }
    }

    pub fn with_extension(mut self, ext: Option<&str>) -> Self {
        self.file_extension = ext
            .map(|e| e.trim().trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty());
        self
    }

    pub fn only<I>(mut self, filenames: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.only_filenames = Some(filenames.into_iter().collect());
        self
    }

    /// `<local_root>/<station>/<ddmmyyyy>_<ddmmyyyy>`
    pub fn local_dir(&self) -> PathBuf {
        self.local_root.join(&self.station_id).join(format!(
            "{}_{}",
            self.start.format("%d%m%Y"),
            self.end.format("%d%m%Y")
        ))
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.station_id.is_empty() {
            return Err(JobError::EmptyStation);
        }
        if self.start > self.end {
            return Err(JobError::InvalidWindow {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Every calendar day touched by the window.
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut day = self.start.date();
        let last = self.end.date();
        while day <= last {
            days.push(day);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        days
    }

    fn accepts(&self, name: &str) -> bool {
        match &self.file_extension {
            Some(ext) => filename::has_extension(name, ext),
            None => true,
        }
    }
}

/// A listed remote file selected for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub remote_dir: String,
    pub filename: String,
    pub station_id: String,
    /// `None` when included by station prefix only.
    pub timestamp: Option<NaiveDateTime>,
}

impl CandidateFile {
    pub fn timestamp_verified(&self) -> bool {
        self.timestamp.is_some()
    }
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Succeeded { local_path: PathBuf, bytes: u64 },
    /// Server reported 0 bytes; nothing was written.
    SkippedEmpty { local_path: PathBuf },
    SkippedExisting { local_path: PathBuf },
    Failed { reason: DownloadError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Succeeded,
    SkippedEmpty,
    SkippedExisting,
    Failed,
    Cancelled,
}

impl DownloadOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            DownloadOutcome::Succeeded { .. } => OutcomeKind::Succeeded,
            DownloadOutcome::SkippedEmpty { .. } => OutcomeKind::SkippedEmpty,
            DownloadOutcome::SkippedExisting { .. } => OutcomeKind::SkippedExisting,
            DownloadOutcome::Failed {
                reason: DownloadError::Cancelled,
            } => OutcomeKind::Cancelled,
            DownloadOutcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    fn failed(reason: DownloadError) -> Self {
        DownloadOutcome::Failed { reason }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobState {
    #[default]
    Scanning,
    Filtering,
    Downloading,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    /// Published as each file finishes.
    File,
    /// Published every batch interval and at the end.
    Batch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub total: usize,
    pub current_file: Option<String>,
    pub bytes_received: u64,
    pub kind: ProgressKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyHints {
    pub retries: u32,
    /// Upper bound on the worker table.
    pub max_workers: Option<usize>,
}

impl Default for ConcurrencyHints {
    fn default() -> Self {
        ConcurrencyHints {
            retries: DEFAULT_RETRIES,
            max_workers: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub state: JobState,
    pub matched: usize,
    pub downloaded: Vec<PathBuf>,
    pub failed: Vec<String>,
    pub cancelled: Vec<String>,
    pub skipped_existing: usize,
    pub skipped_empty: usize,
    pub outcomes: Vec<(CandidateFile, DownloadOutcome)>,
}

impl DownloadReport {
    fn absorb(&mut self, candidate: CandidateFile, outcome: DownloadOutcome) {
        match &outcome {
            DownloadOutcome::Succeeded { local_path, .. } => self.downloaded.push(local_path.clone()),
            DownloadOutcome::SkippedEmpty { .. } => self.skipped_empty += 1,
            DownloadOutcome::SkippedExisting { .. } => self.skipped_existing += 1,
            DownloadOutcome::Failed {
                reason: DownloadError::Cancelled,
            } => self.cancelled.push(candidate.filename.clone()),
            DownloadOutcome::Failed { .. } => self.failed.push(candidate.filename.clone()),
        }
        self.outcomes.push((candidate, outcome));
    }

    pub fn skipped(&self) -> usize {
        self.skipped_existing + self.skipped_empty
    }

    /// No file in range matched on the server. Not an error.
    pub fn nothing_found(&self) -> bool {
        self.matched == 0
    }
}

pub fn workers_for(total: usize) -> usize {
    match total {
        t if t > 10_000 => 3,
        t if t > 5_000 => 5,
        t if t > 2_000 => 6,
        t if t > 1_000 => 8,
        t if t > 500 => 10,
        t if t > 100 => 12,
        _ => 8,
    }
}

pub fn batch_interval_for(total: usize) -> usize {
    match total {
        t if t > 10_000 => 50,
        t if t > 5_000 => 25,
        t if t > 2_000 => 15,
        t if t > 1_000 => 10,
        t if t > 500 => 5,
        t if t > 100 => 3,
        _ => 1,
    }
}

pub fn chunk_size_for(total: usize) -> usize {
    if total > CHUNK_THRESHOLD {
        CHUNK_SIZE
    } else {
        total.max(1)
    }
}

fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Deduplicates by filename, applies the retry restriction and splits off
/// files already present locally.
pub fn filter_candidates(
    job: &DownloadJob,
    local_dir: &Path,
    matched: Vec<CandidateFile>,
) -> (Vec<CandidateFile>, Vec<(CandidateFile, DownloadOutcome)>) {
    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    let mut existing = Vec::new();

    for candidate in matched {
        if !seen.insert(candidate.filename.clone()) {
            debug!("[{}] Duplicate listing of {} ignored", job.station_id, candidate.filename);
            continue;
        }
        if let Some(only) = &job.only_filenames {
            if !only.contains(&candidate.filename) {
                continue;
            }
        }
        let local_path = local_dir.join(&candidate.filename);
        if is_nonempty_file(&local_path) {
            existing.push((candidate, DownloadOutcome::SkippedExisting { local_path }));
        } else {
            pending.push(candidate);
        }
    }

    (pending, existing)
}

struct Finished {
    filename: String,
    kind: OutcomeKind,
}

fn publish_progress(
    station: &str,
    rx: Receiver<Finished>,
    total: usize,
    interval: usize,
    bytes: &AtomicU64,
    on_progress: &(dyn Fn(&ProgressSnapshot) + Sync),
) {
    let mut processed = 0;
    let mut succeeded = 0;
    let mut failed = 0;

    for finished in rx.iter() {
        processed += 1;
        match finished.kind {
            OutcomeKind::Succeeded => succeeded += 1,
            OutcomeKind::Failed => failed += 1,
            _ => {}
        }

        let mut snapshot = ProgressSnapshot {
            processed,
            total,
            current_file: Some(finished.filename),
            bytes_received: bytes.load(Ordering::Relaxed),
            kind: ProgressKind::File,
        };
        on_progress(&snapshot);

        if processed % interval == 0 || processed == total {
            snapshot.kind = ProgressKind::Batch;
            on_progress(&snapshot);
            info!(
                "[{}] 📈 Progress: {}/{} files ({} downloaded, {} failed)",
                station, processed, total, succeeded, failed
            );
        }
    }
}

pub struct DownloadScheduler {
    manager: Arc<ConnectionManager>,
    audit: Option<Arc<AuditLogger>>,
    hints: ConcurrencyHints,
}

impl DownloadScheduler {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        DownloadScheduler {
            manager,
            audit: None,
            hints: ConcurrencyHints::default(),
        }
    }

    pub fn with_audit_log(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_hints(mut self, hints: ConcurrencyHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn audit_log(&self) -> Option<&Arc<AuditLogger>> {
        self.audit.as_ref()
    }

    fn worker_count(&self, total: usize) -> usize {
        let workers = workers_for(total);
        match self.hints.max_workers {
            Some(cap) => workers.min(cap.max(1)),
            None => workers,
        }
    }

    /// Runs one job to completion or cancellation. Only an unusable job is an
    /// error; per-file problems end up in the report.
    pub fn run(
        &self,
        target: &ConnectionTarget,
        job: &DownloadJob,
        control: &RunControl,
        on_progress: &(dyn Fn(&ProgressSnapshot) + Sync),
    ) -> Result<DownloadReport, JobError> {
        job.validate()?;
        let local_dir = job.local_dir();
        fs::create_dir_all(&local_dir).map_err(|source| JobError::LocalRoot {
            path: local_dir.clone(),
            source,
        })?;

        info!(
            "[{}] 🚀 Fetching {} → {} from {} into {}",
            job.station_id,
            job.start,
            job.end,
            target.address(),
            local_dir.display()
        );

        let mut report = DownloadReport::default();

        let matched = self.scan(target, job, control);
        report.matched = matched.len();
        if control.is_cancelled() {
            info!("[{}] 🛑 Cancelled while scanning", job.station_id);
            report.state = JobState::Cancelled;
            return Ok(report);
        }

        report.state = JobState::Filtering;
        let (pending, existing) = filter_candidates(job, &local_dir, matched);
        for (candidate, outcome) in existing {
            report.absorb(candidate, outcome);
        }

        if pending.is_empty() {
            info!(
                "[{}] ✅ Nothing to download ({} matched, {} already present)",
                job.station_id, report.matched, report.skipped_existing
            );
            report.state = JobState::Completed;
            return Ok(report);
        }

        report.state = JobState::Downloading;
        for (candidate, outcome) in self.download(target, job, &local_dir, pending, control, on_progress)? {
            report.absorb(candidate, outcome);
        }

        report.state = if control.is_cancelled() {
            JobState::Cancelled
        } else {
            JobState::Completed
        };

        info!(
            "[{}] 🎯 Finished: {} downloaded, {} failed, {} skipped, {} cancelled",
            job.station_id,
            report.downloaded.len(),
            report.failed.len(),
            report.skipped(),
            report.cancelled.len()
        );
        Ok(report)
    }

    fn scan(&self, target: &ConnectionTarget, job: &DownloadJob, control: &RunControl) -> Vec<CandidateFile> {
        let days = job.days();
        info!("[{}] 🔍 Scanning {} day(s)", job.station_id, days.len());

        let mut matched = Vec::new();
        for day in days {
            if control.is_cancelled() {
                break;
            }
            matched.extend(self.scan_day(target, job, day, control));
        }

        info!("[{}] 📋 {} file(s) matched", job.station_id, matched.len());
        matched
    }

    fn scan_day(
        &self,
        target: &ConnectionTarget,
        job: &DownloadJob,
        day: NaiveDate,
        control: &RunControl,
    ) -> Vec<CandidateFile> {
        let candidates = discovery::candidate_paths(&job.remote_base, &job.station_id, day);
        debug!("[{}] 🔎 Trying {} possible paths for {}", job.station_id, candidates.len(), day);

        let Some(found) = discovery::discover(&self.manager, target, self.hints.retries, &candidates, control) else {
            warn!("[{}] ⚠️ No files found for {}", job.station_id, day);
            return Vec::new();
        };

        let mut files = Vec::new();
        for name in &found.names {
            if !job.accepts(name) {
                continue;
            }
            let (station_id, timestamp) = match filename::select(name, &job.station_id, job.start, job.end) {
                Some(Selection::Verified { station_id, timestamp }) => (station_id, Some(timestamp)),
                Some(Selection::PrefixOnly) => (job.station_id.clone(), None),
                None => continue,
            };
            files.push(CandidateFile {
                remote_dir: found.path.clone(),
                filename: name.clone(),
                station_id,
                timestamp,
            });
        }

        debug!(
            "[{}] 📅 {}: {} of {} entries in {} selected",
            job.station_id,
            day,
            files.len(),
            found.names.len(),
            found.path
        );
        files
    }

    fn download(
        &self,
        target: &ConnectionTarget,
        job: &DownloadJob,
        local_dir: &Path,
        pending: Vec<CandidateFile>,
        control: &RunControl,
        on_progress: &(dyn Fn(&ProgressSnapshot) + Sync),
    ) -> Result<Vec<(CandidateFile, DownloadOutcome)>, JobError> {
        let total = pending.len();
        let workers = self.worker_count(total);
        let chunk_size = chunk_size_for(total);
        let interval = batch_interval_for(total);
        let chunk_count = (total + chunk_size - 1) / chunk_size;

        info!(
            "[{}] ⬇️ Downloading {} file(s) with {} worker(s) in {} chunk(s)",
            job.station_id, total, workers, chunk_count
        );

        let bytes = AtomicU64::new(0);
        let worker = Worker {
            scheduler: self,
            target,
            job,
            local_dir,
            control,
            bytes: &bytes,
        };

        thread::scope(|scope| -> Result<Vec<(CandidateFile, DownloadOutcome)>, JobError> {
            let (tx, rx) = channel::unbounded::<Finished>();
            let station = job.station_id.as_str();
            let bytes = &bytes;
            scope.spawn(move || publish_progress(station, rx, total, interval, bytes, on_progress));

            let mut results = Vec::with_capacity(total);
            for (index, chunk) in pending.chunks(chunk_size).enumerate() {
                if control.is_cancelled() {
                    for candidate in chunk {
                        let _ = tx.send(Finished {
                            filename: candidate.filename.clone(),
                            kind: OutcomeKind::Cancelled,
                        });
                        results.push((candidate.clone(), DownloadOutcome::failed(DownloadError::Cancelled)));
                    }
                    continue;
                }
                if chunk_count > 1 {
                    info!(
                        "[{}] 📦 Chunk {}/{} ({} files)",
                        station,
                        index + 1,
                        chunk_count,
                        chunk.len()
                    );
                }

                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("ftp-fetch-worker-{}", i))
                    .build()
                    .map_err(JobError::Pool)?;

                let done: Vec<(CandidateFile, DownloadOutcome)> = pool.install(|| {
                    chunk
                        .par_iter()
                        .with_max_len(1) // Each file gets its own task
                        .map(|candidate| {
                            let outcome = worker.fetch(candidate);
                            worker.record(candidate, &outcome);
                            let _ = tx.send(Finished {
                                filename: candidate.filename.clone(),
                                kind: outcome.kind(),
                            });
                            (candidate.clone(), outcome)
                        })
                        .collect()
                });
                results.extend(done);
            }

            Ok(results)
        })
    }
}

/// Everything one worker needs; shared by reference across the pool.
struct Worker<'a> {
    scheduler: &'a DownloadScheduler,
    target: &'a ConnectionTarget,
    job: &'a DownloadJob,
    local_dir: &'a Path,
    control: &'a RunControl,
    bytes: &'a AtomicU64,
}

fn is_retryable(outcome: &DownloadOutcome) -> bool {
    matches!(
        outcome,
        DownloadOutcome::Failed {
            reason: DownloadError::Transfer {
                source: TransferError::Session(_),
                ..
            }
        }
    )
}

impl Worker<'_> {
    fn station(&self) -> &str {
        &self.job.station_id
    }

    fn fetch(&self, candidate: &CandidateFile) -> DownloadOutcome {
        if self.control.is_cancelled() {
            return DownloadOutcome::failed(DownloadError::Cancelled);
        }

        if let Err(source) = fs::create_dir_all(self.local_dir) {
            return DownloadOutcome::failed(DownloadError::LocalIo {
                path: self.local_dir.to_path_buf(),
                source,
            });
        }

        let local_path = self.local_dir.join(&candidate.filename);
        match fs::metadata(&local_path) {
            Ok(meta) if meta.len() > 0 => return DownloadOutcome::SkippedExisting { local_path },
            Ok(_) => {
                warn!("[{}] 🗑️ Deleting corrupted 0-byte file: {}", self.station(), local_path.display());
                if let Err(e) = fs::remove_file(&local_path) {
                    warn!("[{}] Could not delete {}: {}", self.station(), local_path.display(), e);
                }
            }
            Err(_) => {}
        }

        let policy = self.scheduler.manager.policy();
        let attempts = self.scheduler.hints.retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut session = match self
                .scheduler
                .manager
                .connect(self.target, self.scheduler.hints.retries, self.control)
            {
                Ok(session) => session,
                Err(ConnectError::Cancelled) => return DownloadOutcome::failed(DownloadError::Cancelled),
                Err(e) => {
                    error!("[{}] ❌ {}: {}", self.station(), candidate.filename, e);
                    return DownloadOutcome::failed(DownloadError::Connect(e));
                }
            };

            let outcome = self.transfer(session.as_mut(), candidate, &local_path);
            session.quit();

            if attempt < attempts && is_retryable(&outcome) {
                if let DownloadOutcome::Failed { reason } = &outcome {
                    warn!(
                        "[{}] 🔄 Retrying {} ({}/{}): {}",
                        self.station(),
                        candidate.filename,
                        attempt,
                        attempts,
                        reason
                    );
                }
                if !self.control.sleep(policy.other_delay) {
                    return DownloadOutcome::failed(DownloadError::Cancelled);
                }
                continue;
            }
            return outcome;
        }
    }

    fn transfer(&self, session: &mut dyn RemoteSession, candidate: &CandidateFile, local_path: &Path) -> DownloadOutcome {
        if let Err(source) = session.change_dir(&candidate.remote_dir) {
            return DownloadOutcome::failed(DownloadError::RemoteDirectory {
                path: candidate.remote_dir.clone(),
                source,
            });
        }

        let expected = connection::file_size(session, &candidate.filename);
        if expected == Some(0) {
            warn!("[{}] ⚠️ Skipping 0-byte remote file: {}", self.station(), candidate.filename);
            return DownloadOutcome::SkippedEmpty {
                local_path: local_path.to_path_buf(),
            };
        }

        let file = match File::create(local_path) {
            Ok(file) => file,
            Err(source) => {
                return DownloadOutcome::failed(DownloadError::LocalIo {
                    path: local_path.to_path_buf(),
                    source,
                })
            }
        };
        let mut writer = BufWriter::new(file);

        let bytes = self.bytes;
        let mut reported = 0u64;
        let streamed = connection::retrieve_file(session, &candidate.filename, &mut writer, self.control, &mut |total| {
            bytes.fetch_add(total - reported, Ordering::Relaxed);
            reported = total;
        })
        .and_then(|n| writer.flush().map(|()| n).map_err(TransferError::Local));
        drop(writer);

        if let Err(e) = streamed {
            // Bytes of a discarded attempt do not count as received.
            bytes.fetch_sub(reported, Ordering::Relaxed);
            // No resume support: a partial file is worthless.
            if let Err(rm) = fs::remove_file(local_path) {
                debug!("[{}] Could not remove partial {}: {}", self.station(), local_path.display(), rm);
            }
            return match e {
                TransferError::Cancelled => DownloadOutcome::failed(DownloadError::Cancelled),
                source => {
                    error!("[{}] ❌ Transfer of {} failed: {}", self.station(), candidate.filename, source);
                    DownloadOutcome::failed(DownloadError::Transfer {
                        filename: candidate.filename.clone(),
                        source,
                    })
                }
            };
        }

        self.verify(local_path, expected)
    }

    fn verify(&self, local_path: &Path, expected: Option<u64>) -> DownloadOutcome {
        let actual = match fs::metadata(local_path) {
            Ok(meta) => meta.len(),
            Err(source) => {
                return DownloadOutcome::failed(DownloadError::LocalIo {
                    path: local_path.to_path_buf(),
                    source,
                })
            }
        };

        if actual == 0 {
            error!("[{}] ❌ Downloaded file is 0 bytes: {}", self.station(), local_path.display());
            if let Err(e) = fs::remove_file(local_path) {
                warn!("[{}] Could not delete {}: {}", self.station(), local_path.display(), e);
            }
            return DownloadOutcome::failed(DownloadError::CorruptLocalFile {
                path: local_path.to_path_buf(),
                expected,
            });
        }

        if let Some(expected) = expected.filter(|&e| e != actual) {
            warn!(
                "[{}] ⚠️ Size mismatch for {}: expected {}, got {}",
                self.station(),
                local_path.display(),
                expected,
                actual
            );
        }

        debug!("[{}] ✅ {} ({} bytes)", self.station(), local_path.display(), actual);
        DownloadOutcome::Succeeded {
            local_path: local_path.to_path_buf(),
            bytes: actual,
        }
    }

    /// Appends Succeeded and Failed outcomes to the audit log.
    fn record(&self, candidate: &CandidateFile, outcome: &DownloadOutcome) {
        let Some(audit) = self.scheduler.audit.as_deref() else {
            return;
        };

        let (status, local_path, message) = match outcome {
            DownloadOutcome::Succeeded { local_path, bytes } => {
                let mut message = format!("Downloaded successfully ({} bytes)", bytes);
                if !candidate.timestamp_verified() {
                    message.push_str(" (timestamp not verified)");
                }
                (LogStatus::Success, local_path.display().to_string(), message)
            }
            DownloadOutcome::Failed {
                reason: DownloadError::Cancelled,
            } => return,
            DownloadOutcome::Failed { reason } => (
                LogStatus::Failed,
                self.local_dir.join(&candidate.filename).display().to_string(),
                reason.to_string(),
            ),
            DownloadOutcome::SkippedEmpty { .. } | DownloadOutcome::SkippedExisting { .. } => return,
        };

        audit.append(LogEntry::new(
            audit::log_username(&self.target.username),
            &self.job.station_id,
            &candidate.filename,
            &local_path,
            status,
            &message,
        ));
    }
}
