//! Multi-station runs and retry runs driven by the download history.

use std::collections::BTreeMap;

use log::{error, info, warn};

use crate::audit::AuditLogger;
use crate::connection::ConnectionTarget;
use crate::control::RunControl;
use crate::error::AuditError;
use crate::scheduler::{DownloadJob, DownloadReport, DownloadScheduler, ProgressSnapshot};

#[derive(Debug)]
pub struct StationRun {
    pub station_id: String,
    pub result: Result<DownloadReport, String>,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub stations: Vec<StationRun>,
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    /// Everything in range was already on disk.
    pub fn all_present(&self) -> bool {
        self.downloaded == 0 && self.failed == 0 && self.skipped > 0
    }

    pub fn rejected_stations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.stations.iter().filter_map(|run| match &run.result {
            Err(msg) => Some((run.station_id.as_str(), msg.as_str())),
            Ok(_) => None,
        })
    }
}

/// Runs `jobs` one station at a time. A station whose job is rejected is
/// recorded and the batch moves on; cancellation stops before the next one.
pub fn run_stations<I>(
    scheduler: &DownloadScheduler,
    target: &ConnectionTarget,
    jobs: I,
    control: &RunControl,
    on_progress: &(dyn Fn(&str, &ProgressSnapshot) + Sync),
) -> BatchSummary
where
    I: IntoIterator<Item = DownloadJob>,
{
    let mut summary = BatchSummary::default();

    for job in jobs {
        if control.is_cancelled() {
            info!("🛑 Batch cancelled before station {}", job.station_id);
            summary.cancelled = true;
            break;
        }

        let station = job.station_id.clone();
        let forward = |snapshot: &ProgressSnapshot| on_progress(&station, snapshot);

        match scheduler.run(target, &job, control, &forward) {
            Ok(report) => {
                summary.downloaded += report.downloaded.len();
                summary.failed += report.failed.len();
                summary.skipped += report.skipped();
                summary.stations.push(StationRun {
                    station_id: station,
                    result: Ok(report),
                });
            }
            Err(e) => {
                error!("[{}] ❌ Station rejected: {}", station, e);
                summary.stations.push(StationRun {
                    station_id: station,
                    result: Err(e.to_string()),
                });
            }
        }
    }

    if control.is_cancelled() {
        summary.cancelled = true;
    }

    info!(
        "🎯 Batch finished: {} downloaded, {} failed, {} skipped across {} station(s)",
        summary.downloaded,
        summary.failed,
        summary.skipped,
        summary.stations.len()
    );
    summary
}

/// One job per station that has files whose latest attempt by `username`
/// failed, restricted to exactly those files. `job_for` supplies the window
/// and folders for a station.
pub fn retry_jobs<F>(audit: &AuditLogger, username: &str, mut job_for: F) -> Result<Vec<DownloadJob>, AuditError>
where
    F: FnMut(&str) -> Option<DownloadJob>,
{
    let mut by_station: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in audit.current_failures(username)? {
        by_station.entry(entry.station_id).or_default().push(entry.filename);
    }

    if by_station.is_empty() {
        info!("✅ No failed files recorded for {}", username);
    }

    let mut jobs = Vec::with_capacity(by_station.len());
    for (station, filenames) in by_station {
        match job_for(&station) {
            Some(job) => {
                info!("[{}] 🔄 Retrying {} failed file(s)", station, filenames.len());
                jobs.push(job.only(filenames));
            }
            None => warn!("[{}] ⚠️ No job settings for station, {} failed file(s) left", station, filenames.len()),
        }
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{LogEntry, LogStatus};
    use chrono::NaiveDate;
    use std::time::Duration;
    use tempfile::TempDir;

    fn job(station: &str) -> DownloadJob {
        let day = NaiveDate::from_ymd_opt(2025, 11, 18).unwrap();
        DownloadJob::new(
            station,
            day.and_hms_opt(0, 0, 0).unwrap(),
            day.and_hms_opt(23, 59, 59).unwrap(),
            "/",
            "/tmp/out",
        )
    }

    #[test]
    fn retry_jobs_group_current_failures_by_station() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLogger::new(dir.path().join("log.json")).with_retry_step(Duration::ZERO);
        let add = |station: &str, file: &str, status| {
            audit.append(LogEntry::new("alice", station, file, "", status, ""));
        };
        add("S1", "a.txt", LogStatus::Failed);
        add("S1", "b.txt", LogStatus::Failed);
        add("S1", "a.txt", LogStatus::Success);
        add("S2", "c.txt", LogStatus::Failed);
        add("S3", "d.txt", LogStatus::Failed);

        let jobs = retry_jobs(&audit, "alice", |station| (station != "S3").then(|| job(station))).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].station_id, "S1");
        let only = jobs[0].only_filenames.as_ref().unwrap();
        assert_eq!(only.len(), 1);
        assert!(only.contains("b.txt"));
        assert_eq!(jobs[1].station_id, "S2");
    }

    #[test]
    fn retry_jobs_empty_without_history() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLogger::new(dir.path().join("log.json"));
        assert!(retry_jobs(&audit, "alice", |s| Some(job(s))).unwrap().is_empty());
    }

    #[test]
    fn all_present_means_only_skips() {
        let summary = BatchSummary {
            skipped: 4,
            ..Default::default()
        };
        assert!(summary.all_present());
        assert!(!BatchSummary::default().all_present());
    }
}
