mod common;

use std::sync::Arc;

use common::*;
use rust_ftp_fetch::batch;
use rust_ftp_fetch::{AuditLogger, DownloadScheduler, ProgressSnapshot, RunControl};
use tempfile::TempDir;

fn quiet(_: &ProgressSnapshot) {}

#[test]
fn retry_run_fetches_only_the_files_that_failed() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(AuditLogger::new(dir.path().join("log.json")));
    let server = MemoryServer::new();
    let good = station_file("250111103000");
    let bad = station_file("250111110000");
    server.put(ARCHIVE_DIR, &good, b"good");
    server.put(ARCHIVE_DIR, &bad, b"late");
    server.state().transfer_drops.insert(bad.clone(), 100);

    let scheduler = DownloadScheduler::new(server.manager()).with_audit_log(log.clone());
    let first = scheduler
        .run(&target(), &day_job(dir.path()), &RunControl::new(), &quiet)
        .unwrap();
    assert_eq!(first.failed, vec![bad.clone()]);

    server.state().transfer_drops.clear();
    let jobs = batch::retry_jobs(&log, "alice", |station| {
        assert_eq!(station, STATION);
        Some(day_job(dir.path()))
    })
    .unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].only_filenames.as_ref().unwrap().contains(&bad));

    let retried = scheduler.run(&target(), &jobs[0], &RunControl::new(), &quiet).unwrap();
    assert_eq!(retried.downloaded.len(), 1);
    assert_eq!(retried.skipped_existing, 0);
    assert!(retried.downloaded[0].ends_with(&bad));

    assert!(log.current_failures("alice").unwrap().is_empty());
}

#[test]
fn nothing_to_retry_for_a_clean_history() {
    let dir = TempDir::new().unwrap();
    let log = AuditLogger::new(dir.path().join("log.json"));

    let jobs = batch::retry_jobs(&log, "alice", |_| Some(day_job(dir.path()))).unwrap();
    assert!(jobs.is_empty());
}

#[test]
fn failures_of_other_users_are_not_retried() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(AuditLogger::new(dir.path().join("log.json")));
    let server = MemoryServer::new();
    let name = station_file("250111103000");
    server.put(ARCHIVE_DIR, &name, b"data");
    server.state().transfer_drops.insert(name.clone(), 100);

    DownloadScheduler::new(server.manager())
        .with_audit_log(log.clone())
        .run(&target(), &day_job(dir.path()), &RunControl::new(), &quiet)
        .unwrap();

    assert_eq!(log.current_failures("alice").unwrap().len(), 1);
    let jobs = batch::retry_jobs(&log, "bob", |_| Some(day_job(dir.path()))).unwrap();
    assert!(jobs.is_empty());
}
