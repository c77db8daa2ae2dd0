//!
//! Rust FTP Fetch Library - bulk station-file retrieval with a C FFI
//!
//! The engine downloads timestamped station files from FTP servers whose
//! directory layout is not known in advance. The desktop front end links this
//! crate statically and drives runs through the `ftp_fetch_*` functions;
//! each run executes on its own background thread.
//!

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use log::{error, info};
use serde::Serialize;

pub mod api;
pub mod audit;
pub mod batch;
pub mod config;
pub mod connection;
pub mod control;
pub mod discovery;
pub mod error;
pub mod filename;
pub mod scheduler;

pub use api::{list_remote_directory, run_download, test_connection, ConnectionCheck, RemoteListing};
pub use audit::{AuditLogger, LogEntry, LogStatus};
pub use config::FetchConfig;
pub use connection::{ConnectionManager, ConnectionTarget, Connector, RemoteSession};
pub use control::RunControl;
pub use scheduler::{
    CandidateFile, ConcurrencyHints, DownloadJob, DownloadOutcome, DownloadReport, DownloadScheduler, JobState,
    ProgressKind, ProgressSnapshot,
};

// C function pointer type for progress callbacks from the front end
pub type ProgressCallback = Option<extern "C" fn(
    u64,           // processed
    u64,           // total
    *const c_char, // last finished filename
)>;

// Global registry of running fetch runs
lazy_static::lazy_static! {
    static ref RUNS: Mutex<HashMap<String, RunHandle>> = Mutex::new(HashMap::new());
}

struct RunHandle {
    thread_handle: Option<thread::JoinHandle<()>>,
    control: RunControl,
}

impl RunHandle {
    fn is_finished(&self) -> bool {
        self.thread_handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

fn runs() -> MutexGuard<'static, HashMap<String, RunHandle>> {
    RUNS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drops finished runs from the registry, joining their threads.
fn prune_finished(registry: &mut HashMap<String, RunHandle>) {
    let finished: Vec<String> = registry
        .iter()
        .filter(|(_, run)| run.is_finished())
        .map(|(id, _)| id.clone())
        .collect();

    for id in finished {
        if let Some(mut run) = registry.remove(&id) {
            if let Some(handle) = run.thread_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Reads a C string argument, mapping null and invalid UTF-8 to the given
/// error codes.
fn c_arg(ptr: *const c_char, null_code: i32, utf8_code: i32) -> Result<String, i32> {
    if ptr.is_null() {
        return Err(null_code);
    }
    unsafe {
        match CStr::from_ptr(ptr).to_str() {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Err(utf8_code),
        }
    }
}

fn to_c_json<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value).map(CString::new) {
        Ok(Ok(c_str)) => c_str.into_raw(),
        _ => std::ptr::null_mut(),
    }
}

fn load_config(config_path: &str) -> Result<FetchConfig, String> {
    FetchConfig::load(Path::new(config_path)).map_err(|e| e.to_string())
}

fn run_configured_batch(config: FetchConfig, control: RunControl, callback: ProgressCallback) {
    let jobs = match config.jobs() {
        Ok(jobs) => jobs,
        Err(e) => {
            error!("❌ Invalid run configuration: {}", e);
            return;
        }
    };

    let audit = Arc::new(AuditLogger::new(config.audit_path()));
    let scheduler = scheduler::DownloadScheduler::new(Arc::new(ConnectionManager::ftp()))
        .with_audit_log(audit)
        .with_hints(config.hints());

    let notify = move |_station: &str, snapshot: &ProgressSnapshot| {
        if snapshot.kind != ProgressKind::Batch {
            return;
        }
        if let Some(cb) = callback {
            let name = snapshot.current_file.as_deref().unwrap_or("");
            let name = CString::new(name).unwrap_or_default();
            cb(snapshot.processed as u64, snapshot.total as u64, name.as_ptr());
        }
    };

    let summary = batch::run_stations(&scheduler, &config.target(), jobs, &control, &notify);
    info!(
        "🏁 Run finished: {} downloaded, {} failed, {} skipped{}",
        summary.downloaded,
        summary.failed,
        summary.skipped,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
}

/// Initialize the library. Safe to call more than once.
#[no_mangle]
pub extern "C" fn ftp_fetch_init() -> i32 {
    // Initialize logging
    let _ = env_logger::try_init();
    0
}

/// Start a download run for every station in the config file.
///
/// Returns 0 on success; -1/-2 for a null or non-UTF-8 config path, -3/-4 for
/// the run id, -5 if the config cannot be loaded, -6 if a run with that id is
/// still active.
#[no_mangle]
pub extern "C" fn ftp_fetch_start(
    config_path: *const c_char,
    run_id: *const c_char,
    callback: ProgressCallback,
) -> i32 {
    let config_str = match c_arg(config_path, -1, -2) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let id_str = match c_arg(run_id, -3, -4) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let config = match load_config(&config_str) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Cannot start run {}: {}", id_str, e);
            return -5;
        }
    };

    let mut registry = runs();
    if registry.get(&id_str).map_or(false, |run| !run.is_finished()) {
        return -6;
    }
    prune_finished(&mut registry);

    let control = RunControl::new();
    let worker_control = control.clone();
    let handle = thread::spawn(move || run_configured_batch(config, worker_control, callback));

    registry.insert(
        id_str,
        RunHandle {
            thread_handle: Some(handle),
            control,
        },
    );
    0
}

fn with_run(run_id: *const c_char, action: impl FnOnce(&RunHandle)) -> i32 {
    let id_str = match c_arg(run_id, -1, -2) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match runs().get(&id_str) {
        Some(run) => {
            action(run);
            0
        }
        None => -3, // Run not found
    }
}

#[no_mangle]
pub extern "C" fn ftp_fetch_pause(run_id: *const c_char) -> i32 {
    with_run(run_id, |run| run.control.pause())
}

#[no_mangle]
pub extern "C" fn ftp_fetch_resume(run_id: *const c_char) -> i32 {
    with_run(run_id, |run| run.control.resume())
}

/// Cancel a run. Does not wait for in-flight transfers to wind down.
#[no_mangle]
pub extern "C" fn ftp_fetch_cancel(run_id: *const c_char) -> i32 {
    with_run(run_id, |run| run.control.cancel())
}

/// 1 while the run's thread is alive, 0 once it has finished, -3 if unknown.
#[no_mangle]
pub extern "C" fn ftp_fetch_is_running(run_id: *const c_char) -> i32 {
    let mut running = false;
    match with_run(run_id, |run| running = !run.is_finished()) {
        0 => i32::from(running),
        code => code,
    }
}

/// Returns `{"ok": bool, "message": string}` (free with ftp_fetch_free_string).
/// Returns null only for a null/invalid path argument.
#[no_mangle]
pub extern "C" fn ftp_fetch_test_connection(config_path: *const c_char) -> *mut c_char {
    let config_str = match c_arg(config_path, -1, -2) {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };

    let check = match load_config(&config_str) {
        Ok(config) => api::test_connection(&config.target()),
        Err(e) => ConnectionCheck {
            ok: false,
            message: e,
        },
    };
    to_c_json(&check)
}

/// Returns `{"ok": bool, "names": [..], "message": string}`
/// (free with ftp_fetch_free_string).
#[no_mangle]
pub extern "C" fn ftp_fetch_list_directory(config_path: *const c_char, path: *const c_char) -> *mut c_char {
    let (config_str, path_str) = match (c_arg(config_path, -1, -2), c_arg(path, -3, -4)) {
        (Ok(c), Ok(p)) => (c, p),
        _ => return std::ptr::null_mut(),
    };

    let listing = match load_config(&config_str) {
        Ok(config) => api::list_remote_directory(&config.target(), &path_str),
        Err(e) => RemoteListing {
            ok: false,
            names: Vec::new(),
            message: e,
        },
    };
    to_c_json(&listing)
}

/// Free a string allocated by Rust
#[no_mangle]
pub extern "C" fn ftp_fetch_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

/// Cancel every run and wait for their threads. Call at app shutdown.
#[no_mangle]
pub extern "C" fn ftp_fetch_shutdown() -> i32 {
    let drained: Vec<RunHandle> = runs().drain().map(|(_, run)| run).collect();
    for run in &drained {
        run.control.cancel();
    }
    for mut run in drained {
        if let Some(handle) = run.thread_handle.take() {
            let _ = handle.join();
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    // Tests that start runs share the global registry.
    static REGISTRY: Mutex<()> = Mutex::new(());

    fn registry_guard() -> MutexGuard<'static, ()> {
        REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait_until_finished(id: &CString) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while ftp_fetch_is_running(id.as_ptr()) == 1 {
            assert!(Instant::now() < deadline, "run did not finish");
            thread::sleep(Duration::from_millis(50));
        }
    }

    fn unreachable_config(dir: &TempDir) -> CString {
        let path = dir.path().join("config.json");
        let config = serde_json::json!({
            "server_address": "127.0.0.1",
            "port": 1,
            "username": "alice",
            "password": "pw",
            "remote_path": "/",
            "local_folder": dir.path().join("out").to_string_lossy(),
            "stations": ["QSRA0004"],
            "start_date": "2025-11-18",
            "end_date": "2025-11-18",
            "retries": 1,
            "timeout_secs": 2,
            "log_file": dir.path().join("log.json").to_string_lossy(),
        });
        fs::write(&path, config.to_string()).unwrap();
        CString::new(path.to_string_lossy().to_string()).unwrap()
    }

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        ftp_fetch_free_string(ptr);
        s
    }

    #[test]
    fn null_arguments_are_rejected() {
        let id = CString::new("r").unwrap();
        assert_eq!(ftp_fetch_start(std::ptr::null(), id.as_ptr(), None), -1);
        assert_eq!(ftp_fetch_pause(std::ptr::null()), -1);
        assert!(ftp_fetch_test_connection(std::ptr::null()).is_null());
        ftp_fetch_free_string(std::ptr::null_mut());
    }

    #[test]
    fn unknown_run_ids_are_reported() {
        let id = CString::new("no-such-run").unwrap();
        assert_eq!(ftp_fetch_pause(id.as_ptr()), -3);
        assert_eq!(ftp_fetch_cancel(id.as_ptr()), -3);
        assert_eq!(ftp_fetch_is_running(id.as_ptr()), -3);
    }

    #[test]
    fn missing_config_fails_to_start_and_reports_json() {
        let path = CString::new("/definitely/not/here.json").unwrap();
        let id = CString::new("missing-config").unwrap();
        assert_eq!(ftp_fetch_start(path.as_ptr(), id.as_ptr(), None), -5);

        let json = take_string(ftp_fetch_test_connection(path.as_ptr()));
        let check: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(check["ok"], false);
    }

    #[test]
    fn unreachable_server_reports_failed_check() {
        let dir = TempDir::new().unwrap();
        let config = unreachable_config(&dir);

        let json = take_string(ftp_fetch_test_connection(config.as_ptr()));
        let check: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(check["ok"], false);

        let remote = CString::new("/").unwrap();
        let json = take_string(ftp_fetch_list_directory(config.as_ptr(), remote.as_ptr()));
        let listing: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(listing["ok"], false);
        assert_eq!(listing["names"], serde_json::json!([]));
    }

    #[test]
    fn run_lifecycle_against_unreachable_server() {
        let _registry = registry_guard();
        let dir = TempDir::new().unwrap();
        let config = unreachable_config(&dir);
        let id = CString::new("lifecycle-run").unwrap();

        assert_eq!(ftp_fetch_init(), 0);
        assert_eq!(ftp_fetch_start(config.as_ptr(), id.as_ptr(), None), 0);
        assert_eq!(ftp_fetch_pause(id.as_ptr()), 0);
        assert_eq!(ftp_fetch_resume(id.as_ptr()), 0);

        wait_until_finished(&id);
        assert_eq!(ftp_fetch_is_running(id.as_ptr()), 0);
        assert_eq!(ftp_fetch_cancel(id.as_ptr()), 0);
        assert!(dir.path().join("out/QSRA0004/18112025_18112025").is_dir());
    }

    #[test]
    fn finished_runs_are_dropped_when_the_next_one_starts() {
        let _registry = registry_guard();
        let dir = TempDir::new().unwrap();
        let config = unreachable_config(&dir);
        let first = CString::new("pruned-first").unwrap();
        let second = CString::new("pruned-second").unwrap();

        assert_eq!(ftp_fetch_start(config.as_ptr(), first.as_ptr(), None), 0);
        wait_until_finished(&first);
        assert_eq!(ftp_fetch_is_running(first.as_ptr()), 0);

        assert_eq!(ftp_fetch_start(config.as_ptr(), second.as_ptr(), None), 0);
        assert_eq!(ftp_fetch_is_running(first.as_ptr()), -3);
        assert!(!runs().contains_key("pruned-first"));

        wait_until_finished(&second);
    }
}
