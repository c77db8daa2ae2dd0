//! In-memory FTP server shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime};
use rust_ftp_fetch::connection::RetryPolicy;
use rust_ftp_fetch::error::SessionError;
use rust_ftp_fetch::{ConnectionManager, ConnectionTarget, Connector, DownloadJob, RemoteSession};

pub const STATION: &str = "QSRA00042";

#[derive(Default)]
pub struct ServerState {
    /// Directory -> names listed by NLST.
    pub dirs: HashMap<String, Vec<String>>,
    /// (directory, filename) -> content.
    pub files: HashMap<(String, String), Vec<u8>>,
    /// SIZE replies that disagree with the content.
    pub reported_sizes: HashMap<String, u64>,
    /// Transfers of these files drop the connection this many more times.
    pub transfer_drops: HashMap<String, usize>,
    /// Like `transfer_drops`, but after the first block has been sent.
    pub midstream_drops: HashMap<String, usize>,
    /// The next N logins are refused with a connection-limit reply.
    pub busy_logins: usize,
    /// Every login is refused.
    pub refuse_all: bool,
    pub logins: usize,
    pub retrieves: usize,
}

#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        MemoryServer::default()
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Publishes `name` under `dir` with `content`.
    pub fn put(&self, dir: &str, name: &str, content: &[u8]) {
        let mut state = self.state();
        let names = state.dirs.entry(dir.to_string()).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        state.files.insert((dir.to_string(), name.to_string()), content.to_vec());
    }

    /// Publishes many files under `dir` without the duplicate check of `put`.
    pub fn put_many<I>(&self, dir: &str, files: I)
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let mut state = self.state();
        for (name, content) in files {
            state.dirs.entry(dir.to_string()).or_default().push(name.clone());
            state.files.insert((dir.to_string(), name), content);
        }
    }

    pub fn manager(&self) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(Arc::new(self.clone())).with_policy(RetryPolicy::immediate()))
    }
}

impl Connector for MemoryServer {
    fn open(&self, _target: &ConnectionTarget) -> Result<Box<dyn RemoteSession>, SessionError> {
        let mut state = self.state();
        state.logins += 1;
        if state.refuse_all {
            return Err(SessionError::Protocol("530 Login incorrect".into()));
        }
        if state.busy_logins > 0 {
            state.busy_logins -= 1;
            return Err(SessionError::Protocol("421 Too many connections from this IP".into()));
        }
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
            cwd: None,
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<ServerState>>,
    cwd: Option<String>,
}

impl MemorySession {
    fn cwd(&self) -> Result<String, SessionError> {
        self.cwd
            .clone()
            .ok_or_else(|| SessionError::Protocol("550 No directory selected".into()))
    }
}

impl RemoteSession for MemorySession {
    fn change_dir(&mut self, path: &str) -> Result<(), SessionError> {
        if self.state.lock().unwrap().dirs.contains_key(path) {
            self.cwd = Some(path.to_string());
            Ok(())
        } else {
            Err(SessionError::Protocol(format!("550 {}: No such file or directory", path)))
        }
    }

    fn list_names(&mut self) -> Result<Vec<String>, SessionError> {
        let cwd = self.cwd()?;
        Ok(self.state.lock().unwrap().dirs[&cwd].clone())
    }

    fn size(&mut self, filename: &str) -> Result<Option<u64>, SessionError> {
        let cwd = self.cwd()?;
        let state = self.state.lock().unwrap();
        if let Some(size) = state.reported_sizes.get(filename) {
            return Ok(Some(*size));
        }
        match state.files.get(&(cwd, filename.to_string())) {
            Some(content) => Ok(Some(content.len() as u64)),
            None => Err(SessionError::Protocol("550 Could not get file size".into())),
        }
    }

    fn retrieve(
        &mut self,
        filename: &str,
        on_chunk: &mut dyn FnMut(&[u8]) -> io::Result<()>,
    ) -> Result<u64, SessionError> {
        let cwd = self.cwd()?;
        let mut drop_midstream = false;
        let content = {
            let mut state = self.state.lock().unwrap();
            state.retrieves += 1;
            if let Some(drops) = state.midstream_drops.get_mut(filename) {
                if *drops > 0 {
                    *drops -= 1;
                    drop_midstream = true;
                }
            }
            if let Some(drops) = state.transfer_drops.get_mut(filename) {
                if *drops > 0 {
                    *drops -= 1;
                    return Err(SessionError::Io(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    )));
                }
            }
            match state.files.get(&(cwd, filename.to_string())) {
                Some(content) => content.clone(),
                None => return Err(SessionError::Protocol("550 File not found".into())),
            }
        };

        for chunk in content.chunks(4) {
            on_chunk(chunk).map_err(SessionError::Io)?;
            if drop_midstream {
                return Err(SessionError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
            }
        }
        Ok(content.len() as u64)
    }

    fn quit(&mut self) {}
}

pub fn target() -> ConnectionTarget {
    ConnectionTarget::new("ftp.example.org", 21, "alice", "secret")
}

pub fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, mi, s)
        .unwrap()
}

/// Job for `STATION` over the whole of 2025-01-11.
pub fn day_job(local_root: &Path) -> DownloadJob {
    DownloadJob::new(
        STATION,
        at(2025, 1, 11, 0, 0, 0),
        at(2025, 1, 11, 23, 59, 59),
        "/rtu",
        local_root,
    )
}

pub const ARCHIVE_DIR: &str = "/rtu/ARCHIVE/2025/01/11";

/// `<STATION><yymmddHHMMSS>.txt`
pub fn station_file(stamp: &str) -> String {
    format!("{}{}.txt", STATION, stamp)
}
