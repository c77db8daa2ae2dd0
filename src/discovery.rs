//! Finding the directory that holds a station's files for one day.
//!
//! Servers in the field use a handful of layouts and nothing on the server
//! says which. We try a fixed list of candidates in order and take the first
//! one that exists and lists non-empty.

use chrono::NaiveDate;
use log::{debug, info, warn};

use crate::connection::{self, ConnectionManager, ConnectionTarget, RemoteSession};
use crate::control::RunControl;
use crate::error::SessionError;

/// A directory that answered CWD and listed at least one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingPath {
    pub path: String,
    pub names: Vec<String>,
}

/// Result of walking the candidate list on one session.
#[derive(Debug)]
pub enum Search {
    Found(WorkingPath),
    Exhausted,
    /// The session died while trying `candidates[resume_at]`.
    Broken { resume_at: usize, error: SessionError },
}

fn normalize_base(base: &str) -> &str {
    base.trim().trim_end_matches('/')
}

/// Candidate directories for `station` on `date`, most specific layouts
/// first. Duplicates are removed, order is kept.
pub fn candidate_paths(base: &str, station: &str, date: NaiveDate) -> Vec<String> {
    let base = normalize_base(base);
    let yyyy = date.format("%Y").to_string();
    let mm = date.format("%m").to_string();
    let dd = date.format("%d").to_string();
    let ddmmyyyy = date.format("%d%m%Y").to_string();

    let flat = if base.is_empty() { "/".to_string() } else { base.to_string() };

    let paths = [
        format!("{base}/ARCHIVE/{yyyy}/{mm}/{dd}"),
        format!("{base}/Archive/{yyyy}/{mm}/{dd}"),
        format!("{base}/archive/{yyyy}/{mm}/{dd}"),
        format!("{base}/received/{yyyy}/{mm}/{ddmmyyyy}"),
        format!("{base}/{station}/received/{yyyy}/{mm}/{ddmmyyyy}"),
        format!("{base}/archived/{yyyy}/{mm}/{ddmmyyyy}"),
        format!("{base}/Archived/{yyyy}/{mm}/{ddmmyyyy}"),
        flat,
        format!("{base}/{yyyy}/{mm}/{dd}"),
        format!("{base}/{yyyy}/{mm}/{ddmmyyyy}"),
        format!("{base}/data/{yyyy}/{mm}/{dd}"),
        format!("{base}/DATA/{yyyy}/{mm}/{dd}"),
        format!("{base}/{station}"),
        format!("{base}/{station}/{yyyy}/{mm}/{dd}"),
        format!("{base}/{station}/{yyyy}/{mm}/{ddmmyyyy}"),
    ];

    let mut unique: Vec<String> = Vec::with_capacity(paths.len());
    for path in paths {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }
    unique
}

/// Tries `candidates[start..]` in order on an open session.
pub fn search_from(session: &mut dyn RemoteSession, candidates: &[String], start: usize) -> Search {
    for (index, path) in candidates.iter().enumerate().skip(start) {
        match connection::list_directory(session, path) {
            Ok(names) if !names.is_empty() => {
                info!("✅ Found path: {} ({} items)", path, names.len());
                return Search::Found(WorkingPath {
                    path: path.clone(),
                    names,
                });
            }
            Ok(_) => debug!("✗ Path empty: {}", path),
            Err(error) if error.is_transport() => {
                return Search::Broken {
                    resume_at: index,
                    error,
                };
            }
            Err(e) => debug!("✗ Path failed: {} - {}", path, e),
        }
    }
    Search::Exhausted
}

/// First candidate that changes directory and lists non-empty.
pub fn find_working_path(session: &mut dyn RemoteSession, candidates: &[String]) -> Option<WorkingPath> {
    match search_from(session, candidates, 0) {
        Search::Found(found) => Some(found),
        Search::Exhausted => None,
        Search::Broken { error, .. } => {
            warn!("⚠️ Connection lost during path discovery: {}", error);
            None
        }
    }
}

/// Opens a session and searches the candidates, reconnecting once if the
/// connection drops mid-search.
pub fn discover(
    manager: &ConnectionManager,
    target: &ConnectionTarget,
    retries: u32,
    candidates: &[String],
    control: &RunControl,
) -> Option<WorkingPath> {
    let mut start = 0;
    let mut reconnected = false;

    loop {
        if control.is_cancelled() {
            return None;
        }

        let mut session = match manager.connect(target, retries, control) {
            Ok(session) => session,
            Err(e) => {
                warn!("⚠️ Path discovery could not connect: {}", e);
                return None;
            }
        };

        let search = search_from(session.as_mut(), candidates, start);
        session.quit();

        match search {
            Search::Found(found) => return Some(found),
            Search::Exhausted => return None,
            Search::Broken { resume_at, error } => {
                if reconnected {
                    warn!("⚠️ Connection lost again during path discovery, giving up: {}", error);
                    return None;
                }
                warn!("🔄 Connection lost during path discovery, reconnecting: {}", error);
                reconnected = true;
                start = resume_at;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;

    struct DirSession {
        dirs: HashMap<String, Vec<String>>,
        cwd: String,
        visited: Vec<String>,
        drop_on: Option<String>,
    }

    impl DirSession {
        fn with(dirs: &[(&str, &[&str])]) -> Self {
            DirSession {
                dirs: dirs
                    .iter()
                    .map(|(d, names)| (d.to_string(), names.iter().map(|n| n.to_string()).collect()))
                    .collect(),
                cwd: String::new(),
                visited: Vec::new(),
                drop_on: None,
            }
        }
    }

    impl RemoteSession for DirSession {
        fn change_dir(&mut self, path: &str) -> Result<(), SessionError> {
            self.visited.push(path.to_string());
            if self.drop_on.as_deref() == Some(path) {
                return Err(SessionError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "reset",
                )));
            }
            if self.dirs.contains_key(path) {
                self.cwd = path.to_string();
                Ok(())
            } else {
                Err(SessionError::Protocol("550 not found".into()))
            }
        }

        fn list_names(&mut self) -> Result<Vec<String>, SessionError> {
            Ok(self.dirs[&self.cwd].clone())
        }

        fn size(&mut self, _filename: &str) -> Result<Option<u64>, SessionError> {
            Ok(None)
        }

        fn retrieve(
            &mut self,
            _filename: &str,
            _on_chunk: &mut dyn FnMut(&[u8]) -> io::Result<()>,
        ) -> Result<u64, SessionError> {
            Ok(0)
        }

        fn quit(&mut self) {}
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 18).unwrap()
    }

    #[test]
    fn candidate_list_is_ordered_and_complete() {
        let paths = candidate_paths("/rtutrg/", "QSRA0004", day());
        assert_eq!(paths.len(), 15);
        assert_eq!(paths[0], "/rtutrg/ARCHIVE/2025/11/18");
        assert_eq!(paths[3], "/rtutrg/received/2025/11/18112025");
        assert_eq!(paths[4], "/rtutrg/QSRA0004/received/2025/11/18112025");
        assert_eq!(paths[7], "/rtutrg");
        assert_eq!(paths[12], "/rtutrg/QSRA0004");
        assert_eq!(paths[14], "/rtutrg/QSRA0004/2025/11/18112025");
    }

    #[test]
    fn root_base_yields_rooted_paths() {
        let paths = candidate_paths("/", "S1", day());
        assert_eq!(paths[0], "/ARCHIVE/2025/11/18");
        assert_eq!(paths[7], "/");
        assert_eq!(candidate_paths("", "S1", day()), paths);
    }

    #[test]
    fn first_valid_candidate_wins() {
        let candidates = candidate_paths("/base", "S1", day());
        let mut session = DirSession::with(&[
            ("/base/archived/2025/11/18112025", &["S1251118000000.txt"]),
            ("/base/2025/11/18", &["other.txt"]),
        ]);

        let found = find_working_path(&mut session, &candidates).unwrap();
        assert_eq!(found.path, "/base/archived/2025/11/18112025");
        assert_eq!(found.names, vec!["S1251118000000.txt"]);
        assert!(!session.visited.contains(&"/base/2025/11/18".to_string()));
    }

    #[test]
    fn empty_directories_are_passed_over() {
        let candidates = candidate_paths("/base", "S1", day());
        let mut session = DirSession::with(&[
            ("/base/ARCHIVE/2025/11/18", &[]),
            ("/base", &["S1251118000000.txt"]),
        ]);

        let found = find_working_path(&mut session, &candidates).unwrap();
        assert_eq!(found.path, "/base");
    }

    #[test]
    fn nothing_found_is_none() {
        let candidates = candidate_paths("/base", "S1", day());
        let mut session = DirSession::with(&[]);
        assert!(find_working_path(&mut session, &candidates).is_none());
        assert_eq!(session.visited.len(), 15);
    }

    #[test]
    fn transport_failure_reports_resume_point() {
        let candidates = candidate_paths("/base", "S1", day());
        let mut session = DirSession::with(&[("/base", &["x.txt"])]);
        session.drop_on = Some(candidates[2].clone());

        match search_from(&mut session, &candidates, 0) {
            Search::Broken { resume_at, .. } => assert_eq!(resume_at, 2),
            other => panic!("expected broken search, got {:?}", other),
        }
    }
}
