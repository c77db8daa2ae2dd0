//! Error types for the fetch engine.
//!
//! Per-file failures travel inside `DownloadOutcome::Failed` and never abort a
//! job; only `JobError` stops a run, and only before scheduling begins.

use std::io;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

/// Failure of a single protocol command on an open session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket-level failure: refused, reset, timed out, broken pipe.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The server answered with an error reply (e.g. `550 No such directory`).
    #[error("server replied: {0}")]
    Protocol(String),
}

impl SessionError {
    /// True for read/connect timeouts, which get their own backoff schedule.
    pub fn is_timeout(&self) -> bool {
        match self {
            SessionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            SessionError::Protocol(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("timed out") || lower.contains("timeout")
            }
        }
    }

    /// True when the control connection itself is gone and the session
    /// cannot be reused.
    pub fn is_transport(&self) -> bool {
        matches!(self, SessionError::Io(_))
    }
}

impl From<ftp::types::FtpError> for SessionError {
    fn from(err: ftp::types::FtpError) -> Self {
        match err {
            ftp::types::FtpError::ConnectionError(e) => SessionError::Io(e),
            other => SessionError::Protocol(other.to_string()),
        }
    }
}

/// Opening an authenticated session failed after every retry.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The server kept rejecting us with a connection-limit reply.
    #[error("server connection limit exceeded after {attempts} attempts: {source}")]
    ServerBusy {
        attempts: u32,
        #[source]
        source: SessionError,
    },

    #[error("connection timed out after {attempts} attempts: {source}")]
    Timeout {
        attempts: u32,
        #[source]
        source: SessionError,
    },

    #[error("failed to connect after {attempts} attempts: {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: SessionError,
    },

    #[error("connection attempt cancelled")]
    Cancelled,
}

/// A streamed retrieve that did not complete.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("download cancelled")]
    Cancelled,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("local write failed: {0}")]
    Local(io::Error),
}

/// Why a single candidate file ended up `Failed`.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The run was cancelled before or during this file.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("cannot enter remote directory {path}: {source}")]
    RemoteDirectory {
        path: String,
        #[source]
        source: SessionError,
    },

    #[error("transfer of {filename} failed: {source}")]
    Transfer {
        filename: String,
        #[source]
        source: TransferError,
    },

    /// Transfer finished but the local file is empty; it has been deleted.
    #[error("downloaded file {path} is 0 bytes (expected {})", expected_display(.expected))]
    CorruptLocalFile {
        path: PathBuf,
        expected: Option<u64>,
    },

    #[error("local file error at {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn expected_display(expected: &Option<u64>) -> String {
    match expected {
        Some(n) => format!("{} bytes", n),
        None => "unknown size".to_string(),
    }
}

/// The job itself is unusable; nothing was scheduled.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("station id must not be empty")]
    EmptyStation,

    #[error("start {start} is after end {end}")]
    InvalidWindow {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("cannot prepare local folder {path}: {source}")]
    LocalRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Audit history I/O failures. `AuditLogger::append` swallows these after
/// retrying; the query methods return them.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot read download log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download log {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot write temporary log file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot replace download log {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot serialize download log: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Problems loading or interpreting a run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("start and end dates must both be provided")]
    MissingWindow,

    #[error("unsupported date string format: {0}")]
    InvalidDate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_detected_from_io_kind_and_message() {
        let io_timeout = SessionError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(io_timeout.is_timeout());
        assert!(io_timeout.is_transport());

        let reply = SessionError::Protocol("421 Timeout waiting for data".into());
        assert!(reply.is_timeout());
        assert!(!reply.is_transport());

        let refused = SessionError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "no"));
        assert!(!refused.is_timeout());
    }

    #[test]
    fn corrupt_file_message_mentions_expected_size() {
        let err = DownloadError::CorruptLocalFile {
            path: PathBuf::from("/tmp/a.txt"),
            expected: Some(42),
        };
        assert!(err.to_string().contains("42 bytes"));

        let err = DownloadError::CorruptLocalFile {
            path: PathBuf::from("/tmp/a.txt"),
            expected: None,
        };
        assert!(err.to_string().contains("unknown size"));
    }
}
