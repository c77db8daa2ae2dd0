//! Entry points for front ends: one-shot downloads, connection checks and
//! remote listings.

use std::sync::Arc;

use serde::Serialize;

use crate::connection::{self, ConnectionManager, ConnectionTarget};
use crate::control::RunControl;
use crate::error::JobError;
use crate::scheduler::{ConcurrencyHints, DownloadJob, DownloadReport, DownloadScheduler, ProgressSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteListing {
    pub ok: bool,
    pub names: Vec<String>,
    pub message: String,
}

/// Downloads one job over real FTP connections without an audit log.
pub fn run_download(
    target: &ConnectionTarget,
    job: &DownloadJob,
    hints: ConcurrencyHints,
    control: &RunControl,
    on_progress: &(dyn Fn(&ProgressSnapshot) + Sync),
) -> Result<DownloadReport, JobError> {
    DownloadScheduler::new(Arc::new(ConnectionManager::ftp()))
        .with_hints(hints)
        .run(target, job, control, on_progress)
}

pub fn test_connection(target: &ConnectionTarget) -> ConnectionCheck {
    test_connection_with(&ConnectionManager::ftp(), target)
}

/// Single connection attempt, no retries.
pub fn test_connection_with(manager: &ConnectionManager, target: &ConnectionTarget) -> ConnectionCheck {
    match manager.connect(target, 1, &RunControl::new()) {
        Ok(mut session) => {
            session.quit();
            ConnectionCheck {
                ok: true,
                message: format!(
                    "Successfully connected to {} as {}",
                    target.address(),
                    target.username
                ),
            }
        }
        Err(e) => ConnectionCheck {
            ok: false,
            message: format!("Connection error: {}", e),
        },
    }
}

pub fn list_remote_directory(target: &ConnectionTarget, path: &str) -> RemoteListing {
    list_remote_directory_with(&ConnectionManager::ftp(), target, path)
}

pub fn list_remote_directory_with(manager: &ConnectionManager, target: &ConnectionTarget, path: &str) -> RemoteListing {
    let mut session = match manager.connect(target, 1, &RunControl::new()) {
        Ok(session) => session,
        Err(e) => {
            return RemoteListing {
                ok: false,
                names: Vec::new(),
                message: format!("FTP listing failed: {}", e),
            }
        }
    };

    let listing = connection::list_directory(session.as_mut(), path);
    session.quit();

    match listing {
        Ok(names) => RemoteListing {
            ok: true,
            message: format!("Listed {} items from {}", names.len(), path),
            names,
        },
        Err(e) => RemoteListing {
            ok: false,
            names: Vec::new(),
            message: format!("FTP listing failed: {}", e),
        },
    }
}
