//! JSON run configuration handed over by the front end or the CLI.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use log::info;
use serde::Deserialize;

use crate::audit::DEFAULT_LOG_FILE;
use crate::connection::{ConnectionTarget, DEFAULT_PORT, DEFAULT_RETRIES, DEFAULT_TIMEOUT};
use crate::error::ConfigError;
use crate::scheduler::{ConcurrencyHints, DownloadJob, DEFAULT_EXTENSION};

/// Overrides the audit history location.
pub const LOG_FILE_ENV: &str = "FTP_FETCH_LOG_FILE";
/// Supplies the FTP password so it need not be stored in the config file.
pub const PASSWORD_ENV: &str = "FTP_FETCH_PASSWORD";

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d%m%Y"];

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_remote_path() -> String {
    "/".to_string()
}

fn default_local_folder() -> String {
    ".".to_string()
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_extension() -> Option<String> {
    Some(DEFAULT_EXTENSION.to_string())
}

#[derive(Deserialize, Clone)]
pub struct FetchConfig {
    pub server_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Remote base directory the candidate layouts hang off.
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    #[serde(default = "default_local_folder")]
    pub local_folder: String,
    pub stations: Vec<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// `null` accepts every file.
    #[serde(default = "default_extension")]
    pub file_extension: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl fmt::Debug for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConfig")
            .field("server_address", &self.server_address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("remote_path", &self.remote_path)
            .field("local_folder", &self.local_folder)
            .field("stations", &self.stations)
            .field("start_date", &self.start_date)
            .field("end_date", &self.end_date)
            .field("retries", &self.retries)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_workers", &self.max_workers)
            .field("file_extension", &self.file_extension)
            .field("log_file", &self.log_file)
            .finish_non_exhaustive()
    }
}

/// Parses a window bound. A date without a time means the start of that day
/// for `start` and the last second of it for `end`.
pub fn parse_bound(value: &str, is_end: bool) -> Result<NaiveDateTime, ConfigError> {
    let value = value.trim();

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            let time = if is_end {
                date.and_hms_opt(23, 59, 59)
            } else {
                date.and_hms_opt(0, 0, 0)
            };
            return time.ok_or_else(|| ConfigError::InvalidDate(value.to_string()));
        }
    }

    Err(ConfigError::InvalidDate(value.to_string()))
}

impl FetchConfig {
    /// Reads the file and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&content)?;
        config.apply_overrides(|key| env::var(key).ok());

        info!(
            "🔧 Config loaded: {}@{}:{} ({} station(s))",
            config.username,
            config.server_address,
            config.port,
            config.stations.len()
        );
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup(PASSWORD_ENV).filter(|p| !p.is_empty()) {
            self.password = password;
        }
        if let Some(log_file) = lookup(LOG_FILE_ENV).filter(|p| !p.is_empty()) {
            self.log_file = Some(log_file);
        }
    }

    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget::new(
            self.server_address.trim(),
            self.port,
            self.username.trim(),
            self.password.as_str(),
        )
        .with_timeout(Duration::from_secs(self.timeout_secs.max(1)))
    }

    pub fn window(&self) -> Result<(NaiveDateTime, NaiveDateTime), ConfigError> {
        match (&self.start_date, &self.end_date) {
            (Some(start), Some(end)) => Ok((parse_bound(start, false)?, parse_bound(end, true)?)),
            _ => Err(ConfigError::MissingWindow),
        }
    }

    pub fn hints(&self) -> ConcurrencyHints {
        ConcurrencyHints {
            retries: self.retries.max(1),
            max_workers: self.max_workers,
        }
    }

    pub fn audit_path(&self) -> PathBuf {
        PathBuf::from(self.log_file.as_deref().unwrap_or(DEFAULT_LOG_FILE))
    }

    /// Station ids with blanks dropped, in configured order.
    pub fn station_ids(&self) -> Vec<String> {
        self.stations
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn job_for(&self, station: &str) -> Result<DownloadJob, ConfigError> {
        let (start, end) = self.window()?;
        Ok(
            DownloadJob::new(station, start, end, self.remote_path.as_str(), self.local_folder.as_str())
                .with_extension(self.file_extension.as_deref()),
        )
    }

    pub fn jobs(&self) -> Result<Vec<DownloadJob>, ConfigError> {
        self.station_ids().iter().map(|s| self.job_for(s)).collect()
    }
}
