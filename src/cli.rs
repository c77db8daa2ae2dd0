//! Command-line arguments for the `ftp-fetch` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Bulk download of timestamped station files from FTP servers.
#[derive(Parser, Debug)]
#[command(name = "ftp-fetch")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the JSON run configuration
    #[arg(short, long, env = "FTP_FETCH_CONFIG", default_value = "ftp_fetch.json")]
    pub config: PathBuf,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Download every configured station for the configured window
    Download,
    /// Re-download files whose most recent attempt failed
    Retry,
    /// Check that the server accepts our credentials
    Test,
    /// List a remote directory
    List {
        /// Remote directory to list
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show files whose most recent attempt failed
    Failures,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_uses_default_config_path() {
        let args = Args::try_parse_from(["ftp-fetch", "download"]).unwrap();
        assert_eq!(args.command, Command::Download);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn list_takes_optional_path() {
        let args = Args::try_parse_from(["ftp-fetch", "-c", "site.json", "list", "/rtutrg"]).unwrap();
        assert_eq!(args.config, PathBuf::from("site.json"));
        assert_eq!(
            args.command,
            Command::List {
                path: "/rtutrg".into()
            }
        );

        let args = Args::try_parse_from(["ftp-fetch", "list"]).unwrap();
        assert_eq!(args.command, Command::List { path: "/".into() });
    }

    #[test]
    fn verbose_is_global() {
        let args = Args::try_parse_from(["ftp-fetch", "retry", "-vv"]).unwrap();
        assert_eq!(args.command, Command::Retry);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Args::try_parse_from(["ftp-fetch"]).is_err());
        assert!(Args::try_parse_from(["ftp-fetch", "upload"]).is_err());
    }
}
