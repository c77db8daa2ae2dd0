//! Station id and timestamp extraction from data filenames.
//!
//! Two layouts are recognised, both carrying a `YYMMDDHHMMSS` stamp:
//!
//! * `QSRA0004251118104500.txt`: letters, digits, optional `RF`, stamp.
//! * `TSET0013RF251108170000_20251108170535.txt`: letters, digits, optional
//!   letters, stamp, then an ignored `_<digits>` upload suffix.

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

/// Format of the 12-digit stamp embedded in filenames.
pub const STAMP_FORMAT: &str = "%y%m%d%H%M%S";

lazy_static! {
    static ref PLAIN_NAME: Regex =
        Regex::new(r"(?i)^([A-Z]+\d+(?:RF)?)(\d{12})$").expect("plain filename pattern");
    static ref SUFFIXED_NAME: Regex =
        Regex::new(r"(?i)^([A-Z]+\d+[A-Z]*)(\d{12})_\d+$").expect("suffixed filename pattern");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedName {
    Parsed {
        station_id: String,
        timestamp: NaiveDateTime,
    },
    /// The layout matched but the 12 digits are not a real date/time.
    InvalidTimestamp { station_id: String, stamp: String },
    NoMatch,
}

/// Why a listed file was kept for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Parsed, station matched, stamp inside the window.
    Verified {
        station_id: String,
        timestamp: NaiveDateTime,
    },
    /// Unparseable name that starts with the requested station id. The window
    /// could not be checked.
    PrefixOnly,
}

/// Drops the final extension, if any.
pub fn stem(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    }
}

/// Case-insensitive extension test (`ext` given without the dot).
pub fn has_extension(filename: &str, ext: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((stem, found)) => !stem.is_empty() && found.eq_ignore_ascii_case(ext),
        None => false,
    }
}

pub fn parse(filename: &str) -> ParsedName {
    let name = stem(filename);

    let caps = PLAIN_NAME
        .captures(name)
        .or_else(|| SUFFIXED_NAME.captures(name));

    let Some(caps) = caps else {
        return ParsedName::NoMatch;
    };

    let station_id = caps[1].to_string();
    let stamp = &caps[2];
    match NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT) {
        Ok(timestamp) => ParsedName::Parsed {
            station_id,
            timestamp,
        },
        Err(e) => {
            debug!("Invalid datetime in filename {}: {} ({})", filename, stamp, e);
            ParsedName::InvalidTimestamp {
                station_id,
                stamp: stamp.to_string(),
            }
        }
    }
}

fn strip_rf(id: &str) -> &str {
    let len = id.len();
    if len > 2 && id.is_char_boundary(len - 2) && id[len - 2..].eq_ignore_ascii_case("RF") {
        &id[..len - 2]
    } else {
        id
    }
}

/// Station ids match ignoring case and a trailing `RF` on either side.
pub fn stations_match(requested: &str, parsed: &str) -> bool {
    requested.eq_ignore_ascii_case(parsed)
        || strip_rf(requested).eq_ignore_ascii_case(strip_rf(parsed))
}

fn starts_with_ignore_case(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name.is_char_boundary(prefix.len())
        && name[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Decides whether `filename` belongs to `station` within `[start, end]`.
pub fn select(
    filename: &str,
    station: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Option<Selection> {
    match parse(filename) {
        ParsedName::Parsed {
            station_id,
            timestamp,
        } => {
            if stations_match(station, &station_id) && start <= timestamp && timestamp <= end {
                Some(Selection::Verified {
                    station_id,
                    timestamp,
                })
            } else {
                None
            }
        }
        ParsedName::InvalidTimestamp { .. } => None,
        ParsedName::NoMatch => {
            if starts_with_ignore_case(filename, station) {
                debug!("Including {} by station prefix (timestamp not verified)", filename);
                Some(Selection::PrefixOnly)
            } else {
                None
            }
        }
    }
}
