//! Lookups against the local sharded activity and flagged datasets.
//!
//! Each dataset is a directory of headerless CSV files named after a prefix of
//! the address (`<prefix>.csv`). Activity rows are
//! `address,count,firstSeen,lastSeen`; flagged rows hold just `address`.
//! Lookups never fail: missing or unreadable shards read as "no record".

use crate::address::Address;
use crate::config::PathConfig;
use crate::schemas::LookupRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read-only view over the two sharded datasets.
#[derive(Debug, Clone)]
pub struct ShardedLookup {
    activity_dir: PathBuf,
    flagged_dir: PathBuf,
    activity_prefix_len: usize,
    flagged_prefix_len: usize,
}

impl ShardedLookup {
    pub fn new(paths: &PathConfig) -> Self {
        Self {
            activity_dir: paths.activity_dir.clone(),
            flagged_dir: paths.flagged_dir.clone(),
            activity_prefix_len: paths.activity_prefix_len,
            flagged_prefix_len: paths.flagged_prefix_len,
        }
    }

    /// Activity record plus flagged status for one address.
    pub fn lookup(&self, address: &Address) -> LookupRecord {
        let mut record = self.activity(address).unwrap_or_else(LookupRecord::absent);
        record.is_flagged = self.is_flagged(address);
        record
    }

    pub fn activity_shard(&self, address: &Address) -> PathBuf {
        shard_path(&self.activity_dir, address, self.activity_prefix_len)
    }

    pub fn flagged_shard(&self, address: &Address) -> PathBuf {
        shard_path(&self.flagged_dir, address, self.flagged_prefix_len)
    }

    /// First matching activity row, if any.
    pub fn activity(&self, address: &Address) -> Option<LookupRecord> {
        let path = self.activity_shard(address);
        let mut reader = open_shard(&path)?;

        for (index, row) in reader.records().enumerate() {
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping unreadable row {} in {:?}: {}", index + 1, path, e);
                    continue;
                }
            };

            if !row.get(0).is_some_and(|raw| address.matches(raw)) {
                continue;
            }

            let count = row.get(1).unwrap_or_default().trim();
            let historical_transfer_count = match count.parse::<u64>() {
                Ok(c) => c,
                Err(_) => {
                    warn!(
                        "Malformed transfer count {:?} for {} in {:?}, treating as absent",
                        count, address, path
                    );
                    return None;
                }
            };

            debug!("Address {} found in {:?}", address, path);
            return Some(LookupRecord {
                historical_transfer_count,
                first_transfer_time: row.get(2).and_then(parse_timestamp),
                last_transfer_time: row.get(3).and_then(parse_timestamp),
                is_flagged: false,
            });
        }

        debug!("Address {} not found in {:?}", address, path);
        None
    }

    /// Whether the address appears in the flagged dataset.
    pub fn is_flagged(&self, address: &Address) -> bool {
        let path = self.flagged_shard(address);
        let Some(mut reader) = open_shard(&path) else {
            return false;
        };

        for row in reader.records() {
            match row {
                Ok(r) if r.get(0).is_some_and(|raw| address.matches(raw)) => return true,
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable row in {:?}: {}", path, e),
            }
        }
        false
    }
}

fn shard_path(dir: &Path, address: &Address, prefix_len: usize) -> PathBuf {
    dir.join(format!("{}.csv", address.shard_key(prefix_len)))
}

fn open_shard(path: &Path) -> Option<csv::Reader<File>> {
    match File::open(path) {
        Ok(file) => Some(
            csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(file),
        ),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Shard {:?} does not exist", path);
            None
        }
        Err(e) => {
            warn!("Failed to open shard {:?}: {}", path, e);
            None
        }
    }
}

/// Parse a dataset timestamp: RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`, a bare date,
/// or unix seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}
