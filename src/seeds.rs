//! Seed address list loading.
//!
//! Accepts either a bare list (one address per line) or a CSV file with an
//! `address` column. Any row that does not hold a valid address aborts the
//! load: the crawl cannot start from a partially understood seed list.

use crate::address::{Address, AddressError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Failed to read seed file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in seed file: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed seed address on line {line}: {value:?} ({source})")]
    Malformed {
        line: u64,
        value: String,
        #[source]
        source: AddressError,
    },

    #[error("Seed file {0:?} contains no addresses")]
    Empty(PathBuf),
}

/// Read seed addresses from `path`, deduplicated in file order.
pub fn read_seed_addresses(path: &Path) -> Result<Vec<Address>, SeedError> {
    let file = std::fs::File::open(path).map_err(|source| SeedError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut column: Option<usize> = None;
    let mut seen = HashSet::new();
    let mut seeds = Vec::new();

    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        // First record decides the layout
        let index = match column {
            Some(i) => i,
            None => {
                let header = record
                    .iter()
                    .position(|field| field.eq_ignore_ascii_case("address"));
                column = Some(header.unwrap_or(0));
                if header.is_some() {
                    continue;
                }
                0
            }
        };

        let value = record.get(index).unwrap_or_default();
        if value.is_empty() {
            continue;
        }

        let address = Address::parse(value).map_err(|source| SeedError::Malformed {
            line,
            value: value.to_string(),
            source,
        })?;

        if seen.insert(address.clone()) {
            seeds.push(address);
        }
    }

    if seeds.is_empty() {
        return Err(SeedError::Empty(path.to_path_buf()));
    }

    info!("Loaded {} seed addresses from {:?}", seeds.len(), path);
    Ok(seeds)
}
