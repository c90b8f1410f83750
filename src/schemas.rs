//! Data schemas shared by the crawler components.
//!
//! All records are plain value types. Only [`CrawlRow`] is written to disk;
//! its serde names define the output CSV header.

use crate::address::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header of the crawl output file, in column order.
pub const CRAWL_OUTPUT_HEADER: [&str; 3] = ["Address", "TransactionCount", "IsSybil"];

// ============================================================================
// Explorer data
// ============================================================================

/// Plain value transfer returned by the explorer, already filtered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Sender
    pub from: Address,

    /// Recipient; `None` for contract creations
    pub to: Option<Address>,

    /// Block timestamp (UTC)
    pub timestamp_utc: DateTime<Utc>,

    /// On-chain execution failure flag
    pub is_error: bool,

    /// No method selector and no execution failure
    pub is_plain_value_transfer: bool,
}

impl Transfer {
    /// Recipient of this transfer when it was sent by `address`.
    pub fn outgoing_to(&self, address: &Address) -> Option<&Address> {
        if &self.from == address {
            self.to.as_ref()
        } else {
            None
        }
    }
}

// ============================================================================
// Local dataset lookups
// ============================================================================

/// Historical activity of an address in the local sharded datasets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRecord {
    pub historical_transfer_count: u64,
    pub first_transfer_time: Option<DateTime<Utc>>,
    pub last_transfer_time: Option<DateTime<Utc>>,
    /// Present in the flagged/cluster dataset
    pub is_flagged: bool,
}

impl LookupRecord {
    /// Record for an address absent from the activity dataset.
    pub fn absent() -> Self {
        Self::default()
    }
}

// ============================================================================
// Output
// ============================================================================

/// One output line for an address that crossed the recording threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRow {
    #[serde(rename = "Address")]
    pub address: Address,

    #[serde(rename = "TransactionCount")]
    pub historical_transfer_count: u64,

    #[serde(rename = "IsSybil")]
    pub is_flagged: bool,
}

impl CrawlRow {
    pub fn new(address: Address, record: &LookupRecord) -> Self {
        Self {
            address,
            historical_transfer_count: record.historical_transfer_count,
            is_flagged: record.is_flagged,
        }
    }
}

/// Counters describing one crawl run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    /// Seed addresses handed to the crawler
    pub seeds: usize,
    /// Explorer requests issued (including retries)
    pub fetched: usize,
    /// `RetryNeeded` outcomes
    pub retries: usize,
    /// Addresses fully processed
    pub visited: usize,
    /// Addresses added to the exclusion set during the run
    pub excluded: usize,
    /// Rows appended to the output
    pub recorded: usize,
    /// Addresses given up on after the retry budget ran out
    pub abandoned: usize,
    /// Pops skipped because the address was visited or excluded
    pub skipped: usize,
}
