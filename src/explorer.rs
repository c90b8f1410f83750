//! Etherscan-compatible explorer client.
//!
//! Fetches an address's `txlist`, keeps plain value transfers, and classifies
//! every response as data, empty, or retry-needed. The client never retries
//! on its own and holds no crawl state; the crawler owns the retry loop.

use crate::address::Address;
use crate::config::{Chain, ExplorerConfig, ExplorerEndpoint, RateLimitConfig};
use crate::schemas::Transfer;
use async_trait::async_trait;
use chrono::DateTime;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Message the explorer sends with `status == "0"` for an address without history
pub const NO_TRANSACTIONS_MESSAGE: &str = "No transactions found";

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// Classified result of one explorer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Filtered plain transfers, in API order
    Data(Vec<Transfer>),
    /// The explorer reported no transactions for the address
    Empty,
    /// Throttled, failed or malformed; the same request should be issued again
    RetryNeeded(String),
}

/// Source of an address's transfer history.
#[async_trait]
pub trait TransferSource: Send + Sync {
    async fn fetch(&self, address: &Address, chain: Chain) -> FetchOutcome;
}

/// `txlist` response envelope
#[derive(Debug, Deserialize)]
pub struct TxListEnvelope {
    pub status: String,

    #[serde(default)]
    pub message: String,

    /// Array of transactions on success, a message string otherwise
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Explorer transaction record (fields are strings on the wire, and any of
/// them may be null or missing on a bad row)
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub time_stamp: Option<String>,
    #[serde(default)]
    pub is_error: Option<String>,
    #[serde(default)]
    pub method_id: Option<String>,
}

impl RawTransaction {
    /// No method selector and no on-chain failure
    pub fn is_plain_transfer(&self) -> bool {
        let no_selector = matches!(self.method_id.as_deref().map(str::trim), None | Some("") | Some("0x"));
        let not_failed = !matches!(self.is_error.as_deref().map(str::trim), Some("1"));
        no_selector && not_failed
    }
}

/// Rate-limited explorer client.
pub struct ExplorerClient {
    client: reqwest::Client,
    endpoints: ExplorerConfig,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl ExplorerClient {
    pub fn new(endpoints: ExplorerConfig, limits: &RateLimitConfig) -> Result<Self, ExplorerError> {
        let quota = Quota::per_second(
            NonZeroU32::new(limits.requests_per_second).unwrap_or(NonZeroU32::MIN),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(limits.request_timeout_secs))
            .user_agent(concat!("evm-flow-crawler/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoints,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    async fn request(
        &self,
        endpoint: &ExplorerEndpoint,
        address: &Address,
    ) -> Result<TxListEnvelope, ExplorerError> {
        let url = txlist_url(endpoint, address);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExplorerError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl TransferSource for ExplorerClient {
    async fn fetch(&self, address: &Address, chain: Chain) -> FetchOutcome {
        self.rate_limiter.until_ready().await;

        debug!("GET txlist for {} on {}", address, chain);
        match self.request(self.endpoints.endpoint(chain), address).await {
            Ok(envelope) => classify_envelope(envelope),
            Err(e) => FetchOutcome::RetryNeeded(e.to_string()),
        }
    }
}

/// Build the `txlist` URL for an address.
pub fn txlist_url(endpoint: &ExplorerEndpoint, address: &Address) -> String {
    let base = endpoint.base_url.trim();
    let separator = if base.ends_with('/') { "" } else { "/" };
    format!(
        "{}{}api?module=account&action=txlist&address={}&startblock=0&endblock=99999999&sort=asc&apikey={}",
        base, separator, address, endpoint.api_key
    )
}

/// Map a decoded envelope to a fetch outcome.
pub fn classify_envelope(envelope: TxListEnvelope) -> FetchOutcome {
    match envelope.status.trim() {
        "1" => match envelope.result {
            serde_json::Value::Array(rows) if rows.is_empty() => FetchOutcome::Empty,
            serde_json::Value::Array(rows) => FetchOutcome::Data(convert_transactions(rows)),
            other => {
                FetchOutcome::RetryNeeded(format!("malformed result: expected array, got {}", other))
            }
        },
        "0" if envelope.message.trim() == NO_TRANSACTIONS_MESSAGE => FetchOutcome::Empty,
        status => {
            let detail = match &envelope.result {
                serde_json::Value::String(s) => s.clone(),
                _ => String::new(),
            };
            FetchOutcome::RetryNeeded(format!(
                "status={} message={} {}",
                status, envelope.message, detail
            ))
        }
    }
}

/// Decode each `txlist` row on its own, keep plain transfers and convert them
/// to [`Transfer`]s, preserving order. Undecodable rows are dropped.
pub fn convert_transactions(rows: Vec<serde_json::Value>) -> Vec<Transfer> {
    let total = rows.len();
    let mut transfers = Vec::with_capacity(total);
    let mut skip_undecodable = 0usize;
    let mut skip_not_plain = 0usize;
    let mut skip_bad_from = 0usize;
    let mut skip_bad_time = 0usize;

    for row in rows {
        let tx: RawTransaction = match serde_json::from_value(row) {
            Ok(tx) => tx,
            Err(e) => {
                debug!("Dropping undecodable transaction row: {}", e);
                skip_undecodable += 1;
                continue;
            }
        };

        if !tx.is_plain_transfer() {
            skip_not_plain += 1;
            continue;
        }

        let from = match tx.from.as_deref().map(Address::parse) {
            Some(Ok(a)) => a,
            _ => {
                skip_bad_from += 1;
                continue;
            }
        };

        let timestamp_utc = match tx
            .time_stamp
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        {
            Some(ts) => ts,
            None => {
                skip_bad_time += 1;
                continue;
            }
        };

        // Empty or null `to` marks a contract creation
        let to = match tx.to.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match Address::parse(raw) {
                Ok(a) => Some(a),
                Err(_) => {
                    debug!(
                        "Transaction {} has unparseable recipient {:?}",
                        tx.hash.as_deref().unwrap_or("?"),
                        raw
                    );
                    None
                }
            },
        };

        transfers.push(Transfer {
            from,
            to,
            timestamp_utc,
            is_error: false,
            is_plain_value_transfer: true,
        });
    }

    debug!(
        "convert_transactions: {} total -> {} kept, filtered: {} undecodable, {} non-plain, {} bad-from, {} bad-timestamp",
        total,
        transfers.len(),
        skip_undecodable,
        skip_not_plain,
        skip_bad_from,
        skip_bad_time
    );

    transfers
}
