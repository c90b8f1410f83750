//! EVM Outgoing-Transfer Crawler Library
//!
//! Follows the flow of funds out of seed wallets through an
//! Etherscan-compatible explorer, and records every reached address whose
//! historical activity in a local sharded dataset crosses a threshold,
//! together with whether it appears in a flagged (sybil cluster) dataset.
//!
//! # Components
//!
//! 1. **Explorer** ([`explorer`]): rate-limited `txlist` fetches classified as data, empty or retry-needed
//! 2. **Lookup** ([`lookup`]): activity counts and flagged status from `<prefix>.csv` shards
//! 3. **Policy** ([`policy`]): exclusion and recording thresholds
//! 4. **Crawler** ([`crawler`]): depth-first traversal with visited/excluded sets and retries
//! 5. **Sink** ([`sink`]): append-only `Address,TransactionCount,IsSybil` CSV
//!
//! # Example
//!
//! ```no_run
//! use evm_flow_crawler::config::CrawlerConfig;
//! use evm_flow_crawler::crawler::{AddressGraphCrawler, CrawlState};
//! use evm_flow_crawler::explorer::ExplorerClient;
//! use evm_flow_crawler::lookup::ShardedLookup;
//! use evm_flow_crawler::sink::CsvSink;
//! use evm_flow_crawler::Address;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CrawlerConfig::load()?;
//!     let client = ExplorerClient::new(config.explorers.clone(), &config.rate_limits)?;
//!     let mut crawler = AddressGraphCrawler::new(
//!         client,
//!         ShardedLookup::new(&config.paths),
//!         CsvSink::open(&config.paths.output_path)?,
//!         (&config.thresholds).into(),
//!         config.retry.clone(),
//!         config.chain,
//!     );
//!
//!     let seed = Address::parse("0xb84c63e3598393a6d6c772fdf296757880501e2a")?;
//!     let mut state = CrawlState::new();
//!     crawler.crawl(&[seed], &mut state).await?;
//!     println!("Recorded {} addresses", state.summary().recorded);
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod config;
pub mod crawler;
pub mod explorer;
pub mod lookup;
pub mod policy;
pub mod retry;
pub mod schemas;
pub mod seeds;
pub mod sink;

// Re-export commonly used types
pub use address::Address;
pub use config::{Chain, CrawlerConfig};
pub use crawler::{AddressGraphCrawler, CrawlError, CrawlState};
pub use schemas::{CrawlRow, CrawlSummary, LookupRecord, Transfer};
