//! Configuration management for the crawler.
//!
//! Supports loading from environment variables, a TOML config file, and CLI
//! overrides applied by the binary.

use crate::address::Address;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Main crawler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Network to crawl
    #[serde(default)]
    pub chain: Chain,

    /// Extra addresses barred from traversal and output
    #[serde(default)]
    pub excluded_addresses: Vec<Address>,

    /// Explorer endpoints per network
    #[serde(default)]
    pub explorers: ExplorerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Retry behavior for throttled or failed explorer calls
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Exclusion and recording thresholds
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Local dataset and output paths
    #[serde(default)]
    pub paths: PathConfig,
}

// ============================================================================
// Networks
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown chain: {0} (expected ETH, FTM, ARB or AVAX)")]
pub struct UnknownChain(pub String);

/// Supported EVM networks with an Etherscan-compatible explorer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Eth,
    Ftm,
    Arb,
    #[default]
    Avax,
}

impl Chain {
    pub const ALL: [Chain; 4] = [Chain::Eth, Chain::Ftm, Chain::Arb, Chain::Avax];

    /// Ticker-style identifier, also used in env var names
    pub fn id(&self) -> &'static str {
        match self {
            Chain::Eth => "ETH",
            Chain::Ftm => "FTM",
            Chain::Arb => "ARB",
            Chain::Avax => "AVAX",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Chain::Eth => "https://api.etherscan.io/",
            Chain::Ftm => "https://api.ftmscan.com/",
            Chain::Arb => "https://api.arbiscan.io/",
            Chain::Avax => "https://api.snowscan.xyz/",
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eth" | "ethereum" => Ok(Chain::Eth),
            "ftm" | "fantom" => Ok(Chain::Ftm),
            "arb" | "arbitrum" => Ok(Chain::Arb),
            "avax" | "avalanche" => Ok(Chain::Avax),
            _ => Err(UnknownChain(s.to_string())),
        }
    }
}

/// One explorer API endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExplorerEndpoint {
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,
}

impl ExplorerEndpoint {
    fn for_chain(chain: Chain) -> Self {
        Self {
            base_url: chain.default_base_url().to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    #[serde(default = "default_eth_endpoint")]
    pub eth: ExplorerEndpoint,

    #[serde(default = "default_ftm_endpoint")]
    pub ftm: ExplorerEndpoint,

    #[serde(default = "default_arb_endpoint")]
    pub arb: ExplorerEndpoint,

    #[serde(default = "default_avax_endpoint")]
    pub avax: ExplorerEndpoint,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            eth: default_eth_endpoint(),
            ftm: default_ftm_endpoint(),
            arb: default_arb_endpoint(),
            avax: default_avax_endpoint(),
        }
    }
}

impl ExplorerConfig {
    pub fn endpoint(&self, chain: Chain) -> &ExplorerEndpoint {
        match chain {
            Chain::Eth => &self.eth,
            Chain::Ftm => &self.ftm,
            Chain::Arb => &self.arb,
            Chain::Avax => &self.avax,
        }
    }

    pub fn endpoint_mut(&mut self, chain: Chain) -> &mut ExplorerEndpoint {
        match chain {
            Chain::Eth => &mut self.eth,
            Chain::Ftm => &mut self.ftm,
            Chain::Arb => &mut self.arb,
            Chain::Avax => &mut self.avax,
        }
    }
}

// ============================================================================
// Rate limits, thresholds, paths
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum explorer requests per second
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Addresses with more plain transfers than this are excluded from future visits
    #[serde(default = "default_max_transactions")]
    pub max_transactions: usize,

    /// Addresses with more historical transfers than this are written to the output
    #[serde(default = "default_record_threshold")]
    pub record_threshold: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            max_transactions: default_max_transactions(),
            record_threshold: default_record_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Hex digits after `0x` used to pick an activity shard
    #[serde(default = "default_prefix_len")]
    pub activity_prefix_len: usize,

    /// Hex digits after `0x` used to pick a flagged shard
    #[serde(default = "default_prefix_len")]
    pub flagged_prefix_len: usize,

    /// Directory of `<prefix>.csv` activity shards
    #[serde(default = "default_activity_dir")]
    pub activity_dir: PathBuf,

    /// Directory of `<prefix>.csv` flagged-address shards
    #[serde(default = "default_flagged_dir")]
    pub flagged_dir: PathBuf,

    /// Append-only crawl result file
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            activity_prefix_len: default_prefix_len(),
            flagged_prefix_len: default_prefix_len(),
            activity_dir: default_activity_dir(),
            flagged_dir: default_flagged_dir(),
            output_path: default_output_path(),
        }
    }
}

// Default value functions
fn default_eth_endpoint() -> ExplorerEndpoint {
    ExplorerEndpoint::for_chain(Chain::Eth)
}

fn default_ftm_endpoint() -> ExplorerEndpoint {
    ExplorerEndpoint::for_chain(Chain::Ftm)
}

fn default_arb_endpoint() -> ExplorerEndpoint {
    ExplorerEndpoint::for_chain(Chain::Arb)
}

fn default_avax_endpoint() -> ExplorerEndpoint {
    ExplorerEndpoint::for_chain(Chain::Avax)
}

fn default_rps() -> u32 {
    5 // Free-tier explorer limit
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_transactions() -> usize {
    100
}

fn default_record_threshold() -> u64 {
    5
}

fn default_prefix_len() -> usize {
    2
}

fn default_activity_dir() -> PathBuf {
    PathBuf::from("database/databaseB")
}

fn default_flagged_dir() -> PathBuf {
    PathBuf::from("sybil")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("analyzed_addresses.csv")
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            chain: Chain::default(),
            excluded_addresses: Vec::new(),
            explorers: ExplorerConfig::default(),
            rate_limits: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            thresholds: ThresholdConfig::default(),
            paths: PathConfig::default(),
        }
    }
}

impl CrawlerConfig {
    /// Load configuration from environment variables on top of defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML config file with environment overrides
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = ::toml::from_str(&contents)?;

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `CRAWL_CHAIN`, `EXPLORER_API_KEY`, `EXPLORER_API_KEY_<CHAIN>`
    /// and `EXPLORER_BASE_URL_<CHAIN>` from the given variable source.
    pub fn apply_env_overrides<F>(&mut self, var: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(chain) = var("CRAWL_CHAIN") {
            self.chain = chain.parse()?;
        }

        let shared_key = var("EXPLORER_API_KEY");
        for chain in Chain::ALL {
            let endpoint = self.explorers.endpoint_mut(chain);
            if let Some(key) = var(&format!("EXPLORER_API_KEY_{}", chain.id())) {
                endpoint.api_key = key;
            } else if let Some(key) = &shared_key {
                endpoint.api_key = key.clone();
            }
            if let Some(url) = var(&format!("EXPLORER_BASE_URL_{}", chain.id())) {
                endpoint.base_url = url;
            }
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rate_limits.requests_per_second == 0 {
            anyhow::bail!("requests_per_second must be > 0");
        }
        if self.rate_limits.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be > 0");
        }
        for (name, len) in [
            ("activity_prefix_len", self.paths.activity_prefix_len),
            ("flagged_prefix_len", self.paths.flagged_prefix_len),
        ] {
            if len == 0 || len > 40 {
                anyhow::bail!("{} must be between 1 and 40", name);
            }
        }
        if self.explorers.endpoint(self.chain).base_url.trim().is_empty() {
            anyhow::bail!("explorer base_url for {} is empty", self.chain);
        }
        self.retry.validate()?;
        Ok(())
    }

    /// Copy with API keys blanked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for chain in Chain::ALL {
            let endpoint = copy.explorers.endpoint_mut(chain);
            if !endpoint.api_key.is_empty() {
                endpoint.api_key = "<redacted>".to_string();
            }
        }
        copy
    }
}
