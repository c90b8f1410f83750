//! EVM Outgoing-Transfer Crawler CLI
//!
//! Crawls the outgoing transfers of seed wallets and records high-activity
//! addresses together with their flagged status.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use evm_flow_crawler::address::parse_and_dedupe;
use evm_flow_crawler::config::{Chain, CrawlerConfig};
use evm_flow_crawler::crawler::{AddressGraphCrawler, CrawlError, CrawlState};
use evm_flow_crawler::explorer::ExplorerClient;
use evm_flow_crawler::lookup::ShardedLookup;
use evm_flow_crawler::policy::ExclusionPolicy;
use evm_flow_crawler::seeds::read_seed_addresses;
use evm_flow_crawler::sink::CsvSink;
use evm_flow_crawler::Address;

#[derive(Parser)]
#[command(name = "evm-flow-crawler")]
#[command(version)]
#[command(about = "Follow outgoing transfers from seed wallets and record high-activity addresses", long_about = None)]
struct Cli {
    /// Path to configuration file (optional, uses env vars if not provided)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl outgoing transfers starting from seed addresses
    Crawl {
        /// Seed address list (one address per line, or CSV with an `address` column)
        #[arg(short, long)]
        seeds: Option<PathBuf>,

        /// Additional seed address (repeatable)
        #[arg(long = "seed")]
        seed: Vec<String>,

        /// Network to crawl (ETH, FTM, ARB, AVAX)
        #[arg(long)]
        chain: Option<Chain>,

        /// Output CSV (appended to if it exists)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Exclude addresses with more plain transfers than this
        #[arg(long)]
        max_transactions: Option<usize>,

        /// Record addresses with more historical transfers than this
        #[arg(long)]
        record_threshold: Option<u64>,

        /// Give up on an address after this many consecutive failed fetches
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Write the run summary as JSON to this path
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Show the local dataset record for one address
    Lookup {
        /// Address to look up
        address: String,
    },

    /// Print the effective configuration (API keys redacted)
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => CrawlerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => CrawlerConfig::load().context("Failed to load config from environment")?,
    };

    match cli.command {
        Commands::Crawl {
            seeds,
            seed,
            chain,
            output,
            max_transactions,
            record_threshold,
            max_attempts,
            summary,
        } => {
            // CLI overrides
            if let Some(chain) = chain {
                config.chain = chain;
            }
            if let Some(output) = output {
                config.paths.output_path = output;
            }
            if let Some(max) = max_transactions {
                config.thresholds.max_transactions = max;
            }
            if let Some(threshold) = record_threshold {
                config.thresholds.record_threshold = threshold;
            }
            if let Some(attempts) = max_attempts {
                config.retry.max_attempts = Some(attempts);
            }

            cmd_crawl(&config, seeds.as_ref(), &seed, summary.as_ref()).await?;
        }
        Commands::Lookup { address } => {
            cmd_lookup(&config, &address)?;
        }
        Commands::ShowConfig => {
            let rendered = toml::to_string_pretty(&config.redacted())
                .context("Failed to render configuration")?;
            println!("{}", rendered);
        }
    }

    Ok(())
}

async fn cmd_crawl(
    config: &CrawlerConfig,
    seeds_path: Option<&PathBuf>,
    extra_seeds: &[String],
    summary_path: Option<&PathBuf>,
) -> Result<()> {
    info!("=== Crawling Outgoing Transfers ===");
    config.validate().context("Invalid configuration")?;

    let seeds = load_seeds(seeds_path, extra_seeds)?;
    info!("Using {} seed addresses on {}", seeds.len(), config.chain);
    info!(
        "Thresholds: max_transactions={}, record_threshold={}, max_attempts={:?}",
        config.thresholds.max_transactions,
        config.thresholds.record_threshold,
        config.retry.max_attempts
    );

    if config.explorers.endpoint(config.chain).api_key.is_empty() {
        warn!(
            "No explorer API key for {} (set EXPLORER_API_KEY or EXPLORER_API_KEY_{}); expect heavy throttling",
            config.chain,
            config.chain.id()
        );
    }

    let client = ExplorerClient::new(config.explorers.clone(), &config.rate_limits)
        .context("Failed to build explorer client")?;
    let sink = CsvSink::open(&config.paths.output_path).context("Failed to open output file")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            interrupt.cancel();
        }
    });

    let mut crawler = AddressGraphCrawler::new(
        client,
        ShardedLookup::new(&config.paths),
        sink,
        ExclusionPolicy::from(&config.thresholds),
        config.retry.clone(),
        config.chain,
    )
    .with_cancellation(cancel);

    let mut state = CrawlState::with_exclusions(config.excluded_addresses.iter().cloned());

    let result = crawler.crawl(&seeds, &mut state).await;
    let output_path = crawler.sink().path().to_path_buf();
    // Drop flushes and closes the output before any exit path
    drop(crawler);

    finish_crawl(result, &state, summary_path.map(PathBuf::as_path), &output_path)
}

/// Write the optional summary, then turn the crawl result into the exit status.
/// A failed summary write is logged and never masks the crawl result.
fn finish_crawl(
    result: Result<(), CrawlError>,
    state: &CrawlState,
    summary_path: Option<&Path>,
    output_path: &Path,
) -> Result<()> {
    if let Some(path) = summary_path {
        match write_summary(path, state) {
            Ok(()) => info!("Summary saved to {:?}", path),
            Err(e) => warn!("Failed to write summary to {:?}: {:#}", path, e),
        }
    }

    match result {
        Ok(()) => {
            info!("Results saved to {:?}", output_path);
            Ok(())
        }
        Err(CrawlError::Cancelled) => {
            warn!(
                "Crawl interrupted after {} addresses; partial results in {:?}",
                state.summary().visited,
                output_path
            );
            anyhow::bail!("crawl interrupted")
        }
        Err(e) => Err(e).context("Crawl failed"),
    }
}

fn write_summary(path: &Path, state: &CrawlState) -> Result<()> {
    let json = serde_json::to_string_pretty(state.summary())?;
    std::fs::write(path, json)?;
    Ok(())
}

fn load_seeds(seeds_path: Option<&PathBuf>, extra_seeds: &[String]) -> Result<Vec<Address>> {
    let mut seeds = match seeds_path {
        Some(path) => read_seed_addresses(path).context("Failed to read seed addresses")?,
        None => Vec::new(),
    };

    let extra = parse_and_dedupe(extra_seeds.iter().map(String::as_str))
        .context("Invalid --seed address")?;
    for address in extra {
        if !seeds.contains(&address) {
            seeds.push(address);
        }
    }

    if seeds.is_empty() {
        anyhow::bail!("No seed addresses given; use --seeds <file> or --seed <address>");
    }
    Ok(seeds)
}

fn cmd_lookup(config: &CrawlerConfig, raw: &str) -> Result<()> {
    let address = Address::parse(raw).context("Invalid address")?;
    let lookup = ShardedLookup::new(&config.paths);

    info!("=== Local Dataset Lookup ===");
    info!("Activity shard: {:?}", lookup.activity_shard(&address));
    info!("Flagged shard: {:?}", lookup.flagged_shard(&address));

    let record = lookup.lookup(&address);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
