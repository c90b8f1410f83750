//! Depth-first crawl of outgoing transfers.
//!
//! Starting from each seed, the crawler fetches an address's plain transfers,
//! records the address when its local history crosses the recording threshold,
//! then follows every outgoing transfer in API order. A visited set bounds the
//! work to one fetch per address and guarantees termination on cycles; an
//! excluded set keeps high-volume hubs out of the traversal.
//!
//! The traversal runs on an explicit stack instead of recursion, so deep
//! transfer chains cannot overflow the call stack. Children are pushed in
//! reverse so the pop order matches a recursive depth-first walk.

use crate::address::Address;
use crate::config::Chain;
use crate::explorer::{FetchOutcome, TransferSource};
use crate::lookup::ShardedLookup;
use crate::policy::ExclusionPolicy;
use crate::retry::{sleep_or_cancel, RetryPolicy};
use crate::schemas::{CrawlRow, CrawlSummary, Transfer};
use crate::sink::{CsvSink, SinkError};
use std::collections::HashSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Known noise addresses excluded from every crawl: they fan out to huge
/// numbers of unrelated wallets.
pub fn known_noise_addresses() -> Vec<Address> {
    [
        // Zero address (burns, mints)
        "0x0000000000000000000000000000000000000000",
        // High-volume distributor on Avalanche C-Chain
        "0x6a67d4a8ee91919a22444ef3784b3ecd94bc9b29",
    ]
    .iter()
    .filter_map(|s| Address::parse(s).ok())
    .collect()
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Output write failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Crawl cancelled")]
    Cancelled,
}

/// Mutable state of one crawl run.
#[derive(Debug)]
pub struct CrawlState {
    visited: HashSet<Address>,
    excluded: HashSet<Address>,
    summary: CrawlSummary,
}

impl CrawlState {
    /// State whose exclusion set holds the [`known_noise_addresses`].
    pub fn new() -> Self {
        Self::with_exclusions(Vec::new())
    }

    /// State excluding the known noise addresses plus `extra`.
    pub fn with_exclusions<I>(extra: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        Self {
            visited: HashSet::new(),
            excluded: known_noise_addresses().into_iter().chain(extra).collect(),
            summary: CrawlSummary::default(),
        }
    }

    pub fn is_visited(&self, address: &Address) -> bool {
        self.visited.contains(address)
    }

    pub fn is_excluded(&self, address: &Address) -> bool {
        self.excluded.contains(address)
    }

    fn should_skip(&self, address: &Address) -> bool {
        self.is_visited(address) || self.is_excluded(address)
    }

    pub fn visited(&self) -> &HashSet<Address> {
        &self.visited
    }

    pub fn excluded(&self) -> &HashSet<Address> {
        &self.excluded
    }

    pub fn summary(&self) -> &CrawlSummary {
        &self.summary
    }
}

/// Result of fetching one address under the retry policy.
enum Fetched {
    Transfers(Vec<Transfer>),
    /// Retry budget ran out
    Abandoned,
}

/// Depth-first outgoing-transfer crawler.
pub struct AddressGraphCrawler<S: TransferSource> {
    source: S,
    lookup: ShardedLookup,
    sink: CsvSink,
    policy: ExclusionPolicy,
    retry: RetryPolicy,
    chain: Chain,
    cancel: CancellationToken,
}

impl<S: TransferSource> AddressGraphCrawler<S> {
    pub fn new(
        source: S,
        lookup: ShardedLookup,
        sink: CsvSink,
        policy: ExclusionPolicy,
        retry: RetryPolicy,
        chain: Chain,
    ) -> Self {
        Self {
            source,
            lookup,
            sink,
            policy,
            retry,
            chain,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the crawl at the next checkpoint once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn sink(&self) -> &CsvSink {
        &self.sink
    }

    /// Crawl from every seed in order, sharing `state` across seeds.
    pub async fn crawl(
        &mut self,
        seeds: &[Address],
        state: &mut CrawlState,
    ) -> Result<(), CrawlError> {
        state.summary.seeds += seeds.len();

        for (i, seed) in seeds.iter().enumerate() {
            info!("Seed {}/{}: {}", i + 1, seeds.len(), seed);
            self.visit(seed, state).await?;
        }

        info!(
            "Crawl complete: {} visited, {} recorded, {} excluded, {} abandoned, {} fetches ({} retries)",
            state.summary.visited,
            state.summary.recorded,
            state.summary.excluded,
            state.summary.abandoned,
            state.summary.fetched,
            state.summary.retries
        );
        Ok(())
    }

    /// Visit `start` and everything reachable from it through outgoing transfers.
    pub async fn visit(&mut self, start: &Address, state: &mut CrawlState) -> Result<(), CrawlError> {
        let mut stack = vec![start.clone()];

        while let Some(address) = stack.pop() {
            if self.cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            if state.should_skip(&address) {
                debug!("Address excluded or already analyzed: {}", address);
                state.summary.skipped += 1;
                continue;
            }

            info!("Analyzing address: {}", address);
            let transfers = match self.fetch_with_retry(&address, &mut state.summary).await? {
                Fetched::Transfers(t) => t,
                Fetched::Abandoned => {
                    warn!(
                        "Giving up on {} after {} consecutive failed fetches",
                        address,
                        self.retry.max_attempts.unwrap_or_default()
                    );
                    state.visited.insert(address);
                    state.summary.abandoned += 1;
                    continue;
                }
            };

            state.visited.insert(address.clone());
            state.summary.visited += 1;

            // Already-fetched transfers are still followed below; the exclusion
            // only blocks later visits.
            if self.policy.should_exclude(transfers.len()) && state.excluded.insert(address.clone())
            {
                warn!(
                    "Address {} has {} transfers (limit {}), excluding from further visits",
                    address,
                    transfers.len(),
                    self.policy.max_transactions
                );
                state.summary.excluded += 1;
            }

            let record = self.lookup.lookup(&address);
            debug!(
                "Info for address {}: transfers={}, first={:?}, last={:?}, flagged={}",
                address,
                record.historical_transfer_count,
                record.first_transfer_time,
                record.last_transfer_time,
                record.is_flagged
            );

            if self.policy.should_record(record.historical_transfer_count) {
                self.sink.append(&CrawlRow::new(address.clone(), &record))?;
                state.summary.recorded += 1;
                info!(
                    "Recorded {} ({} historical transfers, flagged={})",
                    address, record.historical_transfer_count, record.is_flagged
                );
            }

            let outgoing: Vec<Address> = transfers
                .iter()
                .filter_map(|t| t.outgoing_to(&address))
                .cloned()
                .collect();
            info!(
                "{}: {} transfers, {} outgoing ({} visited, {} pending)",
                address,
                transfers.len(),
                outgoing.len(),
                state.visited.len(),
                stack.len()
            );

            stack.extend(outgoing.into_iter().rev());
        }

        Ok(())
    }

    /// Fetch until the explorer answers with data or empty, or the retry
    /// budget runs out.
    async fn fetch_with_retry(
        &self,
        address: &Address,
        summary: &mut CrawlSummary,
    ) -> Result<Fetched, CrawlError> {
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            summary.fetched += 1;
            match self.source.fetch(address, self.chain).await {
                FetchOutcome::Data(transfers) => return Ok(Fetched::Transfers(transfers)),
                FetchOutcome::Empty => return Ok(Fetched::Transfers(Vec::new())),
                FetchOutcome::RetryNeeded(reason) => {
                    failures = failures.saturating_add(1);
                    summary.retries += 1;

                    if self.retry.is_exhausted(failures) {
                        return Ok(Fetched::Abandoned);
                    }

                    let delay = self.retry.delay_for(failures);
                    warn!(
                        "[attempt {}] Retry needed for {}: {}, waiting {:?}",
                        failures, address, reason, delay
                    );
                    if !sleep_or_cancel(delay, &self.cancel).await {
                        return Err(CrawlError::Cancelled);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathConfig;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    /// Explorer stub answering from per-address scripts; unscripted addresses
    /// come back empty.
    #[derive(Default)]
    struct ScriptedSource {
        scripts: Mutex<HashMap<Address, VecDeque<FetchOutcome>>>,
        calls: Mutex<Vec<Address>>,
    }

    impl ScriptedSource {
        fn script(self, address: &Address, outcomes: Vec<FetchOutcome>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(address.clone(), outcomes.into());
            self
        }

        fn edges(self, from: &Address, to: &[&Address]) -> Self {
            let transfers = to.iter().map(|t| transfer(from, t)).collect();
            self.script(from, vec![FetchOutcome::Data(transfers)])
        }

        fn calls(&self) -> Vec<Address> {
            self.calls.lock().unwrap().clone()
        }

        fn call_count(&self, address: &Address) -> usize {
            self.calls().iter().filter(|a| *a == address).count()
        }
    }

    #[async_trait]
    impl<'a> TransferSource for &'a ScriptedSource {
        async fn fetch(&self, address: &Address, _chain: Chain) -> FetchOutcome {
            self.calls.lock().unwrap().push(address.clone());
            self.scripts
                .lock()
                .unwrap()
                .get_mut(address)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(FetchOutcome::Empty)
        }
    }

    fn address(fill: char, tail: char) -> Address {
        let body: String = std::iter::repeat(fill)
            .take(39)
            .chain(std::iter::once(tail))
            .collect();
        Address::parse(&format!("0x{body}")).unwrap()
    }

    fn transfer(from: &Address, to: &Address) -> Transfer {
        Transfer {
            from: from.clone(),
            to: Some(to.clone()),
            timestamp_utc: Utc::now(),
            is_error: false,
            is_plain_value_transfer: true,
        }
    }

    struct Fixture {
        _dir: TempDir,
        paths: PathConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let paths = PathConfig {
                activity_dir: dir.path().join("activity"),
                flagged_dir: dir.path().join("flagged"),
                output_path: dir.path().join("analyzed_addresses.csv"),
                ..PathConfig::default()
            };
            std::fs::create_dir_all(&paths.activity_dir).unwrap();
            std::fs::create_dir_all(&paths.flagged_dir).unwrap();
            Self { _dir: dir, paths }
        }

        fn activity(&self, address: &Address, count: u64) {
            append_line(
                &self.paths.activity_dir.join(format!("{}.csv", address.shard_key(2))),
                &format!("{address},{count},2023-05-01,2024-02-21"),
            );
        }

        fn flagged(&self, address: &Address) {
            append_line(
                &self.paths.flagged_dir.join(format!("{}.csv", address.shard_key(2))),
                address.as_str(),
            );
        }

        fn crawler<'a>(
            &self,
            source: &'a ScriptedSource,
            max_transactions: usize,
            retry: RetryPolicy,
        ) -> AddressGraphCrawler<&'a ScriptedSource> {
            AddressGraphCrawler::new(
                source,
                ShardedLookup::new(&self.paths),
                CsvSink::open(&self.paths.output_path).unwrap(),
                ExclusionPolicy::new(max_transactions, 5),
                retry,
                Chain::Avax,
            )
        }

        fn output_lines(&self) -> Vec<String> {
            std::fs::read_to_string(&self.paths.output_path)
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn append_line(path: &Path, line: &str) {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        writeln!(file, "{line}").unwrap();
    }

    fn one_second_retry() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1000))
    }

    #[tokio::test]
    async fn test_end_to_end_single_transfer() {
        let fx = Fixture::new();
        let a = address('a', '1');
        let b = address('b', '2');
        fx.activity(&a, 6);
        fx.flagged(&a);

        let source = ScriptedSource::default().edges(&a, &[&b]);
        let mut crawler = fx.crawler(&source, 100, one_second_retry());
        let mut state = CrawlState::new();

        crawler.crawl(&[a.clone()], &mut state).await.unwrap();

        assert_eq!(
            fx.output_lines(),
            vec![
                "Address,TransactionCount,IsSybil".to_string(),
                format!("{a},6,true"),
            ]
        );
        assert!(state.is_visited(&b));
        assert_eq!(source.calls(), vec![a, b]);
        assert_eq!(state.summary().recorded, 1);
        assert_eq!(state.summary().visited, 2);
    }

    #[tokio::test]
    async fn test_cycle_terminates_with_one_fetch_each() {
        let fx = Fixture::new();
        let a = address('a', '1');
        let b = address('b', '2');

        let source = ScriptedSource::default()
            .edges(&a, &[&b])
            .edges(&b, &[&a]);
        let mut crawler = fx.crawler(&source, 100, one_second_retry());
        let mut state = CrawlState::new();

        crawler.crawl(&[a.clone()], &mut state).await.unwrap();

        assert_eq!(source.call_count(&a), 1);
        assert_eq!(source.call_count(&b), 1);
        assert_eq!(state.summary().skipped, 1);
    }

    #[tokio::test]
    async fn test_repeated_seed_fetched_and_recorded_once() {
        let fx = Fixture::new();
        let a = address('a', '1');
        fx.activity(&a, 10);

        let source = ScriptedSource::default();
        let mut crawler = fx.crawler(&source, 100, one_second_retry());
        let mut state = CrawlState::new();

        crawler
            .crawl(&[a.clone(), a.clone()], &mut state)
            .await
            .unwrap();

        assert_eq!(source.call_count(&a), 1);
        assert_eq!(fx.output_lines().len(), 2);
    }

    #[tokio::test]
    async fn test_case_variants_are_one_address() {
        let fx = Fixture::new();
        let lower = Address::parse("0xabcdef0000000000000000000000000000000001").unwrap();
        let upper = Address::parse("0xABCDEF0000000000000000000000000000000001").unwrap();
        let other = address('c', '3');

        let source = ScriptedSource::default().edges(&other, &[&upper]);
        let mut crawler = fx.crawler(&source, 100, one_second_retry());
        let mut state = CrawlState::new();

        crawler
            .crawl(&[lower.clone(), other.clone()], &mut state)
            .await
            .unwrap();

        assert_eq!(source.call_count(&lower), 1);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_depth_first_in_api_order() {
        let fx = Fixture::new();
        let a = address('a', '1');
        let b = address('b', '2');
        let c = address('c', '3');
        let d = address('d', '4');

        let source = ScriptedSource::default()
            .edges(&a, &[&b, &c])
            .edges(&b, &[&d]);
        let mut crawler = fx.crawler(&source, 100, one_second_retry());
        let mut state = CrawlState::new();

        crawler.crawl(&[a.clone()], &mut state).await.unwrap();

        assert_eq!(source.calls(), vec![a, b, d, c]);
    }

    #[tokio::test]
    async fn test_incoming_transfers_are_not_followed() {
        let fx = Fixture::new();
        let a = address('a', '1');
        let b = address('b', '2');

        // A's history only contains B -> A
        let source = ScriptedSource::default().script(
            &a,
            vec![FetchOutcome::Data(vec![transfer(&b, &a)])],
        );
        let mut crawler = fx.crawler(&source, 100, one_second_retry());
        let mut state = CrawlState::new();

        crawler.crawl(&[a.clone()], &mut state).await.unwrap();

        assert_eq!(source.calls(), vec![a]);
        assert!(!state.is_visited(&b));
    }

    #[tokio::test]
    async fn test_exclusion_after_oversized_fetch() {
        let fx = Fixture::new();
        let a = address('a', '1');
        let hub = address('e', '5');
        let c = address('c', '3');
        let d = address('d', '4');
        fx.activity(&hub, 500);

        // Hub returns 3 transfers with a limit of 2: excluded, but its own
        // outgoing transfers from this fetch are still followed once.
        let source = ScriptedSource::default()
            .edges(&a, &[&hub, &d])
            .edges(&hub, &[&c, &c, &a])
            .edges(&d, &[&hub]);
        let mut crawler = fx.crawler(&source, 2, one_second_retry());
        let mut state = CrawlState::new();

        crawler.crawl(&[a.clone()], &mut state).await.unwrap();

        assert!(state.is_excluded(&hub));
        assert_eq!(state.summary().excluded, 1);
        assert_eq!(source.call_count(&hub), 1);
        assert_eq!(source.call_count(&c), 1);
        assert_eq!(source.call_count(&d), 1);
        // Recorded from the fetch that triggered the exclusion
        assert_eq!(fx.output_lines().len(), 2);
    }

    #[tokio::test]
    async fn test_seeded_exclusions_are_never_fetched() {
        let fx = Fixture::new();
        let a = address('a', '1');
        let noise = address('f', '6');

        let source = ScriptedSource::default().edges(&a, &[&noise]);
        let mut crawler = fx.crawler(&source, 100, one_second_retry());
        let mut state = CrawlState::with_exclusions([noise.clone()]);

        crawler
            .crawl(&[noise.clone(), a.clone()], &mut state)
            .await
            .unwrap();

        assert_eq!(source.call_count(&noise), 0);
        assert_eq!(state.summary().skipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_twice_then_proceeds() {
        let fx = Fixture::new();
        let a = address('a', '1');
        let b = address('b', '2');

        let source = ScriptedSource::default().script(
            &a,
            vec![
                FetchOutcome::RetryNeeded("Max rate limit reached".into()),
                FetchOutcome::RetryNeeded("Max rate limit reached".into()),
                FetchOutcome::Data(vec![transfer(&a, &b)]),
            ],
        );
        let mut crawler = fx.crawler(&source, 100, one_second_retry());
        let mut state = CrawlState::new();

        let started = tokio::time::Instant::now();
        crawler.crawl(&[a.clone()], &mut state).await.unwrap();

        assert_eq!(source.call_count(&a), 3);
        assert_eq!(source.call_count(&b), 1);
        assert_eq!(state.summary().retries, 2);
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert!(started.elapsed() < Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_cap_abandons_address() {
        let fx = Fixture::new();
        let a = address('a', '1');
        fx.activity(&a, 50);

        let source = ScriptedSource::default().script(
            &a,
            (0..10)
                .map(|_| FetchOutcome::RetryNeeded("NOTOK".into()))
                .collect(),
        );
        let mut crawler = fx.crawler(&source, 100, one_second_retry().with_max_attempts(3));
        let mut state = CrawlState::new();

        crawler
            .crawl(&[a.clone(), a.clone()], &mut state)
            .await
            .unwrap();

        assert_eq!(source.call_count(&a), 3);
        assert_eq!(state.summary().abandoned, 1);
        assert_eq!(state.summary().recorded, 0);
        assert_eq!(fx.output_lines().len(), 1);
    }

    #[tokio::test]
    async fn test_record_threshold_boundary() {
        let fx = Fixture::new();
        let at = address('a', '1');
        let above = address('b', '2');
        fx.activity(&at, 5);
        fx.activity(&above, 6);

        let source = ScriptedSource::default();
        let mut crawler = fx.crawler(&source, 100, one_second_retry());
        let mut state = CrawlState::new();

        crawler
            .crawl(&[at.clone(), above.clone()], &mut state)
            .await
            .unwrap();

        let lines = fx.output_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], format!("{above},6,false"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fx = Fixture::new();
        let a = address('a', '1');
        let token = CancellationToken::new();
        token.cancel();

        let source = ScriptedSource::default();
        let mut crawler = fx
            .crawler(&source, 100, one_second_retry())
            .with_cancellation(token);
        let mut state = CrawlState::new();

        let result = crawler.crawl(&[a], &mut state).await;
        assert!(matches!(result, Err(CrawlError::Cancelled)));
        assert!(source.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_retry_wait() {
        let fx = Fixture::new();
        let a = address('a', '1');
        let token = CancellationToken::new();

        let source = ScriptedSource::default().script(
            &a,
            vec![FetchOutcome::RetryNeeded("NOTOK".into())],
        );
        let mut crawler = fx
            .crawler(&source, 100, RetryPolicy::fixed(Duration::from_secs(3600)))
            .with_cancellation(token.clone());
        let mut state = CrawlState::new();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let result = crawler.crawl(&[a.clone()], &mut state).await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(CrawlError::Cancelled)));
        assert_eq!(source.call_count(&a), 1);
        assert!(!state.is_visited(&a));
    }

    #[test]
    fn test_new_state_excludes_noise() {
        let zero = Address::parse("0x0000000000000000000000000000000000000000").unwrap();
        let extra = Address::parse("0xee00000000000000000000000000000000000005").unwrap();

        assert!(CrawlState::new().is_excluded(&zero));

        let state = CrawlState::with_exclusions([extra.clone()]);
        assert!(state.is_excluded(&zero));
        assert!(state.is_excluded(&extra));
        assert_eq!(state.excluded().len(), 3);
    }

    #[test]
    fn test_known_noise_addresses_parse() {
        assert_eq!(known_noise_addresses().len(), 2);
    }
}
