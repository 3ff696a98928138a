//! Ingestion orchestrator: drives fetch → normalize → persist per market,
//! then reconciles the observed companies against the registry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{Datelike, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::api::RevenueSource;
use crate::database::RevenueStore;
use crate::error::IngestError;
use crate::models::{roc_year, Config, IngestionSummary, Market, RevenueRecord};
use crate::normalize::{self, is_total_row};
use crate::reconcile::reconcile;

/// External cancellation signal. In-flight markets finish; unstarted
/// markets are skipped and reported in the summary.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-market progress through the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarketPhase {
    Pending,
    Fetching,
    FetchFailed,
    Fetched,
    Normalizing,
    Persisting,
    Done,
}

#[derive(Debug)]
struct MarketOutcome {
    market: Market,
    phase: MarketPhase,
    written: usize,
    seen: Vec<String>,
    normalization_failures: usize,
    write_failures: usize,
    failure: Option<String>,
}

impl MarketOutcome {
    fn new(market: Market) -> Self {
        Self {
            market,
            phase: MarketPhase::Pending,
            written: 0,
            seen: Vec::new(),
            normalization_failures: 0,
            write_failures: 0,
            failure: None,
        }
    }

    fn advance(&mut self, phase: MarketPhase) {
        debug!("{}: {:?} -> {:?}", self.market, self.phase, phase);
        self.phase = phase;
    }
}

enum MarketRun {
    Skipped(Market),
    Completed(MarketOutcome),
}

/// Drives one batch ingestion run against a source and a store, both passed
/// in at construction. No global state; the caller owns the store lifecycle.
pub struct Ingestor {
    source: Arc<dyn RevenueSource>,
    store: RevenueStore,
    max_concurrent_markets: usize,
    cancel: CancelFlag,
}

impl Ingestor {
    pub fn new(source: Arc<dyn RevenueSource>, store: RevenueStore, config: &Config) -> Self {
        Self {
            source,
            store,
            // bounded fan-out; unconditional full parallelism would trip
            // upstream throttling
            max_concurrent_markets: config.max_concurrent_markets.clamp(1, 4),
            cancel: CancelFlag::new(),
        }
    }

    /// Handle for wiring an external cancellation trigger (e.g. ctrl-c).
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run one full ingestion for (year, month) over the requested markets.
    ///
    /// Per-market fetch failures degrade the summary; the run itself fails
    /// only when the period is invalid or every requested market's fetch
    /// failed.
    pub async fn run(
        &self,
        year: i32,
        month: u32,
        markets: &[Market],
    ) -> Result<IngestionSummary> {
        if roc_year(year) < 1 || year > Utc::now().year() + 1 || !(1..=12).contains(&month) {
            return Err(IngestError::InvalidPeriod { year, month }.into());
        }

        let mut requested: Vec<Market> = Vec::new();
        for market in markets {
            if !requested.contains(market) {
                requested.push(*market);
            }
        }
        if requested.is_empty() {
            return Ok(IngestionSummary::default());
        }

        info!(
            "Ingesting monthly revenue for {}-{:02} (ROC {}), markets: {}",
            year,
            month,
            roc_year(year),
            requested
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );

        let runs: Vec<MarketRun> = stream::iter(requested.iter().copied())
            .map(|market| self.run_market(market, year, month))
            .buffer_unordered(self.max_concurrent_markets)
            .collect()
            .await;

        let mut summary = IngestionSummary::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut started: Vec<Market> = Vec::new();

        for run in runs {
            match run {
                MarketRun::Skipped(market) => summary.skipped_markets.push(market),
                MarketRun::Completed(outcome) => {
                    started.push(outcome.market);
                    if outcome.phase == MarketPhase::FetchFailed {
                        summary.failed_markets.insert(
                            outcome.market,
                            outcome.failure.unwrap_or_else(|| "fetch failed".to_string()),
                        );
                    } else {
                        summary.total += outcome.written;
                        summary.per_market.insert(outcome.market, outcome.written);
                        summary.normalization_failures += outcome.normalization_failures;
                        summary.write_failures += outcome.write_failures;
                        seen.extend(outcome.seen);
                    }
                }
            }
        }
        summary.skipped_markets.sort();
        started.sort();

        if summary.failed_markets.len() == requested.len() {
            return Err(IngestError::AllMarketsFailed.into());
        }

        // Reconciliation strictly happens-after all market processing; it
        // needs the full observed-company set. Markets skipped by
        // cancellation are excluded so they don't inflate `missing`.
        let registry = self.store.list_companies(&started).await?;
        summary.missing = reconcile(&registry, &seen);

        info!(
            "Run complete: {} written, {} markets failed, {} companies missing",
            summary.total,
            summary.failed_markets.len(),
            summary.missing.len()
        );

        Ok(summary)
    }

    async fn run_market(&self, market: Market, year: i32, month: u32) -> MarketRun {
        if self.cancel.is_cancelled() {
            info!("Run cancelled, not starting {} ({})", market.label(), market);
            return MarketRun::Skipped(market);
        }
        MarketRun::Completed(self.ingest_market(market, year, month).await)
    }

    async fn ingest_market(&self, market: Market, year: i32, month: u32) -> MarketOutcome {
        let mut outcome = MarketOutcome::new(market);

        outcome.advance(MarketPhase::Fetching);
        info!("Fetching {}-{:02} {} ({})...", year, month, market.label(), market);

        let rows = match self.source.fetch_monthly_revenue(market, year, month).await {
            Ok(rows) => rows,
            Err(err) => {
                error!("Fetch failed for {}: {}", market, err);
                outcome.advance(MarketPhase::FetchFailed);
                outcome.failure = Some(err.to_string());
                return outcome;
            }
        };
        outcome.advance(MarketPhase::Fetched);
        debug!("{}: {} raw rows", market, rows.len());

        outcome.advance(MarketPhase::Normalizing);
        let now = Utc::now();
        let mut records: Vec<RevenueRecord> = Vec::with_capacity(rows.len());
        for row in &rows {
            if is_total_row(row) {
                continue;
            }
            match normalize::normalize(row, market, year, month, now) {
                Ok(record) => {
                    outcome.seen.push(record.stock_id.clone());
                    records.push(record);
                }
                Err(err) => {
                    warn!("Skipping unnormalizable {} row: {}", market, err);
                    outcome.normalization_failures += 1;
                }
            }
        }

        // rows are written in the order the fetcher returned them
        outcome.advance(MarketPhase::Persisting);
        for record in &records {
            match self.upsert_with_retry(record).await {
                Ok(()) => outcome.written += 1,
                Err(err) => {
                    warn!(
                        "Write failed for {} {}-{:02} ({}): {}",
                        record.stock_id, year, month, market, err
                    );
                    outcome.write_failures += 1;
                }
            }
        }

        outcome.advance(MarketPhase::Done);
        info!(
            "{} ({}) done: {} written, {} rows skipped, {} write failures",
            market.label(),
            market,
            outcome.written,
            outcome.normalization_failures,
            outcome.write_failures
        );
        outcome
    }

    /// The pair write is already transactional; give it one more chance
    /// before counting the record as failed.
    async fn upsert_with_retry(&self, record: &RevenueRecord) -> Result<()> {
        if let Err(first) = self.store.upsert_revenue(record).await {
            warn!("Retrying write for {}: {}", record.stock_id, first);
            return self.store.upsert_revenue(record).await;
        }
        Ok(())
    }
}
