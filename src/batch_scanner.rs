//! Rolling refresh: each invocation scans one positional slice of a segment's universe and
//! merges the result into that segment's cached snapshot.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::{DashMap, DashSet};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TOTAL_BATCHES;
use crate::detector::{by_strategy, categorize, TrendDetector};
use crate::error::{AppError, Result};
use crate::fetcher::MarketDataSource;
use crate::scorer::OpportunityConverter;
use crate::state::{CacheSnapshot, CacheStore, DataQuality, SnapshotMetadata};
use crate::types::{MarketSegment, Opportunity, OpportunityCategory};
use crate::universe::TickerUniverse;

// ---------------------------------------------------------------------------
// Metrics and outcome
// ---------------------------------------------------------------------------

/// Counters for one batch. The latest per segment is kept for /health.
#[derive(Debug, Clone, Serialize)]
pub struct ScanMetrics {
    pub segment: MarketSegment,
    pub batch: usize,
    pub tickers_attempted: usize,
    pub tickers_succeeded: usize,
    pub tickers_failed: usize,
    pub tickers_synthetic: usize,
    pub opportunities_found: usize,
    /// Calls made through the market data source, including ones served synthetically.
    pub api_calls: u64,
    /// Trips during this batch. The client is shared, so trips caused by another segment's
    /// concurrent batch are counted too.
    pub circuit_breaker_trips: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanMetrics {
    fn new(segment: MarketSegment, batch: usize) -> Self {
        Self {
            segment,
            batch,
            tickers_attempted: 0,
            tickers_succeeded: 0,
            tickers_failed: 0,
            tickers_synthetic: 0,
            opportunities_found: 0,
            api_calls: 0,
            circuit_breaker_trips: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// This call scanned and published a new snapshot.
    Published(Arc<CacheSnapshot>),
    /// Another scan of the segment was in flight; this is the snapshot current at the time.
    AlreadyScanning(Arc<CacheSnapshot>),
}

impl ScanOutcome {
    pub fn snapshot(&self) -> &Arc<CacheSnapshot> {
        match self {
            ScanOutcome::Published(s) | ScanOutcome::AlreadyScanning(s) => s,
        }
    }

    pub fn was_noop(&self) -> bool {
        matches!(self, ScanOutcome::AlreadyScanning(_))
    }
}

/// Positional slice for `batch` (1-based): `ceil(len / TOTAL_BATCHES)` tickers per batch,
/// the last batches may be short or empty.
pub fn batch_slice(universe: &[String], batch: usize) -> &[String] {
    let size = universe.len().div_ceil(TOTAL_BATCHES);
    let start = (batch.saturating_sub(1) * size).min(universe.len());
    let end = (batch * size).min(universe.len());
    &universe[start..end]
}

// ---------------------------------------------------------------------------
// Scan guard
// ---------------------------------------------------------------------------

/// Marks a segment as Scanning until dropped, including on early return or panic.
struct ScanGuard<'a> {
    scanning: &'a DashSet<MarketSegment>,
    segment: MarketSegment,
}

impl<'a> ScanGuard<'a> {
    fn acquire(scanning: &'a DashSet<MarketSegment>, segment: MarketSegment) -> Option<Self> {
        scanning.insert(segment).then(|| Self { scanning, segment })
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.scanning.remove(&self.segment);
    }
}

// ---------------------------------------------------------------------------
// BatchScanner
// ---------------------------------------------------------------------------

struct TickerScan {
    opportunities: Vec<Opportunity>,
    synthetic: bool,
}

pub struct BatchScanner {
    source: Arc<dyn MarketDataSource>,
    universe: Arc<dyn TickerUniverse>,
    converter: OpportunityConverter,
    trends: Arc<TrendDetector>,
    store: Arc<CacheStore>,
    scanning: DashSet<MarketSegment>,
    last_metrics: DashMap<MarketSegment, ScanMetrics>,
    cancel: CancellationToken,
}

impl BatchScanner {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        universe: Arc<dyn TickerUniverse>,
        converter: OpportunityConverter,
        trends: Arc<TrendDetector>,
        store: Arc<CacheStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            universe,
            converter,
            trends,
            store,
            scanning: DashSet::new(),
            last_metrics: DashMap::new(),
            cancel,
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn is_scanning(&self, segment: MarketSegment) -> bool {
        self.scanning.contains(&segment)
    }

    pub fn last_metrics(&self, segment: MarketSegment) -> Option<ScanMetrics> {
        self.last_metrics.get(&segment).map(|m| m.clone())
    }

    /// Scans batch `batch` (1..=TOTAL_BATCHES) of `segment` and publishes the merged snapshot.
    ///
    /// Tickers are fetched one at a time; the shared rate limiter paces them. Old entries are
    /// dropped for every ticker the batch attempted, including ones that failed, so a failing
    /// ticker shows nothing until its next turn. Tickers outside the slice keep their previous
    /// entries untouched.
    pub async fn scan_batch(&self, segment: MarketSegment, batch: usize) -> Result<ScanOutcome> {
        if !(1..=TOTAL_BATCHES).contains(&batch) {
            return Err(AppError::InvalidBatch {
                batch,
                total_batches: TOTAL_BATCHES,
            });
        }

        let Some(_guard) = ScanGuard::acquire(&self.scanning, segment) else {
            debug!(segment = %segment, batch, "[BATCH] scan already in progress, returning current snapshot");
            return Ok(ScanOutcome::AlreadyScanning(self.store.get_or_empty(segment)));
        };

        let started = Instant::now();
        let mut metrics = ScanMetrics::new(segment, batch);
        let trips_before = self.source.circuit_trips();

        let universe = self.universe.tickers(segment).await;
        let slice = batch_slice(&universe, batch);
        info!(
            segment = %segment,
            batch,
            tickers = slice.len(),
            universe = universe.len(),
            "[BATCH] scanning batch {batch}/{TOTAL_BATCHES}"
        );

        let today = Utc::now().date_naive();
        let mut attempted: Vec<String> = Vec::with_capacity(slice.len());
        let mut failed = Vec::new();
        let mut synthetic = Vec::new();
        let mut new_opportunities = Vec::new();
        let mut cancelled = false;

        for ticker in slice {
            if self.cancel.is_cancelled() {
                cancelled = true;
                warn!(segment = %segment, batch, "[BATCH] cancelled, publishing partial batch");
                break;
            }
            attempted.push(ticker.clone());

            let scan = AssertUnwindSafe(self.scan_ticker(ticker, today, &mut metrics.api_calls))
                .catch_unwind()
                .await;
            match scan {
                Ok(Ok(result)) => {
                    debug!(
                        ticker = ticker.as_str(),
                        opportunities = result.opportunities.len(),
                        synthetic = result.synthetic,
                        "[SCAN] ticker done"
                    );
                    if result.synthetic {
                        synthetic.push(ticker.clone());
                    }
                    new_opportunities.extend(result.opportunities);
                }
                Ok(Err(e)) => {
                    warn!(ticker = ticker.as_str(), "[SCAN] skipping ticker: {e}");
                    failed.push(ticker.clone());
                }
                Err(_) => {
                    error!(ticker = ticker.as_str(), "[SCAN] ticker processing panicked, skipping");
                    failed.push(ticker.clone());
                }
            }
        }

        let now = Utc::now();
        let trending = self.trends.detect_trending(&new_opportunities, now);

        let previous = self.store.get_or_empty(segment);
        let refreshed: HashSet<&str> = attempted.iter().map(String::as_str).collect();
        let mut merged: Vec<Opportunity> = previous
            .opportunities
            .iter()
            .filter(|o| !refreshed.contains(o.symbol.as_str()))
            .cloned()
            .collect();
        let retained = merged.len();
        let found = new_opportunities.len();
        merged.extend(new_opportunities);

        metrics.tickers_attempted = attempted.len();
        metrics.tickers_failed = failed.len();
        metrics.tickers_succeeded = attempted.len() - failed.len();
        metrics.tickers_synthetic = synthetic.len();
        metrics.opportunities_found = found;
        metrics.circuit_breaker_trips = self.source.circuit_trips().saturating_sub(trips_before);
        metrics.finished_at = Some(now);

        let metadata = SnapshotMetadata {
            last_scan: now,
            segment,
            batch,
            total_batches: TOTAL_BATCHES,
            tickers_scanned: attempted,
            tickers_failed: failed,
            tickers_synthetic: synthetic,
            total_opportunities: merged.len(),
            scan_duration_ms: started.elapsed().as_millis() as u64,
            data_quality: DataQuality::from_counts(
                metrics.tickers_attempted,
                metrics.tickers_failed,
                metrics.tickers_synthetic,
            ),
            cancelled,
        };

        let snapshot = CacheSnapshot {
            segment,
            categorized: categorize(&merged),
            by_strategy: by_strategy(&merged),
            trending,
            opportunities: merged,
            metadata,
        };

        info!(
            segment = %segment,
            batch,
            attempted = metrics.tickers_attempted,
            failed = metrics.tickers_failed,
            synthetic = metrics.tickers_synthetic,
            found,
            retained,
            trending = snapshot.trending.len(),
            trend_keys = self.trends.tracked(),
            total = snapshot.metadata.total_opportunities,
            quality = ?snapshot.metadata.data_quality,
            duration_ms = snapshot.metadata.scan_duration_ms,
            "[BATCH] published"
        );

        let published = self.store.publish(snapshot);
        self.last_metrics.insert(segment, metrics);
        Ok(ScanOutcome::Published(published))
    }

    /// Triggers `batch` for every segment concurrently.
    pub async fn scan_all(&self, batch: usize) -> Vec<(MarketSegment, Result<ScanOutcome>)> {
        let scans = MarketSegment::ALL
            .iter()
            .map(|&segment| async move { (segment, self.scan_batch(segment, batch).await) });
        join_all(scans).await
    }

    async fn scan_ticker(&self, ticker: &str, today: NaiveDate, api_calls: &mut u64) -> Result<TickerScan> {
        *api_calls += 1;
        let price = self.source.underlying_price(ticker).await?;
        *api_calls += 1;
        let chain = self.source.options_chain(ticker).await?;

        let opportunities = chain
            .value
            .iter()
            .filter_map(|quote| {
                self.converter
                    .convert(quote, price.value, OpportunityCategory::assign(quote), today)
            })
            .collect();

        Ok(TickerScan {
            opportunities,
            synthetic: price.is_synthetic() || chain.is_synthetic(),
        })
    }
}
