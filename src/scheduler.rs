use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::batch_scanner::{BatchScanner, ScanOutcome};
use crate::config::TOTAL_BATCHES;
use crate::types::MarketSegment;

/// Batch after `batch`, wrapping `TOTAL_BATCHES` back to 1.
pub fn next_batch(batch: usize) -> usize {
    batch % TOTAL_BATCHES + 1
}

/// Drives the rolling refresh: one loop per segment, one batch per tick, rotating through
/// `1..=TOTAL_BATCHES`.
pub struct BatchScheduler {
    scanner: Arc<BatchScanner>,
    segments: Vec<MarketSegment>,
    period: Duration,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(
        scanner: Arc<BatchScanner>,
        segments: Vec<MarketSegment>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self { scanner, segments, period, cancel }
    }

    pub async fn run(self) {
        info!(
            segments = ?self.segments,
            period_secs = self.period.as_secs(),
            "[SCHEDULER] starting"
        );

        let mut loops = JoinSet::new();
        for segment in self.segments {
            let scanner = Arc::clone(&self.scanner);
            let cancel = self.cancel.clone();
            loops.spawn(segment_loop(scanner, segment, self.period, cancel));
        }
        while let Some(res) = loops.join_next().await {
            if let Err(e) = res {
                error!("[SCHEDULER] segment loop ended abnormally: {e}");
            }
        }
        info!("[SCHEDULER] stopped");
    }
}

async fn segment_loop(
    scanner: Arc<BatchScanner>,
    segment: MarketSegment,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    // A batch can outlast the period; don't fire a burst to catch up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch = 1;

    loop {
        // First tick completes immediately so the cache warms at startup.
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match scanner.scan_batch(segment, batch).await {
            Ok(ScanOutcome::Published(snap)) => info!(
                segment = %segment,
                batch,
                total = snap.metadata.total_opportunities,
                "[SCHEDULER] batch published"
            ),
            Ok(ScanOutcome::AlreadyScanning(_)) => info!(
                segment = %segment,
                batch,
                "[SCHEDULER] segment busy with a manual scan, skipping tick"
            ),
            Err(e) => error!(segment = %segment, batch, "[SCHEDULER] scan failed: {e}"),
        }
        batch = next_batch(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::TrendDetector;
    use crate::error::Result;
    use crate::fetcher::{MarketDataSource, Sourced};
    use crate::scorer::OpportunityConverter;
    use crate::state::CacheStore;
    use crate::types::OptionQuote;
    use crate::universe::TickerUniverse;
    use async_trait::async_trait;

    struct Letters;

    #[async_trait]
    impl TickerUniverse for Letters {
        async fn tickers(&self, _segment: MarketSegment) -> Vec<String> {
            ["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect()
        }
    }

    struct EmptyChains;

    #[async_trait]
    impl MarketDataSource for EmptyChains {
        async fn underlying_price(&self, _symbol: &str) -> Result<Sourced<f64>> {
            Ok(Sourced::live(50.0))
        }

        async fn options_chain(&self, _symbol: &str) -> Result<Sourced<Vec<OptionQuote>>> {
            Ok(Sourced::live(Vec::new()))
        }
    }

    #[test]
    fn batches_rotate_and_wrap() {
        let seq: Vec<usize> = std::iter::successors(Some(1), |b| Some(next_batch(*b)))
            .take(7)
            .collect();
        assert_eq!(seq, vec![1, 2, 3, 4, 5, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_immediate_and_batches_rotate() {
        let cancel = CancellationToken::new();
        let store = Arc::new(CacheStore::new());
        let scanner = Arc::new(BatchScanner::new(
            Arc::new(EmptyChains),
            Arc::new(Letters),
            OpportunityConverter::new(10),
            Arc::new(TrendDetector::new()),
            Arc::clone(&store),
            cancel.clone(),
        ));
        let scheduler = BatchScheduler::new(
            Arc::clone(&scanner),
            vec![MarketSegment::Index],
            Duration::from_secs(60),
            cancel.clone(),
        );
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let snap = store.get(MarketSegment::Index).expect("first batch at startup");
        assert_eq!(snap.metadata.batch, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.get(MarketSegment::Index).unwrap().metadata.batch, 2);
        assert!(store.get(MarketSegment::Equity).is_none());

        cancel.cancel();
        handle.await.unwrap();
    }
}
