use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::TOTAL_BATCHES;
use crate::detector::{CategorizedOpportunities, StrategyBuckets};
use crate::types::{MarketSegment, Opportunity};

/// How much of the batch that produced a snapshot came from live upstream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    /// Every scanned ticker was served live.
    Live,
    /// Some tickers were synthesized or failed.
    Degraded,
    /// Every ticker that succeeded was synthesized.
    Synthetic,
    /// Tickers were attempted and every one of them failed.
    Failed,
    /// Nothing was scanned: the never-scanned placeholder, or a batch cancelled before its first ticker.
    Empty,
}

impl DataQuality {
    pub fn from_counts(attempted: usize, failed: usize, synthetic: usize) -> Self {
        let succeeded = attempted.saturating_sub(failed);
        if attempted == 0 {
            DataQuality::Empty
        } else if succeeded == 0 {
            DataQuality::Failed
        } else if synthetic >= succeeded {
            DataQuality::Synthetic
        } else if failed > 0 || synthetic > 0 {
            DataQuality::Degraded
        } else {
            DataQuality::Live
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotMetadata {
    pub last_scan: DateTime<Utc>,
    pub segment: MarketSegment,
    /// Batch that produced this snapshot; 0 for the never-scanned placeholder.
    pub batch: usize,
    pub total_batches: usize,
    /// Tickers in this batch's slice, in universe order.
    pub tickers_scanned: Vec<String>,
    pub tickers_failed: Vec<String>,
    pub tickers_synthetic: Vec<String>,
    pub total_opportunities: usize,
    pub scan_duration_ms: u64,
    pub data_quality: DataQuality,
    /// The batch stopped early; only tickers before the stop were scanned.
    pub cancelled: bool,
}

/// Everything readers see for one segment. Built once, then shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSnapshot {
    pub segment: MarketSegment,
    pub opportunities: Vec<Opportunity>,
    pub categorized: CategorizedOpportunities,
    pub by_strategy: StrategyBuckets,
    pub trending: Vec<Opportunity>,
    pub metadata: SnapshotMetadata,
}

impl CacheSnapshot {
    pub fn empty(segment: MarketSegment) -> Self {
        Self {
            segment,
            opportunities: Vec::new(),
            categorized: CategorizedOpportunities::default(),
            by_strategy: StrategyBuckets::default(),
            trending: Vec::new(),
            metadata: SnapshotMetadata {
                last_scan: Utc::now(),
                segment,
                batch: 0,
                total_batches: TOTAL_BATCHES,
                tickers_scanned: Vec::new(),
                tickers_failed: Vec::new(),
                tickers_synthetic: Vec::new(),
                total_opportunities: 0,
                scan_duration_ms: 0,
                data_quality: DataQuality::Empty,
                cancelled: false,
            },
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.last_scan).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }
}
