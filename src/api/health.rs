//! Shared health state for the /health endpoint.
//! Upstream counters are bumped by MarketDataClient; cache status is derived from snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::state::{CacheSnapshot, DataQuality};

/// Upstream counters since startup. Updated by the client, read by the API.
#[derive(Default)]
pub struct UpstreamHealth {
    live_calls: AtomicU64,
    synthetic_fallbacks: AtomicU64,
    rate_limited: AtomicU64,
    circuit_trips: AtomicU64,
}

impl UpstreamHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_live_calls(&self) {
        self.live_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_synthetic_fallbacks(&self) {
        self.synthetic_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_circuit_trips(&self) {
        self.circuit_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_calls(&self) -> u64 {
        self.live_calls.load(Ordering::Relaxed)
    }

    pub fn synthetic_fallbacks(&self) -> u64 {
        self.synthetic_fallbacks.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn circuit_trips(&self) -> u64 {
        self.circuit_trips.load(Ordering::Relaxed)
    }
}

/// Traffic-light status for one segment's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RagStatus {
    /// Fresh and built from live data.
    Green,
    /// Stale, or some tickers were synthesized or failed.
    Amber,
    /// Never scanned, every attempted ticker failed, or every ticker was synthesized.
    Red,
}

impl RagStatus {
    pub fn for_snapshot(snapshot: Option<&CacheSnapshot>, stale_after: Duration) -> Self {
        let Some(snap) = snapshot else {
            return RagStatus::Red;
        };
        match snap.metadata.data_quality {
            DataQuality::Synthetic | DataQuality::Failed => RagStatus::Red,
            DataQuality::Degraded => RagStatus::Amber,
            DataQuality::Live | DataQuality::Empty if snap.is_stale(stale_after) => RagStatus::Amber,
            DataQuality::Live | DataQuality::Empty => RagStatus::Green,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketSegment;

    #[test]
    fn counters_accumulate() {
        let h = UpstreamHealth::new();
        h.inc_live_calls();
        h.inc_live_calls();
        h.inc_rate_limited();
        assert_eq!(h.live_calls(), 2);
        assert_eq!(h.rate_limited(), 1);
        assert_eq!(h.synthetic_fallbacks(), 0);
        assert_eq!(h.circuit_trips(), 0);
    }

    #[test]
    fn rag_status_follows_quality_and_age() {
        let stale_after = Duration::from_secs(900);
        assert_eq!(RagStatus::for_snapshot(None, stale_after), RagStatus::Red);

        let mut snap = CacheSnapshot::empty(MarketSegment::Equity);
        snap.metadata.data_quality = DataQuality::Live;
        assert_eq!(RagStatus::for_snapshot(Some(&snap), stale_after), RagStatus::Green);

        snap.metadata.data_quality = DataQuality::Degraded;
        assert_eq!(RagStatus::for_snapshot(Some(&snap), stale_after), RagStatus::Amber);

        snap.metadata.data_quality = DataQuality::Synthetic;
        assert_eq!(RagStatus::for_snapshot(Some(&snap), stale_after), RagStatus::Red);

        snap.metadata.data_quality = DataQuality::Failed;
        assert_eq!(RagStatus::for_snapshot(Some(&snap), stale_after), RagStatus::Red);

        snap.metadata.data_quality = DataQuality::Live;
        snap.metadata.last_scan -= chrono::Duration::seconds(901);
        assert_eq!(RagStatus::for_snapshot(Some(&snap), stale_after), RagStatus::Amber);
    }
}
