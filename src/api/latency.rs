//! In-memory latency histogram for upstream calls.
//! Records the round trip of each HTTP request, excluding the rate-limiter wait.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Shared latency stats. MarketDataClient records, API reads.
/// Values stored in microseconds.
pub struct UpstreamLatency {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl UpstreamLatency {
    /// Tracks 1us to 120s (beyond any configured timeout), 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 120_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 120_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let to_ms = |us: u64| us as f64 / 1000.0;
        let Ok(h) = self.inner.lock() else {
            return LatencySummary { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        };
        if h.len() == 0 {
            return LatencySummary { samples: 0, p50_ms: None, p95_ms: None, p99_ms: None, max_ms: None };
        }
        LatencySummary {
            samples: h.len(),
            p50_ms: Some(to_ms(h.value_at_quantile(0.5))),
            p95_ms: Some(to_ms(h.value_at_quantile(0.95))),
            p99_ms: Some(to_ms(h.value_at_quantile(0.99))),
            max_ms: Some(to_ms(h.max())),
        }
    }
}

impl Default for UpstreamLatency {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let s = UpstreamLatency::new().summary();
        assert_eq!(s.samples, 0);
        assert!(s.p50_ms.is_none() && s.max_ms.is_none());
    }

    #[test]
    fn percentiles_reflect_samples() {
        let lat = UpstreamLatency::new();
        for ms in 1..=100 {
            lat.record(Duration::from_millis(ms));
        }
        let s = lat.summary();
        assert_eq!(s.samples, 100);
        let p50 = s.p50_ms.unwrap();
        let p99 = s.p99_ms.unwrap();
        assert!((49.0..=51.0).contains(&p50), "p50={p50}");
        assert!((98.0..=100.5).contains(&p99), "p99={p99}");
    }
}
