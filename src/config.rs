use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::MarketSegment;

pub const POLYGON_API_URL: &str = "https://api.polygon.io";

/// Number of rotating batches a segment's universe is divided into.
pub const TOTAL_BATCHES: usize = 5;

/// Per-category bucket cap in a published snapshot.
pub const CATEGORY_CAP: usize = 100;

/// Per-strategy bucket cap in a published snapshot.
pub const STRATEGY_CAP: usize = 100;

/// Trending list cap.
pub const TRENDING_CAP: usize = 50;

/// Contracts expiring further out than this many days are rejected.
pub const MAX_DTE: i64 = 60;

/// Number of contracts generated for a ticker when upstream is degraded.
pub const SYNTHETIC_CONTRACT_COUNT: usize = 8;

/// Page size requested from the options-contracts reference endpoint.
pub const UNIVERSE_PAGE_LIMIT: usize = 1000;

/// Page size requested from the options-chain snapshot endpoint.
pub const CHAIN_PAGE_LIMIT: usize = 250;

/// Category assignment thresholds, evaluated in order.
pub mod category_thresholds {
    /// Daily volume above this marks a market mover.
    pub const MARKET_MOVER_VOLUME: u64 = 100;
    /// Implied volatility above this marks a high-IV contract.
    pub const HIGH_IV: f64 = 0.30;
}

/// Distance-to-strike boundaries (percent of underlying) for the risk bucket.
pub mod risk_thresholds {
    pub const LOW_RISK_MIN_DISTANCE: f64 = 10.0;
    pub const MEDIUM_RISK_MIN_DISTANCE: f64 = 5.0;
}

/// Change percentages above which an opportunity is flagged as trending.
pub mod trend_thresholds {
    pub const PREMIUM_CHANGE_PCT: f64 = 20.0;
    pub const VOLUME_CHANGE_PCT: f64 = 100.0;
}

/// Consecutive degraded upstream responses before the circuit opens.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 3;

/// How long an open circuit stays open before a half-open probe.
pub const CIRCUIT_RESET: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    pub polygon_api_url: String,
    /// Upstream API key (POLYGON_API_KEY). Empty means every call degrades to synthetic data.
    pub polygon_api_key: String,
    pub log_level: String,
    pub api_port: u16,
    /// Minimum delay between any two upstream calls (UPSTREAM_MIN_DELAY_MS).
    /// Upstream tiers vary widely; the default assumes the 5 calls/min tier.
    pub upstream_min_delay: Duration,
    /// Per-request timeout for upstream calls (HTTP_TIMEOUT_SECS)
    pub http_timeout: Duration,
    /// Period between scheduled batches for one segment (SCAN_INTERVAL_SECS)
    pub scan_interval: Duration,
    /// Run the in-process batch scheduler (SCHEDULER_ENABLED)
    pub scheduler_enabled: bool,
    /// Segments rotated by the scheduler (SCAN_SEGMENTS, comma-separated)
    pub scan_segments: Vec<MarketSegment>,
    /// Contracts with less open interest are rejected (MIN_OPEN_INTEREST)
    pub min_open_interest: u64,
    /// How long a resolved equity universe is reused (UNIVERSE_TTL_SECS).
    /// Must cover at least one full batch rotation or batch boundaries drift.
    pub universe_ttl: Duration,
    /// Page cap for the remote universe endpoint (UNIVERSE_MAX_PAGES)
    pub universe_max_pages: usize,
    /// Snapshots older than this are reported stale (STALE_AFTER_SECS)
    pub stale_after: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let scan_segments = var("SCAN_SEGMENTS")
            .unwrap_or_else(|| "equity,index,futures".to_string())
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<MarketSegment>()
                    .map_err(|_| AppError::Config(format!("SCAN_SEGMENTS contains unknown segment '{s}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            polygon_api_url: var("POLYGON_API_URL").unwrap_or_else(|| POLYGON_API_URL.to_string()),
            polygon_api_key: var("POLYGON_API_KEY").unwrap_or_default(),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            api_port: var("API_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            upstream_min_delay: Duration::from_millis(
                var("UPSTREAM_MIN_DELAY_MS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(12_000),
            ),
            http_timeout: Duration::from_secs(
                var("HTTP_TIMEOUT_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(30),
            ),
            scan_interval: Duration::from_secs(
                var("SCAN_INTERVAL_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(300),
            ),
            scheduler_enabled: var("SCHEDULER_ENABLED")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(true),
            scan_segments,
            min_open_interest: var("MIN_OPEN_INTEREST")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(10),
            universe_ttl: Duration::from_secs(
                var("UNIVERSE_TTL_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(3600),
            ),
            universe_max_pages: var("UNIVERSE_MAX_PAGES")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(10),
            stale_after: Duration::from_secs(
                var("STALE_AFTER_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(900),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.polygon_api_url, POLYGON_API_URL);
        assert!(cfg.polygon_api_key.is_empty());
        assert_eq!(cfg.api_port, 3000);
        assert_eq!(cfg.upstream_min_delay, Duration::from_millis(12_000));
        assert_eq!(cfg.min_open_interest, 10);
        assert!(cfg.scheduler_enabled);
        assert_eq!(
            cfg.scan_segments,
            vec![MarketSegment::Equity, MarketSegment::Index, MarketSegment::Futures]
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config_from(&[
            ("UPSTREAM_MIN_DELAY_MS", "2000"),
            ("SCAN_SEGMENTS", "index, futures"),
            ("SCHEDULER_ENABLED", "false"),
            ("MIN_OPEN_INTEREST", "50"),
        ])
        .unwrap();
        assert_eq!(cfg.upstream_min_delay, Duration::from_millis(2000));
        assert_eq!(cfg.scan_segments, vec![MarketSegment::Index, MarketSegment::Futures]);
        assert!(!cfg.scheduler_enabled);
        assert_eq!(cfg.min_open_interest, 50);
    }

    #[test]
    fn bad_port_is_a_config_error() {
        let err = config_from(&[("API_PORT", "not-a-port")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn unknown_segment_is_a_config_error() {
        let err = config_from(&[("SCAN_SEGMENTS", "equity,crypto")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
