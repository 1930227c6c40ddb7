use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{Config, UNIVERSE_PAGE_LIMIT};
use crate::error::{AppError, Result};
use crate::fetcher::client::Fetched;
use crate::fetcher::MarketDataClient;
use crate::types::MarketSegment;

// ---------------------------------------------------------------------------
// Static universes
// ---------------------------------------------------------------------------

pub const INDEX_UNIVERSE: &[&str] = &[
    "SPX", "NDX", "RUT", "DJX", "VIX", "VVIX",
    "SPY", "QQQ", "IWM", "DIA", "VTI", "VOO", "VEA", "VWO", "EEM", "EFA",
    "XLK", "XLF", "XLE", "XLV", "XLI", "XLY", "XLP", "XLU", "XLC", "XLRE", "XLB",
    "IVV", "IVW", "IVE", "IJH", "IJR", "VTV", "VUG", "VBR", "VB",
];

pub const FUTURES_UNIVERSE: &[&str] = &[
    "/ES", "/NQ", "/YM", "/RTY",
    "/CL", "/NG", "/RB", "/HO",
    "/GC", "/SI", "/HG", "/PL",
    "/ZC", "/ZS", "/ZW", "/ZL", "/ZM", "/KC", "/CC", "/SB", "/CT",
    "/6E", "/6B", "/6J", "/6A", "/6C", "/6S",
    "/ZB", "/ZN", "/ZF", "/ZT",
    "/VX", "/BTC", "/ETH",
];

/// Liquid optionable equities used whenever the remote universe can't be resolved.
pub const FALLBACK_EQUITY_UNIVERSE: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "GOOG", "AMZN", "NVDA", "META", "TSLA", "AVGO", "NFLX",
    "AMD", "INTC", "CSCO", "ORCL", "CRM", "ADBE", "QCOM", "TXN", "INTU", "AMAT",
    "LRCX", "KLAC", "SNPS", "CDNS", "MRVL", "PANW", "PLTR", "SNOW", "CRWD", "NET",
    "JPM", "BAC", "WFC", "GS", "MS", "C", "SCHW", "BLK", "AXP", "SPGI",
    "USB", "PNC", "TFC", "BK", "STT", "V", "MA", "PYPL", "SQ", "COIN",
    "UNH", "JNJ", "LLY", "ABBV", "MRK", "TMO", "ABT", "PFE", "DHR", "BMY",
    "AMGN", "GILD", "VRTX", "REGN", "ISRG", "CVS", "CI", "HUM", "BSX", "MDT",
    "HD", "MCD", "NKE", "SBUX", "LOW", "TJX", "BKNG", "MAR",
    "CMG", "ORLY", "AZO", "ROST", "DG", "DLTR", "YUM", "DPZ", "ULTA", "RCL",
    "WMT", "COST", "PG", "KO", "PEP", "PM", "MO", "MDLZ", "CL", "KMB",
    "GIS", "K", "HSY", "STZ", "TAP", "CPB", "CAG", "SJM", "HRL", "TSN",
    "XOM", "CVX", "COP", "SLB", "EOG", "MPC", "PSX", "VLO", "OXY", "HAL",
    "DVN", "FANG", "HES", "MRO", "APA", "CTRA", "BKR", "NOV", "FTI", "RIG",
    "BA", "CAT", "GE", "HON", "UPS", "RTX", "LMT", "DE", "MMM", "UNP",
    "GD", "NOC", "ETN", "EMR", "ITW", "PH", "FDX", "CSX", "NSC", "WM",
    "DIS", "CMCSA", "T", "VZ", "TMUS", "CHTR", "EA", "TTWO", "NTES", "MTCH",
    "LIN", "APD", "ECL", "SHW", "FCX", "NEM", "GOLD", "NUE", "VMC", "MLM",
    "AMT", "PLD", "CCI", "EQIX", "PSA", "DLR", "O", "WELL", "AVB", "EQR",
    "NEE", "DUK", "SO", "D", "AEP", "EXC", "SRE", "XEL", "WEC", "ES",
    "GME", "AMC", "RIVN", "LCID", "NIO", "SOFI", "HOOD", "RBLX", "MSTR", "SMCI",
    "NOW", "DDOG", "ZS", "OKTA", "MDB", "TEAM", "WDAY", "ZM", "DOCU", "TWLO",
    "TSM", "ASML", "MU", "NXPI", "ADI", "MCHP", "ON", "MPWR", "SWKS", "QRVO",
    "MRNA", "BNTX", "NVAX", "CRSP", "EDIT", "NTLA", "BEAM", "BLUE", "FOLD", "ARWR",
];

/// Deduplicated, sorted copy of `symbols`.
pub fn normalize<S: AsRef<str>>(symbols: impl IntoIterator<Item = S>) -> Vec<String> {
    symbols
        .into_iter()
        .map(|s| s.as_ref().trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn fallback_equities() -> Vec<String> {
    normalize(FALLBACK_EQUITY_UNIVERSE.iter().copied())
}

// ---------------------------------------------------------------------------
// TickerUniverse
// ---------------------------------------------------------------------------

/// Resolves the ordered symbol list for a segment. Batch slicing is positional, so
/// implementations must return the same order for the same underlying data.
#[async_trait]
pub trait TickerUniverse: Send + Sync {
    /// Never empty and never an error: failures resolve to a fallback list.
    async fn tickers(&self, segment: MarketSegment) -> Vec<String>;
}

struct CachedUniverse {
    resolved_at: Instant,
    tickers: Vec<String>,
}

/// Equities come from the upstream options-contracts reference endpoint and are cached for
/// `ttl`; index and futures lists are static.
pub struct UniverseProvider {
    client: Arc<MarketDataClient>,
    ttl: Duration,
    max_pages: usize,
    equities: Mutex<Option<CachedUniverse>>,
}

impl UniverseProvider {
    pub fn new(cfg: &Config, client: Arc<MarketDataClient>) -> Self {
        Self {
            client,
            ttl: cfg.universe_ttl,
            max_pages: cfg.universe_max_pages.max(1),
            equities: Mutex::new(None),
        }
    }

    async fn equities(&self) -> Vec<String> {
        // Held across the fetch so concurrent callers wait for one resolution.
        let mut cached = self.equities.lock().await;
        if let Some(c) = cached.as_ref() {
            if c.resolved_at.elapsed() < self.ttl {
                return c.tickers.clone();
            }
        }

        match self.fetch_remote().await {
            Ok(tickers) if !tickers.is_empty() => {
                info!(count = tickers.len(), "[UNIVERSE] resolved equity universe");
                *cached = Some(CachedUniverse {
                    resolved_at: Instant::now(),
                    tickers: tickers.clone(),
                });
                tickers
            }
            Ok(_) => {
                warn!("[UNIVERSE] remote universe empty, using fallback list");
                fallback_equities()
            }
            Err(e) => {
                warn!("[UNIVERSE] remote universe unavailable ({e}), using fallback list");
                fallback_equities()
            }
        }
    }

    /// Walks `next_url` up to `max_pages`. Any degraded page fails the whole resolution so a
    /// partial list never becomes the cached universe.
    async fn fetch_remote(&self) -> Result<Vec<String>> {
        let mut url = format!(
            "{}/v3/reference/options/contracts?limit={}&expired=false",
            self.client.base_url(),
            UNIVERSE_PAGE_LIMIT
        );
        let mut underlyings = Vec::new();

        for _ in 0..self.max_pages {
            let body = match self.client.get_json(&url).await? {
                Fetched::Body(b) => b,
                Fetched::Degraded(reason) => {
                    return Err(AppError::Upstream(format!("universe page degraded: {reason}")));
                }
            };

            if let Some(results) = body.get("results").and_then(|r| r.as_array()) {
                underlyings.extend(
                    results
                        .iter()
                        .filter_map(|c| c.get("underlying_ticker").and_then(|t| t.as_str()))
                        .map(str::to_string),
                );
            }

            match body.get("next_url").and_then(|u| u.as_str()) {
                Some(next) if !next.is_empty() => url = next.to_string(),
                _ => break,
            }
        }

        Ok(normalize(underlyings))
    }
}

#[async_trait]
impl TickerUniverse for UniverseProvider {
    async fn tickers(&self, segment: MarketSegment) -> Vec<String> {
        match segment {
            MarketSegment::Equity => self.equities().await,
            MarketSegment::Index => INDEX_UNIVERSE.iter().map(|s| s.to_string()).collect(),
            MarketSegment::Futures => FUTURES_UNIVERSE.iter().map(|s| s.to_string()).collect(),
        }
    }
}
