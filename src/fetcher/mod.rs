pub mod client;
pub mod rate_limiter;
pub mod synthetic;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::types::OptionQuote;

pub use client::{CircuitState, MarketDataClient};
pub use rate_limiter::RateLimiter;

/// Why a value was synthesized instead of fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    /// HTTP 429 or a rate-limit error body.
    RateLimited,
    /// Any other non-2xx status.
    HttpStatus(u16),
    /// Connect/timeout/body-read failure.
    Transport,
    /// The circuit breaker is open; no request was sent.
    CircuitOpen,
    /// No API key configured; no request was sent.
    NoApiKey,
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradeReason::RateLimited => write!(f, "rate_limited"),
            DegradeReason::HttpStatus(code) => write!(f, "http_{code}"),
            DegradeReason::Transport => write!(f, "transport"),
            DegradeReason::CircuitOpen => write!(f, "circuit_open"),
            DegradeReason::NoApiKey => write!(f, "no_api_key"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    Live,
    Synthetic(DegradeReason),
}

/// A value plus where it came from. Opportunity records don't carry provenance,
/// so scans read it here to report degraded batches in snapshot metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub origin: DataOrigin,
}

impl<T> Sourced<T> {
    pub fn live(value: T) -> Self {
        Self { value, origin: DataOrigin::Live }
    }

    pub fn synthetic(value: T, reason: DegradeReason) -> Self {
        Self { value, origin: DataOrigin::Synthetic(reason) }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.origin, DataOrigin::Synthetic(_))
    }
}

/// The upstream quote provider as seen by the scanner.
///
/// Throttling and outages never surface as errors: implementations substitute synthetic data
/// and say so through [`Sourced::origin`]. An `Err` means the response was unusable for this
/// ticker (malformed body, missing price) and the ticker should be skipped.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn underlying_price(&self, symbol: &str) -> Result<Sourced<f64>>;

    async fn options_chain(&self, symbol: &str) -> Result<Sourced<Vec<OptionQuote>>>;

    /// Total circuit-breaker trips since startup.
    fn circuit_trips(&self) -> u64 {
        0
    }
}
