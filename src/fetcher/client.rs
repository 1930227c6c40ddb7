use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::api::health::UpstreamHealth;
use crate::api::latency::UpstreamLatency;
use crate::config::{Config, CHAIN_PAGE_LIMIT, CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_RESET};
use crate::error::{AppError, Result};
use crate::fetcher::synthetic::{synthetic_chain, synthetic_price};
use crate::fetcher::{DegradeReason, MarketDataSource, RateLimiter, Sourced};
use crate::types::{ContractType, Greeks, OptionQuote};

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    /// One probe request is allowed through; its outcome closes or re-opens the circuit.
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trips: u64,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trips: 0,
        }
    }

    /// Returns true if a request may be sent now.
    fn allow(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= CIRCUIT_RESET);
                if cooled {
                    self.state = CircuitState::HalfOpen;
                }
                cooled
            }
            // The probe is already in flight.
            CircuitState::HalfOpen => false,
        }
    }

    fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    /// Returns true if this failure tripped the circuit open.
    fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures += 1;
        let trip = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD,
            CircuitState::Open => false,
        };
        if trip {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
            self.trips += 1;
        }
        trip
    }
}

// ---------------------------------------------------------------------------
// Upstream DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SnapshotDto {
    details: DetailsDto,
    #[serde(default)]
    last_quote: Option<LastQuoteDto>,
    #[serde(default)]
    last_trade: Option<LastTradeDto>,
    #[serde(default)]
    day: Option<DayDto>,
    #[serde(default)]
    open_interest: Option<f64>,
    #[serde(default)]
    implied_volatility: Option<f64>,
    #[serde(default)]
    greeks: Option<GreeksDto>,
}

#[derive(Debug, Deserialize)]
struct DetailsDto {
    contract_type: String,
    expiration_date: String,
    strike_price: f64,
    ticker: String,
}

#[derive(Debug, Deserialize)]
struct LastQuoteDto {
    #[serde(default)]
    bid: f64,
    #[serde(default)]
    ask: f64,
}

#[derive(Debug, Deserialize)]
struct LastTradeDto {
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DayDto {
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct GreeksDto {
    #[serde(default)]
    delta: f64,
    #[serde(default)]
    gamma: f64,
    #[serde(default)]
    theta: f64,
    #[serde(default)]
    vega: f64,
}

/// Outcome of one rate-limited upstream GET.
#[derive(Debug)]
pub(crate) enum Fetched {
    Body(serde_json::Value),
    Degraded(DegradeReason),
}

// ---------------------------------------------------------------------------
// MarketDataClient
// ---------------------------------------------------------------------------

/// The only component that talks to the upstream quote provider.
///
/// One instance is shared by every segment so the single [`RateLimiter`] covers the whole
/// process; upstream limits are per API key, not per endpoint.
pub struct MarketDataClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimiter>,
    breaker: Mutex<CircuitBreaker>,
    /// symbol → last price handed out, live or synthetic. Synthetic chains are built around it.
    last_prices: DashMap<String, f64>,
    health: Arc<UpstreamHealth>,
    latency: Arc<UpstreamLatency>,
}

impl MarketDataClient {
    pub fn new(
        cfg: &Config,
        limiter: Arc<RateLimiter>,
        health: Arc<UpstreamHealth>,
        latency: Arc<UpstreamLatency>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .user_agent("options-scanner/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.polygon_api_url.trim_end_matches('/').to_string(),
            api_key: cfg.polygon_api_key.clone(),
            limiter,
            breaker: Mutex::new(CircuitBreaker::new()),
            last_prices: DashMap::new(),
            health,
            latency,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().map(|b| b.state).unwrap_or(CircuitState::Open)
    }

    /// Rate-limited GET that classifies every failure mode.
    ///
    /// Throttling, non-2xx and transport failures come back as `Fetched::Degraded`; only a
    /// 2xx body that isn't JSON is an `Err`.
    pub(crate) async fn get_json(&self, url: &str) -> Result<Fetched> {
        if self.api_key.is_empty() {
            return Ok(Fetched::Degraded(DegradeReason::NoApiKey));
        }

        let allowed = self
            .breaker
            .lock()
            .map(|mut b| b.allow(Instant::now()))
            .unwrap_or(false);
        if !allowed {
            return Ok(Fetched::Degraded(DegradeReason::CircuitOpen));
        }

        self.limiter.turn().await;

        let started = Instant::now();
        let sent = self
            .http
            .get(url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await;
        self.latency.record(started.elapsed());

        let resp = match sent {
            Ok(r) => r,
            Err(e) => {
                warn!("[UPSTREAM] request failed for {}: {}", redact(url), e.without_url());
                return Ok(self.degrade(DegradeReason::Transport));
            }
        };

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(self.degrade(DegradeReason::RateLimited));
        }
        if !status.is_success() {
            return Ok(self.degrade(DegradeReason::HttpStatus(status.as_u16())));
        }

        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!("[UPSTREAM] body read failed for {}: {}", redact(url), e.without_url());
                return Ok(self.degrade(DegradeReason::Transport));
            }
        };

        // The provider answered; a malformed body is this ticker's problem, not an outage.
        let body: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                self.record_success();
                return Err(AppError::Json(e));
            }
        };

        if is_rate_limit_body(&body) {
            return Ok(self.degrade(DegradeReason::RateLimited));
        }

        self.record_success();
        self.health.inc_live_calls();
        Ok(Fetched::Body(body))
    }

    fn record_success(&self) {
        if let Ok(mut b) = self.breaker.lock() {
            b.record_success();
        }
    }

    fn degrade(&self, reason: DegradeReason) -> Fetched {
        warn!(reason = %reason, "[UPSTREAM] degraded response");
        if reason == DegradeReason::RateLimited {
            self.health.inc_rate_limited();
        }
        let tripped = self
            .breaker
            .lock()
            .map(|mut b| b.record_failure(Instant::now()))
            .unwrap_or(false);
        if tripped {
            self.health.inc_circuit_trips();
            error!(
                reason = %reason,
                "[UPSTREAM] circuit breaker OPEN for {}s after repeated failures",
                CIRCUIT_RESET.as_secs(),
            );
        }
        Fetched::Degraded(reason)
    }

    fn price_fallback(&self, symbol: &str, reason: DegradeReason) -> Sourced<f64> {
        let price = synthetic_price(symbol);
        self.health.inc_synthetic_fallbacks();
        debug!(ticker = symbol, reason = %reason, "[UPSTREAM] synthetic price {price:.2}");
        self.last_prices.insert(symbol.to_string(), price);
        Sourced::synthetic(price, reason)
    }

    fn chain_fallback(&self, symbol: &str, reason: DegradeReason, today: NaiveDate) -> Sourced<Vec<OptionQuote>> {
        let price = self
            .last_prices
            .get(symbol)
            .map(|p| *p)
            .unwrap_or_else(|| synthetic_price(symbol));
        self.health.inc_synthetic_fallbacks();
        debug!(ticker = symbol, reason = %reason, "[UPSTREAM] synthetic chain around {price:.2}");
        Sourced::synthetic(synthetic_chain(symbol, price, today), reason)
    }
}

#[async_trait]
impl MarketDataSource for MarketDataClient {
    async fn underlying_price(&self, symbol: &str) -> Result<Sourced<f64>> {
        let url = format!("{}/v2/aggs/ticker/{}/prev", self.base_url, symbol);
        match self.get_json(&url).await? {
            Fetched::Degraded(reason) => Ok(self.price_fallback(symbol, reason)),
            Fetched::Body(body) => {
                let price = parse_previous_close(&body)
                    .ok_or_else(|| AppError::Upstream(format!("no previous close for {symbol}")))?;
                self.last_prices.insert(symbol.to_string(), price);
                Ok(Sourced::live(price))
            }
        }
    }

    async fn options_chain(&self, symbol: &str) -> Result<Sourced<Vec<OptionQuote>>> {
        let url = format!(
            "{}/v3/snapshot/options/{}?limit={}",
            self.base_url, symbol, CHAIN_PAGE_LIMIT
        );
        let today = Utc::now().date_naive();
        match self.get_json(&url).await? {
            Fetched::Degraded(reason) => Ok(self.chain_fallback(symbol, reason, today)),
            Fetched::Body(body) => Ok(Sourced::live(parse_chain(symbol, &body))),
        }
    }

    fn circuit_trips(&self) -> u64 {
        self.breaker.lock().map(|b| b.trips).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// True for the provider's JSON error bodies that signal throttling.
pub fn is_rate_limit_body(body: &serde_json::Value) -> bool {
    let message = body
        .get("error")
        .or_else(|| body.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    message.contains("rate limit")
        || message.contains("exceeded the maximum requests")
        || message.contains("too many requests")
}

/// `results[0].c` from the previous-close aggregate; `None` if absent or non-positive.
pub fn parse_previous_close(body: &serde_json::Value) -> Option<f64> {
    body.get("results")
        .and_then(|r| r.as_array())
        .and_then(|a| a.first())
        .and_then(|bar| bar.get("c"))
        .and_then(|c| c.as_f64())
        .filter(|c| *c > 0.0)
}

/// Converts the snapshot `results` array. Contracts that don't parse are dropped individually.
pub fn parse_chain(symbol: &str, body: &serde_json::Value) -> Vec<OptionQuote> {
    let Some(items) = body.get("results").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    let mut quotes = Vec::with_capacity(items.len());
    for item in items {
        let dto: SnapshotDto = match serde_json::from_value(item.clone()) {
            Ok(d) => d,
            Err(e) => {
                debug!(ticker = symbol, "[UPSTREAM] skipping malformed contract: {e}");
                continue;
            }
        };
        let contract_type = match dto.details.contract_type.to_ascii_lowercase().as_str() {
            "call" => ContractType::Call,
            "put" => ContractType::Put,
            _ => continue,
        };
        let Ok(expiration) = NaiveDate::parse_from_str(&dto.details.expiration_date, "%Y-%m-%d") else {
            continue;
        };
        let (bid, ask) = dto.last_quote.map(|q| (q.bid, q.ask)).unwrap_or((0.0, 0.0));

        quotes.push(OptionQuote {
            contract_id: dto.details.ticker,
            underlying: symbol.to_string(),
            strike: dto.details.strike_price,
            expiration,
            contract_type,
            bid,
            ask,
            last_trade: dto.last_trade.and_then(|t| t.price),
            volume: dto.day.map(|d| d.volume.max(0.0) as u64).unwrap_or(0),
            open_interest: dto.open_interest.map(|oi| oi.max(0.0) as u64).unwrap_or(0),
            implied_volatility: dto.implied_volatility,
            greeks: dto.greeks.map(|g| Greeks {
                delta: g.delta,
                gamma: g.gamma,
                theta: g.theta,
                vega: g.vega,
            }),
        });
    }
    quotes
}

/// Strip the query string so API keys never reach the logs.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
