use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{category_thresholds, risk_thresholds};

// ---------------------------------------------------------------------------
// Market segment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSegment {
    Equity,
    Index,
    Futures,
}

impl MarketSegment {
    pub const ALL: [MarketSegment; 3] = [
        MarketSegment::Equity,
        MarketSegment::Index,
        MarketSegment::Futures,
    ];
}

impl std::fmt::Display for MarketSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketSegment::Equity => "equity",
            MarketSegment::Index => "index",
            MarketSegment::Futures => "futures",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MarketSegment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "equity" => Ok(MarketSegment::Equity),
            "index" => Ok(MarketSegment::Index),
            "futures" => Ok(MarketSegment::Futures),
            other => Err(format!("unknown market segment '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw upstream quote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Call,
    Put,
}

impl std::fmt::Display for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractType::Call => write!(f, "call"),
            ContractType::Put => write!(f, "put"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

/// One option contract as reported by the upstream provider (or synthesized in its place).
#[derive(Debug, Clone, PartialEq)]
pub struct OptionQuote {
    /// Upstream contract ticker, e.g. `O:AAPL261120P00180000`.
    pub contract_id: String,
    pub underlying: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub contract_type: ContractType,
    pub bid: f64,
    pub ask: f64,
    pub last_trade: Option<f64>,
    pub volume: u64,
    pub open_interest: u64,
    pub implied_volatility: Option<f64>,
    pub greeks: Option<Greeks>,
}

impl OptionQuote {
    pub fn is_put(&self) -> bool {
        self.contract_type == ContractType::Put
    }
}

// ---------------------------------------------------------------------------
// Opportunity classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "Cash Secured Put")]
    CashSecuredPut,
    #[serde(rename = "Covered Call")]
    CoveredCall,
}

impl Strategy {
    pub fn for_contract(contract_type: ContractType) -> Self {
        match contract_type {
            ContractType::Put => Strategy::CashSecuredPut,
            ContractType::Call => Strategy::CoveredCall,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::CashSecuredPut => write!(f, "Cash Secured Put"),
            Strategy::CoveredCall => write!(f, "Covered Call"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// strike more than 10% away from the underlying
    Low,
    /// strike 5%–10% away
    Medium,
    /// strike within 5%
    High,
}

impl RiskLevel {
    /// `distance_pct` is `|underlying - strike| / underlying * 100`.
    pub fn from_distance(distance_pct: f64) -> Self {
        use risk_thresholds::*;
        if distance_pct > LOW_RISK_MIN_DISTANCE {
            RiskLevel::Low
        } else if distance_pct > MEDIUM_RISK_MIN_DISTANCE {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpportunityCategory {
    MarketMovers,
    HighIv,
    Conservative,
    /// No upstream earnings calendar is wired in, so the assignment rules never produce this.
    Earnings,
}

impl OpportunityCategory {
    /// First matching rule wins: volume, then implied volatility, then open interest.
    pub fn assign(quote: &OptionQuote) -> Self {
        use category_thresholds::*;
        if quote.volume > MARKET_MOVER_VOLUME {
            OpportunityCategory::MarketMovers
        } else if quote.implied_volatility.is_some_and(|iv| iv > HIGH_IV) {
            OpportunityCategory::HighIv
        } else {
            // Deep open interest (> 500) and the default both land here.
            OpportunityCategory::Conservative
        }
    }
}

impl std::fmt::Display for OpportunityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpportunityCategory::MarketMovers => "market-movers",
            OpportunityCategory::HighIv => "high-iv",
            OpportunityCategory::Conservative => "conservative",
            OpportunityCategory::Earnings => "earnings",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for OpportunityCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market-movers" => Ok(OpportunityCategory::MarketMovers),
            "high-iv" => Ok(OpportunityCategory::HighIv),
            "conservative" => Ok(OpportunityCategory::Conservative),
            "earnings" => Ok(OpportunityCategory::Earnings),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// Identity of an opportunity across scans: `(symbol, strike, expiration)`, suffixed with the
/// contract side because a put and a call on the same strike and date are different contracts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpportunityKey(String);

impl OpportunityKey {
    pub fn new(symbol: &str, strike: f64, expiration: NaiveDate, contract_type: ContractType) -> Self {
        let side = match contract_type {
            ContractType::Call => 'C',
            ContractType::Put => 'P',
        };
        Self(format!("{symbol}_{strike}_{expiration}_{side}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Set only on entries of a snapshot's trending list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnnotation {
    pub premium_change_pct: f64,
    pub volume_change_pct: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub symbol: String,
    pub strategy: Strategy,
    pub contract_type: ContractType,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub dte: i64,
    pub bid: f64,
    pub ask: f64,
    /// Mid of bid/ask, per share.
    pub premium: f64,
    /// Last traded price of the contract, when the provider reports one.
    pub last_price: Option<f64>,
    pub capital_required: f64,
    /// Percent.
    pub roi: f64,
    pub roi_per_day: f64,
    /// Delta-derived heuristic, percent.
    pub probability_of_profit: f64,
    pub risk: RiskLevel,
    pub distance_pct: f64,
    pub breakeven: f64,
    pub category: OpportunityCategory,
    pub underlying_price: f64,
    pub implied_volatility: Option<f64>,
    pub volume: u64,
    pub open_interest: u64,
    pub greeks: Option<Greeks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendAnnotation>,
}

impl Opportunity {
    pub fn key(&self) -> OpportunityKey {
        OpportunityKey::new(&self.symbol, self.strike, self.expiration, self.contract_type)
    }
}

/// Minimal put opportunity for tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn sample_opportunity(symbol: &str, strike: f64, roi_per_day: f64) -> Opportunity {
    let expiration = NaiveDate::from_ymd_opt(2026, 11, 20).unwrap();
    Opportunity {
        id: format!("O:{symbol}261120P{:08}", (strike * 1000.0) as u64),
        symbol: symbol.to_string(),
        strategy: Strategy::CashSecuredPut,
        contract_type: ContractType::Put,
        strike,
        expiration,
        dte: 30,
        bid: 1.0,
        ask: 1.2,
        premium: 1.1,
        last_price: Some(1.1),
        capital_required: strike * 100.0,
        roi: roi_per_day * 30.0,
        roi_per_day,
        probability_of_profit: 75.0,
        risk: RiskLevel::Medium,
        distance_pct: 7.0,
        breakeven: strike - 1.1,
        category: OpportunityCategory::Conservative,
        underlying_price: strike * 1.07,
        implied_volatility: Some(0.25),
        volume: 50,
        open_interest: 800,
        greeks: None,
        trend: None,
    }
}
