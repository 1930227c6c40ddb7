use chrono::NaiveDate;

use crate::config::MAX_DTE;
use crate::types::{Opportunity, OpportunityCategory, OptionQuote, RiskLevel, Strategy};

/// Turns one raw quote into a scored [`Opportunity`].
#[derive(Debug, Clone, Copy)]
pub struct OpportunityConverter {
    min_open_interest: u64,
}

impl OpportunityConverter {
    pub fn new(min_open_interest: u64) -> Self {
        Self { min_open_interest }
    }

    /// `None` when the quote isn't actionable: no market, expired or more than
    /// [`MAX_DTE`] days out, or too little open interest.
    pub fn convert(
        &self,
        quote: &OptionQuote,
        underlying_price: f64,
        category: OpportunityCategory,
        today: NaiveDate,
    ) -> Option<Opportunity> {
        if quote.bid == 0.0 && quote.ask == 0.0 {
            return None;
        }
        let dte = (quote.expiration - today).num_days();
        if dte <= 0 || dte > MAX_DTE {
            return None;
        }
        if quote.open_interest < self.min_open_interest {
            return None;
        }
        if underlying_price <= 0.0 {
            return None;
        }

        let is_put = quote.is_put();
        let premium = (quote.bid + quote.ask) / 2.0;
        let capital_required = if is_put {
            quote.strike * 100.0
        } else {
            underlying_price * 100.0
        };
        if capital_required <= 0.0 {
            return None;
        }

        let roi = premium * 100.0 / capital_required;
        let roi_per_day = roi / dte as f64;
        let distance_pct = (underlying_price - quote.strike).abs() / underlying_price * 100.0;
        let breakeven = if is_put {
            quote.strike - premium
        } else {
            quote.strike + premium
        };

        Some(Opportunity {
            id: quote.contract_id.clone(),
            symbol: quote.underlying.clone(),
            strategy: Strategy::for_contract(quote.contract_type),
            contract_type: quote.contract_type,
            strike: quote.strike,
            expiration: quote.expiration,
            dte,
            bid: quote.bid,
            ask: quote.ask,
            premium,
            last_price: quote.last_trade,
            capital_required,
            roi,
            roi_per_day,
            probability_of_profit: probability_of_profit(quote),
            risk: RiskLevel::from_distance(distance_pct),
            distance_pct,
            breakeven,
            category,
            underlying_price,
            implied_volatility: quote.implied_volatility,
            volume: quote.volume,
            open_interest: quote.open_interest,
            greeks: quote.greeks,
            trend: None,
        })
    }
}

/// Delta heuristic, in percent. A short put keeps its premium when it expires out of the money,
/// roughly `1 + delta` (delta is negative); a call uses `|delta|`. Not a distribution-based
/// estimate. Missing greeks count as delta 0.
pub fn probability_of_profit(quote: &OptionQuote) -> f64 {
    let delta = quote.greeks.map(|g| g.delta).unwrap_or(0.0);
    if quote.is_put() {
        ((1.0 + delta) * 100.0).clamp(0.0, 100.0)
    } else {
        (delta.abs() * 100.0).clamp(0.0, 100.0)
    }
}
