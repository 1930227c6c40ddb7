use serde::{Deserialize, Serialize};

use crate::config::{CATEGORY_CAP, STRATEGY_CAP};
use crate::types::{Opportunity, OpportunityCategory, Strategy};

/// Category buckets of a snapshot, each sorted by ROI per day (best first) and capped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CategorizedOpportunities {
    pub market_movers: Vec<Opportunity>,
    pub high_iv: Vec<Opportunity>,
    pub conservative: Vec<Opportunity>,
    pub earnings: Vec<Opportunity>,
}

impl CategorizedOpportunities {
    pub fn get(&self, category: OpportunityCategory) -> &[Opportunity] {
        match category {
            OpportunityCategory::MarketMovers => &self.market_movers,
            OpportunityCategory::HighIv => &self.high_iv,
            OpportunityCategory::Conservative => &self.conservative,
            OpportunityCategory::Earnings => &self.earnings,
        }
    }
}

/// Per-strategy buckets, same ordering and cap rules as categories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyBuckets {
    pub cash_secured_put: Vec<Opportunity>,
    pub covered_call: Vec<Opportunity>,
}

impl StrategyBuckets {
    pub fn get(&self, strategy: Strategy) -> &[Opportunity] {
        match strategy {
            Strategy::CashSecuredPut => &self.cash_secured_put,
            Strategy::CoveredCall => &self.covered_call,
        }
    }
}

/// Rebuilds the category buckets from the full merged list (retained + new).
pub fn categorize(all: &[Opportunity]) -> CategorizedOpportunities {
    let bucket = |category: OpportunityCategory| {
        top_by_roi_per_day(all.iter().filter(|o| o.category == category), CATEGORY_CAP)
    };
    CategorizedOpportunities {
        market_movers: bucket(OpportunityCategory::MarketMovers),
        high_iv: bucket(OpportunityCategory::HighIv),
        conservative: bucket(OpportunityCategory::Conservative),
        earnings: bucket(OpportunityCategory::Earnings),
    }
}

pub fn by_strategy(all: &[Opportunity]) -> StrategyBuckets {
    let bucket = |strategy: Strategy| {
        top_by_roi_per_day(all.iter().filter(|o| o.strategy == strategy), STRATEGY_CAP)
    };
    StrategyBuckets {
        cash_secured_put: bucket(Strategy::CashSecuredPut),
        covered_call: bucket(Strategy::CoveredCall),
    }
}

fn top_by_roi_per_day<'a>(items: impl Iterator<Item = &'a Opportunity>, cap: usize) -> Vec<Opportunity> {
    let mut sorted: Vec<Opportunity> = items.cloned().collect();
    // Stable sort: ties keep merge order.
    sorted.sort_by(|a, b| b.roi_per_day.total_cmp(&a.roi_per_day));
    sorted.truncate(cap);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{sample_opportunity, ContractType};

    #[test]
    fn buckets_are_sorted_descending() {
        let mut a = sample_opportunity("A", 100.0, 0.05);
        a.category = OpportunityCategory::HighIv;
        let mut b = sample_opportunity("B", 100.0, 0.20);
        b.category = OpportunityCategory::HighIv;
        let mut c = sample_opportunity("C", 100.0, 0.10);
        c.category = OpportunityCategory::HighIv;
        let d = sample_opportunity("D", 100.0, 0.50);

        let cats = categorize(&[a, b, c, d]);
        let symbols: Vec<&str> = cats.high_iv.iter().map(|o| o.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["B", "C", "A"]);
        assert_eq!(cats.conservative.len(), 1);
        assert!(cats.market_movers.is_empty());
        assert!(cats.earnings.is_empty());
    }

    #[test]
    fn buckets_are_capped() {
        let all: Vec<Opportunity> = (0..250)
            .map(|i| sample_opportunity(&format!("T{i}"), 100.0, i as f64 / 1000.0))
            .collect();
        let cats = categorize(&all);
        assert_eq!(cats.conservative.len(), CATEGORY_CAP);
        assert!((cats.conservative[0].roi_per_day - 0.249).abs() < 1e-9);

        let strategies = by_strategy(&all);
        assert_eq!(strategies.cash_secured_put.len(), STRATEGY_CAP);
        assert!(strategies.covered_call.is_empty());
    }

    #[test]
    fn strategies_split_by_contract_side() {
        let put = sample_opportunity("A", 100.0, 0.1);
        let mut call = sample_opportunity("A", 110.0, 0.2);
        call.contract_type = ContractType::Call;
        call.strategy = Strategy::CoveredCall;

        let strategies = by_strategy(&[put, call]);
        assert_eq!(strategies.get(Strategy::CashSecuredPut).len(), 1);
        assert_eq!(strategies.get(Strategy::CoveredCall)[0].strike, 110.0);
    }
}
