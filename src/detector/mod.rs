pub mod categorizer;
pub mod trend;

pub use categorizer::{by_strategy, categorize, CategorizedOpportunities, StrategyBuckets};
pub use trend::TrendDetector;
