use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::config::{trend_thresholds, TRENDING_CAP};
use crate::types::{Opportunity, OpportunityKey, TrendAnnotation};

/// What an opportunity looked like the last time its key was scanned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviousQuoteRecord {
    pub premium: f64,
    pub volume: u64,
    pub seen_at: DateTime<Utc>,
    /// Records are evicted once the contract has expired.
    pub expiration: NaiveDate,
}

/// Flags opportunities whose premium or volume jumped since the immediately preceding scan.
///
/// Shared by every segment; the map is the only state and DashMap shards its locking.
#[derive(Debug, Default)]
pub struct TrendDetector {
    previous: DashMap<OpportunityKey, PreviousQuoteRecord>,
}

impl TrendDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotated copies of the trending entries of `new`, most significant first, capped.
    /// Every opportunity's record is overwritten whether or not it was flagged.
    pub fn detect_trending(&self, new: &[Opportunity], now: DateTime<Utc>) -> Vec<Opportunity> {
        self.evict_expired(now.date_naive());

        let mut trending: Vec<Opportunity> = new
            .iter()
            .filter_map(|opp| {
                let trend = self.observe(opp, now)?;
                let mut flagged = opp.clone();
                flagged.trend = Some(trend);
                Some(flagged)
            })
            .collect();

        trending.sort_by(|a, b| significance(b).total_cmp(&significance(a)));
        trending.truncate(TRENDING_CAP);
        trending
    }

    /// Compares against the stored record, then replaces it. `None` on first sighting or
    /// when neither change crosses its threshold.
    pub fn observe(&self, opp: &Opportunity, now: DateTime<Utc>) -> Option<TrendAnnotation> {
        let record = PreviousQuoteRecord {
            premium: opp.premium,
            volume: opp.volume,
            seen_at: now,
            expiration: opp.expiration,
        };
        let key = opp.key();
        let prev = self.previous.insert(key.clone(), record)?;

        let premium_change_pct = pct_change(prev.premium, opp.premium);
        let volume_change_pct = pct_change(prev.volume as f64, opp.volume as f64);

        let flagged = premium_change_pct > trend_thresholds::PREMIUM_CHANGE_PCT
            || volume_change_pct > trend_thresholds::VOLUME_CHANGE_PCT;
        if !flagged {
            return None;
        }

        debug!(
            key = key.as_str(),
            premium_change_pct,
            volume_change_pct,
            since_secs = (now - prev.seen_at).num_seconds(),
            "[TREND] flagged"
        );
        Some(TrendAnnotation {
            premium_change_pct,
            volume_change_pct,
            detected_at: now,
        })
    }

    pub fn tracked(&self) -> usize {
        self.previous.len()
    }

    /// Drops records of contracts that expired before `today`.
    fn evict_expired(&self, today: NaiveDate) {
        let before = self.previous.len();
        self.previous.retain(|_, record| record.expiration >= today);
        let evicted = before.saturating_sub(self.previous.len());
        if evicted > 0 {
            debug!(evicted, tracked = self.previous.len(), "[TREND] evicted expired records");
        }
    }
}

/// Percent change from `prev` to `new`; 0 when `prev` is 0.
fn pct_change(prev: f64, new: f64) -> f64 {
    if prev == 0.0 {
        return 0.0;
    }
    (new - prev) / prev * 100.0
}

/// Each change measured in multiples of its own threshold, so a 40% premium move and a 200%
/// volume move rank equally.
fn significance(opp: &Opportunity) -> f64 {
    opp.trend
        .as_ref()
        .map(|t| {
            (t.premium_change_pct / trend_thresholds::PREMIUM_CHANGE_PCT)
                .max(t.volume_change_pct / trend_thresholds::VOLUME_CHANGE_PCT)
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::sample_opportunity;
    use chrono::TimeZone;

    /// Fixed clock before the sample contracts' 2026-11-20 expiry.
    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 15, 0, 0).unwrap()
    }

    fn with(symbol: &str, premium: f64, volume: u64) -> Opportunity {
        let mut o = sample_opportunity(symbol, 100.0, 0.1);
        o.premium = premium;
        o.volume = volume;
        o
    }

    #[test]
    fn first_sighting_is_never_trending() {
        let det = TrendDetector::new();
        assert!(det.detect_trending(&[with("A", 1.0, 10)], at()).is_empty());
        assert_eq!(det.tracked(), 1);
    }

    #[test]
    fn premium_jump_of_25_pct_is_trending() {
        let det = TrendDetector::new();
        det.detect_trending(&[with("A", 1.00, 10)], at());
        let trending = det.detect_trending(&[with("A", 1.25, 10)], at());
        assert_eq!(trending.len(), 1);
        let t = trending[0].trend.as_ref().unwrap();
        assert!((t.premium_change_pct - 25.0).abs() < 1e-9);
        assert!(t.volume_change_pct.abs() < 1e-9);
    }

    #[test]
    fn premium_move_of_10_pct_is_not_trending() {
        let det = TrendDetector::new();
        det.detect_trending(&[with("A", 1.00, 10)], at());
        assert!(det.detect_trending(&[with("A", 1.10, 10)], at()).is_empty());
    }

    #[test]
    fn volume_spike_alone_is_trending() {
        let det = TrendDetector::new();
        det.detect_trending(&[with("A", 1.00, 100)], at());
        let trending = det.detect_trending(&[with("A", 1.00, 250)], at());
        assert_eq!(trending.len(), 1);
    }

    #[test]
    fn zero_previous_values_do_not_divide() {
        let det = TrendDetector::new();
        det.detect_trending(&[with("A", 0.0, 0)], at());
        assert!(det.detect_trending(&[with("A", 5.0, 500)], at()).is_empty());
    }

    #[test]
    fn record_is_overwritten_even_when_not_flagged() {
        let det = TrendDetector::new();
        det.detect_trending(&[with("A", 1.00, 10)], at());
        assert!(det.detect_trending(&[with("A", 1.15, 10)], at()).is_empty());
        assert_eq!(det.tracked(), 1);
        // 1.15 → 1.30 is ~13%, relative to the latest scan only.
        assert!(det.detect_trending(&[with("A", 1.30, 10)], at()).is_empty());
    }

    #[test]
    fn most_significant_first_and_capped() {
        let det = TrendDetector::new();
        let first: Vec<Opportunity> = (0..60).map(|i| with(&format!("T{i}"), 1.0, 10)).collect();
        det.detect_trending(&first, at());

        let second: Vec<Opportunity> = (0..60)
            .map(|i| with(&format!("T{i}"), 1.30 + i as f64 * 0.01, 10))
            .collect();
        let trending = det.detect_trending(&second, at());
        assert_eq!(trending.len(), TRENDING_CAP);
        assert_eq!(trending[0].symbol, "T59");
        let sig: Vec<f64> = trending.iter().map(significance).collect();
        assert!(sig.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn expired_contracts_are_evicted() {
        let det = TrendDetector::new();
        det.detect_trending(&[with("A", 1.0, 10), with("B", 1.0, 10)], at());
        assert_eq!(det.tracked(), 2);

        // Expiry day itself still counts as live.
        let expiry_day = Utc.with_ymd_and_hms(2026, 11, 20, 15, 0, 0).unwrap();
        det.detect_trending(&[], expiry_day);
        assert_eq!(det.tracked(), 2);

        let after_expiry = Utc.with_ymd_and_hms(2026, 11, 21, 15, 0, 0).unwrap();
        det.detect_trending(&[], after_expiry);
        assert_eq!(det.tracked(), 0);
    }

    #[test]
    fn weekly_expirations_do_not_accumulate() {
        let det = TrendDetector::new();
        let first_expiry = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        for week in 0..52u64 {
            let expiration = first_expiry + chrono::Days::new(week * 7);
            let chain: Vec<Opportunity> = (0..100)
                .map(|i| {
                    let mut o = sample_opportunity("SPY", 400.0 + i as f64, 0.1);
                    o.expiration = expiration;
                    o
                })
                .collect();
            // Scanned the week before expiry.
            let now = Utc.from_utc_datetime(&(expiration - chrono::Days::new(7)).and_hms_opt(15, 0, 0).unwrap());
            det.detect_trending(&chain, now);
            assert!(det.tracked() <= 200, "week {week}: {} records", det.tracked());
        }
    }
}
