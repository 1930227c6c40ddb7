//! Deterministic stand-in data used when the upstream provider is throttling or unreachable.
//!
//! Everything is seeded from the ticker symbol, so a degraded ticker produces the same price
//! and chain on every call rather than jittering between scans.

use chrono::{Days, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SYNTHETIC_CONTRACT_COUNT;
use crate::types::{ContractType, Greeks, OptionQuote};

/// Strike offsets (fraction of the underlying) used for generated contracts.
const STRIKE_OFFSETS: [f64; 4] = [-0.10, -0.05, 0.05, 0.10];

/// Salt so the chain RNG stream differs from the price RNG stream.
const CHAIN_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

/// FNV-1a over the symbol bytes; stable across processes and platforms.
pub fn seed_for(symbol: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in symbol.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Pseudo previous-close for `symbol`, in `[20, 500)`, rounded to cents.
pub fn synthetic_price(symbol: &str) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed_for(symbol));
    let price: f64 = rng.gen_range(20.0..500.0);
    round_cents(price)
}

/// A small chain around `underlying_price`: calls and puts at ±5% and ±10% strikes,
/// expiring 7–45 days after `today`.
pub fn synthetic_chain(symbol: &str, underlying_price: f64, today: NaiveDate) -> Vec<OptionQuote> {
    let mut rng = StdRng::seed_from_u64(seed_for(symbol) ^ CHAIN_SALT);
    let step = strike_step(underlying_price);

    let mut quotes = Vec::with_capacity(SYNTHETIC_CONTRACT_COUNT);
    let legs = STRIKE_OFFSETS
        .iter()
        .flat_map(|&offset| [(offset, ContractType::Put), (offset, ContractType::Call)]);
    for (offset, contract_type) in legs.take(SYNTHETIC_CONTRACT_COUNT) {
        let strike = ((underlying_price * (1.0 + offset)) / step).round() * step;
        let dte: u64 = rng.gen_range(7..=45);
        let expiration = today.checked_add_days(Days::new(dte)).unwrap_or(today);
        let iv: f64 = rng.gen_range(0.15..0.80);

        let moneyness = (underlying_price - strike) / underlying_price;
        let call_delta = (0.5 + moneyness * 3.0).clamp(0.05, 0.95);
        let delta = match contract_type {
            ContractType::Call => call_delta,
            ContractType::Put => call_delta - 1.0,
        };

        let intrinsic = match contract_type {
            ContractType::Call => (underlying_price - strike).max(0.0),
            ContractType::Put => (strike - underlying_price).max(0.0),
        };
        let years = dte as f64 / 365.0;
        let extrinsic = underlying_price * iv * years.sqrt() * 0.4 * (1.0 - moneyness.abs() * 4.0).max(0.2);
        let mid = (intrinsic + extrinsic).max(0.05);
        let bid = round_cents((mid * 0.95).max(0.01));
        let ask = round_cents(mid * 1.05).max(bid + 0.01);

        quotes.push(OptionQuote {
            contract_id: contract_ticker(symbol, expiration, contract_type, strike),
            underlying: symbol.to_string(),
            strike,
            expiration,
            contract_type,
            bid,
            ask,
            last_trade: Some(round_cents(mid)),
            volume: rng.gen_range(0..2_000),
            open_interest: rng.gen_range(10..5_000),
            implied_volatility: Some(iv),
            greeks: Some(Greeks {
                delta,
                gamma: rng.gen_range(0.005..0.05),
                theta: -rng.gen_range(0.01..0.5),
                vega: rng.gen_range(0.05..0.3),
            }),
        });
    }
    quotes
}

fn strike_step(price: f64) -> f64 {
    if price < 50.0 {
        0.5
    } else if price < 200.0 {
        1.0
    } else {
        5.0
    }
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// OCC-style ticker, e.g. `O:AAPL261120P00180000`.
fn contract_ticker(symbol: &str, expiration: NaiveDate, contract_type: ContractType, strike: f64) -> String {
    let side = match contract_type {
        ContractType::Call => 'C',
        ContractType::Put => 'P',
    };
    let root: String = symbol.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    format!(
        "O:{root}{}{side}{:08}",
        expiration.format("%y%m%d"),
        (strike * 1000.0).round() as u64
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn price_is_seeded_by_symbol() {
        assert_eq!(synthetic_price("AAPL"), synthetic_price("AAPL"));
        assert_ne!(synthetic_price("AAPL"), synthetic_price("MSFT"));
        let p = synthetic_price("/ES");
        assert!((20.0..500.0).contains(&p), "p={p}");
    }

    #[test]
    fn chain_is_deterministic() {
        let a = synthetic_chain("SPY", 450.0, today());
        let b = synthetic_chain("SPY", 450.0, today());
        assert_eq!(a, b);
    }

    #[test]
    fn chain_is_plausible() {
        let price = 150.0;
        let chain = synthetic_chain("NVDA", price, today());
        assert!((5..=10).contains(&chain.len()));
        for q in &chain {
            let delta = q.greeks.unwrap().delta;
            match q.contract_type {
                ContractType::Call => assert!(delta > 0.0, "call delta {delta}"),
                ContractType::Put => assert!(delta < 0.0, "put delta {delta}"),
            }
            assert!(q.bid > 0.0 && q.ask > q.bid, "bid={} ask={}", q.bid, q.ask);
            assert!((q.strike - price).abs() <= price * 0.11, "strike={}", q.strike);
            let dte = (q.expiration - today()).num_days();
            assert!((7..=45).contains(&dte), "dte={dte}");
            assert!(q.open_interest >= 10 && q.open_interest < 5_000);
            assert!(q.volume < 2_000);
            let iv = q.implied_volatility.unwrap();
            assert!((0.15..0.80).contains(&iv));
        }
    }

    #[test]
    fn contract_ticker_is_occ_style() {
        let exp = NaiveDate::from_ymd_opt(2026, 11, 20).unwrap();
        assert_eq!(
            contract_ticker("AAPL", exp, ContractType::Put, 180.0),
            "O:AAPL261120P00180000"
        );
        assert_eq!(
            contract_ticker("/ES", exp, ContractType::Call, 4502.5),
            "O:ES261120C04502500"
        );
    }
}
