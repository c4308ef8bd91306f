//! Fixed-size trades against fixed-rate thresholds.

use std::collections::BTreeSet;

use hyperdrive_rs_sim::{ActionType, Market, Policy, SimError, TradeSpec, Wallet};
use rand_chacha::ChaCha8Rng;

use crate::{close_matured_longs, close_matured_shorts};

/// Trades the fixed rate back inside a band.
///
/// Matured positions are always closed. At or above the high threshold the
/// agent closes its shorts and opens a long for `trade_amount` base; at or
/// below the low threshold it closes its longs and shorts `trade_amount` bonds.
#[derive(Debug, Clone)]
pub struct Arbitrage {
    trade_amount: f64,
    high_fixed_rate_threshold: f64,
    low_fixed_rate_threshold: f64,
}

impl Arbitrage {
    pub fn new(
        trade_amount: f64,
        high_fixed_rate_threshold: f64,
        low_fixed_rate_threshold: f64,
    ) -> Result<Self, SimError> {
        if !trade_amount.is_finite() || trade_amount <= 0.0 {
            return Err(SimError::InvalidConfig {
                reason: format!("arbitrage trade amount must be positive, got {trade_amount}"),
            });
        }
        if low_fixed_rate_threshold.is_nan()
            || high_fixed_rate_threshold.is_nan()
            || low_fixed_rate_threshold >= high_fixed_rate_threshold
        {
            return Err(SimError::InvalidConfig {
                reason: format!(
                    "low threshold {low_fixed_rate_threshold} must sit below high threshold {high_fixed_rate_threshold}"
                ),
            });
        }
        Ok(Self {
            trade_amount,
            high_fixed_rate_threshold,
            low_fixed_rate_threshold,
        })
    }
}

impl Policy for Arbitrage {
    fn name(&self) -> &str {
        "arbitrage"
    }

    fn action(&mut self, market: &Market, wallet: &Wallet, _rng: &mut ChaCha8Rng) -> Vec<TradeSpec> {
        let mut trades = close_matured_longs(market, wallet);
        trades.extend(close_matured_shorts(market, wallet));
        let Ok(fixed_apr) = market.fixed_apr() else {
            return trades;
        };

        // buckets already closed above are not closed twice
        let closed_longs: BTreeSet<u32> = trades
            .iter()
            .filter(|trade| trade.action == ActionType::CloseLong)
            .filter_map(|trade| trade.maturity)
            .collect();
        let closed_shorts: BTreeSet<u32> = trades
            .iter()
            .filter(|trade| trade.action == ActionType::CloseShort)
            .filter_map(|trade| trade.maturity)
            .collect();

        if fixed_apr >= self.high_fixed_rate_threshold {
            trades.extend(
                wallet
                    .shorts()
                    .iter()
                    .filter(|(maturity, _)| !closed_shorts.contains(*maturity))
                    .map(|(maturity, short)| TradeSpec::close_short(short.balance, *maturity)),
            );
            trades.push(TradeSpec::open_long(self.trade_amount));
        } else if fixed_apr <= self.low_fixed_rate_threshold {
            trades.extend(
                wallet
                    .longs()
                    .iter()
                    .filter(|(maturity, _)| !closed_longs.contains(*maturity))
                    .map(|(maturity, long)| TradeSpec::close_long(long.balance, *maturity)),
            );
            trades.push(TradeSpec::open_short(self.trade_amount));
        }
        trades
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_market, create_test_wallet};
    use rand::SeedableRng;

    #[test]
    fn test_closes_shorts_then_longs_above_band() {
        let market = create_test_market(0.1);
        let wallet = create_test_wallet(10_000.0, &[], &[(90, 30.0)]);
        let mut policy = Arbitrage::new(100.0, 0.08, 0.02).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            policy.action(&market, &wallet, &mut rng),
            vec![TradeSpec::close_short(30.0, 90), TradeSpec::open_long(100.0)]
        );
    }

    #[test]
    fn test_shorts_below_band() {
        let market = create_test_market(0.01);
        let wallet = create_test_wallet(10_000.0, &[(90, 12.0)], &[]);
        let mut policy = Arbitrage::new(100.0, 0.08, 0.02).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            policy.action(&market, &wallet, &mut rng),
            vec![TradeSpec::close_long(12.0, 90), TradeSpec::open_short(100.0)]
        );
    }

    #[test]
    fn test_only_closes_matured_inside_band() {
        let mut market = create_test_market(0.05);
        market.tick(100.0 / 365.0).unwrap();
        let wallet = create_test_wallet(10_000.0, &[(90, 12.0), (200, 3.0)], &[(95, 4.0)]);
        let mut policy = Arbitrage::new(100.0, 0.08, 0.02).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            policy.action(&market, &wallet, &mut rng),
            vec![TradeSpec::close_long(12.0, 90), TradeSpec::close_short(4.0, 95)]
        );
    }

    #[test]
    fn test_rejects_inverted_band() {
        assert!(Arbitrage::new(100.0, 0.02, 0.08).is_err());
        assert!(Arbitrage::new(0.0, 0.08, 0.02).is_err());
    }
}
