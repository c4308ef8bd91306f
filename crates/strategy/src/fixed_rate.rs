//! Policies that trade the spread between the fixed and variable rates.

use hyperdrive_rs_sim::pricing::calc_bond_reserves_for_target_apr;
use hyperdrive_rs_sim::{Market, Policy, SimError, TradeSpec, Wallet};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::{close_matured_longs, close_matured_shorts};

fn check_trade_chance(trade_chance: f64) -> Result<(), SimError> {
    if (0.0..=1.0).contains(&trade_chance) {
        Ok(())
    } else {
        Err(SimError::InvalidConfig {
            reason: format!("trade chance must be within [0, 1], got {trade_chance}"),
        })
    }
}

fn check_threshold(risk_threshold: f64) -> Result<(), SimError> {
    if risk_threshold.is_finite() {
        Ok(())
    } else {
        Err(SimError::InvalidConfig {
            reason: format!("risk threshold must be finite, got {risk_threshold}"),
        })
    }
}

/// Lends at the fixed rate while it pays enough over the variable rate.
///
/// Holds one long at a time, sized to push the fixed rate halfway towards
/// the variable rate, and closes longs once they mature.
#[derive(Debug, Clone)]
pub struct LongLouie {
    trade_chance: f64,
    risk_threshold: f64,
}

impl LongLouie {
    pub fn new(trade_chance: f64, risk_threshold: f64) -> Result<Self, SimError> {
        check_trade_chance(trade_chance)?;
        check_threshold(risk_threshold)?;
        Ok(Self {
            trade_chance,
            risk_threshold,
        })
    }

    /// Base that moves the fixed rate halfway to the variable rate
    fn size_to_variable_rate(market: &Market) -> Result<f64, SimError> {
        let pool = market.pool();
        let target_bonds = calc_bond_reserves_for_target_apr(
            pool.variable_apr(),
            pool.share_reserves(),
            pool.share_price(),
            pool.init_share_price(),
            market.position_duration(),
        )?;
        Ok((pool.bond_reserves() - target_bonds) * market.spot_price()? / 2.0)
    }
}

impl Policy for LongLouie {
    fn name(&self) -> &str {
        "long_louie"
    }

    fn action(&mut self, market: &Market, wallet: &Wallet, rng: &mut ChaCha8Rng) -> Vec<TradeSpec> {
        if !rng.gen_bool(self.trade_chance) {
            return Vec::new();
        }
        let mut trades = close_matured_longs(market, wallet);

        let Ok(fixed_apr) = market.fixed_apr() else {
            return trades;
        };
        let spread = fixed_apr - market.pool().variable_apr();
        if spread <= self.risk_threshold || !wallet.longs().is_empty() {
            return trades;
        }
        let sized = Self::size_to_variable_rate(market)
            .and_then(|target| market.max_long(wallet.base()).map(|max| target.min(max)));
        match sized {
            Ok(amount) if amount > 0.0 => trades.push(TradeSpec::open_long(amount)),
            Ok(_) => {}
            Err(err) => debug!(agent = wallet.address(), error = %err, "could not size long"),
        }
        trades
    }
}

/// Borrows at the fixed rate while it sits close enough to the variable rate.
///
/// Opens the largest short its wallet can fund when the spread falls below
/// its threshold and it holds no short; closes shorts once they mature.
#[derive(Debug, Clone)]
pub struct ShortSally {
    trade_chance: f64,
    risk_threshold: f64,
}

impl ShortSally {
    pub fn new(trade_chance: f64, risk_threshold: f64) -> Result<Self, SimError> {
        check_trade_chance(trade_chance)?;
        check_threshold(risk_threshold)?;
        Ok(Self {
            trade_chance,
            risk_threshold,
        })
    }
}

impl Policy for ShortSally {
    fn name(&self) -> &str {
        "short_sally"
    }

    fn action(&mut self, market: &Market, wallet: &Wallet, rng: &mut ChaCha8Rng) -> Vec<TradeSpec> {
        if !rng.gen_bool(self.trade_chance) {
            return Vec::new();
        }
        let mut trades = close_matured_shorts(market, wallet);

        let Ok(fixed_apr) = market.fixed_apr() else {
            return trades;
        };
        let spread = fixed_apr - market.pool().variable_apr();
        if spread >= self.risk_threshold || !wallet.shorts().is_empty() {
            return trades;
        }
        match market.max_short(wallet.base()) {
            Ok(bonds) if bonds > 0.0 && wallet.base() > 0.0 => {
                trades.push(TradeSpec::open_short(bonds));
            }
            Ok(_) => {}
            Err(err) => debug!(agent = wallet.address(), error = %err, "could not size short"),
        }
        trades
    }
}
