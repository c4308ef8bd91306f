//! A policy that trades at random.

use hyperdrive_rs_sim::{ActionType, Market, Policy, SimError, TradeSpec, Wallet};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

/// Smallest trade worth submitting
const MIN_TRADE: f64 = 1e-18;

/// Opens or closes a random position each time it trades.
///
/// With probability `trade_chance` per block it picks one of the actions
/// available to it. Opening sizes are drawn from a normal distribution
/// centred on 10% of the budget with a 1% spread, clipped to what the
/// market allows. Closes always close a whole bucket.
#[derive(Debug, Clone)]
pub struct RandomAgent {
    trade_chance: f64,
}

impl RandomAgent {
    pub fn new(trade_chance: f64) -> Result<Self, SimError> {
        if !(0.0..=1.0).contains(&trade_chance) {
            return Err(SimError::InvalidConfig {
                reason: format!("trade chance must be within [0, 1], got {trade_chance}"),
            });
        }
        Ok(Self { trade_chance })
    }

    pub fn trade_chance(&self) -> f64 {
        self.trade_chance
    }

    fn available_actions(wallet: &Wallet) -> Vec<ActionType> {
        let mut actions = vec![ActionType::OpenLong, ActionType::OpenShort];
        if !wallet.longs().is_empty() {
            actions.push(ActionType::CloseLong);
        }
        if !wallet.shorts().is_empty() {
            actions.push(ActionType::CloseShort);
        }
        actions
    }

    fn draw_size(wallet: &Wallet, rng: &mut ChaCha8Rng) -> Option<f64> {
        let budget = wallet.budget();
        let normal = Normal::new(budget * 0.1, budget * 0.01).ok()?;
        Some(normal.sample(rng))
    }
}

impl Policy for RandomAgent {
    fn name(&self) -> &str {
        "random"
    }

    fn action(&mut self, market: &Market, wallet: &Wallet, rng: &mut ChaCha8Rng) -> Vec<TradeSpec> {
        if !rng.gen_bool(self.trade_chance) {
            return Vec::new();
        }
        let Some(action) = Self::available_actions(wallet).choose(rng).copied() else {
            return Vec::new();
        };

        let trade = match action {
            ActionType::OpenLong => {
                let Some(size) = Self::draw_size(wallet, rng) else {
                    return Vec::new();
                };
                match market.max_long(wallet.base()) {
                    Ok(max_long) if max_long > MIN_TRADE => {
                        Some(TradeSpec::open_long(size.clamp(MIN_TRADE, max_long)))
                    }
                    _ => None,
                }
            }
            ActionType::OpenShort => {
                let Some(size) = Self::draw_size(wallet, rng) else {
                    return Vec::new();
                };
                match market.max_short(wallet.base()) {
                    Ok(max_short) if max_short > MIN_TRADE => {
                        Some(TradeSpec::open_short(size.clamp(MIN_TRADE, max_short)))
                    }
                    _ => None,
                }
            }
            ActionType::CloseLong => {
                let buckets: Vec<_> = wallet.longs().iter().collect();
                buckets
                    .choose(rng)
                    .map(|(maturity, long)| TradeSpec::close_long(long.balance, **maturity))
            }
            ActionType::CloseShort => {
                let buckets: Vec<_> = wallet.shorts().iter().collect();
                buckets
                    .choose(rng)
                    .map(|(maturity, short)| TradeSpec::close_short(short.balance, **maturity))
            }
            _ => None,
        };

        if trade.is_none() {
            debug!(agent = wallet.address(), %action, "no room for a random trade");
        }
        trade.into_iter().collect()
    }
}
