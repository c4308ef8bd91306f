//! Trading policies for the hyperdrive-rs simulator.
//!
//! Each policy implements [`hyperdrive_rs_sim::Policy`] and reads only the
//! market and its own wallet. A [`PolicySpec`] describes a policy in serde
//! form so rosters can be loaded from JSON and registered with a simulator.

mod arbitrage;
mod fixed_rate;
mod random;
mod roster;

pub use arbitrage::Arbitrage;
pub use fixed_rate::{LongLouie, ShortSally};
pub use random::RandomAgent;
pub use roster::{register_roster, AgentSpec, PolicySpec};

use hyperdrive_rs_sim::{Market, TradeSpec, Wallet};

/// Close trades for every long that has reached maturity
pub(crate) fn close_matured_longs(market: &Market, wallet: &Wallet) -> Vec<TradeSpec> {
    wallet
        .longs()
        .iter()
        .filter(|(maturity, _)| market.is_mature(**maturity))
        .map(|(maturity, long)| TradeSpec::close_long(long.balance, *maturity))
        .collect()
}

/// Close trades for every short that has reached maturity
pub(crate) fn close_matured_shorts(market: &Market, wallet: &Wallet) -> Vec<TradeSpec> {
    wallet
        .shorts()
        .iter()
        .filter(|(maturity, _)| market.is_mature(**maturity))
        .map(|(maturity, short)| TradeSpec::close_short(short.balance, *maturity))
        .collect()
}
