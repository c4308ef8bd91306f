//! Serde descriptions of policies and the agents that run them.

use hyperdrive_rs_sim::{Policy, SimError, Simulator};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Arbitrage, LongLouie, RandomAgent, ShortSally};

/// A policy and its parameters.
///
/// Rates and chances are decimals (0.05 = 5%), tagged by `policy`:
///
/// ```json
/// { "policy": "long_louie", "trade_chance": "0.5", "risk_threshold": "0.02" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PolicySpec {
    Random {
        trade_chance: Decimal,
    },
    LongLouie {
        trade_chance: Decimal,
        risk_threshold: Decimal,
    },
    ShortSally {
        trade_chance: Decimal,
        risk_threshold: Decimal,
    },
    Arbitrage {
        trade_amount: Decimal,
        high_fixed_rate_threshold: Decimal,
        low_fixed_rate_threshold: Decimal,
    },
}

impl PolicySpec {
    /// Builds the policy, validating its parameters.
    pub fn build(&self) -> Result<Box<dyn Policy>, SimError> {
        let policy: Box<dyn Policy> = match self {
            PolicySpec::Random { trade_chance } => Box::new(RandomAgent::new(to_f64(*trade_chance)?)?),
            PolicySpec::LongLouie {
                trade_chance,
                risk_threshold,
            } => Box::new(LongLouie::new(to_f64(*trade_chance)?, to_f64(*risk_threshold)?)?),
            PolicySpec::ShortSally {
                trade_chance,
                risk_threshold,
            } => Box::new(ShortSally::new(to_f64(*trade_chance)?, to_f64(*risk_threshold)?)?),
            PolicySpec::Arbitrage {
                trade_amount,
                high_fixed_rate_threshold,
                low_fixed_rate_threshold,
            } => Box::new(Arbitrage::new(
                to_f64(*trade_amount)?,
                to_f64(*high_fixed_rate_threshold)?,
                to_f64(*low_fixed_rate_threshold)?,
            )?),
        };
        Ok(policy)
    }
}

fn to_f64(value: Decimal) -> Result<f64, SimError> {
    value.to_f64().ok_or_else(|| SimError::InvalidConfig {
        reason: format!("{value} does not fit in an f64"),
    })
}

fn default_count() -> u32 {
    1
}

/// `count` agents running `policy`, each funded with `budget` base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    #[serde(flatten)]
    pub policy: PolicySpec,
    pub budget: Decimal,
    #[serde(default = "default_count")]
    pub count: u32,
}

/// Registers every agent a roster describes, in order, and returns their ids.
///
/// Nothing is registered if any entry fails to build.
pub fn register_roster(simulator: &mut Simulator, roster: &[AgentSpec]) -> Result<Vec<usize>, SimError> {
    let mut built = Vec::new();
    for spec in roster {
        let budget = to_f64(spec.budget)?;
        if !budget.is_finite() || budget <= 0.0 {
            return Err(SimError::InvalidConfig {
                reason: format!("agent budget must be positive, got {budget}"),
            });
        }
        for _ in 0..spec.count {
            built.push((spec.policy.build()?, budget));
        }
    }

    let mut ids = Vec::with_capacity(built.len());
    for (policy, budget) in built {
        ids.push(simulator.register_agent(policy, budget)?);
    }
    info!(agents = ids.len(), "registered roster");
    Ok(ids)
}
