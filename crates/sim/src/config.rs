//! Simulation configuration.
//!
//! A [`SimConfig`] is built once through [`SimConfigBuilder`], which checks
//! every field eagerly, and is immutable afterwards. Deserialization goes
//! through the same builder, so a config read from JSON is validated too.

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::market::MarketParams;
use crate::pool::PoolFeeConfig;
use crate::pricing::PricingModel;
use crate::time::calc_time_stretch;

/// Default target liquidity of the initial LP, in base
pub const DEFAULT_TARGET_LIQUIDITY: f64 = 1_000_000.0;

/// Default target fixed APR the pool opens at
pub const DEFAULT_TARGET_FIXED_APR: f64 = 0.1;

/// Default variable APR used for every trading day when no series is given
pub const DEFAULT_VARIABLE_APR: f64 = 0.05;

/// Validated parameters for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SimConfigBuilder")]
pub struct SimConfig {
    target_liquidity: f64,
    target_fixed_apr: f64,
    init_vault_age: f64,
    curve_fee: f64,
    flat_fee: f64,
    governance_fee: f64,
    num_position_days: u32,
    num_trading_days: u32,
    num_blocks_per_day: u32,
    variable_apr: Vec<f64>,
    init_share_price: f64,
    compound_variable_apr: bool,
    shuffle_users: bool,
    init_lp: bool,
    halt_on_trade_error: bool,
    random_seed: u64,
    pricing_model: PricingModel,
}

impl SimConfig {
    /// Starts a builder populated with the defaults.
    pub fn builder() -> SimConfigBuilder {
        SimConfigBuilder::new()
    }

    pub fn target_liquidity(&self) -> f64 {
        self.target_liquidity
    }

    pub fn target_fixed_apr(&self) -> f64 {
        self.target_fixed_apr
    }

    /// Age of the yield source when the pool opens, in years
    pub fn init_vault_age(&self) -> f64 {
        self.init_vault_age
    }

    pub fn num_position_days(&self) -> u32 {
        self.num_position_days
    }

    pub fn num_trading_days(&self) -> u32 {
        self.num_trading_days
    }

    pub fn num_blocks_per_day(&self) -> u32 {
        self.num_blocks_per_day
    }

    /// Total blocks in the run
    pub fn total_blocks(&self) -> u64 {
        u64::from(self.num_trading_days) * u64::from(self.num_blocks_per_day)
    }

    /// The full variable APR series, one value per trading day
    pub fn variable_apr(&self) -> &[f64] {
        &self.variable_apr
    }

    /// Variable APR for `day`, holding the last value past the end of the series
    pub fn variable_apr_on(&self, day: u32) -> f64 {
        let index = usize::try_from(day).unwrap_or(usize::MAX);
        self.variable_apr
            .get(index)
            .or_else(|| self.variable_apr.last())
            .copied()
            .unwrap_or(0.0)
    }

    pub fn init_share_price(&self) -> f64 {
        self.init_share_price
    }

    pub fn compound_variable_apr(&self) -> bool {
        self.compound_variable_apr
    }

    pub fn shuffle_users(&self) -> bool {
        self.shuffle_users
    }

    pub fn init_lp(&self) -> bool {
        self.init_lp
    }

    pub fn halt_on_trade_error(&self) -> bool {
        self.halt_on_trade_error
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn pricing_model(&self) -> PricingModel {
        self.pricing_model
    }

    pub fn fees(&self) -> Result<PoolFeeConfig, SimError> {
        PoolFeeConfig::new(self.curve_fee, self.flat_fee, self.governance_fee)
    }

    /// Time stretch tuned for the target fixed APR
    pub fn time_stretch(&self) -> Result<f64, SimError> {
        calc_time_stretch(self.target_fixed_apr)
    }

    /// Parameters for the market this config describes
    pub fn market_params(&self) -> Result<MarketParams, SimError> {
        Ok(MarketParams {
            position_days: self.num_position_days,
            time_stretch: self.time_stretch()?,
            fees: self.fees()?,
            init_share_price: self.init_share_price,
            variable_apr: self.variable_apr_on(0),
        })
    }
}

/// Builder for [`SimConfig`]. Unset fields take their documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfigBuilder {
    pub target_liquidity: f64,
    pub target_fixed_apr: f64,
    pub init_vault_age: f64,
    pub curve_fee: f64,
    pub flat_fee: f64,
    pub governance_fee: f64,
    pub num_position_days: u32,
    pub num_trading_days: u32,
    pub num_blocks_per_day: u32,
    /// Defaults to [`DEFAULT_VARIABLE_APR`] for every trading day
    pub variable_apr: Option<Vec<f64>>,
    /// Defaults to `(1 + variable_apr[0])^init_vault_age`
    pub init_share_price: Option<f64>,
    pub compound_variable_apr: bool,
    pub shuffle_users: bool,
    pub init_lp: bool,
    pub halt_on_trade_error: bool,
    pub random_seed: u64,
    pub pricing_model: PricingModel,
}

impl Default for SimConfigBuilder {
    fn default() -> Self {
        Self {
            target_liquidity: DEFAULT_TARGET_LIQUIDITY,
            target_fixed_apr: DEFAULT_TARGET_FIXED_APR,
            init_vault_age: 0.0,
            curve_fee: 0.05,
            flat_fee: 0.05,
            governance_fee: 0.0,
            num_position_days: 90,
            num_trading_days: 3,
            num_blocks_per_day: 3,
            variable_apr: None,
            init_share_price: None,
            compound_variable_apr: true,
            shuffle_users: true,
            init_lp: true,
            halt_on_trade_error: false,
            random_seed: 1,
            pricing_model: PricingModel::Hyperdrive,
        }
    }
}

impl SimConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target_liquidity(mut self, target_liquidity: f64) -> Self {
        self.target_liquidity = target_liquidity;
        self
    }

    pub fn with_target_fixed_apr(mut self, target_fixed_apr: f64) -> Self {
        self.target_fixed_apr = target_fixed_apr;
        self
    }

    pub fn with_init_vault_age(mut self, years: f64) -> Self {
        self.init_vault_age = years;
        self
    }

    /// Set the curve, flat and governance fee rates.
    pub fn with_fees(mut self, curve_fee: f64, flat_fee: f64, governance_fee: f64) -> Self {
        self.curve_fee = curve_fee;
        self.flat_fee = flat_fee;
        self.governance_fee = governance_fee;
        self
    }

    pub fn with_num_position_days(mut self, days: u32) -> Self {
        self.num_position_days = days;
        self
    }

    pub fn with_num_trading_days(mut self, days: u32) -> Self {
        self.num_trading_days = days;
        self
    }

    pub fn with_num_blocks_per_day(mut self, blocks: u32) -> Self {
        self.num_blocks_per_day = blocks;
        self
    }

    /// Set the variable APR series; its length must match the trading days.
    pub fn with_variable_apr(mut self, series: Vec<f64>) -> Self {
        self.variable_apr = Some(series);
        self
    }

    pub fn with_init_share_price(mut self, share_price: f64) -> Self {
        self.init_share_price = Some(share_price);
        self
    }

    pub fn with_compound_variable_apr(mut self, compound: bool) -> Self {
        self.compound_variable_apr = compound;
        self
    }

    pub fn with_shuffle_users(mut self, shuffle: bool) -> Self {
        self.shuffle_users = shuffle;
        self
    }

    pub fn with_init_lp(mut self, init_lp: bool) -> Self {
        self.init_lp = init_lp;
        self
    }

    /// Abort the run on the first failed trade instead of skipping it.
    pub fn with_halt_on_trade_error(mut self, halt: bool) -> Self {
        self.halt_on_trade_error = halt;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_pricing_model(mut self, pricing_model: PricingModel) -> Self {
        self.pricing_model = pricing_model;
        self
    }

    /// Validates every field and freezes the config.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidConfig`] naming the first offending field.
    pub fn build(self) -> Result<SimConfig, SimError> {
        if !self.target_liquidity.is_finite() || self.target_liquidity <= 0.0 {
            return Err(SimError::invalid_config(format!(
                "target liquidity must be positive, got {}",
                self.target_liquidity
            )));
        }
        if !self.target_fixed_apr.is_finite() || self.target_fixed_apr <= 0.0 {
            return Err(SimError::invalid_config(format!(
                "target fixed APR must be positive, got {}",
                self.target_fixed_apr
            )));
        }
        if !self.init_vault_age.is_finite() || self.init_vault_age < 0.0 {
            return Err(SimError::invalid_config(format!(
                "initial vault age must be non-negative, got {}",
                self.init_vault_age
            )));
        }
        PoolFeeConfig::new(self.curve_fee, self.flat_fee, self.governance_fee)
            .map_err(|err| SimError::invalid_config(err.to_string()))?;
        for (name, value) in [
            ("position days", self.num_position_days),
            ("trading days", self.num_trading_days),
            ("blocks per day", self.num_blocks_per_day),
        ] {
            if value == 0 {
                return Err(SimError::invalid_config(format!("{name} must be positive")));
            }
        }

        let trading_days = usize::try_from(self.num_trading_days)
            .map_err(|_| SimError::invalid_config("trading days do not fit in memory"))?;
        let variable_apr = self
            .variable_apr
            .unwrap_or_else(|| vec![DEFAULT_VARIABLE_APR; trading_days]);
        if variable_apr.len() != trading_days {
            return Err(SimError::invalid_config(format!(
                "variable APR series has {} values for {} trading days",
                variable_apr.len(),
                trading_days
            )));
        }
        if let Some(bad) = variable_apr.iter().find(|apr| !apr.is_finite() || **apr < 0.0) {
            return Err(SimError::invalid_config(format!(
                "variable APR values must be finite and non-negative, got {bad}"
            )));
        }

        let first_apr = variable_apr.first().copied().unwrap_or(DEFAULT_VARIABLE_APR);
        let init_share_price = self
            .init_share_price
            .unwrap_or_else(|| (1.0 + first_apr).powf(self.init_vault_age));
        if !init_share_price.is_finite() || init_share_price < 1.0 {
            return Err(SimError::invalid_config(format!(
                "initial share price must be at least 1, got {init_share_price}"
            )));
        }
        calc_time_stretch(self.target_fixed_apr)
            .map_err(|err| SimError::invalid_config(err.to_string()))?;

        Ok(SimConfig {
            target_liquidity: self.target_liquidity,
            target_fixed_apr: self.target_fixed_apr,
            init_vault_age: self.init_vault_age,
            curve_fee: self.curve_fee,
            flat_fee: self.flat_fee,
            governance_fee: self.governance_fee,
            num_position_days: self.num_position_days,
            num_trading_days: self.num_trading_days,
            num_blocks_per_day: self.num_blocks_per_day,
            variable_apr,
            init_share_price,
            compound_variable_apr: self.compound_variable_apr,
            shuffle_users: self.shuffle_users,
            init_lp: self.init_lp,
            halt_on_trade_error: self.halt_on_trade_error,
            random_seed: self.random_seed,
            pricing_model: self.pricing_model,
        })
    }
}

impl TryFrom<SimConfigBuilder> for SimConfig {
    type Error = SimError;

    fn try_from(builder: SimConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimConfig::builder().build().unwrap();
        assert_eq!(config.target_liquidity(), 1_000_000.0);
        assert_eq!(config.target_fixed_apr(), 0.1);
        assert_eq!(config.variable_apr(), &[0.05, 0.05, 0.05]);
        assert_eq!(config.init_share_price(), 1.0);
        assert_eq!(config.total_blocks(), 9);
        assert_eq!(config.pricing_model(), PricingModel::Hyperdrive);
        assert!(config.shuffle_users());
        assert!(!config.halt_on_trade_error());
    }

    #[test]
    fn test_variable_apr_length_must_match_trading_days() {
        let result = SimConfig::builder()
            .with_num_trading_days(4)
            .with_variable_apr(vec![0.05; 3])
            .build();
        assert!(matches!(result, Err(SimError::InvalidConfig { .. })));
    }

    #[test]
    fn test_rejects_negative_variable_apr() {
        let result = SimConfig::builder()
            .with_variable_apr(vec![0.05, -0.01, 0.05])
            .build();
        assert!(matches!(result, Err(SimError::InvalidConfig { .. })));
    }

    #[test]
    fn test_rejects_bad_fees_and_counts() {
        assert!(SimConfig::builder().with_fees(1.1, 0.0, 0.0).build().is_err());
        assert!(SimConfig::builder().with_num_blocks_per_day(0).build().is_err());
        assert!(SimConfig::builder().with_target_fixed_apr(0.0).build().is_err());
        assert!(SimConfig::builder().with_init_share_price(0.9).build().is_err());
    }

    #[test]
    fn test_init_share_price_from_vault_age() {
        let config = SimConfig::builder()
            .with_init_vault_age(2.0)
            .with_variable_apr(vec![0.1; 3])
            .build()
            .unwrap();
        assert!((config.init_share_price() - 1.21).abs() < 1e-12);
    }

    #[test]
    fn test_variable_apr_holds_last_value() {
        let config = SimConfig::builder()
            .with_variable_apr(vec![0.01, 0.02, 0.03])
            .build()
            .unwrap();
        assert_eq!(config.variable_apr_on(1), 0.02);
        assert_eq!(config.variable_apr_on(10), 0.03);
    }

    #[test]
    fn test_deserialization_validates() {
        let config = SimConfig::builder().with_random_seed(7).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let bad = r#"{"num_trading_days": 2, "variable_apr": [0.05]}"#;
        assert!(serde_json::from_str::<SimConfig>(bad).is_err());
        let partial: SimConfig = serde_json::from_str(r#"{"random_seed": 9}"#).unwrap();
        assert_eq!(partial.random_seed(), 9);
    }
}
