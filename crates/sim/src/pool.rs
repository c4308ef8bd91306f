//! Pool state, fee schedule and atomic delta application.
//!
//! [`PoolState`] owns the reserves and exposes a single mutating entry point,
//! [`PoolState::apply_delta`]. A delta is staged on a copy, dust is snapped to
//! zero, every invariant is re-checked, and only then is the copy swapped in,
//! so a rejected delta leaves the pool untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::SimError;
use crate::math::{snap_dust, DUST};
use crate::pricing::{calc_apr_from_reserves, calc_spot_price_from_reserves, PoolReserves};
use crate::time::{StretchedTime, DAYS_PER_YEAR};

/// Fee schedule, every rate in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolFeeConfig {
    curve_fee: f64,
    flat_fee: f64,
    governance_fee: f64,
}

impl PoolFeeConfig {
    pub fn new(curve_fee: f64, flat_fee: f64, governance_fee: f64) -> Result<Self, SimError> {
        let fees = Self {
            curve_fee,
            flat_fee,
            governance_fee,
        };
        fees.validate()?;
        Ok(fees)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        for (name, rate) in [
            ("curve fee", self.curve_fee),
            ("flat fee", self.flat_fee),
            ("governance fee", self.governance_fee),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(SimError::invalid_input(format!(
                    "{name} must be in [0, 1], got {rate}"
                )));
            }
        }
        Ok(())
    }

    /// Fee rate applied to the curve discount
    pub fn curve_fee(&self) -> f64 {
        self.curve_fee
    }

    /// Fee rate for the flat leg; carried for reporting, the flat leg is priced fee-free
    pub fn flat_fee(&self) -> f64 {
        self.flat_fee
    }

    /// Share of collected fees owed to governance
    pub fn governance_fee(&self) -> f64 {
        self.governance_fee
    }
}

/// Aggregate of positions sharing a maturity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PositionBucket {
    /// Bonds outstanding
    pub bonds: f64,
    /// Base exchanged when the positions were opened
    pub base_volume: f64,
}

/// Signed changes to a [`PoolState`], applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolDelta {
    pub d_share_reserves: f64,
    pub d_bond_reserves: f64,
    pub d_base_buffer: f64,
    pub d_bond_buffer: f64,
    pub d_lp_total_supply: f64,
    pub d_share_price: f64,
    pub d_gov_fees_accrued: f64,
    pub d_longs_outstanding: f64,
    pub d_shorts_outstanding: f64,
    pub d_long_average_maturity: f64,
    pub d_short_average_maturity: f64,
    pub d_long_base_volume: f64,
    pub d_short_base_volume: f64,
    pub d_withdraw_shares: f64,
    pub d_withdraw_shares_ready: f64,
    pub d_withdraw_capital: f64,
    /// Per-maturity long deltas
    pub long_buckets: BTreeMap<u32, PositionBucket>,
    /// Per-maturity short deltas
    pub short_buckets: BTreeMap<u32, PositionBucket>,
    /// New checkpoint `(day, share_price)`
    pub checkpoint: Option<(u32, f64)>,
    /// Replacement variable APR
    pub variable_apr: Option<f64>,
}

/// The pool's reserves, buffers and position accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolState {
    share_reserves: f64,
    bond_reserves: f64,
    base_buffer: f64,
    bond_buffer: f64,
    lp_total_supply: f64,
    share_price: f64,
    init_share_price: f64,
    variable_apr: f64,
    fees: PoolFeeConfig,
    gov_fees_accrued: f64,
    longs_outstanding: f64,
    shorts_outstanding: f64,
    long_average_maturity: f64,
    short_average_maturity: f64,
    long_base_volume: f64,
    short_base_volume: f64,
    long_buckets: BTreeMap<u32, PositionBucket>,
    short_buckets: BTreeMap<u32, PositionBucket>,
    checkpoints: BTreeMap<u32, f64>,
    withdraw_shares: f64,
    withdraw_shares_ready: f64,
    withdraw_capital: f64,
}

impl PoolState {
    /// Creates an empty, unseeded pool.
    pub fn new(
        share_price: f64,
        init_share_price: f64,
        variable_apr: f64,
        fees: PoolFeeConfig,
    ) -> Result<Self, SimError> {
        fees.validate()?;
        let state = Self {
            share_reserves: 0.0,
            bond_reserves: 0.0,
            base_buffer: 0.0,
            bond_buffer: 0.0,
            lp_total_supply: 0.0,
            share_price,
            init_share_price,
            variable_apr,
            fees,
            gov_fees_accrued: 0.0,
            longs_outstanding: 0.0,
            shorts_outstanding: 0.0,
            long_average_maturity: 0.0,
            short_average_maturity: 0.0,
            long_base_volume: 0.0,
            short_base_volume: 0.0,
            long_buckets: BTreeMap::new(),
            short_buckets: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
            withdraw_shares: 0.0,
            withdraw_shares_ready: 0.0,
            withdraw_capital: 0.0,
        };
        state.validate()?;
        Ok(state)
    }

    /// Applies `delta` atomically.
    ///
    /// # Errors
    ///
    /// - [`SimError::PoolInsolvency`] if reserves would go negative or could
    ///   no longer cover either buffer
    /// - [`SimError::InvariantViolation`] for any other broken invariant
    ///
    /// The pool is unchanged when an error is returned.
    pub fn apply_delta(&mut self, delta: &PoolDelta) -> Result<(), SimError> {
        let mut next = self.clone();
        next.share_reserves += delta.d_share_reserves;
        next.bond_reserves += delta.d_bond_reserves;
        next.base_buffer += delta.d_base_buffer;
        next.bond_buffer += delta.d_bond_buffer;
        next.lp_total_supply += delta.d_lp_total_supply;
        next.share_price += delta.d_share_price;
        next.gov_fees_accrued += delta.d_gov_fees_accrued;
        next.longs_outstanding += delta.d_longs_outstanding;
        next.shorts_outstanding += delta.d_shorts_outstanding;
        next.long_average_maturity += delta.d_long_average_maturity;
        next.short_average_maturity += delta.d_short_average_maturity;
        next.long_base_volume += delta.d_long_base_volume;
        next.short_base_volume += delta.d_short_base_volume;
        next.withdraw_shares += delta.d_withdraw_shares;
        next.withdraw_shares_ready += delta.d_withdraw_shares_ready;
        next.withdraw_capital += delta.d_withdraw_capital;
        merge_buckets(&mut next.long_buckets, &delta.long_buckets);
        merge_buckets(&mut next.short_buckets, &delta.short_buckets);
        if let Some((day, share_price)) = delta.checkpoint {
            next.checkpoints.entry(day).or_insert(share_price);
        }
        if let Some(variable_apr) = delta.variable_apr {
            next.variable_apr = variable_apr;
        }

        next.snap_dust();
        next.validate()?;
        trace!(
            share_reserves = next.share_reserves,
            bond_reserves = next.bond_reserves,
            share_price = next.share_price,
            "applied pool delta"
        );
        *self = next;
        Ok(())
    }

    /// Delta for one day of yield accrual plus the checkpoint for `day`.
    ///
    /// The share price grows by `variable_apr / 365` of either the current
    /// share price (compounding) or the initial share price (simple).
    pub fn accrue_delta(&self, variable_apr: f64, compound: bool, day: u32) -> PoolDelta {
        let basis = if compound {
            self.share_price
        } else {
            self.init_share_price
        };
        let d_share_price = variable_apr / DAYS_PER_YEAR * basis;
        PoolDelta {
            d_share_price,
            checkpoint: Some((day, self.share_price + d_share_price)),
            variable_apr: Some(variable_apr),
            ..PoolDelta::default()
        }
    }

    fn snap_dust(&mut self) {
        for value in [
            &mut self.share_reserves,
            &mut self.bond_reserves,
            &mut self.base_buffer,
            &mut self.bond_buffer,
            &mut self.lp_total_supply,
            &mut self.gov_fees_accrued,
            &mut self.longs_outstanding,
            &mut self.shorts_outstanding,
            &mut self.long_average_maturity,
            &mut self.short_average_maturity,
            &mut self.long_base_volume,
            &mut self.short_base_volume,
            &mut self.withdraw_shares,
            &mut self.withdraw_shares_ready,
            &mut self.withdraw_capital,
        ] {
            *value = snap_dust(*value);
        }
        if self.longs_outstanding == 0.0 {
            self.long_average_maturity = 0.0;
        }
        if self.shorts_outstanding == 0.0 {
            self.short_average_maturity = 0.0;
        }
    }

    fn validate(&self) -> Result<(), SimError> {
        let scalars = [
            ("share_reserves", self.share_reserves),
            ("bond_reserves", self.bond_reserves),
            ("base_buffer", self.base_buffer),
            ("bond_buffer", self.bond_buffer),
            ("lp_total_supply", self.lp_total_supply),
            ("gov_fees_accrued", self.gov_fees_accrued),
            ("longs_outstanding", self.longs_outstanding),
            ("shorts_outstanding", self.shorts_outstanding),
            ("long_average_maturity", self.long_average_maturity),
            ("short_average_maturity", self.short_average_maturity),
            ("long_base_volume", self.long_base_volume),
            ("short_base_volume", self.short_base_volume),
            ("withdraw_shares", self.withdraw_shares),
            ("withdraw_shares_ready", self.withdraw_shares_ready),
            ("withdraw_capital", self.withdraw_capital),
        ];
        for (field, value) in scalars {
            if !value.is_finite() {
                return Err(SimError::InvariantViolation {
                    field: field.to_string(),
                    value,
                });
            }
        }

        if self.share_reserves < 0.0 || (self.lp_total_supply > 0.0 && self.share_reserves == 0.0) {
            return Err(SimError::insolvency(format!(
                "share reserves would become {}",
                self.share_reserves
            )));
        }
        if self.bond_reserves < 0.0 {
            return Err(SimError::insolvency(format!(
                "bond reserves would become {}",
                self.bond_reserves
            )));
        }
        if self.share_reserves * self.share_price + DUST < self.base_buffer {
            return Err(SimError::insolvency(format!(
                "share reserves worth {} cannot cover a base buffer of {}",
                self.share_reserves * self.share_price,
                self.base_buffer
            )));
        }
        if self.bond_reserves + DUST < self.bond_buffer {
            return Err(SimError::insolvency(format!(
                "bond reserves {} cannot cover a bond buffer of {}",
                self.bond_reserves, self.bond_buffer
            )));
        }

        for (field, value) in scalars {
            if value < 0.0 {
                return Err(SimError::InvariantViolation {
                    field: field.to_string(),
                    value,
                });
            }
        }
        for (kind, buckets) in [("long", &self.long_buckets), ("short", &self.short_buckets)] {
            for (maturity, bucket) in buckets {
                if bucket.bonds < 0.0 || bucket.base_volume < -DUST {
                    return Err(SimError::InvariantViolation {
                        field: format!("{kind} bucket at day {maturity}"),
                        value: bucket.bonds.min(bucket.base_volume),
                    });
                }
            }
        }
        if !self.init_share_price.is_finite() || self.init_share_price < 1.0 {
            return Err(SimError::InvariantViolation {
                field: "init_share_price".to_string(),
                value: self.init_share_price,
            });
        }
        if !self.share_price.is_finite() || self.share_price < self.init_share_price {
            return Err(SimError::InvariantViolation {
                field: "share_price".to_string(),
                value: self.share_price,
            });
        }
        if self.withdraw_shares_ready > self.withdraw_shares + DUST {
            return Err(SimError::InvariantViolation {
                field: "withdraw_shares_ready".to_string(),
                value: self.withdraw_shares_ready,
            });
        }
        Ok(())
    }

    // ==================== Derived quantities ====================

    /// Reserves snapshot for the pricing models
    pub fn reserves(&self) -> PoolReserves {
        PoolReserves::new(
            self.share_reserves,
            self.bond_reserves,
            self.share_price,
            self.init_share_price,
        )
        .with_buffers(self.base_buffer, self.bond_buffer)
    }

    /// Spot price over `time`, recomputed from current reserves
    pub fn spot_price(&self, time: &StretchedTime) -> Result<f64, SimError> {
        calc_spot_price_from_reserves(&self.reserves(), time)
    }

    /// Fixed APR over `time`, recomputed from current reserves
    pub fn fixed_apr(&self, time: &StretchedTime) -> Result<f64, SimError> {
        calc_apr_from_reserves(&self.reserves(), time)
    }

    /// Share reserves valued in base
    pub fn total_liquidity_in_base(&self) -> f64 {
        self.share_reserves * self.share_price
    }

    /// Share-denominated exposure of outstanding longs at `normalized_time` remaining
    pub fn long_adjustment(&self, normalized_time: f64) -> f64 {
        lp_allocation_adjustment(
            self.longs_outstanding,
            self.long_base_volume,
            normalized_time,
            self.share_price,
        )
    }

    /// Share-denominated exposure of outstanding shorts at `normalized_time` remaining
    pub fn short_adjustment(&self, normalized_time: f64) -> f64 {
        lp_allocation_adjustment(
            self.shorts_outstanding,
            self.short_base_volume,
            normalized_time,
            self.share_price,
        )
    }

    // ==================== Accessors ====================

    pub fn share_reserves(&self) -> f64 {
        self.share_reserves
    }

    pub fn bond_reserves(&self) -> f64 {
        self.bond_reserves
    }

    pub fn base_buffer(&self) -> f64 {
        self.base_buffer
    }

    pub fn bond_buffer(&self) -> f64 {
        self.bond_buffer
    }

    pub fn lp_total_supply(&self) -> f64 {
        self.lp_total_supply
    }

    pub fn share_price(&self) -> f64 {
        self.share_price
    }

    pub fn init_share_price(&self) -> f64 {
        self.init_share_price
    }

    pub fn variable_apr(&self) -> f64 {
        self.variable_apr
    }

    pub fn fees(&self) -> &PoolFeeConfig {
        &self.fees
    }

    pub fn gov_fees_accrued(&self) -> f64 {
        self.gov_fees_accrued
    }

    pub fn longs_outstanding(&self) -> f64 {
        self.longs_outstanding
    }

    pub fn shorts_outstanding(&self) -> f64 {
        self.shorts_outstanding
    }

    pub fn long_average_maturity(&self) -> f64 {
        self.long_average_maturity
    }

    pub fn short_average_maturity(&self) -> f64 {
        self.short_average_maturity
    }

    pub fn long_base_volume(&self) -> f64 {
        self.long_base_volume
    }

    pub fn short_base_volume(&self) -> f64 {
        self.short_base_volume
    }

    pub fn long_bucket(&self, maturity: u32) -> Option<&PositionBucket> {
        self.long_buckets.get(&maturity)
    }

    pub fn short_bucket(&self, maturity: u32) -> Option<&PositionBucket> {
        self.short_buckets.get(&maturity)
    }

    pub fn long_buckets(&self) -> &BTreeMap<u32, PositionBucket> {
        &self.long_buckets
    }

    pub fn short_buckets(&self) -> &BTreeMap<u32, PositionBucket> {
        &self.short_buckets
    }

    /// Share price recorded at the checkpoint for `day`
    pub fn checkpoint(&self, day: u32) -> Option<f64> {
        self.checkpoints.get(&day).copied()
    }

    pub fn checkpoints(&self) -> &BTreeMap<u32, f64> {
        &self.checkpoints
    }

    pub fn withdraw_shares(&self) -> f64 {
        self.withdraw_shares
    }

    pub fn withdraw_shares_ready(&self) -> f64 {
        self.withdraw_shares_ready
    }

    pub fn withdraw_capital(&self) -> f64 {
        self.withdraw_capital
    }

    /// Flat, serializable copy of the scalar fields
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            share_reserves: self.share_reserves,
            bond_reserves: self.bond_reserves,
            base_buffer: self.base_buffer,
            bond_buffer: self.bond_buffer,
            lp_total_supply: self.lp_total_supply,
            share_price: self.share_price,
            init_share_price: self.init_share_price,
            variable_apr: self.variable_apr,
            curve_fee: self.fees.curve_fee(),
            flat_fee: self.fees.flat_fee(),
            governance_fee: self.fees.governance_fee(),
            gov_fees_accrued: self.gov_fees_accrued,
            longs_outstanding: self.longs_outstanding,
            shorts_outstanding: self.shorts_outstanding,
            long_average_maturity: self.long_average_maturity,
            short_average_maturity: self.short_average_maturity,
            long_base_volume: self.long_base_volume,
            short_base_volume: self.short_base_volume,
            withdraw_shares: self.withdraw_shares,
            withdraw_shares_ready: self.withdraw_shares_ready,
            withdraw_capital: self.withdraw_capital,
            total_liquidity_in_base: self.total_liquidity_in_base(),
        }
    }
}

/// Serializable scalar view of a [`PoolState`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub share_reserves: f64,
    pub bond_reserves: f64,
    pub base_buffer: f64,
    pub bond_buffer: f64,
    pub lp_total_supply: f64,
    pub share_price: f64,
    pub init_share_price: f64,
    pub variable_apr: f64,
    pub curve_fee: f64,
    pub flat_fee: f64,
    pub governance_fee: f64,
    pub gov_fees_accrued: f64,
    pub longs_outstanding: f64,
    pub shorts_outstanding: f64,
    pub long_average_maturity: f64,
    pub short_average_maturity: f64,
    pub long_base_volume: f64,
    pub short_base_volume: f64,
    pub withdraw_shares: f64,
    pub withdraw_shares_ready: f64,
    pub withdraw_capital: f64,
    pub total_liquidity_in_base: f64,
}

fn merge_buckets(buckets: &mut BTreeMap<u32, PositionBucket>, deltas: &BTreeMap<u32, PositionBucket>) {
    for (maturity, delta) in deltas {
        let bucket = buckets.entry(*maturity).or_default();
        bucket.bonds = snap_dust(bucket.bonds + delta.bonds);
        bucket.base_volume = snap_dust(bucket.base_volume + delta.base_volume);
        if bucket.bonds == 0.0 {
            buckets.remove(maturity);
        }
    }
}

/// Share-denominated exposure `(t·base_volume + (1 − t)·outstanding) / c`
fn lp_allocation_adjustment(
    outstanding: f64,
    base_volume: f64,
    normalized_time: f64,
    share_price: f64,
) -> f64 {
    let t = normalized_time.clamp(0.0, 1.0);
    (t * base_volume + (1.0 - t) * outstanding) / share_price
}

/// Weighted average after adding or removing `delta_weight` at `value`.
///
/// Removing the whole weight resets the average to zero.
pub fn update_weighted_average(
    average: f64,
    total_weight: f64,
    value: f64,
    delta_weight: f64,
    is_adding: bool,
) -> f64 {
    if is_adding {
        let weight = total_weight + delta_weight;
        if weight <= 0.0 {
            return 0.0;
        }
        (average * total_weight + value * delta_weight) / weight
    } else {
        let weight = total_weight - delta_weight;
        if weight.abs() < DUST {
            return 0.0;
        }
        ((average * total_weight - value * delta_weight) / weight).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_pool() -> PoolState {
        let fees = PoolFeeConfig::new(0.05, 0.05, 0.1).unwrap();
        let mut pool = PoolState::new(1.0, 1.0, 0.05, fees).unwrap();
        pool.apply_delta(&PoolDelta {
            d_share_reserves: 1_000_000.0,
            d_bond_reserves: 150_000.0,
            d_lp_total_supply: 1_150_000.0,
            checkpoint: Some((0, 1.0)),
            ..PoolDelta::default()
        })
        .unwrap();
        pool
    }

    #[test]
    fn test_fee_config_rejects_out_of_range() {
        assert!(matches!(
            PoolFeeConfig::new(1.5, 0.0, 0.0),
            Err(SimError::InvalidInput { .. })
        ));
        assert!(PoolFeeConfig::new(0.0, -0.1, 0.0).is_err());
        assert!(PoolFeeConfig::new(0.0, 0.0, 1.0).is_ok());
    }

    #[test]
    fn test_apply_delta_updates_reserves() {
        let mut pool = create_test_pool();
        pool.apply_delta(&PoolDelta {
            d_share_reserves: 100.0,
            d_bond_reserves: -90.0,
            d_base_buffer: 90.0,
            d_longs_outstanding: 90.0,
            ..PoolDelta::default()
        })
        .unwrap();
        assert_eq!(pool.share_reserves(), 1_000_100.0);
        assert_eq!(pool.bond_reserves(), 149_910.0);
        assert_eq!(pool.longs_outstanding(), 90.0);
    }

    #[test]
    fn test_rejected_delta_is_not_partially_applied() {
        let mut pool = create_test_pool();
        let before = pool.clone();
        let result = pool.apply_delta(&PoolDelta {
            d_share_reserves: 50.0,
            d_bond_reserves: -200_000.0,
            ..PoolDelta::default()
        });
        assert!(matches!(result, Err(SimError::PoolInsolvency { .. })));
        assert_eq!(pool, before);
    }

    #[test]
    fn test_negative_counter_is_invariant_violation() {
        let mut pool = create_test_pool();
        let result = pool.apply_delta(&PoolDelta {
            d_longs_outstanding: -1.0,
            ..PoolDelta::default()
        });
        assert!(matches!(result, Err(SimError::InvariantViolation { .. })));
    }

    #[test]
    fn test_base_buffer_must_be_covered() {
        let mut pool = create_test_pool();
        let result = pool.apply_delta(&PoolDelta {
            d_base_buffer: 2_000_000.0,
            ..PoolDelta::default()
        });
        assert!(matches!(result, Err(SimError::PoolInsolvency { .. })));
    }

    #[test]
    fn test_dust_snaps_to_zero_and_buckets_are_removed() {
        let mut pool = create_test_pool();
        let mut open = PoolDelta {
            d_longs_outstanding: 0.3,
            d_base_buffer: 0.3,
            ..PoolDelta::default()
        };
        open.long_buckets.insert(
            90,
            PositionBucket {
                bonds: 0.1 + 0.2,
                base_volume: 0.29,
            },
        );
        pool.apply_delta(&open).unwrap();
        assert!(pool.long_bucket(90).is_some());

        let mut close = PoolDelta {
            d_longs_outstanding: -0.3,
            d_base_buffer: -0.3,
            ..PoolDelta::default()
        };
        close.long_buckets.insert(
            90,
            PositionBucket {
                bonds: -0.3,
                base_volume: -0.29,
            },
        );
        pool.apply_delta(&close).unwrap();
        assert!(pool.long_bucket(90).is_none());
        assert_eq!(pool.longs_outstanding(), 0.0);
    }

    #[test]
    fn test_accrual_compounds_on_current_price() {
        let mut pool = create_test_pool();
        let delta = pool.accrue_delta(0.365, true, 1);
        pool.apply_delta(&delta).unwrap();
        assert!((pool.share_price() - 1.001).abs() < 1e-12);
        let delta = pool.accrue_delta(0.365, true, 2);
        pool.apply_delta(&delta).unwrap();
        assert!((pool.share_price() - 1.001 * 1.001).abs() < 1e-12);
        assert_eq!(pool.checkpoint(2), Some(pool.share_price()));
    }

    #[test]
    fn test_simple_accrual_uses_initial_price() {
        let mut pool = create_test_pool();
        for day in 1..=2 {
            let delta = pool.accrue_delta(0.365, false, day);
            pool.apply_delta(&delta).unwrap();
        }
        assert!((pool.share_price() - 1.002).abs() < 1e-12);
        assert_eq!(pool.variable_apr(), 0.365);
    }

    #[test]
    fn test_negative_accrual_below_initial_price_is_rejected() {
        let mut pool = create_test_pool();
        let delta = pool.accrue_delta(-0.5, true, 1);
        assert!(matches!(
            pool.apply_delta(&delta),
            Err(SimError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_update_weighted_average() {
        let avg = update_weighted_average(0.0, 0.0, 90.0, 10.0, true);
        assert_eq!(avg, 90.0);
        let avg = update_weighted_average(avg, 10.0, 100.0, 10.0, true);
        assert_eq!(avg, 95.0);
        let avg = update_weighted_average(avg, 20.0, 100.0, 10.0, false);
        assert_eq!(avg, 90.0);
        assert_eq!(update_weighted_average(avg, 10.0, 90.0, 10.0, false), 0.0);
    }

    #[test]
    fn test_lp_adjustment_interpolates() {
        let pool = create_test_pool();
        assert_eq!(pool.long_adjustment(1.0), 0.0);
        assert_eq!(lp_allocation_adjustment(100.0, 95.0, 1.0, 1.0), 95.0);
        assert_eq!(lp_allocation_adjustment(100.0, 95.0, 0.0, 1.0), 100.0);
        assert_eq!(lp_allocation_adjustment(100.0, 95.0, 0.5, 2.0), 48.75);
    }
}
