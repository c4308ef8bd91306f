//! Time values: remaining time to maturity and the simulation clock.

use serde::Serialize;

use crate::error::SimError;

/// Calendar days in a year
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Numerator of the time-stretch heuristic
const TIME_STRETCH_NUMERATOR: f64 = 3.09396;

/// Denominator coefficient of the time-stretch heuristic (applied to APR in percent)
const TIME_STRETCH_COEFFICIENT: f64 = 0.02789;

/// Returns the time-stretch constant tuned for a target APR.
///
/// `apr` is a fraction (0.05 = 5%).
///
/// # Example
///
/// ```rust
/// use hyperdrive_rs_sim::time::calc_time_stretch;
///
/// let time_stretch = calc_time_stretch(0.05).unwrap();
/// assert!((time_stretch - 22.1869).abs() < 1e-3);
/// ```
pub fn calc_time_stretch(apr: f64) -> Result<f64, SimError> {
    if !apr.is_finite() || apr <= 0.0 {
        return Err(SimError::invalid_input(format!(
            "time stretch requires a positive APR, got {apr}"
        )));
    }
    Ok(TIME_STRETCH_NUMERATOR / (TIME_STRETCH_COEFFICIENT * apr * 100.0))
}

/// Remaining time to maturity for a position or trade.
///
/// Derived fields are recomputed from the three inputs on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StretchedTime {
    days: f64,
    time_stretch: f64,
    normalizing_constant: f64,
}

impl StretchedTime {
    /// Creates a time value, rejecting inputs whose stretched time falls outside [0, 1).
    pub fn new(days: f64, time_stretch: f64, normalizing_constant: f64) -> Result<Self, SimError> {
        if !days.is_finite() || days < 0.0 {
            return Err(SimError::invalid_input(format!(
                "days remaining must be non-negative, got {days}"
            )));
        }
        if !time_stretch.is_finite() || time_stretch <= 0.0 {
            return Err(SimError::invalid_input(format!(
                "time stretch must be positive, got {time_stretch}"
            )));
        }
        if !normalizing_constant.is_finite() || normalizing_constant <= 0.0 {
            return Err(SimError::invalid_input(format!(
                "normalizing constant must be positive, got {normalizing_constant}"
            )));
        }
        let time = Self {
            days,
            time_stretch,
            normalizing_constant,
        };
        let stretched = time.stretched_time();
        if !(0.0..1.0).contains(&stretched) {
            return Err(SimError::invalid_input(format!(
                "stretched time must be in [0, 1), got {stretched}"
            )));
        }
        Ok(time)
    }

    pub fn days(&self) -> f64 {
        self.days
    }

    pub fn time_stretch(&self) -> f64 {
        self.time_stretch
    }

    pub fn normalizing_constant(&self) -> f64 {
        self.normalizing_constant
    }

    /// Fraction of the term remaining: `days / normalizing_constant`
    pub fn normalized_time(&self) -> f64 {
        self.days / self.normalizing_constant
    }

    /// Curve exponent `t`: the normalized time divided by the time stretch
    pub fn stretched_time(&self) -> f64 {
        self.normalized_time() / self.time_stretch
    }

    /// Calendar years remaining, unaffected by the normalizing constant
    pub fn annualized_time(&self) -> f64 {
        self.days / DAYS_PER_YEAR
    }

    /// Same stretch and normalization, but covering the whole term
    pub fn full_term(&self) -> Self {
        Self {
            days: self.normalizing_constant,
            ..*self
        }
    }
}

/// The simulation clock: day index, block within the day and elapsed time.
///
/// Only the simulator advances it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimClock {
    day: u32,
    block_in_day: u32,
    blocks_per_day: u32,
    block_number: u64,
}

impl SimClock {
    pub fn new(blocks_per_day: u32) -> Result<Self, SimError> {
        if blocks_per_day == 0 {
            return Err(SimError::invalid_config("blocks per day must be positive"));
        }
        Ok(Self {
            day: 0,
            block_in_day: 0,
            blocks_per_day,
            block_number: 0,
        })
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn block_in_day(&self) -> u32 {
        self.block_in_day
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn blocks_per_day(&self) -> u32 {
        self.blocks_per_day
    }

    /// Elapsed days including the fraction of the current day
    pub fn elapsed_days(&self) -> f64 {
        f64::from(self.day) + f64::from(self.block_in_day) / f64::from(self.blocks_per_day)
    }

    /// Elapsed time as a fraction of a year
    pub fn elapsed_years(&self) -> f64 {
        self.elapsed_days() / DAYS_PER_YEAR
    }

    /// Length of one block as a fraction of a year
    pub fn time_step(&self) -> f64 {
        1.0 / (DAYS_PER_YEAR * f64::from(self.blocks_per_day))
    }

    /// Moves to the next block, rolling over into the next day.
    pub fn advance_block(&mut self) {
        self.block_number += 1;
        self.block_in_day += 1;
        if self.block_in_day == self.blocks_per_day {
            self.block_in_day = 0;
            self.day += 1;
        }
    }
}
