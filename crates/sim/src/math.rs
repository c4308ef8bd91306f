//! Checked decimal arithmetic for the pricing models.
//!
//! Pricing internals run on [`Decimal`] so that the bonding-curve algebra keeps
//! 28 significant digits between the public `f64` boundary and the final cast.
//! Every operation is checked: overflow, division by zero or an argument
//! outside a function's domain surfaces as [`SimError::Precision`].

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, MathematicalOps};

use crate::error::SimError;

/// Smallest meaningful amount of any token (1e-18)
pub const WEI: f64 = 1e-18;

/// Magnitude below which a post-delta balance is treated as floating-point dust
pub const DUST: f64 = 1e-9;

pub fn add(a: Decimal, b: Decimal) -> Result<Decimal, SimError> {
    a.checked_add(b).ok_or(SimError::Precision { operation: "add" })
}

pub fn sub(a: Decimal, b: Decimal) -> Result<Decimal, SimError> {
    a.checked_sub(b).ok_or(SimError::Precision { operation: "sub" })
}

pub fn mul(a: Decimal, b: Decimal) -> Result<Decimal, SimError> {
    a.checked_mul(b).ok_or(SimError::Precision { operation: "mul" })
}

pub fn div(a: Decimal, b: Decimal) -> Result<Decimal, SimError> {
    a.checked_div(b).ok_or(SimError::Precision { operation: "div" })
}

/// Converts a public `f64` into the pricing decimal.
///
/// Non-finite inputs are malformed requests; finite values too large for a
/// decimal are a precision failure.
pub fn to_decimal(value: f64) -> Result<Decimal, SimError> {
    if !value.is_finite() {
        return Err(SimError::invalid_input(format!("non-finite value {value}")));
    }
    Decimal::from_f64(value).ok_or(SimError::Precision {
        operation: "to_decimal",
    })
}

/// Converts a pricing decimal back to the public `f64`. This is the only lossy step.
pub fn to_f64(value: Decimal) -> Result<f64, SimError> {
    value
        .to_f64()
        .ok_or(SimError::Precision { operation: "to_f64" })
}

/// Computes base^exponent for a non-negative base.
///
/// Integer exponents multiply exactly; fractional ones go through
/// e^(exponent * ln(base)) at extended precision.
pub fn pow(base: Decimal, exponent: Decimal) -> Result<Decimal, SimError> {
    if base.is_sign_negative() && !base.is_zero() {
        return Err(SimError::Precision { operation: "pow" });
    }
    if base.is_zero() && exponent.is_sign_negative() && !exponent.is_zero() {
        return Err(SimError::Precision { operation: "pow" });
    }
    base.checked_powd(exponent)
        .ok_or(SimError::Precision { operation: "pow" })
}

/// Snaps floating dust to exactly zero.
pub(crate) fn snap_dust(value: f64) -> f64 {
    if value.abs() < DUST {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn close(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
        (a - b).abs() <= tolerance
    }

    #[test]
    fn test_pow_integer_exponents_are_exact() {
        assert_eq!(pow(dec!(5), Decimal::ZERO).unwrap(), Decimal::ONE);
        assert_eq!(pow(dec!(2), dec!(10)).unwrap(), dec!(1024));
        assert_eq!(pow(dec!(2), dec!(-2)).unwrap(), dec!(0.25));
        assert_eq!(pow(dec!(1.05), Decimal::ONE).unwrap(), dec!(1.05));
    }

    #[test]
    fn test_pow_fractional_exponents() {
        assert_eq!(pow(Decimal::ZERO, dec!(0.5)).unwrap(), Decimal::ZERO);
        assert!(close(pow(dec!(4), dec!(0.5)).unwrap(), Decimal::TWO, Decimal::new(1, 24)));
        // 10^0.25 ≈ 1.7782794100389228012254211951
        assert!(close(
            pow(Decimal::TEN, dec!(0.25)).unwrap(),
            dec!(1.7782794100389228012254211951),
            Decimal::new(1, 22)
        ));
        // a stretched-time exponent against a large reserve product
        let base = dec!(123456789.5);
        let round_trip = pow(pow(base, dec!(0.95)).unwrap(), Decimal::ONE / dec!(0.95)).unwrap();
        assert!(close(round_trip, base, base * Decimal::new(1, 18)));
    }

    #[test]
    fn test_pow_outside_domain_is_precision_error() {
        assert!(matches!(pow(dec!(-2), dec!(0.5)), Err(SimError::Precision { operation: "pow" })));
        assert!(matches!(pow(Decimal::ZERO, dec!(-1)), Err(SimError::Precision { .. })));
        assert!(matches!(pow(dec!(10), dec!(100)), Err(SimError::Precision { .. })));
    }

    #[test]
    fn test_checked_division_by_zero() {
        assert!(matches!(
            div(Decimal::ONE, Decimal::ZERO),
            Err(SimError::Precision { operation: "div" })
        ));
    }

    #[test]
    fn test_to_decimal_rejects_non_finite() {
        assert!(matches!(to_decimal(f64::NAN), Err(SimError::InvalidInput { .. })));
        assert!(matches!(
            to_decimal(f64::INFINITY),
            Err(SimError::InvalidInput { .. })
        ));
        assert_eq!(to_f64(to_decimal(1.25).unwrap()).unwrap(), 1.25);
    }

    #[test]
    fn test_snap_dust() {
        assert_eq!(snap_dust(1e-12), 0.0);
        assert_eq!(snap_dust(-1e-12), 0.0);
        assert_eq!(snap_dust(0.5), 0.5);
    }
}
