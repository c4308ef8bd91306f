//! YieldSpace invariant pricing.
//!
//! For share reserves `z`, bond reserves `y`, share price `c`, initial share
//! price `u` and stretched time `t`, trades preserve
//!
//! ```text
//! k = (c/u)·(u·z)^(1−t) + (2y + c·z)^(1−t)
//! ```
//!
//! Buying bonds solves `k` for the new bond side, selling bonds solves it for
//! the new share side. Fees are a fraction of the discount between the trade's
//! face amount and its value at the spot price `p`: `(1/p − 1)·φ·c·Δz` when
//! base is given or received, `(1 − p)·φ·Δy` when bonds are.

use rust_decimal::Decimal;

use crate::error::SimError;
use crate::math::{add, div, mul, pow, sub, to_decimal};
use crate::pool::PoolFeeConfig;
use crate::pricing::{calc_spot_price_decimal, curve_fee, fee_rates, PoolReserves, RawTrade};
use crate::quantity::{Quantity, TokenType};
use crate::time::StretchedTime;

/// Decimal view of one pricing call's reserves and invariant
struct Curve {
    z: Decimal,
    y: Decimal,
    c: Decimal,
    u: Decimal,
    /// 1 - t
    exponent: Decimal,
    /// c / u
    scale: Decimal,
    /// 2y + c·z
    bond_side: Decimal,
    k: Decimal,
    spot_price: Decimal,
    curve_fee: Decimal,
    governance_fee: Decimal,
}

impl Curve {
    fn new(reserves: &PoolReserves, fees: &PoolFeeConfig, time: &StretchedTime) -> Result<Self, SimError> {
        let z = to_decimal(reserves.share_reserves)?;
        let y = to_decimal(reserves.bond_reserves)?;
        let c = to_decimal(reserves.share_price)?;
        let u = to_decimal(reserves.init_share_price)?;
        let exponent = sub(Decimal::ONE, to_decimal(time.stretched_time())?)?;
        let scale = div(c, u)?;
        let bond_side = add(mul(Decimal::TWO, y)?, mul(c, z)?)?;
        let k = add(
            mul(scale, pow(mul(u, z)?, exponent)?)?,
            pow(bond_side, exponent)?,
        )?;
        let (curve_fee, governance_fee) = fee_rates(fees)?;
        Ok(Self {
            z,
            y,
            c,
            u,
            exponent,
            scale,
            bond_side,
            k,
            spot_price: calc_spot_price_decimal(reserves, time)?,
            curve_fee,
            governance_fee,
        })
    }

    fn inverse_exponent(&self) -> Result<Decimal, SimError> {
        div(Decimal::ONE, self.exponent)
    }

    /// Bond side that keeps `k` when the share side becomes `shares`
    fn bond_side_for_shares(&self, shares: Decimal) -> Result<Decimal, SimError> {
        let remainder = sub(self.k, mul(self.scale, pow(mul(self.u, shares)?, self.exponent)?)?)?;
        if remainder <= Decimal::ZERO {
            return Err(SimError::insolvency("trade exhausts the bond side of the curve"));
        }
        pow(remainder, self.inverse_exponent()?)
    }

    /// Share side that keeps `k` when the bond side becomes `bond_side`
    fn shares_for_bond_side(&self, bond_side: Decimal) -> Result<Decimal, SimError> {
        let remainder = div(sub(self.k, pow(bond_side, self.exponent)?)?, self.scale)?;
        if remainder <= Decimal::ZERO {
            return Err(SimError::insolvency("trade exhausts the share side of the curve"));
        }
        div(pow(remainder, self.inverse_exponent()?)?, self.u)
    }

    /// (1/p − 1)·φ·amount, the fee on a base-denominated trade
    fn base_side_fee(&self, base: Decimal) -> Result<Decimal, SimError> {
        let discount = mul(sub(div(Decimal::ONE, self.spot_price)?, Decimal::ONE)?, base)?;
        curve_fee(discount, self.curve_fee)
    }

    /// (1 − p)·φ·amount, the fee on a bond-denominated trade
    fn bond_side_fee(&self, bonds: Decimal) -> Result<Decimal, SimError> {
        let discount = mul(sub(Decimal::ONE, self.spot_price)?, bonds)?;
        curve_fee(discount, self.curve_fee)
    }
}

/// Prices the input needed to receive `out`. Inputs must already be validated.
pub(crate) fn in_given_out(
    out: Quantity,
    reserves: &PoolReserves,
    fees: &PoolFeeConfig,
    time: &StretchedTime,
) -> Result<RawTrade, SimError> {
    let curve = Curve::new(reserves, fees, time)?;
    let amount = to_decimal(out.amount())?;
    match out.unit() {
        TokenType::Base => {
            // bonds in, base out
            let d_shares = div(amount, curve.c)?;
            let shares_after = sub(curve.z, d_shares)?;
            if shares_after <= Decimal::ZERO {
                return Err(SimError::insolvency(format!(
                    "{out} out exceeds the pool's share reserves"
                )));
            }
            let without_fee = sub(curve.bond_side_for_shares(shares_after)?, curve.bond_side)?;
            let without_fee_or_slippage = div(amount, curve.spot_price)?;
            let fee = curve.base_side_fee(amount)?;
            let with_fee = add(without_fee, fee)?;
            let gov_fee = mul(fee, curve.governance_fee)?;
            Ok(RawTrade {
                unit: TokenType::Pt,
                without_fee_or_slippage,
                without_fee,
                fee,
                with_fee,
                gov_fee,
                user_base: amount,
                user_bonds: -with_fee,
                market_base: -amount,
                market_bonds: sub(with_fee, gov_fee)?,
            })
        }
        TokenType::Pt => {
            // base in, bonds out
            if amount > curve.y {
                return Err(SimError::insolvency(format!(
                    "{out} out exceeds the pool's bond reserves"
                )));
            }
            let shares_after = curve.shares_for_bond_side(sub(curve.bond_side, amount)?)?;
            let without_fee = mul(sub(shares_after, curve.z)?, curve.c)?;
            let without_fee_or_slippage = mul(curve.spot_price, amount)?;
            let fee = curve.bond_side_fee(amount)?;
            let with_fee = add(without_fee, fee)?;
            let gov_fee = mul(fee, curve.governance_fee)?;
            Ok(RawTrade {
                unit: TokenType::Base,
                without_fee_or_slippage,
                without_fee,
                fee,
                with_fee,
                gov_fee,
                user_base: -with_fee,
                user_bonds: amount,
                market_base: sub(with_fee, gov_fee)?,
                market_bonds: -amount,
            })
        }
    }
}

/// Prices the output received for selling `input`. Inputs must already be validated.
pub(crate) fn out_given_in(
    input: Quantity,
    reserves: &PoolReserves,
    fees: &PoolFeeConfig,
    time: &StretchedTime,
) -> Result<RawTrade, SimError> {
    let curve = Curve::new(reserves, fees, time)?;
    let amount = to_decimal(input.amount())?;
    match input.unit() {
        TokenType::Base => {
            // base in, bonds out
            let shares_after = add(curve.z, div(amount, curve.c)?)?;
            let without_fee = sub(curve.bond_side, curve.bond_side_for_shares(shares_after)?)?;
            if without_fee > curve.y {
                return Err(SimError::insolvency(format!(
                    "{input} in would drain the pool's bond reserves"
                )));
            }
            let without_fee_or_slippage = div(amount, curve.spot_price)?;
            let fee = curve.base_side_fee(amount)?;
            let with_fee = sub(without_fee, fee)?;
            let gov_fee = mul(fee, curve.governance_fee)?;
            Ok(RawTrade {
                unit: TokenType::Pt,
                without_fee_or_slippage,
                without_fee,
                fee,
                with_fee,
                gov_fee,
                user_base: -amount,
                user_bonds: with_fee,
                market_base: amount,
                market_bonds: -add(with_fee, gov_fee)?,
            })
        }
        TokenType::Pt => {
            // bonds in, base out
            let shares_after = curve.shares_for_bond_side(add(curve.bond_side, amount)?)?;
            let without_fee = mul(sub(curve.z, shares_after)?, curve.c)?;
            if without_fee >= mul(curve.z, curve.c)? {
                return Err(SimError::insolvency(format!(
                    "{input} in would drain the pool's share reserves"
                )));
            }
            let without_fee_or_slippage = mul(curve.spot_price, amount)?;
            let fee = curve.bond_side_fee(amount)?;
            let with_fee = sub(without_fee, fee)?;
            let gov_fee = mul(fee, curve.governance_fee)?;
            Ok(RawTrade {
                unit: TokenType::Base,
                without_fee_or_slippage,
                without_fee,
                fee,
                with_fee,
                gov_fee,
                user_base: with_fee,
                user_bonds: -amount,
                market_base: -add(with_fee, gov_fee)?,
                market_bonds: amount,
            })
        }
    }
}
