//! Hyperdrive pricing: a flat 1:1 leg plus a YieldSpace curve leg.
//!
//! A trade of size `X` whose maturity is a fraction `t*` of the term away is
//! split into a flat part `X·(1 − t*)` redeemed 1:1 without fees and a curve
//! part `X·t*` priced by YieldSpace over the full term. The flat part is
//! applied to a copy of the reserves before the curve leg is priced, and every
//! result field is the sum of both legs. Only the curve leg moves bond
//! reserves.

use rust_decimal::Decimal;

use crate::error::SimError;
use crate::math::{add, div, mul, sub, to_decimal, to_f64, WEI};
use crate::pool::PoolFeeConfig;
use crate::pricing::{yieldspace, PoolReserves, RawTrade};
use crate::quantity::{Quantity, TokenType};
use crate::time::StretchedTime;

/// Amounts of a trade split between its flat and curve legs
struct Split {
    amount: Decimal,
    flat: Decimal,
    curve: Decimal,
}

impl Split {
    fn new(quantity: Quantity, time: &StretchedTime) -> Result<Self, SimError> {
        let amount = to_decimal(quantity.amount())?;
        let curve_portion = to_decimal(time.normalized_time())?;
        let curve = mul(amount, curve_portion)?;
        Ok(Self {
            amount,
            flat: sub(amount, curve)?,
            curve,
        })
    }

    /// Reserves after redeeming the flat leg, with shares and bonds moving in the given directions
    fn shifted_reserves(
        &self,
        reserves: &PoolReserves,
        shares_sign: Decimal,
    ) -> Result<PoolReserves, SimError> {
        let d_shares = mul(shares_sign, div(self.flat, to_decimal(reserves.share_price)?)?)?;
        let d_bonds = mul(-shares_sign, self.flat)?;
        let share_reserves = to_f64(add(to_decimal(reserves.share_reserves)?, d_shares)?)?;
        let bond_reserves = to_f64(add(to_decimal(reserves.bond_reserves)?, d_bonds)?)?;
        if share_reserves <= 0.0 || bond_reserves < 0.0 {
            return Err(SimError::insolvency(
                "flat redemption exceeds the pool's reserves",
            ));
        }
        Ok(PoolReserves {
            share_reserves,
            bond_reserves,
            ..*reserves
        })
    }

    /// Prices the curve leg, or nothing when the position has matured
    fn price_curve<F>(&self, unit: TokenType, price: F) -> Result<RawTrade, SimError>
    where
        F: FnOnce(Quantity) -> Result<RawTrade, SimError>,
    {
        let curve = to_f64(self.curve)?;
        if curve < WEI {
            return Ok(RawTrade::zero(unit.counterpart()));
        }
        price(Quantity::new(curve, unit))
    }
}

/// Sums the flat leg into the curve leg's breakdown
fn combine(
    split: &Split,
    curve: RawTrade,
    given: TokenType,
    user_pays_given: bool,
    market_base_flat: Decimal,
) -> Result<RawTrade, SimError> {
    let with_fee = add(split.flat, curve.with_fee)?;
    let (user_base, user_bonds) = match (given, user_pays_given) {
        // base given in, bonds received
        (TokenType::Base, true) => (-split.amount, with_fee),
        // bonds given in, base received
        (TokenType::Pt, true) => (with_fee, -split.amount),
        // base received, bonds paid
        (TokenType::Base, false) => (split.amount, -with_fee),
        // bonds received, base paid
        (TokenType::Pt, false) => (-with_fee, split.amount),
    };
    Ok(RawTrade {
        unit: given.counterpart(),
        without_fee_or_slippage: add(split.flat, curve.without_fee_or_slippage)?,
        without_fee: add(split.flat, curve.without_fee)?,
        fee: curve.fee,
        with_fee,
        gov_fee: curve.gov_fee,
        user_base,
        user_bonds,
        market_base: add(market_base_flat, curve.market_base)?,
        market_bonds: curve.market_bonds,
    })
}

pub(crate) fn in_given_out(
    out: Quantity,
    reserves: &PoolReserves,
    fees: &PoolFeeConfig,
    time: &StretchedTime,
) -> Result<RawTrade, SimError> {
    let split = Split::new(out, time)?;
    let full_term = time.full_term();
    match out.unit() {
        TokenType::Base => {
            // matured bonds are burned for base
            let shifted = split.shifted_reserves(reserves, -Decimal::ONE)?;
            let curve = split.price_curve(TokenType::Base, |q| {
                yieldspace::in_given_out(q, &shifted, fees, &full_term)
            })?;
            combine(&split, curve, TokenType::Base, false, -split.flat)
        }
        TokenType::Pt => {
            // base buys bonds minted at face value
            let shifted = split.shifted_reserves(reserves, Decimal::ONE)?;
            let curve = split.price_curve(TokenType::Pt, |q| {
                yieldspace::in_given_out(q, &shifted, fees, &full_term)
            })?;
            combine(&split, curve, TokenType::Pt, false, split.flat)
        }
    }
}

pub(crate) fn out_given_in(
    input: Quantity,
    reserves: &PoolReserves,
    fees: &PoolFeeConfig,
    time: &StretchedTime,
) -> Result<RawTrade, SimError> {
    let split = Split::new(input, time)?;
    let full_term = time.full_term();
    match input.unit() {
        TokenType::Base => {
            let shifted = split.shifted_reserves(reserves, Decimal::ONE)?;
            let curve = split.price_curve(TokenType::Base, |q| {
                yieldspace::out_given_in(q, &shifted, fees, &full_term)
            })?;
            combine(&split, curve, TokenType::Base, true, split.flat)
        }
        TokenType::Pt => {
            let shifted = split.shifted_reserves(reserves, -Decimal::ONE)?;
            let curve = split.price_curve(TokenType::Pt, |q| {
                yieldspace::out_given_in(q, &shifted, fees, &full_term)
            })?;
            combine(&split, curve, TokenType::Pt, true, -split.flat)
        }
    }
}
