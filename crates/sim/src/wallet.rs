//! Agent wallets and the wallet half of a trade's deltas.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::SimError;
use crate::market::Market;
use crate::math::snap_dust;

/// Bonds bought at one maturity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Long {
    pub balance: f64,
}

/// Bonds sold short at one maturity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Short {
    pub balance: f64,
    /// Share price at the checkpoint the short was opened in
    pub open_share_price: f64,
}

/// Signed changes to a [`Wallet`].
///
/// For shorts, `open_share_price` is only read when the balance grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WalletDelta {
    pub d_base: f64,
    pub d_lp_tokens: f64,
    pub d_withdraw_shares: f64,
    pub d_fees_paid: f64,
    pub longs: BTreeMap<u32, Long>,
    pub shorts: BTreeMap<u32, Short>,
}

/// One agent's holdings.
#[derive(Debug, Clone, PartialEq)]
pub struct Wallet {
    address: usize,
    budget: f64,
    base: f64,
    lp_tokens: f64,
    withdraw_shares: f64,
    fees_paid: f64,
    longs: BTreeMap<u32, Long>,
    shorts: BTreeMap<u32, Short>,
}

impl Wallet {
    /// Creates a wallet funded with `budget` base.
    pub fn new(address: usize, budget: f64) -> Result<Self, SimError> {
        if !budget.is_finite() || budget < 0.0 {
            return Err(SimError::invalid_input(format!(
                "budget for agent {address} must be non-negative, got {budget}"
            )));
        }
        Ok(Self {
            address,
            budget,
            base: budget,
            lp_tokens: 0.0,
            withdraw_shares: 0.0,
            fees_paid: 0.0,
            longs: BTreeMap::new(),
            shorts: BTreeMap::new(),
        })
    }

    /// Applies `delta` atomically; zero-balance positions are dropped.
    ///
    /// Any balance left below zero is an [`SimError::InvariantViolation`] and
    /// leaves the wallet unchanged.
    pub fn apply_delta(&mut self, delta: &WalletDelta) -> Result<(), SimError> {
        let mut next = self.clone();
        next.base = snap_dust(next.base + delta.d_base);
        next.lp_tokens = snap_dust(next.lp_tokens + delta.d_lp_tokens);
        next.withdraw_shares = snap_dust(next.withdraw_shares + delta.d_withdraw_shares);
        next.fees_paid = snap_dust(next.fees_paid + delta.d_fees_paid);

        for (maturity, change) in &delta.longs {
            let long = next.longs.entry(*maturity).or_default();
            long.balance = snap_dust(long.balance + change.balance);
            if long.balance == 0.0 {
                next.longs.remove(maturity);
            }
        }
        for (maturity, change) in &delta.shorts {
            let short = next.shorts.entry(*maturity).or_default();
            let balance = snap_dust(short.balance + change.balance);
            if change.balance > 0.0 && balance > 0.0 {
                short.open_share_price = (short.open_share_price * short.balance
                    + change.open_share_price * change.balance)
                    / balance;
            }
            short.balance = balance;
            if short.balance == 0.0 {
                next.shorts.remove(maturity);
            }
        }

        next.validate()?;
        *self = next;
        Ok(())
    }

    fn validate(&self) -> Result<(), SimError> {
        for (field, value) in [
            ("base", self.base),
            ("lp_tokens", self.lp_tokens),
            ("withdraw_shares", self.withdraw_shares),
            ("fees_paid", self.fees_paid),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(self.violation(field.to_string(), value));
            }
        }
        for (maturity, long) in &self.longs {
            if !long.balance.is_finite() || long.balance < 0.0 {
                return Err(self.violation(format!("long at day {maturity}"), long.balance));
            }
        }
        for (maturity, short) in &self.shorts {
            if !short.balance.is_finite() || short.balance < 0.0 {
                return Err(self.violation(format!("short at day {maturity}"), short.balance));
            }
        }
        Ok(())
    }

    fn violation(&self, field: String, value: f64) -> SimError {
        SimError::InvariantViolation {
            field: format!("agent {} {field}", self.address),
            value,
        }
    }

    /// Fails with [`SimError::InsufficientBalance`] unless `required` base is available
    pub fn check_base(&self, required: f64) -> Result<(), SimError> {
        self.check(required, self.base, "base")
    }

    pub fn check_lp_tokens(&self, required: f64) -> Result<(), SimError> {
        self.check(required, self.lp_tokens, "lp tokens")
    }

    pub fn check_withdraw_shares(&self, required: f64) -> Result<(), SimError> {
        self.check(required, self.withdraw_shares, "withdraw shares")
    }

    /// Fails with [`SimError::PositionNotFound`] or [`SimError::InsufficientBalance`]
    pub fn check_long(&self, maturity: u32, bonds: f64) -> Result<(), SimError> {
        let long = self.longs.get(&maturity).ok_or(SimError::PositionNotFound {
            kind: "long",
            maturity,
        })?;
        self.check(bonds, long.balance, "long bonds")
    }

    pub fn check_short(&self, maturity: u32, bonds: f64) -> Result<(), SimError> {
        let short = self.shorts.get(&maturity).ok_or(SimError::PositionNotFound {
            kind: "short",
            maturity,
        })?;
        self.check(bonds, short.balance, "short bonds")
    }

    fn check(&self, required: f64, available: f64, asset: &'static str) -> Result<(), SimError> {
        if required > available {
            return Err(SimError::InsufficientBalance {
                agent: self.address,
                asset,
                required,
                available,
            });
        }
        Ok(())
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn lp_tokens(&self) -> f64 {
        self.lp_tokens
    }

    pub fn withdraw_shares(&self) -> f64 {
        self.withdraw_shares
    }

    pub fn fees_paid(&self) -> f64 {
        self.fees_paid
    }

    pub fn longs(&self) -> &BTreeMap<u32, Long> {
        &self.longs
    }

    pub fn shorts(&self) -> &BTreeMap<u32, Short> {
        &self.shorts
    }

    /// True when the wallet holds nothing but base
    pub fn is_flat(&self) -> bool {
        self.longs.is_empty()
            && self.shorts.is_empty()
            && self.lp_tokens == 0.0
            && self.withdraw_shares == 0.0
    }

    /// Marks the wallet to market.
    ///
    /// Each position is valued by pricing a hypothetical close against the
    /// current pool without mutating it; positions that cannot be priced are
    /// valued at zero.
    pub fn state(&self, market: &Market) -> WalletSnapshot {
        let long_value: f64 = self
            .longs
            .iter()
            .map(|(maturity, long)| {
                market
                    .preview_close_long(long.balance, *maturity)
                    .unwrap_or(0.0)
            })
            .sum();
        let short_value: f64 = self
            .shorts
            .iter()
            .map(|(maturity, short)| {
                market
                    .preview_close_short(short.balance, *maturity, short.open_share_price)
                    .unwrap_or(0.0)
            })
            .sum();
        let value = self.base
            + market.lp_token_value(self.lp_tokens)
            + market.withdraw_share_value(self.withdraw_shares)
            + long_value
            + short_value;

        WalletSnapshot {
            address: self.address,
            base: self.base,
            lp_tokens: self.lp_tokens,
            withdraw_shares: self.withdraw_shares,
            fees_paid: self.fees_paid,
            num_longs: self.longs.len(),
            num_shorts: self.shorts.len(),
            total_longs: self.longs.values().map(|long| long.balance).sum(),
            total_shorts: self.shorts.values().map(|short| short.balance).sum(),
            pnl: value - self.budget,
        }
    }
}

/// Serializable summary of a [`Wallet`] at one point in a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WalletSnapshot {
    pub address: usize,
    pub base: f64,
    pub lp_tokens: f64,
    pub withdraw_shares: f64,
    pub fees_paid: f64,
    pub num_longs: usize,
    pub num_shorts: usize,
    pub total_longs: f64,
    pub total_shorts: f64,
    /// Mark-to-market value minus the starting budget
    pub pnl: f64,
}
