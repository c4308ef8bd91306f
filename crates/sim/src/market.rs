//! Market transactions over a single [`PoolState`].
//!
//! This module implements the [`Market`] struct, the only writer of pool
//! state during a run.
//!
//! # Overview
//!
//! Every transaction follows the same protocol:
//! 1. Validate the request and the trader's balances
//! 2. Price it with the configured [`PricingModel`]
//! 3. Translate the [`TradeResult`] into a [`PoolDelta`] and a [`WalletDelta`]
//! 4. Apply the pool delta atomically (it may be rejected)
//! 5. Return both deltas so the caller can apply the wallet half
//!
//! Positions are bucketed by maturity day, `latest_checkpoint_day +
//! position_days`. Opening trades are priced over the full term; closing
//! trades over the days left until the bucket matures.
//!
//! # Key Operations
//!
//! - [`Market::open_long`] / [`Market::close_long`] - Fixed-rate lenders
//! - [`Market::open_short`] / [`Market::close_short`] - Variable-rate exposure
//! - [`Market::add_liquidity`] / [`Market::remove_liquidity`] - Liquidity providers
//! - [`Market::redeem_withdraw_shares`] - Claim margin freed for departed LPs
//! - [`Market::advance_day`] - Accrue yield and record a checkpoint
//!
//! # Example
//!
//! ```rust
//! use hyperdrive_rs_sim::{Market, MarketParams, PoolFeeConfig, PricingModel, Wallet};
//! use hyperdrive_rs_sim::time::calc_time_stretch;
//!
//! let params = MarketParams {
//!     position_days: 90,
//!     time_stretch: calc_time_stretch(0.05).unwrap(),
//!     fees: PoolFeeConfig::new(0.05, 0.05, 0.0).unwrap(),
//!     init_share_price: 1.0,
//!     variable_apr: 0.05,
//! };
//! let mut market = Market::new(PricingModel::Hyperdrive, params).unwrap();
//!
//! let mut lp = Wallet::new(0, 1_000_000.0).unwrap();
//! let (_, delta) = market.initialize(&lp, 1_000_000.0, 0.05).unwrap();
//! lp.apply_delta(&delta).unwrap();
//!
//! let mut trader = Wallet::new(1, 10_000.0).unwrap();
//! let before = market.fixed_apr().unwrap();
//! let (_, delta) = market.open_long(&trader, 10_000.0).unwrap();
//! trader.apply_delta(&delta).unwrap();
//! assert!(market.fixed_apr().unwrap() < before); // buying bonds pushes the rate down
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::{ActionType, TradeSpec};
use crate::error::SimError;
use crate::math::WEI;
use crate::pool::{update_weighted_average, PoolDelta, PoolFeeConfig, PoolState, PositionBucket};
use crate::pricing::{
    calc_liquidity, calc_lp_out_given_tokens_in, calc_tokens_out_given_lp_in, PricingModel,
    TradeResult,
};
use crate::quantity::{Quantity, TokenType};
use crate::time::{StretchedTime, DAYS_PER_YEAR};
use crate::wallet::{Long, Short, Wallet, WalletDelta};

/// Construction parameters for a [`Market`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketParams {
    /// Term of every position, in days
    pub position_days: u32,
    pub time_stretch: f64,
    pub fees: PoolFeeConfig,
    /// Share price of the yield source when the pool opens
    pub init_share_price: f64,
    /// Variable APR of the yield source when the pool opens
    pub variable_apr: f64,
}

/// A fixed-rate market over one yield source.
#[derive(Debug, Clone)]
pub struct Market {
    pricing_model: PricingModel,
    pool: PoolState,
    position_days: u32,
    /// Full term, normalized by itself
    position_duration: StretchedTime,
    /// Elapsed time in years
    block_time: f64,
    latest_checkpoint_day: u32,
    initialized: bool,
}

impl Market {
    /// Creates an unseeded market. Call [`Market::initialize`] before trading.
    pub fn new(pricing_model: PricingModel, params: MarketParams) -> Result<Self, SimError> {
        if params.position_days == 0 {
            return Err(SimError::invalid_config("position duration must be at least one day"));
        }
        let days = f64::from(params.position_days);
        let position_duration = StretchedTime::new(days, params.time_stretch, days)?;
        let pool = PoolState::new(
            params.init_share_price,
            params.init_share_price,
            params.variable_apr,
            params.fees,
        )?;
        Ok(Self {
            pricing_model,
            pool,
            position_days: params.position_days,
            position_duration,
            block_time: 0.0,
            latest_checkpoint_day: 0,
            initialized: false,
        })
    }

    /// Seeds the reserves so the pool holds `contribution` base and quotes `target_apr`.
    ///
    /// The provider receives `c·z + y` LP tokens and the current day is
    /// checkpointed at the current share price.
    pub fn initialize(
        &mut self,
        wallet: &Wallet,
        contribution: f64,
        target_apr: f64,
    ) -> Result<(PoolDelta, WalletDelta), SimError> {
        if self.initialized {
            return Err(SimError::invalid_input("market is already initialized"));
        }
        wallet.check_base(contribution)?;
        let share_price = self.pool.share_price();
        let (share_reserves, bond_reserves) = calc_liquidity(
            contribution,
            target_apr,
            share_price,
            self.pool.init_share_price(),
            &self.position_duration,
        )?;
        let lp_tokens = share_price * share_reserves + bond_reserves;

        let pool_delta = PoolDelta {
            d_share_reserves: share_reserves,
            d_bond_reserves: bond_reserves,
            d_lp_total_supply: lp_tokens,
            checkpoint: Some((self.latest_checkpoint_day, share_price)),
            ..PoolDelta::default()
        };
        self.pool.apply_delta(&pool_delta)?;
        self.initialized = true;

        info!(
            agent = wallet.address(),
            contribution,
            target_apr,
            share_reserves,
            bond_reserves,
            "initialized market"
        );
        let wallet_delta = WalletDelta {
            d_base: -contribution,
            d_lp_tokens: lp_tokens,
            ..WalletDelta::default()
        };
        Ok((pool_delta, wallet_delta))
    }

    /// Dispatches a trade intent to the matching transaction.
    pub fn execute(
        &mut self,
        wallet: &Wallet,
        trade: &TradeSpec,
    ) -> Result<(PoolDelta, WalletDelta), SimError> {
        let maturity = || {
            trade.maturity.ok_or_else(|| {
                SimError::invalid_input(format!("{} requires a maturity", trade.action))
            })
        };
        match trade.action {
            ActionType::OpenLong => self.open_long(wallet, trade.amount),
            ActionType::CloseLong => self.close_long(wallet, trade.amount, maturity()?),
            ActionType::OpenShort => self.open_short(wallet, trade.amount),
            ActionType::CloseShort => self.close_short(wallet, trade.amount, maturity()?),
            ActionType::AddLiquidity => self.add_liquidity(wallet, trade.amount),
            ActionType::RemoveLiquidity => self.remove_liquidity(wallet, trade.amount),
            ActionType::RedeemWithdrawShares => self.redeem_withdraw_shares(wallet, trade.amount),
        }
    }

    // ==================== Longs ====================

    /// Spends `base_amount` on bonds maturing one term from the latest checkpoint.
    pub fn open_long(
        &mut self,
        wallet: &Wallet,
        base_amount: f64,
    ) -> Result<(PoolDelta, WalletDelta), SimError> {
        self.ensure_initialized()?;
        wallet.check_base(base_amount)?;
        let spot_price = self.spot_price()?;
        let trade = self.pricing_model.calc_out_given_in(
            Quantity::base(base_amount),
            &self.pool.reserves(),
            self.pool.fees(),
            &self.position_duration,
        )?;
        let bonds = trade.user.d_bonds;
        if bonds < WEI {
            return Err(SimError::insolvency("long would receive no bonds"));
        }
        let maturity = self.maturity();
        let (fee, gov_fee) = fees_in_base(&trade, spot_price);
        let average = update_weighted_average(
            self.pool.long_average_maturity(),
            self.pool.longs_outstanding(),
            f64::from(maturity),
            bonds,
            true,
        );

        let mut pool_delta = PoolDelta {
            d_share_reserves: trade.market.d_base / self.pool.share_price(),
            d_bond_reserves: trade.market.d_bonds,
            d_base_buffer: bonds,
            d_longs_outstanding: bonds,
            d_long_base_volume: base_amount,
            d_long_average_maturity: average - self.pool.long_average_maturity(),
            d_gov_fees_accrued: gov_fee,
            ..PoolDelta::default()
        };
        pool_delta.long_buckets.insert(
            maturity,
            PositionBucket {
                bonds,
                base_volume: base_amount,
            },
        );
        self.pool.apply_delta(&pool_delta)?;

        debug!(agent = wallet.address(), base = base_amount, bonds, maturity, fee, "opened long");
        let mut wallet_delta = WalletDelta {
            d_base: -base_amount,
            d_fees_paid: fee,
            ..WalletDelta::default()
        };
        wallet_delta.longs.insert(maturity, Long { balance: bonds });
        Ok((pool_delta, wallet_delta))
    }

    /// Sells `bonds` of the long maturing on `maturity` back to the pool.
    pub fn close_long(
        &mut self,
        wallet: &Wallet,
        bonds: f64,
        maturity: u32,
    ) -> Result<(PoolDelta, WalletDelta), SimError> {
        self.ensure_initialized()?;
        wallet.check_long(maturity, bonds)?;
        let spot_price = self.spot_price()?;
        let trade = self.price_close_long(bonds, maturity)?;
        let proceeds = trade.user.d_base;
        let (fee, gov_fee) = fees_in_base(&trade, spot_price);
        let bucket = self
            .pool
            .long_bucket(maturity)
            .copied()
            .ok_or(SimError::PositionNotFound {
                kind: "long",
                maturity,
            })?;
        let released_volume =
            (bucket.base_volume * (bonds / bucket.bonds).min(1.0)).min(self.pool.long_base_volume());
        let average = update_weighted_average(
            self.pool.long_average_maturity(),
            self.pool.longs_outstanding(),
            f64::from(maturity),
            bonds,
            false,
        );

        let mut pool_delta = PoolDelta {
            d_share_reserves: trade.market.d_base / self.pool.share_price(),
            d_bond_reserves: trade.market.d_bonds,
            d_base_buffer: -bonds,
            d_longs_outstanding: -bonds,
            d_long_base_volume: -released_volume,
            d_long_average_maturity: average - self.pool.long_average_maturity(),
            d_gov_fees_accrued: gov_fee,
            ..PoolDelta::default()
        };
        pool_delta.long_buckets.insert(
            maturity,
            PositionBucket {
                bonds: -bonds,
                base_volume: -released_volume,
            },
        );
        // LPs backed the difference between face value and what the long paid
        self.free_margin(&mut pool_delta, bonds - released_volume);
        self.pool.apply_delta(&pool_delta)?;

        debug!(agent = wallet.address(), bonds, maturity, proceeds, fee, "closed long");
        let mut wallet_delta = WalletDelta {
            d_base: proceeds,
            d_fees_paid: fee,
            ..WalletDelta::default()
        };
        wallet_delta.longs.insert(maturity, Long { balance: -bonds });
        Ok((pool_delta, wallet_delta))
    }

    // ==================== Shorts ====================

    /// Sells `bonds` short; the trader deposits the maximum loss `bonds - proceeds`.
    pub fn open_short(
        &mut self,
        wallet: &Wallet,
        bonds: f64,
    ) -> Result<(PoolDelta, WalletDelta), SimError> {
        self.ensure_initialized()?;
        let trade = self.pricing_model.calc_out_given_in(
            Quantity::pt(bonds),
            &self.pool.reserves(),
            self.pool.fees(),
            &self.position_duration,
        )?;
        let proceeds = trade.user.d_base;
        let deposit = (bonds - proceeds).max(0.0);
        wallet.check_base(deposit)?;
        let maturity = self.maturity();
        let share_price = self.pool.share_price();
        let open_share_price = self
            .pool
            .checkpoint(self.latest_checkpoint_day)
            .unwrap_or(share_price);
        let average = update_weighted_average(
            self.pool.short_average_maturity(),
            self.pool.shorts_outstanding(),
            f64::from(maturity),
            bonds,
            true,
        );

        let mut pool_delta = PoolDelta {
            d_share_reserves: trade.market.d_base / share_price,
            d_bond_reserves: trade.market.d_bonds,
            d_bond_buffer: bonds,
            d_shorts_outstanding: bonds,
            d_short_base_volume: proceeds,
            d_short_average_maturity: average - self.pool.short_average_maturity(),
            d_gov_fees_accrued: trade.gov_fee,
            ..PoolDelta::default()
        };
        pool_delta.short_buckets.insert(
            maturity,
            PositionBucket {
                bonds,
                base_volume: proceeds,
            },
        );
        self.pool.apply_delta(&pool_delta)?;

        debug!(agent = wallet.address(), bonds, maturity, deposit, fee = trade.fee, "opened short");
        let mut wallet_delta = WalletDelta {
            d_base: -deposit,
            d_fees_paid: trade.fee,
            ..WalletDelta::default()
        };
        wallet_delta.shorts.insert(
            maturity,
            Short {
                balance: bonds,
                open_share_price,
            },
        );
        Ok((pool_delta, wallet_delta))
    }

    /// Buys back `bonds` of the short maturing on `maturity`.
    ///
    /// The trader receives `max(0, close_c / open_c · bonds − cost)`: the
    /// margin grown by the yield source, less the cost of the bonds.
    pub fn close_short(
        &mut self,
        wallet: &Wallet,
        bonds: f64,
        maturity: u32,
    ) -> Result<(PoolDelta, WalletDelta), SimError> {
        self.ensure_initialized()?;
        wallet.check_short(maturity, bonds)?;
        let open_share_price = wallet
            .shorts()
            .get(&maturity)
            .map_or(self.pool.share_price(), |short| short.open_share_price);
        let trade = self.price_close_short(bonds, maturity)?;
        let cost = -trade.user.d_base;
        let payout = self.short_payout(bonds, cost, open_share_price);
        let bucket = self
            .pool
            .short_bucket(maturity)
            .copied()
            .ok_or(SimError::PositionNotFound {
                kind: "short",
                maturity,
            })?;
        let released_volume = (bucket.base_volume * (bonds / bucket.bonds).min(1.0))
            .min(self.pool.short_base_volume());
        let average = update_weighted_average(
            self.pool.short_average_maturity(),
            self.pool.shorts_outstanding(),
            f64::from(maturity),
            bonds,
            false,
        );

        let mut pool_delta = PoolDelta {
            d_share_reserves: trade.market.d_base / self.pool.share_price(),
            d_bond_reserves: trade.market.d_bonds,
            d_bond_buffer: -bonds,
            d_shorts_outstanding: -bonds,
            d_short_base_volume: -released_volume,
            d_short_average_maturity: average - self.pool.short_average_maturity(),
            d_gov_fees_accrued: trade.gov_fee,
            ..PoolDelta::default()
        };
        pool_delta.short_buckets.insert(
            maturity,
            PositionBucket {
                bonds: -bonds,
                base_volume: -released_volume,
            },
        );
        // LPs backed the base the short received at open
        self.free_margin(&mut pool_delta, released_volume);
        self.pool.apply_delta(&pool_delta)?;

        debug!(agent = wallet.address(), bonds, maturity, cost, payout, "closed short");
        let mut wallet_delta = WalletDelta {
            d_base: payout,
            d_fees_paid: trade.fee,
            ..WalletDelta::default()
        };
        wallet_delta.shorts.insert(
            maturity,
            Short {
                balance: -bonds,
                open_share_price: 0.0,
            },
        );
        Ok((pool_delta, wallet_delta))
    }

    // ==================== Liquidity ====================

    /// Deposits `base_amount`, growing both reserves so the quoted APR is unchanged.
    pub fn add_liquidity(
        &mut self,
        wallet: &Wallet,
        base_amount: f64,
    ) -> Result<(PoolDelta, WalletDelta), SimError> {
        self.ensure_initialized()?;
        wallet.check_base(base_amount)?;
        let share_reserves = self.pool.share_reserves();
        if share_reserves <= 0.0 {
            return Err(SimError::insolvency("pool has no reserves to price liquidity against"));
        }
        let long_time = self.average_normalized_time(self.pool.long_average_maturity());
        let short_time = self.average_normalized_time(self.pool.short_average_maturity());
        let lp_out = calc_lp_out_given_tokens_in(
            base_amount,
            &self.pool.reserves(),
            self.pool.lp_total_supply(),
            self.pool.long_adjustment(long_time),
            self.pool.short_adjustment(short_time),
        )?;
        let d_shares = base_amount / self.pool.share_price();
        let d_bonds = self.pool.bond_reserves() * d_shares / share_reserves;

        let pool_delta = PoolDelta {
            d_share_reserves: d_shares,
            d_bond_reserves: d_bonds,
            d_lp_total_supply: lp_out,
            ..PoolDelta::default()
        };
        self.pool.apply_delta(&pool_delta)?;

        debug!(agent = wallet.address(), base = base_amount, lp_out, "added liquidity");
        let wallet_delta = WalletDelta {
            d_base: -base_amount,
            d_lp_tokens: lp_out,
            ..WalletDelta::default()
        };
        Ok((pool_delta, wallet_delta))
    }

    /// Burns `lp_in` LP tokens for idle base, minting withdrawal shares for the
    /// provider's slice of the margin locked in open positions.
    pub fn remove_liquidity(
        &mut self,
        wallet: &Wallet,
        lp_in: f64,
    ) -> Result<(PoolDelta, WalletDelta), SimError> {
        self.ensure_initialized()?;
        wallet.check_lp_tokens(lp_in)?;
        let lp_total_supply = self.pool.lp_total_supply();
        let share_price = self.pool.share_price();
        let (base_out, bonds_out) =
            calc_tokens_out_given_lp_in(lp_in, &self.pool.reserves(), lp_total_supply)?;
        let (d_shares, d_bonds) = if lp_in >= lp_total_supply && self.pool.base_buffer() == 0.0 {
            // the last provider takes the reserves exactly
            (self.pool.share_reserves(), self.pool.bond_reserves())
        } else {
            (base_out / share_price, bonds_out)
        };

        let pending = self.pool.withdraw_shares() - self.pool.withdraw_shares_ready();
        let locked_margin = (self.pool.longs_outstanding() - self.pool.long_base_volume()
            + self.pool.short_base_volume()
            - pending * share_price)
            .max(0.0);
        let withdraw_shares = locked_margin * (lp_in / lp_total_supply) / share_price;

        let pool_delta = PoolDelta {
            d_share_reserves: -d_shares,
            d_bond_reserves: -d_bonds,
            d_lp_total_supply: -lp_in,
            d_withdraw_shares: withdraw_shares,
            ..PoolDelta::default()
        };
        self.pool.apply_delta(&pool_delta)?;

        debug!(agent = wallet.address(), lp_in, base_out, withdraw_shares, "removed liquidity");
        let wallet_delta = WalletDelta {
            d_base: base_out,
            d_lp_tokens: -lp_in,
            d_withdraw_shares: withdraw_shares,
            ..WalletDelta::default()
        };
        Ok((pool_delta, wallet_delta))
    }

    /// Pays out `shares` withdrawal shares from the withdrawal pool's ready capital.
    ///
    /// # Errors
    ///
    /// [`SimError::InsufficientLiquidity`] when fewer than `shares` are ready.
    pub fn redeem_withdraw_shares(
        &mut self,
        wallet: &Wallet,
        shares: f64,
    ) -> Result<(PoolDelta, WalletDelta), SimError> {
        self.ensure_initialized()?;
        if !shares.is_finite() || shares < WEI {
            return Err(SimError::invalid_input(format!(
                "withdraw shares to redeem must be positive, got {shares}"
            )));
        }
        wallet.check_withdraw_shares(shares)?;
        let ready = self.pool.withdraw_shares_ready();
        if shares > ready {
            return Err(SimError::InsufficientLiquidity {
                requested: shares,
                ready,
            });
        }
        let capital = shares * self.pool.withdraw_capital() / ready;
        let base_out = capital * self.pool.share_price();

        let pool_delta = PoolDelta {
            d_withdraw_shares: -shares,
            d_withdraw_shares_ready: -shares,
            d_withdraw_capital: -capital,
            ..PoolDelta::default()
        };
        self.pool.apply_delta(&pool_delta)?;

        debug!(agent = wallet.address(), shares, base_out, "redeemed withdraw shares");
        let wallet_delta = WalletDelta {
            d_base: base_out,
            d_withdraw_shares: -shares,
            ..WalletDelta::default()
        };
        Ok((pool_delta, wallet_delta))
    }

    /// Moves margin released by a closing position into the withdrawal pool
    /// while withdrawal shares are waiting on it.
    fn free_margin(&self, delta: &mut PoolDelta, margin_base: f64) {
        let pending = self.pool.withdraw_shares() - self.pool.withdraw_shares_ready();
        if pending <= 0.0 || margin_base <= 0.0 {
            return;
        }
        let share_price = self.pool.share_price();
        let share_reserves = self.pool.share_reserves() + delta.d_share_reserves;
        let base_buffer = self.pool.base_buffer() + delta.d_base_buffer;
        let idle_shares = (share_reserves - base_buffer / share_price).max(0.0);
        let freed = (margin_base / share_price).min(pending).min(idle_shares);
        if freed <= 0.0 || share_reserves <= 0.0 {
            return;
        }
        // bonds leave with the shares so the quoted rate holds
        let bond_reserves = self.pool.bond_reserves() + delta.d_bond_reserves;
        delta.d_bond_reserves -= bond_reserves * freed / share_reserves;
        delta.d_share_reserves -= freed;
        delta.d_withdraw_shares_ready += freed;
        delta.d_withdraw_capital += freed;
    }

    // ==================== Time ====================

    /// Accrues one day of variable yield and checkpoints the new day.
    pub fn advance_day(&mut self, variable_apr: f64, compound: bool) -> Result<PoolDelta, SimError> {
        let day = self.latest_checkpoint_day + 1;
        let delta = self.pool.accrue_delta(variable_apr, compound, day);
        self.pool.apply_delta(&delta)?;
        self.latest_checkpoint_day = day;
        info!(
            day,
            share_price = self.pool.share_price(),
            variable_apr,
            fixed_apr = self.fixed_apr().unwrap_or(f64::NAN),
            "advanced day"
        );
        Ok(delta)
    }

    /// Moves the time cursor forward by `time_step` years. Pool state is untouched.
    pub fn tick(&mut self, time_step: f64) -> Result<(), SimError> {
        if !time_step.is_finite() || time_step < 0.0 {
            return Err(SimError::invalid_input(format!(
                "time step must be non-negative, got {time_step}"
            )));
        }
        self.block_time += time_step;
        Ok(())
    }

    // ==================== Pricing helpers ====================

    fn price_close_long(&self, bonds: f64, maturity: u32) -> Result<TradeResult, SimError> {
        let time = self.time_remaining(maturity)?;
        self.pricing_model.calc_out_given_in(
            Quantity::pt(bonds),
            &self.pool.reserves(),
            self.pool.fees(),
            &time,
        )
    }

    fn price_close_short(&self, bonds: f64, maturity: u32) -> Result<TradeResult, SimError> {
        let time = self.time_remaining(maturity)?;
        self.pricing_model.calc_in_given_out(
            Quantity::pt(bonds),
            &self.pool.reserves(),
            self.pool.fees(),
            &time,
        )
    }

    fn short_payout(&self, bonds: f64, cost: f64, open_share_price: f64) -> f64 {
        let growth = if open_share_price > 0.0 {
            self.pool.share_price() / open_share_price
        } else {
            1.0
        };
        (growth * bonds - cost).max(0.0)
    }

    /// Base a long would receive if closed now
    pub fn preview_close_long(&self, bonds: f64, maturity: u32) -> Result<f64, SimError> {
        Ok(self.price_close_long(bonds, maturity)?.user.d_base)
    }

    /// Base a short would receive if closed now
    pub fn preview_close_short(
        &self,
        bonds: f64,
        maturity: u32,
        open_share_price: f64,
    ) -> Result<f64, SimError> {
        let cost = -self.price_close_short(bonds, maturity)?.user.d_base;
        Ok(self.short_payout(bonds, cost, open_share_price))
    }

    /// Base claimable by `lp_tokens` from idle reserves
    pub fn lp_token_value(&self, lp_tokens: f64) -> f64 {
        let supply = self.pool.lp_total_supply();
        if lp_tokens <= 0.0 || supply <= 0.0 {
            return 0.0;
        }
        let idle = (self.pool.total_liquidity_in_base() - self.pool.base_buffer()).max(0.0);
        idle * lp_tokens / supply
    }

    pub fn withdraw_share_value(&self, shares: f64) -> f64 {
        shares.max(0.0) * self.pool.share_price()
    }

    /// Largest base amount a long can spend within `budget`
    pub fn max_long(&self, budget: f64) -> Result<f64, SimError> {
        self.ensure_initialized()?;
        self.pricing_model.calc_max_long(
            budget,
            &self.pool.reserves(),
            self.pool.fees(),
            &self.position_duration,
        )
    }

    /// Largest bond amount a short can sell when its deposit is capped by `budget`
    pub fn max_short(&self, budget: f64) -> Result<f64, SimError> {
        self.ensure_initialized()?;
        self.pricing_model.calc_max_short(
            budget,
            &self.pool.reserves(),
            self.pool.fees(),
            &self.position_duration,
        )
    }

    fn ensure_initialized(&self) -> Result<(), SimError> {
        if self.initialized {
            Ok(())
        } else {
            Err(SimError::MarketNotInitialized)
        }
    }

    fn maturity(&self) -> u32 {
        self.latest_checkpoint_day + self.position_days
    }

    fn time_remaining(&self, maturity: u32) -> Result<StretchedTime, SimError> {
        let days = (f64::from(maturity) - self.elapsed_days()).clamp(0.0, f64::from(self.position_days));
        StretchedTime::new(
            days,
            self.position_duration.time_stretch(),
            self.position_duration.normalizing_constant(),
        )
    }

    /// Fraction of the term left until an average maturity
    fn average_normalized_time(&self, average_maturity: f64) -> f64 {
        ((average_maturity - self.elapsed_days()) / f64::from(self.position_days)).clamp(0.0, 1.0)
    }

    // ==================== Accessors ====================

    /// Spot price of a full-term bond
    pub fn spot_price(&self) -> Result<f64, SimError> {
        self.pool.spot_price(&self.position_duration)
    }

    /// Fixed APR quoted for a full-term bond
    pub fn fixed_apr(&self) -> Result<f64, SimError> {
        self.pool.fixed_apr(&self.position_duration)
    }

    pub fn total_liquidity_in_base(&self) -> f64 {
        self.pool.total_liquidity_in_base()
    }

    pub fn pool(&self) -> &PoolState {
        &self.pool
    }

    pub fn pricing_model(&self) -> PricingModel {
        self.pricing_model
    }

    pub fn position_days(&self) -> u32 {
        self.position_days
    }

    pub fn position_duration(&self) -> &StretchedTime {
        &self.position_duration
    }

    pub fn latest_checkpoint_day(&self) -> u32 {
        self.latest_checkpoint_day
    }

    /// Elapsed time in years
    pub fn block_time(&self) -> f64 {
        self.block_time
    }

    pub fn elapsed_days(&self) -> f64 {
        self.block_time * DAYS_PER_YEAR
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True once a position opened at `maturity - position_days` can be closed flat
    pub fn is_mature(&self, maturity: u32) -> bool {
        self.elapsed_days() >= f64::from(maturity)
    }
}

/// Fee and governance fee of a trade, in base
fn fees_in_base(trade: &TradeResult, spot_price: f64) -> (f64, f64) {
    match trade.unit {
        TokenType::Base => (trade.fee, trade.gov_fee),
        TokenType::Pt => (trade.fee * spot_price, trade.gov_fee * spot_price),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::calc_time_stretch;

    fn create_test_market(governance_fee: f64) -> (Market, Wallet) {
        let params = MarketParams {
            position_days: 90,
            time_stretch: calc_time_stretch(0.05).unwrap(),
            fees: PoolFeeConfig::new(0.05, 0.05, governance_fee).unwrap(),
            init_share_price: 1.0,
            variable_apr: 0.05,
        };
        let mut market = Market::new(PricingModel::Hyperdrive, params).unwrap();
        let mut lp = Wallet::new(0, 1_000_000.0).unwrap();
        let (_, delta) = market.initialize(&lp, 1_000_000.0, 0.05).unwrap();
        lp.apply_delta(&delta).unwrap();
        (market, lp)
    }

    fn trader(address: usize, budget: f64) -> Wallet {
        Wallet::new(address, budget).unwrap()
    }

    #[test]
    fn test_initialize_hits_targets() {
        let (market, lp) = create_test_market(0.0);
        assert!((market.fixed_apr().unwrap() - 0.05).abs() < 1e-9);
        assert!((market.total_liquidity_in_base() - 1_000_000.0).abs() < 1e-6);
        let pool = market.pool();
        assert_eq!(
            pool.lp_total_supply(),
            pool.share_reserves() * pool.share_price() + pool.bond_reserves()
        );
        assert_eq!(lp.lp_tokens(), pool.lp_total_supply());
        assert!(lp.base().abs() < 1e-6);
        assert_eq!(pool.checkpoint(0), Some(1.0));
    }

    #[test]
    fn test_trade_before_initialize_fails() {
        let params = MarketParams {
            position_days: 90,
            time_stretch: 22.0,
            fees: PoolFeeConfig::new(0.05, 0.05, 0.0).unwrap(),
            init_share_price: 1.0,
            variable_apr: 0.05,
        };
        let mut market = Market::new(PricingModel::Hyperdrive, params).unwrap();
        let wallet = trader(1, 100.0);
        assert!(matches!(
            market.open_long(&wallet, 10.0),
            Err(SimError::MarketNotInitialized)
        ));
    }

    #[test]
    fn test_open_long_lowers_apr_and_books_position() {
        let (mut market, _) = create_test_market(0.1);
        let mut wallet = trader(1, 10_000.0);
        let before = market.fixed_apr().unwrap();
        let (pool_delta, wallet_delta) = market.open_long(&wallet, 10_000.0).unwrap();
        wallet.apply_delta(&wallet_delta).unwrap();

        let bonds = wallet.longs()[&90].balance;
        assert!(bonds > 10_000.0);
        assert_eq!(wallet.base(), 0.0);
        assert!(market.fixed_apr().unwrap() < before);
        assert_eq!(market.pool().longs_outstanding(), bonds);
        assert_eq!(market.pool().base_buffer(), bonds);
        assert!((market.pool().long_average_maturity() - 90.0).abs() < 1e-9);
        assert_eq!(market.pool().long_bucket(90).map(|b| b.bonds), Some(bonds));
        assert!(market.pool().gov_fees_accrued() > 0.0);
        assert_eq!(pool_delta.d_long_base_volume, 10_000.0);
    }

    #[test]
    fn test_immediate_close_long_costs_fees() {
        let (mut market, _) = create_test_market(0.0);
        let mut wallet = trader(1, 10_000.0);
        let (_, delta) = market.open_long(&wallet, 10_000.0).unwrap();
        wallet.apply_delta(&delta).unwrap();
        let bonds = wallet.longs()[&90].balance;

        let (_, delta) = market.close_long(&wallet, bonds, 90).unwrap();
        wallet.apply_delta(&delta).unwrap();
        assert!(wallet.base() < 10_000.0);
        assert!(wallet.base() > 9_900.0);
        assert!(wallet.longs().is_empty());
        assert!(wallet.fees_paid() > 0.0);
        let pool = market.pool();
        assert_eq!(pool.longs_outstanding(), 0.0);
        assert_eq!(pool.base_buffer(), 0.0);
        assert_eq!(pool.long_base_volume(), 0.0);
        assert_eq!(pool.long_average_maturity(), 0.0);
        assert!(pool.long_bucket(90).is_none());
    }

    #[test]
    fn test_matured_long_redeems_at_face_value() {
        let (mut market, _) = create_test_market(0.0);
        let mut wallet = trader(1, 10_000.0);
        let (_, delta) = market.open_long(&wallet, 10_000.0).unwrap();
        wallet.apply_delta(&delta).unwrap();
        let bonds = wallet.longs()[&90].balance;

        market.tick(90.0 / DAYS_PER_YEAR).unwrap();
        assert!(market.preview_close_long(bonds, 90).is_ok());
        let (_, delta) = market.close_long(&wallet, bonds, 90).unwrap();
        assert!((delta.d_base - bonds).abs() < 1e-6);
        assert!(delta.d_fees_paid.abs() < 1e-6);
    }

    #[test]
    fn test_open_short_deposits_max_loss() {
        let (mut market, _) = create_test_market(0.0);
        let mut wallet = trader(2, 1_000.0);
        let before = market.fixed_apr().unwrap();
        let (_, delta) = market.open_short(&wallet, 10_000.0).unwrap();
        wallet.apply_delta(&delta).unwrap();

        let short = wallet.shorts()[&90];
        assert_eq!(short.balance, 10_000.0);
        assert_eq!(short.open_share_price, 1.0);
        let deposit = 1_000.0 - wallet.base();
        assert!(deposit > 0.0 && deposit < 1_000.0);
        assert!(market.fixed_apr().unwrap() > before);
        assert_eq!(market.pool().bond_buffer(), 10_000.0);
        assert_eq!(market.pool().shorts_outstanding(), 10_000.0);
    }

    #[test]
    fn test_open_short_without_margin_is_rejected() {
        let (mut market, _) = create_test_market(0.0);
        let before = market.pool().clone();
        let wallet = trader(2, 1.0);
        assert!(matches!(
            market.open_short(&wallet, 10_000.0),
            Err(SimError::InsufficientBalance { asset: "base", .. })
        ));
        assert_eq!(market.pool(), &before);
    }

    #[test]
    fn test_close_short_collects_variable_yield() {
        let (mut market, _) = create_test_market(0.0);
        let mut wallet = trader(2, 1_000.0);
        let (_, delta) = market.open_short(&wallet, 10_000.0).unwrap();
        wallet.apply_delta(&delta).unwrap();

        market.tick(1.0 / DAYS_PER_YEAR).unwrap();
        market.advance_day(0.5, true).unwrap();
        let payout = market.preview_close_short(10_000.0, 90, 1.0).unwrap();
        let (_, delta) = market.close_short(&wallet, 10_000.0, 90).unwrap();
        assert!((delta.d_base - payout).abs() < 1e-9);
        wallet.apply_delta(&delta).unwrap();
        assert!(wallet.shorts().is_empty());
        assert_eq!(market.pool().bond_buffer(), 0.0);
        assert!(payout > 0.0);
    }

    #[test]
    fn test_add_then_remove_liquidity_round_trips_without_fees() {
        let (mut market, _) = create_test_market(0.0);
        let apr = market.fixed_apr().unwrap();
        let mut wallet = trader(3, 50_000.0);
        let (_, delta) = market.add_liquidity(&wallet, 50_000.0).unwrap();
        wallet.apply_delta(&delta).unwrap();
        assert!((market.fixed_apr().unwrap() - apr).abs() < 1e-12);

        let (_, delta) = market.remove_liquidity(&wallet, wallet.lp_tokens()).unwrap();
        wallet.apply_delta(&delta).unwrap();
        assert!((wallet.base() - 50_000.0).abs() < 1e-6);
        assert_eq!(wallet.withdraw_shares(), 0.0);
        assert!((market.fixed_apr().unwrap() - apr).abs() < 1e-12);
    }

    #[test]
    fn test_withdraw_shares_wait_for_freed_margin() {
        let (mut market, _) = create_test_market(0.0);
        let mut provider = trader(3, 100_000.0);
        let (_, delta) = market.add_liquidity(&provider, 100_000.0).unwrap();
        provider.apply_delta(&delta).unwrap();

        let mut long = trader(4, 10_000.0);
        let (_, delta) = market.open_long(&long, 10_000.0).unwrap();
        long.apply_delta(&delta).unwrap();

        let (_, delta) = market.remove_liquidity(&provider, provider.lp_tokens()).unwrap();
        provider.apply_delta(&delta).unwrap();
        let shares = provider.withdraw_shares();
        assert!(shares > 0.0);
        assert!(matches!(
            market.redeem_withdraw_shares(&provider, shares),
            Err(SimError::InsufficientLiquidity { .. })
        ));

        let bonds = long.longs()[&90].balance;
        let (_, delta) = market.close_long(&long, bonds, 90).unwrap();
        long.apply_delta(&delta).unwrap();
        assert!((market.pool().withdraw_shares_ready() - shares).abs() < 1e-9);

        let ready = market.pool().withdraw_shares_ready();
        let (_, delta) = market.redeem_withdraw_shares(&provider, ready).unwrap();
        provider.apply_delta(&delta).unwrap();
        assert!(provider.withdraw_shares() < 1e-9);
        assert!(delta.d_base > 0.0);
    }

    #[test]
    fn test_last_provider_empties_pool() {
        let (mut market, mut lp) = create_test_market(0.0);
        let (_, delta) = market.remove_liquidity(&lp, lp.lp_tokens()).unwrap();
        lp.apply_delta(&delta).unwrap();
        assert_eq!(market.pool().share_reserves(), 0.0);
        assert_eq!(market.pool().lp_total_supply(), 0.0);
        assert!((lp.base() - 1_000_000.0).abs() < 1e-6);
        assert!(lp.is_flat());
    }

    #[test]
    fn test_max_long_executes() {
        let (mut market, _) = create_test_market(0.0);
        let wallet = trader(5, 1e9);
        let max_long = market.max_long(wallet.base()).unwrap();
        assert!(max_long > 0.0);
        market.open_long(&wallet, max_long).unwrap();
        assert!(market.fixed_apr().unwrap() >= 0.0);
    }

    #[test]
    fn test_execute_requires_maturity_on_close() {
        let (mut market, _) = create_test_market(0.0);
        let wallet = trader(6, 100.0);
        let spec = TradeSpec {
            action: ActionType::CloseLong,
            amount: 10.0,
            maturity: None,
        };
        assert!(matches!(
            market.execute(&wallet, &spec),
            Err(SimError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_advance_day_checkpoints_share_price() {
        let (mut market, _) = create_test_market(0.0);
        market.advance_day(0.365, false).unwrap();
        assert_eq!(market.latest_checkpoint_day(), 1);
        assert!((market.pool().share_price() - 1.001).abs() < 1e-12);
        assert_eq!(market.pool().checkpoint(1), Some(market.pool().share_price()));
        assert!(market.tick(-1.0).is_err());
    }
}
