//! Trade intents, trading policies and the agents that carry them.

use std::fmt;

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::market::Market;
use crate::pool::PoolDelta;
use crate::wallet::{Wallet, WalletDelta};

/// The transactions a market accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    OpenLong,
    CloseLong,
    OpenShort,
    CloseShort,
    AddLiquidity,
    RemoveLiquidity,
    RedeemWithdrawShares,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::OpenLong => "open_long",
            ActionType::CloseLong => "close_long",
            ActionType::OpenShort => "open_short",
            ActionType::CloseShort => "close_short",
            ActionType::AddLiquidity => "add_liquidity",
            ActionType::RemoveLiquidity => "remove_liquidity",
            ActionType::RedeemWithdrawShares => "redeem_withdraw_shares",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One trade an agent wants executed.
///
/// `amount` is base for opening longs and adding liquidity, bonds for shorts
/// and closes, and LP tokens or withdrawal shares for the liquidity exits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeSpec {
    pub action: ActionType,
    pub amount: f64,
    /// Required when closing a position
    pub maturity: Option<u32>,
}

impl TradeSpec {
    pub fn open_long(base: f64) -> Self {
        Self::new(ActionType::OpenLong, base, None)
    }

    pub fn close_long(bonds: f64, maturity: u32) -> Self {
        Self::new(ActionType::CloseLong, bonds, Some(maturity))
    }

    pub fn open_short(bonds: f64) -> Self {
        Self::new(ActionType::OpenShort, bonds, None)
    }

    pub fn close_short(bonds: f64, maturity: u32) -> Self {
        Self::new(ActionType::CloseShort, bonds, Some(maturity))
    }

    pub fn add_liquidity(base: f64) -> Self {
        Self::new(ActionType::AddLiquidity, base, None)
    }

    pub fn remove_liquidity(lp_tokens: f64) -> Self {
        Self::new(ActionType::RemoveLiquidity, lp_tokens, None)
    }

    pub fn redeem_withdraw_shares(shares: f64) -> Self {
        Self::new(ActionType::RedeemWithdrawShares, shares, None)
    }

    fn new(action: ActionType, amount: f64, maturity: Option<u32>) -> Self {
        Self {
            action,
            amount,
            maturity,
        }
    }
}

/// Result of executing one [`TradeSpec`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeOutcome {
    pub agent: usize,
    pub trade: TradeSpec,
    pub success: bool,
    pub pool_delta: Option<PoolDelta>,
    pub wallet_delta: Option<WalletDelta>,
    /// [`SimError::kind`] of the failure
    pub error_kind: Option<&'static str>,
}

impl TradeOutcome {
    pub fn executed(agent: usize, trade: TradeSpec, pool_delta: PoolDelta, wallet_delta: WalletDelta) -> Self {
        Self {
            agent,
            trade,
            success: true,
            pool_delta: Some(pool_delta),
            wallet_delta: Some(wallet_delta),
            error_kind: None,
        }
    }

    pub fn failed(agent: usize, trade: TradeSpec, error: &SimError) -> Self {
        Self {
            agent,
            trade,
            success: false,
            pool_delta: None,
            wallet_delta: None,
            error_kind: Some(error.kind()),
        }
    }
}

/// A trading strategy.
///
/// Policies read the market and their own wallet and return trade intents;
/// they never mutate either. All randomness comes from the simulator's rng.
pub trait Policy: fmt::Debug {
    fn name(&self) -> &str;

    /// Trades for the current block
    fn action(&mut self, market: &Market, wallet: &Wallet, rng: &mut ChaCha8Rng) -> Vec<TradeSpec>;

    /// Trades that leave the wallet flat: close every position, withdraw all
    /// liquidity and redeem whatever withdrawal shares are ready.
    fn liquidation_trades(&self, market: &Market, wallet: &Wallet) -> Vec<TradeSpec> {
        let mut trades: Vec<TradeSpec> = wallet
            .longs()
            .iter()
            .map(|(maturity, long)| TradeSpec::close_long(long.balance, *maturity))
            .collect();
        trades.extend(
            wallet
                .shorts()
                .iter()
                .map(|(maturity, short)| TradeSpec::close_short(short.balance, *maturity)),
        );
        if wallet.lp_tokens() > 0.0 {
            trades.push(TradeSpec::remove_liquidity(wallet.lp_tokens()));
        }
        let redeemable = wallet
            .withdraw_shares()
            .min(market.pool().withdraw_shares_ready());
        if redeemable > 0.0 {
            trades.push(TradeSpec::redeem_withdraw_shares(redeemable));
        }
        trades
    }
}

/// Seeds the pool at the start of a run and withdraws at the end; never trades otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct InitialLiquidityProvider;

impl Policy for InitialLiquidityProvider {
    fn name(&self) -> &str {
        "init_lp"
    }

    fn action(&mut self, _market: &Market, _wallet: &Wallet, _rng: &mut ChaCha8Rng) -> Vec<TradeSpec> {
        Vec::new()
    }
}

/// A registered participant: an id, a wallet and a policy.
#[derive(Debug)]
pub struct Agent {
    id: usize,
    wallet: Wallet,
    policy: Box<dyn Policy>,
}

impl Agent {
    pub fn new(id: usize, budget: f64, policy: Box<dyn Policy>) -> Result<Self, SimError> {
        Ok(Self {
            id,
            wallet: Wallet::new(id, budget)?,
            policy,
        })
    }

    /// Trade intents for this block; liquidation trades on the final block.
    pub fn get_trades(
        &mut self,
        market: &Market,
        rng: &mut ChaCha8Rng,
        liquidate: bool,
    ) -> Vec<TradeSpec> {
        if liquidate {
            self.policy.liquidation_trades(market, &self.wallet)
        } else {
            self.policy.action(market, &self.wallet, rng)
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn budget(&self) -> f64 {
        self.wallet.budget()
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub(crate) fn apply_wallet_delta(&mut self, delta: &WalletDelta) -> Result<(), SimError> {
        self.wallet.apply_delta(delta)
    }
}
