//! Fixed-Rate AMM Simulation SDK
//!
//! This crate simulates a fixed-rate AMM where agents trade principal tokens
//! against base on a YieldSpace-style bonding curve, optionally split into a
//! flat and a curve leg the way Hyperdrive prices trades.
//!
//! # Overview
//!
//! The simulation SDK allows you to:
//! - Price trades in either direction with the YieldSpace or Hyperdrive model
//! - Seed a pool at a target fixed APR and track its reserves and positions
//! - Open and close longs and shorts, and add or remove liquidity
//! - Accrue variable yield day by day and checkpoint the share price
//! - Run many agents with pluggable policies from one seeded rng
//! - Stream one row per executed trade to memory or JSON lines
//!
//! # Example
//!
//! ```rust,ignore
//! use hyperdrive_rs_sim::{SimConfig, SimulationRecord, Simulator};
//!
//! let config = SimConfig::builder()
//!     .with_num_trading_days(10)
//!     .with_random_seed(42)
//!     .build()?;
//! let mut simulator = Simulator::from_config(config)?;
//! simulator.register_agent(Box::new(my_policy), 100_000.0)?;
//!
//! let mut record = SimulationRecord::new();
//! let summary = simulator.run(&mut record)?;
//!
//! for wallet in &summary.wallets {
//!     println!("agent {} pnl {:.2}", wallet.address, wallet.pnl);
//! }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod market;
pub mod math;
pub mod pool;
pub mod pricing;
pub mod quantity;
pub mod simulator;
pub mod time;
pub mod wallet;

pub use error::SimError;

// Pricing exports
pub use pricing::{
    calc_apr_from_reserves, calc_apr_from_spot_price, calc_liquidity,
    calc_spot_price_from_reserves, PoolReserves, PricingModel, TradeDeltas, TradeResult,
};
pub use quantity::{Quantity, TokenType};
pub use time::{calc_time_stretch, SimClock, StretchedTime, DAYS_PER_YEAR};

// Pool and market exports
pub use market::{Market, MarketParams};
pub use pool::{PoolDelta, PoolFeeConfig, PoolSnapshot, PoolState, PositionBucket};
pub use wallet::{Long, Short, Wallet, WalletDelta, WalletSnapshot};

// Simulation exports
pub use agent::{ActionType, Agent, InitialLiquidityProvider, Policy, TradeOutcome, TradeSpec};
pub use config::{SimConfig, SimConfigBuilder};
pub use simulator::{JsonLinesSink, OutputSink, RunSummary, SimulationRecord, Simulator, TradeRow};
