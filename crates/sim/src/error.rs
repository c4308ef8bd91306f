//! Error types for the simulation library.

use thiserror::Error;

/// Errors that can occur during pricing, pool accounting or a simulation run
#[derive(Debug, Error)]
pub enum SimError {
    /// A malformed trade request or pricing input, rejected before any state is touched
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The wallet cannot cover the trade
    #[error("Insufficient {asset} balance for agent {agent}: need {required}, have {available}")]
    InsufficientBalance {
        agent: usize,
        asset: &'static str,
        required: f64,
        available: f64,
    },

    /// The trade would leave reserves negative, drive the APR negative or break a buffer
    #[error("Pool insolvency: {reason}")]
    PoolInsolvency { reason: String },

    /// Not enough withdrawal capital is ready to redeem the requested shares
    #[error("Insufficient liquidity: requested {requested}, ready {ready}")]
    InsufficientLiquidity { requested: f64, ready: f64 },

    /// An arithmetic intermediate left the representable range
    #[error("Precision error in {operation}")]
    Precision { operation: &'static str },

    /// A state invariant failed after applying a delta
    #[error("Invariant violation: {field} would become {value}")]
    InvariantViolation { field: String, value: f64 },

    /// The simulation configuration is inconsistent
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// No position exists at the requested maturity
    #[error("No {kind} position at maturity day {maturity}")]
    PositionNotFound { kind: &'static str, maturity: u32 },

    /// A trade was submitted before the pool was seeded
    #[error("Market has not been initialized")]
    MarketNotInitialized,

    /// The output sink rejected a row
    #[error("Failed to write simulation output: {reason}")]
    Output { reason: String },
}

impl SimError {
    /// Returns true for errors that must halt a simulation run.
    ///
    /// Precision failures and broken invariants mean the model no longer
    /// describes the pool, and a failing sink means the record is incomplete.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimError::Precision { .. } | SimError::InvariantViolation { .. } | SimError::Output { .. }
        )
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::InvalidInput { .. } => "invalid_input",
            SimError::InsufficientBalance { .. } => "insufficient_balance",
            SimError::PoolInsolvency { .. } => "pool_insolvency",
            SimError::InsufficientLiquidity { .. } => "insufficient_liquidity",
            SimError::Precision { .. } => "precision",
            SimError::InvariantViolation { .. } => "invariant_violation",
            SimError::InvalidConfig { .. } => "invalid_config",
            SimError::PositionNotFound { .. } => "position_not_found",
            SimError::MarketNotInitialized => "market_not_initialized",
            SimError::Output { .. } => "output",
        }
    }

    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        SimError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn insolvency(reason: impl Into<String>) -> Self {
        SimError::PoolInsolvency {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        SimError::InvalidConfig {
            reason: reason.into(),
        }
    }
}
