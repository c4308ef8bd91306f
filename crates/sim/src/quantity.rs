//! Amounts tagged with the token they are denominated in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two tokens a pool trades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// The base asset deposited into the yield source
    Base,
    /// The fixed-rate principal token (bond)
    Pt,
}

impl TokenType {
    /// The token on the other side of a trade
    pub fn counterpart(self) -> Self {
        match self {
            TokenType::Base => TokenType::Pt,
            TokenType::Pt => TokenType::Base,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Base => write!(f, "base"),
            TokenType::Pt => write!(f, "pt"),
        }
    }
}

/// A signed amount whose unit cannot change after creation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quantity {
    amount: f64,
    unit: TokenType,
}

impl Quantity {
    pub fn new(amount: f64, unit: TokenType) -> Self {
        Self { amount, unit }
    }

    pub fn base(amount: f64) -> Self {
        Self::new(amount, TokenType::Base)
    }

    pub fn pt(amount: f64) -> Self {
        Self::new(amount, TokenType::Pt)
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn unit(&self) -> TokenType {
        self.unit
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit)
    }
}
