//! Error types for the hub ledger

use crate::invariants::InvariantReport;
use crate::types::{Entity, SpokeId, UserId};
use alloy_primitives::U256;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// `mul_div` called with a zero denominator
    #[error("Division by zero")]
    DivisionByZero,

    /// A nonzero amount converted to zero shares
    #[error("Zero shares for amount {amount}")]
    ZeroShares {
        /// Amount that was converted
        amount: U256,
    },

    /// A quantity that must be non-negative came out negative
    #[error("Negative value: {0}")]
    NegativeValue(String),

    /// A tracked field would drop below zero
    #[error("Underflow: {entity}.{field}")]
    Underflow {
        /// Entity owning the field
        entity: Entity,
        /// Field name
        field: &'static str,
    },

    /// A tracked field would exceed `U256::MAX`
    #[error("Overflow: {entity}.{field}")]
    Overflow {
        /// Entity owning the field
        entity: Entity,
        /// Field name
        field: &'static str,
    },

    /// Repay split assigned more principal than is owed
    #[error("Drawn restored {restored} exceeds drawn debt {debt}")]
    DrawnRestoredExceedsDrawnDebt {
        /// Principal assigned by the split
        restored: U256,
        /// Principal actually owed
        debt: U256,
    },

    /// Repay split assigned more premium than is owed
    #[error("Premium restored {restored} exceeds premium debt {debt}")]
    PremiumRestoredExceedsPremiumDebt {
        /// Premium assigned by the split
        restored: U256,
        /// Premium actually owed
        debt: U256,
    },

    /// A premium refresh raised an entity's total debt
    #[error("Total debt increased on {entity}: {before} -> {after}")]
    TotalDebtIncreased {
        /// Entity whose debt grew
        entity: Entity,
        /// Total debt before the refresh
        before: U256,
        /// Total debt after the refresh
        after: U256,
    },

    /// One or more system invariants failed
    #[error("Invariant violation: {0}")]
    InvariantViolation(InvariantReport),

    /// Sampled index multiplier would shrink the index
    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    /// Rounding mode has no inverse
    #[error("Invalid rounding: {0}")]
    InvalidRounding(String),

    /// User id not registered in the system
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// Spoke id not registered in the system
    #[error("Unknown spoke: {0}")]
    UnknownSpoke(SpokeId),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the error signals broken accounting rather than bad input.
    ///
    /// Input errors (too-small amounts, not enough liquidity or balance)
    /// leave state untouched once the operation is rolled back.
    pub fn is_logic_error(&self) -> bool {
        !matches!(
            self,
            Error::ZeroShares { .. }
                | Error::Underflow { .. }
                | Error::UnknownUser(_)
                | Error::UnknownSpoke(_)
                | Error::Concurrency(_)
                | Error::Config(_)
                | Error::Io(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
