//! Hub Ledger
//!
//! Share-based accounting for pooled lending. One Hub holds the liquidity,
//! Spokes aggregate it for their Users, and every level keeps the same
//! drawn-share and premium books.
//!
//! # Architecture
//!
//! - **Interest index**: drawn debt is shares times a cumulative ray index
//! - **Ghost premium**: risk premium accrues on ghost shares net of an offset
//! - **Mirrored books**: each Spoke's totals are mirrored on the Hub
//! - **Single Writer**: one actor owns the whole tree
//!
//! # Invariants
//!
//! - Supplied, drawn and premium totals equal the sum of their parts
//! - The supply exchange rate never decreases
//! - A premium refresh never raises anyone's total debt
//! - No counter ever goes negative

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod hub;
pub mod index;
pub mod invariants;
pub mod math;
pub mod metrics;
pub mod premium;
pub mod sampler;
pub mod spoke;
pub mod system;
pub mod types;
pub mod user;

// Re-exports
pub use actor::{spawn_simulation_actor, SimulationHandle};
pub use config::SimulationConfig;
pub use context::SimulationContext;
pub use error::{Error, Result};
pub use hub::Hub;
pub use invariants::{Invariant, InvariantReport};
pub use math::{Rounding, MAX_UINT, RAY};
pub use spoke::{RepayOutcome, Spoke};
pub use system::{Action, System};
pub use types::{Debt, LedgerAccount, SpokeId, UserId};
pub use user::User;
