//! Core types shared by the Hub, Spoke and User tiers
//!
//! Every tier keeps the same share and premium fields, so they all wrap a
//! single [`LedgerAccount`]. Signed changes travel as [`Delta`] values
//! because the fields themselves are unsigned.

use crate::index::InterestIndex;
use crate::math::widen;
use crate::premium;
use crate::{Error, Result};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Spoke identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpokeId(pub u64);

impl fmt::Display for SpokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner of a tracked field, used in errors and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    /// The global hub
    Hub,
    /// The hub's private record of a spoke
    HubMirror(SpokeId),
    /// A spoke's own record
    Spoke(SpokeId),
    /// A user
    User(UserId),
    /// Intermediate arithmetic
    Math,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Hub => write!(f, "Hub"),
            Entity::HubMirror(id) => write!(f, "Hub.spokes[{}]", id),
            Entity::Spoke(id) => write!(f, "Spoke {}", id),
            Entity::User(id) => write!(f, "User {}", id),
            Entity::Math => write!(f, "math"),
        }
    }
}

/// Signed change to an unsigned field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delta {
    /// Add the amount
    Increase(U256),
    /// Subtract the amount
    Decrease(U256),
}

impl Delta {
    /// No change
    pub const ZERO: Delta = Delta::Increase(U256::ZERO);

    /// Delta that moves `old` to `new`
    pub fn between(old: U256, new: U256) -> Self {
        if new >= old {
            Delta::Increase(new - old)
        } else {
            Delta::Decrease(old - new)
        }
    }

    /// Apply to `value`, failing on underflow or overflow
    pub fn apply(self, value: U256, entity: Entity, field: &'static str) -> Result<U256> {
        match self {
            Delta::Increase(amount) => checked_add(value, amount, entity, field),
            Delta::Decrease(amount) => checked_sub(value, amount, entity, field),
        }
    }
}

/// `value + amount` or `Overflow`
pub fn checked_add(value: U256, amount: U256, entity: Entity, field: &'static str) -> Result<U256> {
    value
        .checked_add(amount)
        .ok_or(Error::Overflow { entity, field })
}

/// `value - amount` or `Underflow`
pub fn checked_sub(value: U256, amount: U256, entity: Entity, field: &'static str) -> Result<U256> {
    value
        .checked_sub(amount)
        .ok_or(Error::Underflow { entity, field })
}

/// Premium state change emitted by `refresh`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumDelta {
    /// Change to ghost drawn shares
    pub ghost_drawn_shares: Delta,
    /// Change to offset
    pub offset: Delta,
    /// Change to realised premium
    pub realised_premium: Delta,
}

impl PremiumDelta {
    /// Whether applying this changes nothing
    pub fn is_noop(&self) -> bool {
        [self.ghost_drawn_shares, self.offset, self.realised_premium]
            .iter()
            .all(|delta| matches!(delta, Delta::Increase(v) | Delta::Decrease(v) if v.is_zero()))
    }
}

/// Share and premium balances kept identically at every tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAccount {
    /// Principal debt shares
    pub drawn_shares: U256,
    /// Premium debt shares, valued against the same index
    pub ghost_drawn_shares: U256,
    /// Asset value of ghost shares at their last reset
    pub offset: U256,
    /// Crystallized premium owed as a flat amount
    pub realised_premium: U256,
    /// Supply-side shares
    pub supplied_shares: U256,
}

impl LedgerAccount {
    /// Field names in a fixed order, matching [`LedgerAccount::fields`]
    pub const FIELD_NAMES: [&'static str; 5] = [
        "drawn_shares",
        "ghost_drawn_shares",
        "offset",
        "realised_premium",
        "supplied_shares",
    ];

    /// Field values in the order of [`LedgerAccount::FIELD_NAMES`]
    pub fn fields(&self) -> [U256; 5] {
        [
            self.drawn_shares,
            self.ghost_drawn_shares,
            self.offset,
            self.realised_premium,
            self.supplied_shares,
        ]
    }

    /// Apply a premium refresh to this account
    pub fn apply_premium(&mut self, delta: &PremiumDelta, entity: Entity) -> Result<()> {
        // compute everything first so a failure leaves the account untouched
        let ghost = delta
            .ghost_drawn_shares
            .apply(self.ghost_drawn_shares, entity, "ghost_drawn_shares")?;
        let offset = delta.offset.apply(self.offset, entity, "offset")?;
        let realised = delta
            .realised_premium
            .apply(self.realised_premium, entity, "realised_premium")?;

        self.ghost_drawn_shares = ghost;
        self.offset = offset;
        self.realised_premium = realised;
        Ok(())
    }

    /// Drawn and premium debt valued at `index`
    pub fn debt(&self, index: &InterestIndex) -> Result<Debt> {
        Ok(Debt {
            drawn_debt: index.to_drawn_debt(self.drawn_shares)?,
            premium_debt: premium::premium_debt(index, self)?,
        })
    }
}

/// Debt split into principal and premium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Debt {
    /// Principal debt
    pub drawn_debt: U256,
    /// Premium debt (accruing plus realised)
    pub premium_debt: U256,
}

impl Debt {
    /// Principal plus premium
    pub fn total(&self) -> Result<U256> {
        checked_add(self.drawn_debt, self.premium_debt, Entity::Math, "total_debt")
    }
}

/// Snapshot of the supply pool used to compare exchange rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyExchangeRatio {
    /// `liquidity + drawn + premium + 1`
    pub total_supplied_assets: U256,
    /// `supplied_shares + VIRTUAL_SHARES`
    pub total_supplied_shares: U256,
}

impl SupplyExchangeRatio {
    /// Whether `self` is at least `previous`, compared by cross-multiplication
    pub fn is_at_least(&self, previous: &SupplyExchangeRatio) -> bool {
        let lhs = widen(self.total_supplied_assets) * widen(previous.total_supplied_shares);
        let rhs = widen(previous.total_supplied_assets) * widen(self.total_supplied_shares);
        lhs >= rhs
    }
}

/// Anything that can report debt against the hub's index
pub trait HasTotalDebt {
    /// Entity name for errors
    fn entity(&self) -> Entity;

    /// Drawn and premium debt
    fn debt(&self, index: &InterestIndex) -> Result<Debt>;

    /// Drawn plus premium debt
    fn total_debt(&self, index: &InterestIndex) -> Result<U256> {
        self.debt(index)?.total()
    }
}

/// Anything whose tracked fields can be bounds-checked
pub trait HasBounds {
    /// Verify every derived quantity stays representable and non-negative
    fn check_bounds(&self, index: &InterestIndex) -> Result<()>;
}

impl HasBounds for LedgerAccount {
    fn check_bounds(&self, index: &InterestIndex) -> Result<()> {
        premium::accrued_premium(index, self).map(|_| ())
    }
}

/// Fail with `TotalDebtIncreased` if `who` now owes more than 1 unit above `before`
pub fn check_total_debt<T: HasTotalDebt + ?Sized>(
    before: U256,
    who: &T,
    index: &InterestIndex,
) -> Result<()> {
    let after = who.total_debt(index)?;
    if after > before && after - before > U256::from(1u8) {
        tracing::error!(
            entity = %who.entity(),
            before = %before,
            after = %after,
            "total debt increased on premium refresh"
        );
        return Err(Error::TotalDebtIncreased {
            entity: who.entity(),
            before,
            after,
        });
    }
    Ok(())
}
