//! Borrower and supplier accounts

use crate::index::InterestIndex;
use crate::types::{Debt, Entity, HasBounds, HasTotalDebt, LedgerAccount, SpokeId, UserId};
use crate::Result;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// A user within one spoke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier
    pub id: UserId,
    /// Spoke the user belongs to
    pub spoke: SpokeId,
    /// Share and premium balances
    pub account: LedgerAccount,
    /// Current risk premium (bps)
    pub risk_premium: U256,
}

impl User {
    /// Fresh user with empty balances
    pub fn new(id: UserId, spoke: SpokeId, risk_premium: U256) -> Self {
        Self {
            id,
            spoke,
            account: LedgerAccount::default(),
            risk_premium,
        }
    }

    /// Whether the user holds any supply or debt shares
    pub fn is_active(&self) -> bool {
        !self.account.drawn_shares.is_zero()
            || !self.account.supplied_shares.is_zero()
            || !self.account.realised_premium.is_zero()
    }
}

impl HasTotalDebt for User {
    fn entity(&self) -> Entity {
        Entity::User(self.id)
    }

    fn debt(&self, index: &InterestIndex) -> Result<Debt> {
        self.account.debt(index)
    }
}

impl HasBounds for User {
    fn check_bounds(&self, index: &InterestIndex) -> Result<()> {
        self.account.check_bounds(index)
    }
}
