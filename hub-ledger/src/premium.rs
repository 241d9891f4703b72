//! Premium debt bookkeeping
//!
//! Premium debt rides on a second share pool (ghost shares) valued against
//! the same drawn index as principal. The offset freezes the ghost value at
//! the last reset, so only growth since then counts as accrued premium:
//!
//! ```text
//! premium_debt = assets(ghost, CEIL) - offset + realised_premium
//! ```
//!
//! Changing a borrower's rate is a two-phase re-roll. `crystallize` moves
//! the accrued part into `realised_premium` and zeroes the ghost position.
//! `reset` mints fresh ghost shares for the new rate with an offset equal
//! to their current value, so nothing already accrued is rewritten. Each
//! phase is pushed up the tree as its own refresh.

use crate::index::InterestIndex;
use crate::math::{percent_mul, Rounding, MAX_UINT};
use crate::types::{checked_add, Debt, Delta, Entity, LedgerAccount, PremiumDelta};
use crate::{Error, Result};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Premium accrued since the last reset; fails if negative
pub fn accrued_premium(index: &InterestIndex, account: &LedgerAccount) -> Result<U256> {
    let ghost_assets = index.to_drawn_debt(account.ghost_drawn_shares)?;
    ghost_assets.checked_sub(account.offset).ok_or_else(|| {
        Error::NegativeValue(format!(
            "accrued premium: ghost assets {} below offset {}",
            ghost_assets, account.offset
        ))
    })
}

/// Accrued plus realised premium
pub fn premium_debt(index: &InterestIndex, account: &LedgerAccount) -> Result<U256> {
    checked_add(
        accrued_premium(index, account)?,
        account.realised_premium,
        Entity::Math,
        "premium_debt",
    )
}

/// Fold accrued premium into `realised_premium` and clear the ghost position.
///
/// Returns the refresh that the parent tiers must apply.
pub fn crystallize(
    account: &mut LedgerAccount,
    index: &InterestIndex,
    entity: Entity,
) -> Result<PremiumDelta> {
    let accrued = accrued_premium(index, account)?;
    let realised = checked_add(account.realised_premium, accrued, entity, "realised_premium")?;

    let delta = PremiumDelta {
        ghost_drawn_shares: Delta::Decrease(account.ghost_drawn_shares),
        offset: Delta::Decrease(account.offset),
        realised_premium: Delta::Increase(accrued),
    };

    account.ghost_drawn_shares = U256::ZERO;
    account.offset = U256::ZERO;
    account.realised_premium = realised;

    tracing::debug!(entity = %entity, accrued = %accrued, "crystallized premium");
    Ok(delta)
}

/// Mint ghost shares for `risk_premium` against the current drawn shares.
pub fn reset(
    account: &mut LedgerAccount,
    index: &InterestIndex,
    risk_premium: U256,
) -> Result<PremiumDelta> {
    let ghost = percent_mul(account.drawn_shares, risk_premium, Rounding::Floor)?;
    let offset = index.preview_offset(ghost)?;

    let delta = PremiumDelta {
        ghost_drawn_shares: Delta::between(account.ghost_drawn_shares, ghost),
        offset: Delta::between(account.offset, offset),
        realised_premium: Delta::ZERO,
    };

    account.ghost_drawn_shares = ghost;
    account.offset = offset;
    Ok(delta)
}

/// How a repayment is divided between principal and premium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtSplit {
    /// Principal repaid
    pub drawn_debt_restored: U256,
    /// Premium repaid
    pub premium_debt_restored: U256,
}

/// Split `amount` over `debt`, premium first.
///
/// `MAX_UINT` repays everything. Exceeding either component is a logic
/// error, not an input error.
pub fn deduct_from_premium(debt: Debt, amount: U256) -> Result<DebtSplit> {
    if amount == MAX_UINT {
        return Ok(DebtSplit {
            drawn_debt_restored: debt.drawn_debt,
            premium_debt_restored: debt.premium_debt,
        });
    }

    let split = if amount < debt.premium_debt {
        DebtSplit {
            drawn_debt_restored: U256::ZERO,
            premium_debt_restored: amount,
        }
    } else {
        DebtSplit {
            drawn_debt_restored: amount - debt.premium_debt,
            premium_debt_restored: debt.premium_debt,
        }
    };

    if split.drawn_debt_restored > debt.drawn_debt {
        tracing::error!(
            restored = %split.drawn_debt_restored,
            drawn_debt = %debt.drawn_debt,
            "drawn restored exceeds drawn debt"
        );
        return Err(Error::DrawnRestoredExceedsDrawnDebt {
            restored: split.drawn_debt_restored,
            debt: debt.drawn_debt,
        });
    }

    if split.premium_debt_restored > debt.premium_debt {
        tracing::error!(
            restored = %split.premium_debt_restored,
            premium_debt = %debt.premium_debt,
            "premium restored exceeds premium debt"
        );
        return Err(Error::PremiumRestoredExceedsPremiumDebt {
            restored: split.premium_debt_restored,
            debt: debt.premium_debt,
        });
    }

    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::RAY;
    use crate::sampler::ScriptedRates;
    use crate::types::UserId;

    fn u(value: u64) -> U256 {
        U256::from(value)
    }

    fn index_at(multiplier: U256) -> InterestIndex {
        let mut index = InterestIndex::new();
        let mut rates = ScriptedRates::constant(multiplier, U256::ZERO);
        index.accrue(1, &mut rates).unwrap();
        index
    }

    fn debt(drawn: u64, premium: u64) -> Debt {
        Debt {
            drawn_debt: u(drawn),
            premium_debt: u(premium),
        }
    }

    #[test]
    fn test_accrued_premium_negative_is_error() {
        let index = InterestIndex::new();
        let account = LedgerAccount {
            ghost_drawn_shares: u(10),
            offset: u(11),
            ..Default::default()
        };
        assert!(matches!(
            accrued_premium(&index, &account),
            Err(Error::NegativeValue(_))
        ));
    }

    #[test]
    fn test_premium_debt_grows_with_index() {
        let mut account = LedgerAccount {
            drawn_shares: u(1_000),
            ..Default::default()
        };
        let start = InterestIndex::new();
        // 10% premium -> 100 ghost shares at offset 100
        reset(&mut account, &start, u(1_000)).unwrap();
        assert_eq!(account.ghost_drawn_shares, u(100));
        assert_eq!(account.offset, u(100));
        assert_eq!(premium_debt(&start, &account).unwrap(), U256::ZERO);

        let doubled = index_at(RAY * u(2));
        assert_eq!(premium_debt(&doubled, &account).unwrap(), u(100));
    }

    #[test]
    fn test_crystallize_moves_accrued_into_realised() {
        let index = index_at(RAY * u(2));
        let mut account = LedgerAccount {
            drawn_shares: u(1_000),
            ghost_drawn_shares: u(100),
            offset: u(100),
            realised_premium: u(7),
            ..Default::default()
        };

        let delta = crystallize(&mut account, &index, Entity::User(UserId(1))).unwrap();

        assert_eq!(account.ghost_drawn_shares, U256::ZERO);
        assert_eq!(account.offset, U256::ZERO);
        assert_eq!(account.realised_premium, u(107));
        assert_eq!(delta.ghost_drawn_shares, Delta::Decrease(u(100)));
        assert_eq!(delta.offset, Delta::Decrease(u(100)));
        assert_eq!(delta.realised_premium, Delta::Increase(u(100)));
        // premium debt unchanged by crystallizing
        assert_eq!(premium_debt(&index, &account).unwrap(), u(107));
    }

    #[test]
    fn test_crystallize_then_reset_preserves_premium_debt() {
        let index = index_at(RAY + RAY / u(2));
        let mut account = LedgerAccount {
            drawn_shares: u(2_000),
            ghost_drawn_shares: u(200),
            offset: u(200),
            ..Default::default()
        };
        let before = premium_debt(&index, &account).unwrap();
        assert_eq!(before, u(100));

        crystallize(&mut account, &index, Entity::User(UserId(1))).unwrap();
        let delta = reset(&mut account, &index, u(500)).unwrap();

        // 5% of 2000 shares, valued at 1.5
        assert_eq!(account.ghost_drawn_shares, u(100));
        assert_eq!(account.offset, u(150));
        assert_eq!(delta.ghost_drawn_shares, Delta::Increase(u(100)));
        assert_eq!(delta.offset, Delta::Increase(u(150)));
        assert_eq!(premium_debt(&index, &account).unwrap(), before);
    }

    #[test]
    fn test_deduct_from_premium_premium_first() {
        let split = deduct_from_premium(debt(100, 30), u(20)).unwrap();
        assert_eq!(split.premium_debt_restored, u(20));
        assert_eq!(split.drawn_debt_restored, U256::ZERO);

        let split = deduct_from_premium(debt(100, 30), u(50)).unwrap();
        assert_eq!(split.premium_debt_restored, u(30));
        assert_eq!(split.drawn_debt_restored, u(20));
    }

    #[test]
    fn test_deduct_from_premium_full_sentinel() {
        let split = deduct_from_premium(debt(100, 30), MAX_UINT).unwrap();
        assert_eq!(split.premium_debt_restored, u(30));
        assert_eq!(split.drawn_debt_restored, u(100));
    }

    #[test]
    fn test_deduct_from_premium_over_repay_is_error() {
        let result = deduct_from_premium(debt(100, 30), u(131));
        assert!(matches!(
            result,
            Err(Error::DrawnRestoredExceedsDrawnDebt { .. })
        ));
    }
}
