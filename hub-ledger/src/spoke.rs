//! Market-level ledger
//!
//! A spoke performs its own bookkeeping and funnels every liquidity
//! movement through the hub. Premium changes are always pushed upward as a
//! single [`PremiumDelta`] via [`Spoke::refresh`], which applies it to the
//! spoke and then to the hub and the hub's record of this spoke.

use crate::context::SimulationContext;
use crate::hub::Hub;
use crate::index::InterestIndex;
use crate::math::Rounding;
use crate::premium;
use crate::types::{
    check_total_debt, checked_add, checked_sub, Debt, Delta, Entity, HasBounds, HasTotalDebt,
    LedgerAccount, PremiumDelta, SpokeId, UserId,
};
use crate::user::User;
use crate::Result;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Result of a repayment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepayOutcome {
    /// Drawn shares burned
    pub drawn_shares: U256,
    /// Premium debt repaid
    pub premium_restored: U256,
}

/// A market attached to the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spoke {
    /// Stable identifier
    pub id: SpokeId,
    /// Aggregate balances over this spoke's users
    pub account: LedgerAccount,
    /// Registered users
    users: BTreeSet<UserId>,
}

impl Spoke {
    /// Empty spoke
    pub fn new(id: SpokeId) -> Self {
        Self {
            id,
            account: LedgerAccount::default(),
            users: BTreeSet::new(),
        }
    }

    /// Registered users in id order
    pub fn users(&self) -> &BTreeSet<UserId> {
        &self.users
    }

    /// Register `user` with this spoke if not already
    pub fn get_or_create_user(&mut self, user: &mut User) {
        if self.users.insert(user.id) {
            tracing::debug!(spoke = %self.id, user = %user.id, "spoke registered user");
        }
        user.spoke = self.id;
    }

    /// Debt of `user` at the hub's current index
    pub fn user_debt(&self, hub: &Hub, user: &User) -> Result<Debt> {
        user.debt(&hub.index)
    }

    /// Supply `amount`; returns shares minted
    pub fn supply(
        &mut self,
        hub: &mut Hub,
        user: &mut User,
        ctx: &mut SimulationContext,
        amount: U256,
    ) -> Result<U256> {
        self.get_or_create_user(user);
        hub.accrue(ctx)?;
        let shares = hub.supply(ctx, amount, self.id)?;

        self.account.supplied_shares = checked_add(
            self.account.supplied_shares,
            shares,
            self.entity(),
            "supplied_shares",
        )?;
        user.account.supplied_shares = checked_add(
            user.account.supplied_shares,
            shares,
            user.entity(),
            "supplied_shares",
        )?;

        self.update_user_risk_premium(hub, user, ctx)?;
        Ok(shares)
    }

    /// Withdraw up to `amount`, clamped to the user's balance; returns shares burned
    pub fn withdraw(
        &mut self,
        hub: &mut Hub,
        user: &mut User,
        ctx: &mut SimulationContext,
        amount: U256,
    ) -> Result<U256> {
        self.get_or_create_user(user);
        hub.accrue(ctx)?;
        let balance = hub.to_supply_assets(user.account.supplied_shares, Rounding::Floor)?;
        let amount = amount.min(balance);
        let shares = hub.withdraw(ctx, amount, self.id)?;

        self.account.supplied_shares = checked_sub(
            self.account.supplied_shares,
            shares,
            self.entity(),
            "supplied_shares",
        )?;
        user.account.supplied_shares = checked_sub(
            user.account.supplied_shares,
            shares,
            user.entity(),
            "supplied_shares",
        )?;

        self.update_user_risk_premium(hub, user, ctx)?;
        Ok(shares)
    }

    /// Borrow `amount`; returns drawn shares minted
    pub fn borrow(
        &mut self,
        hub: &mut Hub,
        user: &mut User,
        ctx: &mut SimulationContext,
        amount: U256,
    ) -> Result<U256> {
        self.get_or_create_user(user);
        hub.accrue(ctx)?;
        self.crystallize(hub, user)?;

        let shares = hub.draw(ctx, amount, self.id)?;
        self.account.drawn_shares =
            checked_add(self.account.drawn_shares, shares, self.entity(), "drawn_shares")?;
        user.account.drawn_shares =
            checked_add(user.account.drawn_shares, shares, user.entity(), "drawn_shares")?;

        self.reroll(hub, user, ctx)?;
        Ok(shares)
    }

    /// Repay `amount`, premium first; `MAX_UINT` repays everything
    pub fn repay(
        &mut self,
        hub: &mut Hub,
        user: &mut User,
        ctx: &mut SimulationContext,
        amount: U256,
    ) -> Result<RepayOutcome> {
        self.get_or_create_user(user);
        hub.accrue(ctx)?;

        let debt = self.user_debt(hub, user)?;
        let split = premium::deduct_from_premium(debt, amount)?;

        // settle premium: whatever is left of it becomes flat realised premium
        let realised = checked_sub(
            debt.premium_debt,
            split.premium_debt_restored,
            user.entity(),
            "realised_premium",
        )?;
        let delta = PremiumDelta {
            ghost_drawn_shares: Delta::Decrease(user.account.ghost_drawn_shares),
            offset: Delta::Decrease(user.account.offset),
            realised_premium: Delta::between(user.account.realised_premium, realised),
        };
        user.account.ghost_drawn_shares = U256::ZERO;
        user.account.offset = U256::ZERO;
        user.account.realised_premium = realised;
        self.refresh(hub, user, &delta)?;

        // settle principal
        let shares = hub.restore(
            ctx,
            split.drawn_debt_restored,
            split.premium_debt_restored,
            self.id,
        )?;
        self.account.drawn_shares =
            checked_sub(self.account.drawn_shares, shares, self.entity(), "drawn_shares")?;
        user.account.drawn_shares =
            checked_sub(user.account.drawn_shares, shares, user.entity(), "drawn_shares")?;

        self.reroll(hub, user, ctx)?;
        Ok(RepayOutcome {
            drawn_shares: shares,
            premium_restored: split.premium_debt_restored,
        })
    }

    /// Crystallize the user's premium, then reset it at a new risk premium.
    ///
    /// The two phases are refreshed separately. Folded into one refresh,
    /// the ceil on the aggregate ghost value and the floor on the new offset
    /// can each add a unit of debt at the spoke and at the hub.
    pub fn update_user_risk_premium(
        &mut self,
        hub: &mut Hub,
        user: &mut User,
        ctx: &mut SimulationContext,
    ) -> Result<()> {
        self.get_or_create_user(user);
        hub.accrue(ctx)?;
        self.crystallize(hub, user)?;
        self.reroll(hub, user, ctx)
    }

    /// Apply a user's premium change to this spoke, then to the hub
    pub fn refresh(&mut self, hub: &mut Hub, user: &User, delta: &PremiumDelta) -> Result<()> {
        user.check_bounds(&hub.index)?;
        if delta.is_noop() {
            return Ok(());
        }

        let entity = self.entity();
        let before = self.total_debt(&hub.index)?;
        self.account.apply_premium(delta, entity)?;
        self.check_bounds(&hub.index)?;
        check_total_debt(before, &*self, &hub.index)?;

        hub.refresh(delta, self.id)
    }

    /// Fold the user's accrued premium into realised premium
    fn crystallize(&mut self, hub: &mut Hub, user: &mut User) -> Result<()> {
        let entity = user.entity();
        let delta = premium::crystallize(&mut user.account, &hub.index, entity)?;
        self.refresh(hub, user, &delta)
    }

    /// Reset the user's premium against their current drawn shares
    fn reroll(&mut self, hub: &mut Hub, user: &mut User, ctx: &mut SimulationContext) -> Result<()> {
        user.risk_premium = ctx.sample_risk_premium();
        let delta = premium::reset(&mut user.account, &hub.index, user.risk_premium)?;
        tracing::debug!(
            user = %user.id,
            risk_premium = %user.risk_premium,
            ghost_drawn_shares = %user.account.ghost_drawn_shares,
            "reset premium"
        );
        self.refresh(hub, user, &delta)
    }
}

impl HasTotalDebt for Spoke {
    fn entity(&self) -> Entity {
        Entity::Spoke(self.id)
    }

    fn debt(&self, index: &InterestIndex) -> Result<Debt> {
        self.account.debt(index)
    }
}

impl HasBounds for Spoke {
    fn check_bounds(&self, index: &InterestIndex) -> Result<()> {
        self.account.check_bounds(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{MAX_UINT, RAY};
    use crate::sampler::ScriptedRates;
    use crate::Error;

    fn u(value: u64) -> U256 {
        U256::from(value)
    }

    fn setup(multipliers: Vec<U256>, premiums: Vec<U256>) -> (Hub, Spoke, User, SimulationContext) {
        let ctx = SimulationContext::new(Box::new(ScriptedRates::new(multipliers, premiums)));
        let spoke = Spoke::new(SpokeId(1));
        let user = User::new(UserId(1), SpokeId(1), U256::ZERO);
        (Hub::new(), spoke, user, ctx)
    }

    fn assert_mirror_matches(hub: &Hub, spoke: &Spoke) {
        assert_eq!(hub.spoke_record(spoke.id), Some(&spoke.account));
    }

    #[test]
    fn test_supply_then_withdraw_everything() {
        let (mut hub, mut spoke, mut user, mut ctx) = setup(vec![RAY], vec![u(1_000)]);

        let minted = spoke.supply(&mut hub, &mut user, &mut ctx, u(1_000)).unwrap();
        assert_eq!(minted, u(1_000_000_000));
        assert_eq!(user.account.supplied_shares, minted);
        assert_eq!(spoke.account.supplied_shares, minted);
        assert!(spoke.users().contains(&user.id));

        let burned = spoke.withdraw(&mut hub, &mut user, &mut ctx, MAX_UINT).unwrap();
        assert_eq!(burned, minted);
        assert_eq!(user.account.supplied_shares, U256::ZERO);
        assert_eq!(hub.liquidity, U256::ZERO);
        assert_mirror_matches(&hub, &spoke);
    }

    #[test]
    fn test_borrow_sets_premium_baseline() {
        let (mut hub, mut spoke, mut user, mut ctx) = setup(vec![RAY], vec![u(1_000)]);
        spoke.supply(&mut hub, &mut user, &mut ctx, u(10_000)).unwrap();

        let shares = spoke.borrow(&mut hub, &mut user, &mut ctx, u(1_000)).unwrap();

        assert_eq!(shares, u(1_000));
        assert_eq!(user.risk_premium, u(1_000));
        assert_eq!(user.account.ghost_drawn_shares, u(100));
        assert_eq!(user.account.offset, u(100));
        assert_eq!(hub.liquidity, u(9_000));
        assert_eq!(hub.account.ghost_drawn_shares, u(100));
        assert_mirror_matches(&hub, &spoke);
    }

    #[test]
    fn test_full_repay_clears_debt() {
        let (mut hub, mut spoke, mut user, mut ctx) = setup(vec![RAY, RAY * u(2)], vec![u(1_000)]);
        spoke.supply(&mut hub, &mut user, &mut ctx, u(10_000)).unwrap();
        spoke.borrow(&mut hub, &mut user, &mut ctx, u(1_000)).unwrap();
        ctx.skip(1);

        let debt = spoke.user_debt(&hub, &user).unwrap();
        // stale until accrued
        assert_eq!(debt.drawn_debt, u(1_000));

        let outcome = spoke.repay(&mut hub, &mut user, &mut ctx, MAX_UINT).unwrap();

        assert_eq!(outcome.drawn_shares, u(1_000));
        assert_eq!(outcome.premium_restored, u(100));
        assert_eq!(user.total_debt(&hub.index).unwrap(), U256::ZERO);
        assert_eq!(hub.total_debt(&hub.index).unwrap(), U256::ZERO);
        assert_eq!(hub.liquidity, u(11_100));
        assert_mirror_matches(&hub, &spoke);
    }

    #[test]
    fn test_partial_repay_goes_to_premium_first() {
        let (mut hub, mut spoke, mut user, mut ctx) = setup(vec![RAY, RAY * u(2)], vec![u(1_000)]);
        spoke.supply(&mut hub, &mut user, &mut ctx, u(10_000)).unwrap();
        spoke.borrow(&mut hub, &mut user, &mut ctx, u(1_000)).unwrap();
        ctx.skip(1);

        let outcome = spoke.repay(&mut hub, &mut user, &mut ctx, u(50)).unwrap();

        assert_eq!(outcome.drawn_shares, U256::ZERO);
        assert_eq!(outcome.premium_restored, u(50));
        let debt = spoke.user_debt(&hub, &user).unwrap();
        assert_eq!(debt.drawn_debt, u(2_000));
        assert_eq!(debt.premium_debt, u(50));
        assert_eq!(user.account.realised_premium, u(50));
        assert_mirror_matches(&hub, &spoke);
    }

    #[test]
    fn test_update_risk_premium_keeps_total_debt() {
        let (mut hub, mut spoke, mut user, mut ctx) = setup(vec![RAY, RAY * u(2)], vec![u(1_000)]);
        spoke.supply(&mut hub, &mut user, &mut ctx, u(10_000)).unwrap();
        spoke.borrow(&mut hub, &mut user, &mut ctx, u(1_000)).unwrap();
        ctx.skip(1);
        hub.accrue(&mut ctx).unwrap();
        let before = user.total_debt(&hub.index).unwrap();

        spoke.update_user_risk_premium(&mut hub, &mut user, &mut ctx).unwrap();

        assert_eq!(user.total_debt(&hub.index).unwrap(), before);
        assert_eq!(user.account.realised_premium, u(100));
        assert_eq!(user.account.offset, u(200));
        assert_mirror_matches(&hub, &spoke);
    }

    #[test]
    fn test_borrow_beyond_liquidity_fails() {
        let (mut hub, mut spoke, mut user, mut ctx) = setup(vec![RAY], vec![u(1_000)]);
        spoke.supply(&mut hub, &mut user, &mut ctx, u(100)).unwrap();

        let result = spoke.borrow(&mut hub, &mut user, &mut ctx, u(101));
        assert!(matches!(
            result,
            Err(Error::Underflow {
                entity: Entity::Hub,
                field: "liquidity"
            })
        ));
    }

    #[test]
    fn test_over_repay_is_logic_error() {
        let (mut hub, mut spoke, mut user, mut ctx) = setup(vec![RAY], vec![U256::ZERO]);
        spoke.supply(&mut hub, &mut user, &mut ctx, u(1_000)).unwrap();
        spoke.borrow(&mut hub, &mut user, &mut ctx, u(100)).unwrap();

        let err = spoke.repay(&mut hub, &mut user, &mut ctx, u(101)).unwrap_err();
        assert!(matches!(err, Error::DrawnRestoredExceedsDrawnDebt { .. }));
        assert!(err.is_logic_error());
    }
}
