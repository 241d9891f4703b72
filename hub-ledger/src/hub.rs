//! The pooled liquidity ledger
//!
//! The Hub owns the drawn index and the idle liquidity. It keeps its own
//! copy of every spoke's balances, keyed by spoke id and created on first
//! reference, and updates that copy in the same call as its totals.

use crate::context::SimulationContext;
use crate::index::InterestIndex;
use crate::math::{mul_div, Rounding};
use crate::types::{
    check_total_debt, checked_add, checked_sub, Debt, Entity, HasBounds, HasTotalDebt,
    LedgerAccount, PremiumDelta, SpokeId, SupplyExchangeRatio,
};
use crate::{Error, Result};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Virtual shares added to the supply pool
pub const VIRTUAL_SHARES: U256 = U256::from_limbs([1_000_000, 0, 0, 0]);

/// Virtual asset added to the supply pool
pub const VIRTUAL_ASSETS: U256 = U256::from_limbs([1, 0, 0, 0]);

/// Global liquidity hub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hub {
    /// Aggregate balances over all spokes
    pub account: LedgerAccount,
    /// Idle pooled assets
    pub liquidity: U256,
    /// Drawn debt index
    pub index: InterestIndex,
    /// Hub-side record of each spoke
    spokes: BTreeMap<SpokeId, LedgerAccount>,
}

impl Hub {
    /// Empty hub with the index at 1 ray
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the drawn index to the context's current time
    pub fn accrue(&mut self, ctx: &mut SimulationContext) -> Result<bool> {
        let now = ctx.now();
        self.index.accrue(now, ctx.rates_mut())
    }

    /// Current drawn index (ray)
    pub fn base_drawn_index(&self) -> U256 {
        self.index.value()
    }

    /// Timestamp of the last accrual
    pub fn last_update_timestamp(&self) -> u64 {
        self.index.last_update_timestamp()
    }

    /// Hub-side record of `spoke`, if it has been seen
    pub fn spoke_record(&self, spoke: SpokeId) -> Option<&LedgerAccount> {
        self.spokes.get(&spoke)
    }

    /// All hub-side spoke records
    pub fn spoke_records(&self) -> &BTreeMap<SpokeId, LedgerAccount> {
        &self.spokes
    }

    /// Register `spoke` if unseen and return its record
    pub fn get_or_create_spoke(&mut self, spoke: SpokeId) -> &mut LedgerAccount {
        self.spokes.entry(spoke).or_insert_with(|| {
            tracing::debug!(spoke = %spoke, "hub registered spoke");
            LedgerAccount::default()
        })
    }

    /// Drawn debt of the whole pool
    pub fn drawn_debt(&self) -> Result<U256> {
        self.index.to_drawn_debt(self.account.drawn_shares)
    }

    /// Premium debt of the whole pool
    pub fn premium_debt(&self) -> Result<U256> {
        crate::premium::premium_debt(&self.index, &self.account)
    }

    /// `liquidity + drawn + premium + 1`
    pub fn total_supply_assets(&self) -> Result<U256> {
        let assets = checked_add(self.liquidity, self.drawn_debt()?, Entity::Hub, "total_supply_assets")?;
        let assets = checked_add(assets, self.premium_debt()?, Entity::Hub, "total_supply_assets")?;
        checked_add(assets, VIRTUAL_ASSETS, Entity::Hub, "total_supply_assets")
    }

    /// `supplied_shares + VIRTUAL_SHARES`
    pub fn total_supply_shares(&self) -> Result<U256> {
        checked_add(
            self.account.supplied_shares,
            VIRTUAL_SHARES,
            Entity::Hub,
            "total_supply_shares",
        )
    }

    /// Value of supply shares in assets
    pub fn to_supply_assets(&self, shares: U256, rounding: Rounding) -> Result<U256> {
        mul_div(
            shares,
            self.total_supply_assets()?,
            self.total_supply_shares()?,
            rounding,
        )
    }

    /// Supply shares worth `assets`
    pub fn to_supply_shares(&self, assets: U256, rounding: Rounding) -> Result<U256> {
        mul_div(
            assets,
            self.total_supply_shares()?,
            self.total_supply_assets()?,
            rounding,
        )
    }

    /// Current supply exchange ratio
    pub fn supply_exchange_ratio(&self) -> Result<SupplyExchangeRatio> {
        Ok(SupplyExchangeRatio {
            total_supplied_assets: self.total_supply_assets()?,
            total_supplied_shares: self.total_supply_shares()?,
        })
    }

    /// Asset value of `10^50` drawn shares; tracks the debt exchange rate
    pub fn debt_exchange_ratio(&self) -> Result<U256> {
        let scale = U256::from(10u64).pow(U256::from(50u64));
        self.index.to_drawn_debt(scale)
    }

    /// Add `amount` of liquidity on behalf of `spoke`; returns shares minted
    pub fn supply(
        &mut self,
        ctx: &mut SimulationContext,
        amount: U256,
        spoke: SpokeId,
    ) -> Result<U256> {
        self.accrue(ctx)?;
        let shares = self.to_supply_shares(amount, Rounding::Floor)?;
        if shares.is_zero() {
            return Err(Error::ZeroShares { amount });
        }

        let supplied = checked_add(self.account.supplied_shares, shares, Entity::Hub, "supplied_shares")?;
        let liquidity = checked_add(self.liquidity, amount, Entity::Hub, "liquidity")?;
        let record = self.get_or_create_spoke(spoke);
        record.supplied_shares =
            checked_add(record.supplied_shares, shares, Entity::HubMirror(spoke), "supplied_shares")?;

        self.account.supplied_shares = supplied;
        self.liquidity = liquidity;
        Ok(shares)
    }

    /// Remove `amount` of liquidity on behalf of `spoke`; returns shares burned
    pub fn withdraw(
        &mut self,
        ctx: &mut SimulationContext,
        amount: U256,
        spoke: SpokeId,
    ) -> Result<U256> {
        self.accrue(ctx)?;
        let shares = self.to_supply_shares(amount, Rounding::Ceil)?;

        let supplied = checked_sub(self.account.supplied_shares, shares, Entity::Hub, "supplied_shares")?;
        let liquidity = checked_sub(self.liquidity, amount, Entity::Hub, "liquidity")?;
        let record = self.get_or_create_spoke(spoke);
        record.supplied_shares =
            checked_sub(record.supplied_shares, shares, Entity::HubMirror(spoke), "supplied_shares")?;

        self.account.supplied_shares = supplied;
        self.liquidity = liquidity;
        self.check_bounds_self()?;
        Ok(shares)
    }

    /// Lend `amount` out of the pool to `spoke`; returns drawn shares minted
    pub fn draw(&mut self, ctx: &mut SimulationContext, amount: U256, spoke: SpokeId) -> Result<U256> {
        self.accrue(ctx)?;
        let shares = self.index.to_shares(amount, Rounding::Ceil)?;

        let liquidity = checked_sub(self.liquidity, amount, Entity::Hub, "liquidity")?;
        let drawn = checked_add(self.account.drawn_shares, shares, Entity::Hub, "drawn_shares")?;
        let record = self.get_or_create_spoke(spoke);
        record.drawn_shares =
            checked_add(record.drawn_shares, shares, Entity::HubMirror(spoke), "drawn_shares")?;

        self.liquidity = liquidity;
        self.account.drawn_shares = drawn;
        Ok(shares)
    }

    /// Take back `base_amount` of principal and `premium_amount` of premium
    /// from `spoke`; returns drawn shares burned.
    ///
    /// Premium state itself is settled through `refresh`.
    pub fn restore(
        &mut self,
        ctx: &mut SimulationContext,
        base_amount: U256,
        premium_amount: U256,
        spoke: SpokeId,
    ) -> Result<U256> {
        self.accrue(ctx)?;
        let shares = self.index.to_shares(base_amount, Rounding::Floor)?;

        let repaid = checked_add(base_amount, premium_amount, Entity::Hub, "liquidity")?;
        let liquidity = checked_add(self.liquidity, repaid, Entity::Hub, "liquidity")?;
        let drawn = checked_sub(self.account.drawn_shares, shares, Entity::Hub, "drawn_shares")?;
        let record = self.get_or_create_spoke(spoke);
        record.drawn_shares =
            checked_sub(record.drawn_shares, shares, Entity::HubMirror(spoke), "drawn_shares")?;

        self.liquidity = liquidity;
        self.account.drawn_shares = drawn;
        Ok(shares)
    }

    /// Apply a spoke's premium change to the hub totals and to its record.
    ///
    /// Neither may see its total debt rise by more than one unit.
    pub fn refresh(&mut self, delta: &PremiumDelta, spoke: SpokeId) -> Result<()> {
        let before = self.total_debt(&self.index)?;
        self.account.apply_premium(delta, Entity::Hub)?;
        self.check_bounds_self()?;
        check_total_debt(before, &*self, &self.index)?;

        let index = self.index.clone();
        let record = self.get_or_create_spoke(spoke);
        let before = MirrorView { id: spoke, account: &*record }.total_debt(&index)?;

        record.apply_premium(delta, Entity::HubMirror(spoke))?;
        record.check_bounds(&index)?;
        check_total_debt(before, &MirrorView { id: spoke, account: &*record }, &index)
    }

    fn check_bounds_self(&self) -> Result<()> {
        self.check_bounds(&self.index)
    }
}

/// Hub-side spoke record viewed as a debtor
struct MirrorView<'a> {
    id: SpokeId,
    account: &'a LedgerAccount,
}

impl HasTotalDebt for MirrorView<'_> {
    fn entity(&self) -> Entity {
        Entity::HubMirror(self.id)
    }

    fn debt(&self, index: &InterestIndex) -> Result<Debt> {
        self.account.debt(index)
    }
}

impl HasTotalDebt for Hub {
    fn entity(&self) -> Entity {
        Entity::Hub
    }

    fn debt(&self, index: &InterestIndex) -> Result<Debt> {
        self.account.debt(index)
    }
}

impl HasBounds for Hub {
    fn check_bounds(&self, index: &InterestIndex) -> Result<()> {
        self.account.check_bounds(index)?;
        self.total_supply_assets().map(|_| ())
    }
}
