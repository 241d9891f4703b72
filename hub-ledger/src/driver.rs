//! Randomized exercise of a running simulation
//!
//! Each step may skip time and may repay or withdraw everything. It then
//! applies one random action for one random user. Amounts are adjusted so
//! the action can usually succeed: a withdraw larger than what the user put
//! in supplies first, and a borrow beyond the pool's liquidity is either
//! shrunk or preceded by a supply.
//!
//! Input errors (zero shares, not enough liquidity) are logged and the step
//! moves on; the actor already rolled the state back. Logic errors and
//! invariant violations end the run.

use crate::actor::SimulationHandle;
use crate::config::{DriverConfig, SimulationConfig};
use crate::math::WAD;
use crate::system::Action;
use crate::types::UserId;
use crate::{Error, Result};
use alloy_primitives::U256;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;

/// Chance of an extra skip after a setup supply
pub const SETUP_SKIP_CHANCE: f64 = 0.5;

/// Redraws before giving up on an amount that mints supply shares
const MAX_SUPPLY_REDRAWS: usize = 1_000;

/// Exclusive upper bound of the whole part of a random amount
const MAX_WHOLE: u64 = 10_000_000_000;

/// Exclusive upper bound of the decimal exponent of a random amount
const MAX_DECIMALS: u32 = 18;

/// Counters collected over one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverSummary {
    /// Steps completed
    pub steps: usize,

    /// Actions that went through
    pub applied: usize,

    /// Actions dropped on an input error
    pub skipped: usize,

    /// Clock advances
    pub clock_skips: usize,

    /// Bulk repays
    pub repay_alls: usize,

    /// Bulk withdrawals
    pub withdraw_alls: usize,

    /// Logical time at the end of the run
    pub final_time: u64,
}

/// Random walk over a [`SimulationHandle`]
#[derive(Debug)]
pub struct Driver {
    handle: SimulationHandle,
    config: DriverConfig,
    rng: StdRng,
    users: Vec<UserId>,
    // principal per user, ignoring yield and interest
    supplied: BTreeMap<UserId, U256>,
    drawn: BTreeMap<UserId, U256>,
    total_available: U256,
    summary: DriverSummary,
}

impl Driver {
    /// Driver over every user currently known to the simulation
    pub async fn new(handle: SimulationHandle, config: DriverConfig, seed: u64) -> Result<Self> {
        let users = handle.user_ids().await?;
        if users.is_empty() {
            return Err(Error::Config("driver needs at least one user".to_string()));
        }

        Ok(Self {
            handle,
            config,
            rng: StdRng::seed_from_u64(seed),
            users,
            supplied: BTreeMap::new(),
            drawn: BTreeMap::new(),
            total_available: U256::ZERO,
            summary: DriverSummary::default(),
        })
    }

    /// Driver seeded from the simulation config
    pub async fn from_config(handle: SimulationHandle, config: &SimulationConfig) -> Result<Self> {
        Self::new(handle, config.driver.clone(), config.system.seed.wrapping_add(2)).await
    }

    /// Run `depth` steps, then repay and withdraw everything
    pub async fn run(mut self) -> Result<DriverSummary> {
        tracing::info!(
            depth = self.config.depth,
            users = self.users.len(),
            "driver started"
        );

        for step in 0..self.config.depth {
            if let Err(err) = self.step().await {
                tracing::error!(step, error = %err, "driver aborted");
                return Err(err);
            }
            self.handle.check_invariants().await?;
            self.summary.steps += 1;
        }

        self.handle.repay_all().await?;
        self.handle.withdraw_all().await?;
        self.summary.final_time = self.handle.now().await?;

        tracing::info!(
            steps = self.summary.steps,
            applied = self.summary.applied,
            skipped = self.summary.skipped,
            "driver finished"
        );
        Ok(self.summary)
    }

    async fn step(&mut self) -> Result<()> {
        if self.chance(self.config.skip_chance) {
            self.skip().await?;
        }
        if self.chance(self.config.repay_all_chance) {
            self.handle.repay_all().await?;
            self.drawn.clear();
            self.summary.repay_alls += 1;
        }
        if self.chance(self.config.withdraw_all_chance) {
            self.handle.withdraw_all().await?;
            self.supplied.clear();
            self.summary.withdraw_alls += 1;
        }

        let action = Action::ALL[self.rng.gen_range(0..Action::ALL.len())];
        let user = self.users[self.rng.gen_range(0..self.users.len())];
        let amount = random_amount(&mut self.rng, self.config.small_amount_chance);

        let result = match action {
            Action::Supply => self.supply(user, amount).await,
            Action::Withdraw => self.withdraw(user, amount).await,
            Action::Borrow => self.borrow(user, amount).await,
            Action::Repay => self.repay(user, amount).await,
            Action::UpdateRiskPremium => self.handle.update_risk_premium(user).await,
        };

        match result {
            Ok(()) => {
                self.summary.applied += 1;
                Ok(())
            }
            Err(err) if !err.is_logic_error() => {
                tracing::warn!(action = %action, user = %user, error = %err, "action skipped");
                self.summary.skipped += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn supply(&mut self, user: UserId, amount: U256) -> Result<()> {
        let amount = self.supply_fresh(user, amount).await?;
        let supplied = self.supplied.entry(user).or_default();
        *supplied = supplied.saturating_add(amount);
        self.total_available = self.total_available.saturating_add(amount);
        Ok(())
    }

    async fn withdraw(&mut self, user: UserId, amount: U256) -> Result<()> {
        let supplied = self.supplied.get(&user).copied().unwrap_or_default();
        let amount = if amount > supplied {
            self.supply_fresh(user, amount).await?;
            let balance = self.handle.get_supplied_balance(user).await?;
            // interest can move the balance by dust before the withdraw
            if self.drawn.values().any(|drawn| !drawn.is_zero()) && self.chance(SETUP_SKIP_CHANCE) {
                self.skip().await?;
            }
            balance
        } else {
            self.supplied.insert(user, supplied - amount);
            self.total_available = self.total_available.saturating_sub(amount);
            amount
        };

        tracing::debug!(user = %user, amount = %amount, "withdrawing");
        self.handle.withdraw(user, amount).await?;
        Ok(())
    }

    async fn borrow(&mut self, user: UserId, mut amount: U256) -> Result<()> {
        if amount > self.total_available {
            if self.total_available < WAD {
                amount = self.supply_fresh(user, amount).await?;
                self.total_available = self.total_available.saturating_add(amount);
                if self.chance(SETUP_SKIP_CHANCE) {
                    self.skip().await?;
                }
            } else {
                amount = random_between(&mut self.rng, U256::from(1u64), self.total_available);
            }
        }

        self.handle.borrow(user, amount).await?;
        let drawn = self.drawn.entry(user).or_default();
        *drawn = drawn.saturating_add(amount);
        self.total_available = self.total_available.saturating_sub(amount);
        Ok(())
    }

    async fn repay(&mut self, user: UserId, mut amount: U256) -> Result<()> {
        let mut drawn = self.drawn.get(&user).copied().unwrap_or_default();
        if drawn < amount {
            amount = self.supply_fresh(user, amount).await?;
            self.handle.borrow(user, amount).await?;
            drawn = drawn.saturating_add(amount);

            let debt = self.handle.get_total_debt(user).await?;
            amount = random_between(&mut self.rng, U256::from(1u64), debt);
            if self.chance(SETUP_SKIP_CHANCE) {
                self.skip().await?;
            }
        }

        self.handle.repay(user, amount).await?;
        self.drawn.insert(user, drawn.saturating_sub(amount));
        self.total_available = self.total_available.saturating_add(amount);
        Ok(())
    }

    /// Supply an amount that mints shares; returns the amount supplied
    async fn supply_fresh(&mut self, user: UserId, amount: U256) -> Result<U256> {
        let amount = self.non_zero_supplied_shares(amount).await?;
        self.handle.supply(user, amount).await?;
        Ok(amount)
    }

    /// Redraw `amount` until a supply of it would mint at least one share
    async fn non_zero_supplied_shares(&mut self, mut amount: U256) -> Result<U256> {
        for _ in 0..MAX_SUPPLY_REDRAWS {
            if !self.handle.preview_supply_shares(amount).await?.is_zero() {
                return Ok(amount);
            }
            amount = random_amount(&mut self.rng, self.config.small_amount_chance);
        }
        Err(Error::ZeroShares { amount })
    }

    async fn skip(&mut self) -> Result<()> {
        self.handle.skip(1).await?;
        self.summary.clock_skips += 1;
        Ok(())
    }

    fn chance(&mut self, probability: f64) -> bool {
        self.rng.gen::<f64>() < probability
    }
}

/// Random amount: a tiny value with probability `small_chance`, otherwise a
/// whole part below 10^10 followed by up to 17 decimals
pub fn random_amount<R: Rng>(rng: &mut R, small_chance: f64) -> U256 {
    if rng.gen::<f64>() < small_chance {
        return U256::from(rng.gen_range(1u64..10));
    }

    let whole = U256::from(rng.gen_range(0..MAX_WHOLE));
    let decimals = rng.gen_range(0..MAX_DECIMALS);
    let scale = U256::from(10u64.pow(decimals));
    whole * scale + padded_fraction(rng, decimals)
}

/// Fraction with `decimals` digits whose leading digit is never zero
fn padded_fraction<R: Rng>(rng: &mut R, decimals: u32) -> U256 {
    if decimals == 0 {
        return U256::ZERO;
    }
    let raw = rng.gen_range(1..10u64.pow(decimals));
    let width = raw.to_string().len() as u32;
    U256::from(raw) * U256::from(10u64.pow(decimals - width))
}

/// Uniform value in `[low, high)`; `low` when the range is empty
pub fn random_between<R: Rng>(rng: &mut R, low: U256, high: U256) -> U256 {
    if high <= low {
        return low;
    }
    let raw = U256::from_limbs(rng.gen::<[u64; 4]>());
    low + raw % (high - low)
}
