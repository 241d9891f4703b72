//! The whole ledger tree and its user-facing API
//!
//! Every user operation runs as a transaction:
//!
//! ```text
//! accrue ─► snapshot exchange ratio ─► checkpoint hub/spoke/user
//!        ─► operation ─┬─ Err ─► restore checkpoint, return error
//!                      └─ Ok  ─► exchange ratio check + invariant suite
//! ```
//!
//! Invariant failures are reported after the operation has committed; the
//! state is kept so it can be inspected.

use crate::config::{Assignment, InvariantConfig, SimulationConfig};
use crate::context::SimulationContext;
use crate::diagnostics;
use crate::hub::Hub;
use crate::invariants::{InvariantReport, InvariantSuite, LedgerView};
use crate::math::{Rounding, MAX_UINT};
use crate::metrics::Metrics;
use crate::sampler::{RandomAssigner, RoundRobinAssigner, SpokeAssigner};
use crate::spoke::{RepayOutcome, Spoke};
use crate::types::{Debt, HasTotalDebt, SpokeId, SupplyExchangeRatio, UserId};
use crate::user::User;
use crate::{Error, Result};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// User-facing operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Add liquidity
    Supply,
    /// Remove liquidity
    Withdraw,
    /// Draw debt
    Borrow,
    /// Pay back debt
    Repay,
    /// Re-roll the risk premium
    UpdateRiskPremium,
}

impl Action {
    /// Every action, in a fixed order
    pub const ALL: [Action; 5] = [
        Action::Supply,
        Action::Withdraw,
        Action::Borrow,
        Action::Repay,
        Action::UpdateRiskPremium,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Supply => "supply",
            Action::Withdraw => "withdraw",
            Action::Borrow => "borrow",
            Action::Repay => "repay",
            Action::UpdateRiskPremium => "update_risk_premium",
        };
        f.write_str(name)
    }
}

/// Hub, spokes and users with their simulation context
#[derive(Debug)]
pub struct System {
    hub: Hub,
    spokes: BTreeMap<SpokeId, Spoke>,
    users: BTreeMap<UserId, User>,
    ctx: SimulationContext,
    suite: InvariantSuite,
    invariants_enabled: bool,
    metrics: Metrics,
}

impl System {
    /// Build the tree described by `config` with seeded rates
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        config.validate()?;
        let ctx = SimulationContext::from_config(config);
        let mut assigner: Box<dyn SpokeAssigner> = match config.system.assignment {
            Assignment::Random => Box::new(RandomAssigner::new(config.system.seed.wrapping_add(1))),
            Assignment::RoundRobin => Box::new(RoundRobinAssigner::default()),
        };

        Self::with_context(
            ctx,
            config.system.num_spokes,
            config.system.num_users,
            assigner.as_mut(),
            &config.invariants,
        )
    }

    /// Build a tree over an existing context and assignment strategy
    pub fn with_context(
        mut ctx: SimulationContext,
        num_spokes: usize,
        num_users: usize,
        assigner: &mut dyn SpokeAssigner,
        invariants: &InvariantConfig,
    ) -> Result<Self> {
        if num_spokes == 0 {
            return Err(Error::Config("num_spokes must be at least 1".to_string()));
        }

        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;

        let spoke_ids: Vec<SpokeId> = (0..num_spokes).map(|_| ctx.next_spoke_id()).collect();
        let mut spokes: BTreeMap<SpokeId, Spoke> =
            spoke_ids.iter().map(|&id| (id, Spoke::new(id))).collect();

        let mut users = BTreeMap::new();
        for _ in 0..num_users {
            let user_id = ctx.next_user_id();
            let spoke_id = spoke_ids[assigner.assign(spoke_ids.len()) % spoke_ids.len()];
            let mut user = User::new(user_id, spoke_id, U256::ZERO);
            if let Some(spoke) = spokes.get_mut(&spoke_id) {
                spoke.get_or_create_user(&mut user);
            }
            users.insert(user_id, user);
        }

        tracing::info!(spokes = num_spokes, users = num_users, "system created");

        Ok(Self {
            hub: Hub::new(),
            spokes,
            users,
            ctx,
            suite: InvariantSuite::new(invariants.precision),
            invariants_enabled: invariants.enabled,
            metrics,
        })
    }

    /// The hub
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Spokes by id
    pub fn spokes(&self) -> &BTreeMap<SpokeId, Spoke> {
        &self.spokes
    }

    /// Users by id
    pub fn users(&self) -> &BTreeMap<UserId, User> {
        &self.users
    }

    /// User ids in ascending order
    pub fn user_ids(&self) -> Vec<UserId> {
        self.users.keys().copied().collect()
    }

    /// Look up a user
    pub fn user(&self, id: UserId) -> Result<&User> {
        self.users.get(&id).ok_or(Error::UnknownUser(id))
    }

    /// Collected metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Current logical time
    pub fn now(&self) -> u64 {
        self.ctx.now()
    }

    /// Advance the logical clock
    pub fn skip(&mut self, units: u64) {
        self.ctx.skip(units);
    }

    /// Supply `amount` for `user`; returns shares minted
    pub fn supply(&mut self, user: UserId, amount: U256) -> Result<U256> {
        self.execute(Action::Supply, user, Some(amount), |spoke, hub, user, ctx| {
            spoke.supply(hub, user, ctx, amount)
        })
    }

    /// Withdraw up to `amount` for `user`; `MAX_UINT` withdraws everything
    pub fn withdraw(&mut self, user: UserId, amount: U256) -> Result<U256> {
        self.execute(Action::Withdraw, user, Some(amount), |spoke, hub, user, ctx| {
            spoke.withdraw(hub, user, ctx, amount)
        })
    }

    /// Borrow `amount` for `user`; returns drawn shares minted
    pub fn borrow(&mut self, user: UserId, amount: U256) -> Result<U256> {
        self.execute(Action::Borrow, user, Some(amount), |spoke, hub, user, ctx| {
            spoke.borrow(hub, user, ctx, amount)
        })
    }

    /// Repay `amount` for `user`; `MAX_UINT` repays the full debt
    pub fn repay(&mut self, user: UserId, amount: U256) -> Result<RepayOutcome> {
        self.execute(Action::Repay, user, Some(amount), |spoke, hub, user, ctx| {
            spoke.repay(hub, user, ctx, amount)
        })
    }

    /// Re-roll `user`'s risk premium
    pub fn update_risk_premium(&mut self, user: UserId) -> Result<()> {
        self.execute(Action::UpdateRiskPremium, user, None, |spoke, hub, user, ctx| {
            spoke.update_user_risk_premium(hub, user, ctx)
        })
    }

    /// Drawn and premium debt of `user`
    pub fn get_debt(&mut self, user: UserId) -> Result<Debt> {
        self.accrue()?;
        self.user(user)?.debt(&self.hub.index)
    }

    /// Total debt of `user`
    pub fn get_total_debt(&mut self, user: UserId) -> Result<U256> {
        self.get_debt(user)?.total()
    }

    /// Asset value of `user`'s supply shares
    pub fn get_supplied_balance(&mut self, user: UserId) -> Result<U256> {
        self.accrue()?;
        let shares = self.user(user)?.account.supplied_shares;
        self.hub.to_supply_assets(shares, Rounding::Floor)
    }

    /// Shares a supply of `amount` would mint right now
    pub fn preview_supply_shares(&mut self, amount: U256) -> Result<U256> {
        self.accrue()?;
        self.hub.to_supply_shares(amount, Rounding::Floor)
    }

    /// Repay every user with outstanding debt in full.
    ///
    /// Input errors skip the user; logic errors abort.
    pub fn repay_all(&mut self) -> Result<()> {
        for id in self.user_ids() {
            if !self.user(id)?.is_active() || self.get_total_debt(id)?.is_zero() {
                continue;
            }
            skip_input_error(id, Action::Repay, self.repay(id, MAX_UINT).map(|_| ()))?;
        }
        self.check_invariants()
    }

    /// Withdraw every user's supply.
    ///
    /// Input errors skip the user; logic errors abort.
    pub fn withdraw_all(&mut self) -> Result<()> {
        for id in self.user_ids() {
            if !self.user(id)?.is_active() || self.get_supplied_balance(id)?.is_zero() {
                continue;
            }
            skip_input_error(id, Action::Withdraw, self.withdraw(id, MAX_UINT).map(|_| ()))?;
        }
        self.check_invariants()
    }

    /// Run the invariant suite over the tree
    pub fn run_invariants(&mut self) -> InvariantReport {
        if let Err(err) = self.accrue() {
            let mut report = InvariantReport::new();
            report.push(
                crate::invariants::Invariant::ValuesWithinBounds,
                format!("accrual failed: {}", err),
            );
            return report;
        }
        let report = self.suite.run(self.view());
        self.metrics.record_invariant_run(report.violations().len());
        report
    }

    /// Run the invariant suite; `InvariantViolation` on any failure
    pub fn check_invariants(&mut self) -> Result<()> {
        if !self.invariants_enabled {
            return Ok(());
        }
        let report = self.run_invariants();
        if !report.is_clean() {
            diagnostics::dump_hub(&self.hub);
        }
        report.into_result()
    }

    fn view(&self) -> LedgerView<'_> {
        LedgerView {
            hub: &self.hub,
            spokes: &self.spokes,
            users: &self.users,
        }
    }

    fn accrue(&mut self) -> Result<()> {
        if self.hub.accrue(&mut self.ctx)? {
            self.metrics.record_accrual();
        }
        Ok(())
    }

    /// Resolve the user's spoke, accrue and snapshot the supply exchange ratio
    fn prepare(&mut self, user_id: UserId) -> Result<(SpokeId, SupplyExchangeRatio)> {
        let spoke_id = self.user(user_id)?.spoke;
        if !self.spokes.contains_key(&spoke_id) {
            return Err(Error::UnknownSpoke(spoke_id));
        }

        self.accrue()?;
        tracing::debug!(
            debt_exchange_ratio = %diagnostics::format_units(self.hub.debt_exchange_ratio()?, 50),
            "before action"
        );
        Ok((spoke_id, self.hub.supply_exchange_ratio()?))
    }

    fn execute<T>(
        &mut self,
        action: Action,
        user_id: UserId,
        amount: Option<U256>,
        op: impl FnOnce(&mut Spoke, &mut Hub, &mut User, &mut SimulationContext) -> Result<T>,
    ) -> Result<T> {
        match amount {
            Some(amount) => tracing::info!(action = %action, user = %user_id, amount = %amount, "action"),
            None => tracing::info!(action = %action, user = %user_id, "action"),
        }

        self.metrics.record_operation();
        let (spoke_id, ratio_before) = match self.prepare(user_id) {
            Ok(prepared) => prepared,
            Err(err) => {
                self.metrics.record_failure(false);
                tracing::warn!(action = %action, user = %user_id, error = %err, "failed before checkpoint");
                return Err(err);
            }
        };

        let (Some(spoke), Some(user)) = (
            self.spokes.get_mut(&spoke_id),
            self.users.get_mut(&user_id),
        ) else {
            self.metrics.record_failure(false);
            return Err(Error::UnknownUser(user_id));
        };
        let checkpoint = (self.hub.clone(), spoke.clone(), user.clone());

        let result = op(spoke, &mut self.hub, user, &mut self.ctx);
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                if err.is_logic_error() {
                    diagnostics::dump_user(&self.hub, spoke, user);
                }
                let (hub, saved_spoke, saved_user) = checkpoint;
                self.hub = hub;
                *spoke = saved_spoke;
                *user = saved_user;
                self.metrics.record_failure(true);
                tracing::warn!(action = %action, user = %user_id, error = %err, "rolled back");
                return Err(err);
            }
        };

        if self.invariants_enabled {
            let mut report = InvariantReport::new();
            self.suite
                .supply_exchange_rate_is_non_decreasing(&ratio_before, &self.hub, &mut report);
            report.merge(self.suite.run(self.view()));
            self.metrics.record_invariant_run(report.violations().len());
            if !report.is_clean() {
                diagnostics::dump_hub(&self.hub);
                return Err(Error::InvariantViolation(report));
            }
        }

        Ok(value)
    }
}

fn skip_input_error(user: UserId, action: Action, result: Result<()>) -> Result<()> {
    match result {
        Err(err) if !err.is_logic_error() => {
            tracing::warn!(user = %user, action = %action, error = %err, "skipped");
            Ok(())
        }
        other => other,
    }
}
