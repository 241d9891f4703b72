//! Conservation and bounds checks over the whole ledger tree
//!
//! Every check is read-only and independent. Failures are collected into a
//! single [`InvariantReport`] instead of stopping at the first one, so a
//! broken run shows everything that went wrong at once.

use crate::hub::Hub;
use crate::math::{abs_diff, max_abs_diff};
use crate::spoke::Spoke;
use crate::types::{
    checked_add, Entity, HasBounds, HasTotalDebt, LedgerAccount, SpokeId, SupplyExchangeRatio,
    UserId,
};
use crate::user::User;
use crate::{Error, Result};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named invariant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Invariant {
    /// Ghost assets cover the offset, derived totals fit in 256 bits
    ValuesWithinBounds,
    /// Drawn debt agrees across tiers
    SumOfDrawnDebt,
    /// Premium debt and its parts agree across tiers
    SumOfPremiumDebt,
    /// Supplied shares agree across tiers
    SumOfSuppliedShares,
    /// Spoke records match the hub's copies exactly
    HubSpokeAccounting,
    /// Suppliers never lose value
    SupplyExchangeRateIsNonDecreasing,
}

impl Invariant {
    /// Snake-case name used in reports
    pub fn name(&self) -> &'static str {
        match self {
            Invariant::ValuesWithinBounds => "values_within_bounds",
            Invariant::SumOfDrawnDebt => "sum_of_drawn_debt",
            Invariant::SumOfPremiumDebt => "sum_of_premium_debt",
            Invariant::SumOfSuppliedShares => "sum_of_supplied_shares",
            Invariant::HubSpokeAccounting => "hub_spoke_accounting",
            Invariant::SupplyExchangeRateIsNonDecreasing => "supply_exchange_rate_is_non_decreasing",
        }
    }
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One failed check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Which invariant failed
    pub invariant: Invariant,
    /// What was observed
    pub detail: String,
}

/// All failures from one pass of the suite
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantReport {
    violations: Vec<Violation>,
}

impl InvariantReport {
    /// Empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every check passed
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Failures in the order they were found
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Whether `invariant` failed at least once
    pub fn failed(&self, invariant: Invariant) -> bool {
        self.violations.iter().any(|v| v.invariant == invariant)
    }

    /// Record a failure
    pub fn push(&mut self, invariant: Invariant, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::error!(invariant = %invariant, detail = %detail, "invariant failed");
        self.violations.push(Violation { invariant, detail });
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: InvariantReport) {
        self.violations.extend(other.violations);
    }

    /// `Ok` when clean, `InvariantViolation` otherwise
    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(Error::InvariantViolation(self))
        }
    }
}

impl fmt::Display for InvariantReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.is_empty() {
            return f.write_str("none");
        }
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{} failed ({})", violation.invariant, violation.detail)?;
        }
        Ok(())
    }
}

/// The ledger tree under inspection
#[derive(Debug, Clone, Copy)]
pub struct LedgerView<'a> {
    /// The hub
    pub hub: &'a Hub,
    /// Every spoke by id
    pub spokes: &'a BTreeMap<SpokeId, Spoke>,
    /// Every user by id
    pub users: &'a BTreeMap<UserId, User>,
}

/// The battery of checks, parameterised by tolerance
#[derive(Debug, Clone, Copy)]
pub struct InvariantSuite {
    precision: U256,
}

impl InvariantSuite {
    /// Suite with the given absolute tolerance
    pub fn new(precision: u64) -> Self {
        Self {
            precision: U256::from(precision),
        }
    }

    /// Run every tree check
    pub fn run(&self, view: LedgerView<'_>) -> InvariantReport {
        let mut report = InvariantReport::new();
        self.values_within_bounds(view, &mut report);
        self.hub_spoke_accounting(view, &mut report);
        self.sum_of_drawn_debt(view, &mut report);
        self.sum_of_premium_debt(view, &mut report);
        self.sum_of_supplied_shares(view, &mut report);
        report
    }

    /// Ghost assets cover the offset everywhere and derived hub totals fit
    pub fn values_within_bounds(&self, view: LedgerView<'_>, report: &mut InvariantReport) {
        let index = &view.hub.index;
        let mut check = |entity: Entity, result: Result<()>| {
            if let Err(err) = result {
                report.push(Invariant::ValuesWithinBounds, format!("{}: {}", entity, err));
            }
        };

        check(Entity::Hub, view.hub.check_bounds(index));
        for spoke in view.spokes.values() {
            check(spoke.entity(), spoke.check_bounds(index));
        }
        for user in view.users.values() {
            check(user.entity(), user.check_bounds(index));
        }
    }

    /// Hub, spoke and user drawn debt agree
    pub fn sum_of_drawn_debt(&self, view: LedgerView<'_>, report: &mut InvariantReport) {
        let index = &view.hub.index;
        let totals = (|| -> Result<(U256, U256, U256)> {
            let hub = view.hub.drawn_debt()?;
            let spokes = sum(view.spokes.values().map(|s| Ok(s.debt(index)?.drawn_debt)))?;
            let users = sum(view.users.values().map(|u| Ok(u.debt(index)?.drawn_debt)))?;
            Ok((hub, spokes, users))
        })();

        match totals {
            Ok((hub, spokes, users)) => {
                self.three_way(Invariant::SumOfDrawnDebt, "drawn_debt", hub, spokes, users, report);
                self.no_dust(Invariant::SumOfDrawnDebt, "drawn_debt", hub, spokes, users, report);
            }
            Err(err) => report.push(Invariant::SumOfDrawnDebt, err.to_string()),
        }
    }

    /// Premium debt and its ghost, offset and realised parts agree
    pub fn sum_of_premium_debt(&self, view: LedgerView<'_>, report: &mut InvariantReport) {
        let index = &view.hub.index;
        let totals = (|| -> Result<(U256, U256, U256)> {
            let hub = view.hub.premium_debt()?;
            let spokes = sum(view.spokes.values().map(|s| Ok(s.debt(index)?.premium_debt)))?;
            let users = sum(view.users.values().map(|u| Ok(u.debt(index)?.premium_debt)))?;
            Ok((hub, spokes, users))
        })();

        match totals {
            Ok((hub, spokes, users)) => {
                self.pairwise(Invariant::SumOfPremiumDebt, "premium_debt", hub, spokes, users, report);
                self.no_dust(Invariant::SumOfPremiumDebt, "premium_debt", hub, spokes, users, report);
            }
            Err(err) => report.push(Invariant::SumOfPremiumDebt, err.to_string()),
        }

        // ghost_drawn_shares, offset, realised_premium
        for field in 1..4 {
            let name = LedgerAccount::FIELD_NAMES[field];
            let hub = view.hub.account.fields()[field];
            let spokes = sum(view.spokes.values().map(|s| Ok(s.account.fields()[field])));
            let users = sum(view.users.values().map(|u| Ok(u.account.fields()[field])));
            match (spokes, users) {
                (Ok(spokes), Ok(users)) => {
                    self.pairwise(Invariant::SumOfPremiumDebt, name, hub, spokes, users, report)
                }
                (Err(err), _) | (_, Err(err)) => {
                    report.push(Invariant::SumOfPremiumDebt, format!("{}: {}", name, err))
                }
            }
        }
    }

    /// Supplied shares agree between hub and each aggregate
    pub fn sum_of_supplied_shares(&self, view: LedgerView<'_>, report: &mut InvariantReport) {
        let hub = view.hub.account.supplied_shares;
        let spokes = sum(view.spokes.values().map(|s| Ok(s.account.supplied_shares)));
        let users = sum(view.users.values().map(|u| Ok(u.account.supplied_shares)));

        let (spokes, users) = match (spokes, users) {
            (Ok(spokes), Ok(users)) => (spokes, users),
            (Err(err), _) | (_, Err(err)) => {
                report.push(Invariant::SumOfSuppliedShares, err.to_string());
                return;
            }
        };

        let diff = abs_diff(hub, spokes);
        if diff > self.precision {
            report.push(
                Invariant::SumOfSuppliedShares,
                format!("hub {} != spokes {}, diff {}", hub, spokes, diff),
            );
        }
        let diff = abs_diff(hub, users);
        if diff > self.precision {
            report.push(
                Invariant::SumOfSuppliedShares,
                format!("hub {} != users {}, diff {}", hub, users, diff),
            );
        }
    }

    /// Each spoke's own record equals the hub's record of it, exactly
    pub fn hub_spoke_accounting(&self, view: LedgerView<'_>, report: &mut InvariantReport) {
        for id in view.hub.spoke_records().keys() {
            if !view.spokes.contains_key(id) {
                report.push(
                    Invariant::HubSpokeAccounting,
                    format!("{} has no matching spoke", Entity::HubMirror(*id)),
                );
            }
        }

        let unseen = LedgerAccount::default();
        for spoke in view.spokes.values() {
            let record = view.hub.spoke_record(spoke.id).unwrap_or(&unseen);
            let fields = spoke.account.fields().into_iter().zip(record.fields());
            for (name, (own, mirrored)) in LedgerAccount::FIELD_NAMES.iter().zip(fields) {
                if own != mirrored {
                    report.push(
                        Invariant::HubSpokeAccounting,
                        format!(
                            "{}.{} {} != {}.{} {}",
                            spoke.entity(),
                            name,
                            own,
                            Entity::HubMirror(spoke.id),
                            name,
                            mirrored
                        ),
                    );
                }
            }
        }
    }

    /// The supply exchange ratio has not dropped since `before`
    pub fn supply_exchange_rate_is_non_decreasing(
        &self,
        before: &SupplyExchangeRatio,
        hub: &Hub,
        report: &mut InvariantReport,
    ) {
        match hub.supply_exchange_ratio() {
            Ok(after) if after.is_at_least(before) => {}
            Ok(after) => report.push(
                Invariant::SupplyExchangeRateIsNonDecreasing,
                format!(
                    "{}/{} fell below {}/{}",
                    after.total_supplied_assets,
                    after.total_supplied_shares,
                    before.total_supplied_assets,
                    before.total_supplied_shares
                ),
            ),
            Err(err) => report.push(Invariant::SupplyExchangeRateIsNonDecreasing, err.to_string()),
        }
    }

    fn pairwise(
        &self,
        invariant: Invariant,
        name: &str,
        hub: U256,
        spokes: U256,
        users: U256,
        report: &mut InvariantReport,
    ) {
        let diff = abs_diff(hub, spokes);
        if diff > self.precision {
            report.push(invariant, format!("hub {} {} != spokes {}, diff {}", name, hub, spokes, diff));
        }
        let diff = abs_diff(spokes, users);
        if diff > self.precision {
            report.push(invariant, format!("spokes {} {} != users {}, diff {}", name, spokes, users, diff));
        }
    }

    fn three_way(
        &self,
        invariant: Invariant,
        name: &str,
        hub: U256,
        spokes: U256,
        users: U256,
        report: &mut InvariantReport,
    ) {
        self.pairwise(invariant, name, hub, spokes, users, report);
        let diff = max_abs_diff(hub, spokes, users);
        if diff > self.precision {
            report.push(
                invariant,
                format!("max diff of {} over hub/spokes/users is {}", name, diff),
            );
        }
    }

    fn no_dust(
        &self,
        invariant: Invariant,
        name: &str,
        hub: U256,
        spokes: U256,
        users: U256,
        report: &mut InvariantReport,
    ) {
        if !hub.is_zero() {
            return;
        }
        if spokes > self.precision || users > self.precision {
            report.push(
                invariant,
                format!(
                    "dust {} left with hub fully repaid: spokes {}, users {}",
                    name, spokes, users
                ),
            );
        }
    }
}

fn sum(values: impl Iterator<Item = Result<U256>>) -> Result<U256> {
    values.fold(Ok(U256::ZERO), |acc, value| {
        checked_add(acc?, value?, Entity::Math, "sum")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(value: u64) -> U256 {
        U256::from(value)
    }

    struct Tree {
        hub: Hub,
        spokes: BTreeMap<SpokeId, Spoke>,
        users: BTreeMap<UserId, User>,
    }

    impl Tree {
        fn view(&self) -> LedgerView<'_> {
            LedgerView {
                hub: &self.hub,
                spokes: &self.spokes,
                users: &self.users,
            }
        }
    }

    /// One spoke, one user, all three tiers holding `account`
    fn balanced(account: LedgerAccount) -> Tree {
        let mut hub = Hub::new();
        hub.account = account.clone();
        *hub.get_or_create_spoke(SpokeId(1)) = account.clone();

        let mut spoke = Spoke::new(SpokeId(1));
        spoke.account = account.clone();
        let mut user = User::new(UserId(1), SpokeId(1), U256::ZERO);
        user.account = account;

        Tree {
            hub,
            spokes: BTreeMap::from([(SpokeId(1), spoke)]),
            users: BTreeMap::from([(UserId(1), user)]),
        }
    }

    fn sample_account() -> LedgerAccount {
        LedgerAccount {
            drawn_shares: u(1_000),
            ghost_drawn_shares: u(100),
            offset: u(100),
            realised_premium: u(7),
            supplied_shares: u(5_000_000),
        }
    }

    #[test]
    fn test_balanced_tree_is_clean() {
        let tree = balanced(sample_account());
        let report = InvariantSuite::new(3_000).run(tree.view());
        assert!(report.is_clean(), "{}", report);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_mirror_drift_is_exact() {
        let mut tree = balanced(sample_account());
        tree.hub.get_or_create_spoke(SpokeId(1)).offset += u(1);

        let report = InvariantSuite::new(3_000).run(tree.view());
        assert!(report.failed(Invariant::HubSpokeAccounting));
        assert!(!report.failed(Invariant::SumOfPremiumDebt));
    }

    #[test]
    fn test_orphan_mirror_record() {
        let mut tree = balanced(sample_account());
        tree.hub.get_or_create_spoke(SpokeId(9));

        let report = InvariantSuite::new(3_000).run(tree.view());
        assert!(report.failed(Invariant::HubSpokeAccounting));
        assert!(report.to_string().contains("Hub.spokes[9] has no matching spoke"));
    }

    #[test]
    fn test_failures_are_aggregated() {
        let mut tree = balanced(sample_account());
        let user = tree.users.get_mut(&UserId(1)).unwrap();
        user.account.supplied_shares += u(10_000);
        // offset above ghost value breaks bounds and premium sums
        user.account.offset = u(50_000);

        let report = InvariantSuite::new(3_000).run(tree.view());
        assert!(report.failed(Invariant::SumOfSuppliedShares));
        assert!(report.failed(Invariant::ValuesWithinBounds));
        assert!(report.failed(Invariant::SumOfPremiumDebt));
        assert!(report.violations().len() >= 3);

        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("sum_of_supplied_shares failed"));
        assert!(err.is_logic_error());
    }

    #[test]
    fn test_drift_within_precision_passes() {
        let mut tree = balanced(sample_account());
        tree.users.get_mut(&UserId(1)).unwrap().account.supplied_shares += u(3_000);

        let report = InvariantSuite::new(3_000).run(tree.view());
        assert!(report.is_clean(), "{}", report);
    }

    #[test]
    fn test_dust_after_full_repay() {
        let mut tree = balanced(LedgerAccount::default());
        tree.users.get_mut(&UserId(1)).unwrap().account.realised_premium = u(5_000);

        let report = InvariantSuite::new(3_000).run(tree.view());
        assert!(report.failed(Invariant::SumOfPremiumDebt));
        assert!(report
            .violations()
            .iter()
            .any(|v| v.detail.starts_with("dust premium_debt")));
    }

    #[test]
    fn test_exchange_rate_drop_detected() {
        let tree = balanced(sample_account());
        let before = tree.hub.supply_exchange_ratio().unwrap();
        let mut hub = tree.hub.clone();
        hub.account.supplied_shares += u(1_000_000);

        let suite = InvariantSuite::new(3_000);
        let mut report = InvariantReport::new();
        suite.supply_exchange_rate_is_non_decreasing(&before, &tree.hub, &mut report);
        assert!(report.is_clean());

        suite.supply_exchange_rate_is_non_decreasing(&before, &hub, &mut report);
        assert!(report.failed(Invariant::SupplyExchangeRateIsNonDecreasing));
    }

    #[test]
    fn test_report_display() {
        let mut report = InvariantReport::new();
        assert_eq!(report.to_string(), "none");
        report.push(Invariant::SumOfDrawnDebt, "hub 1 != spokes 5000");
        assert_eq!(report.to_string(), "sum_of_drawn_debt failed (hub 1 != spokes 5000)");
    }
}
