//! Configuration for a simulation run

use crate::driver::SETUP_SKIP_CHANCE;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Largest index growth a run may expect, as a power of ten.
///
/// Past this the supply exchange rate outgrows the driver's amounts and the
/// index heads for `U256` overflow.
pub const MAX_INDEX_GROWTH_LOG10: f64 = 40.0;

/// Simulation configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Topology of the ledger tree
    pub system: SystemConfig,

    /// Interest and risk premium sampling
    pub rates: RatesConfig,

    /// Invariant suite
    pub invariants: InvariantConfig,

    /// Randomized driver
    pub driver: DriverConfig,
}

/// How users are spread over spokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    /// Uniformly random spoke per user
    #[default]
    Random,
    /// Users take spokes in turn
    RoundRobin,
}

impl FromStr for Assignment {
    type Err = crate::Error;

    fn from_str(value: &str) -> crate::Result<Self> {
        match value {
            "random" => Ok(Assignment::Random),
            "round_robin" => Ok(Assignment::RoundRobin),
            other => Err(crate::Error::Config(format!(
                "Unknown assignment strategy: {}",
                other
            ))),
        }
    }
}

/// Topology configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Number of spokes
    pub num_spokes: usize,

    /// Number of users
    pub num_users: usize,

    /// Seed for every PRNG in the run
    pub seed: u64,

    /// User to spoke assignment
    pub assignment: Assignment,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            num_spokes: 10,
            num_users: 3000,
            seed: 0,
            assignment: Assignment::Random,
        }
    }
}

/// Rate sampling bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    /// Lowest per-step interest (bps)
    pub min_rate_bps: u64,

    /// Per-step interest upper bound, exclusive (bps)
    pub max_rate_bps: u64,

    /// Lowest risk premium (bps)
    pub min_risk_premium_bps: u64,

    /// Risk premium upper bound, exclusive (bps)
    pub max_risk_premium_bps: u64,
}

impl RatesConfig {
    /// Mean natural log of a multiplier drawn uniformly from the rate range
    pub fn mean_log_multiplier(&self) -> f64 {
        let low = 1.0 + self.min_rate_bps as f64 / 10_000.0;
        let high = 1.0 + self.max_rate_bps as f64 / 10_000.0;
        if high <= low {
            return low.ln();
        }
        let antiderivative = |x: f64| x * x.ln() - x;
        (antiderivative(high) - antiderivative(low)) / (high - low)
    }
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            min_rate_bps: 100,              // 1% per step
            max_rate_bps: 9_900,            // 99% per step
            min_risk_premium_bps: 0,
            max_risk_premium_bps: 100_000,  // 1000%
        }
    }
}

/// Invariant suite configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvariantConfig {
    /// Absolute tolerance for the three-way sums (base units)
    pub precision: u64,

    /// Run the suite after every operation
    pub enabled: bool,
}

impl Default for InvariantConfig {
    fn default() -> Self {
        Self {
            precision: 3_000,
            enabled: true,
        }
    }
}

/// Random walk configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Number of steps
    pub depth: usize,

    /// Chance of advancing the clock before a step
    pub skip_chance: f64,

    /// Chance of repaying every user's debt before a step's action
    pub repay_all_chance: f64,

    /// Chance of withdrawing every user's supply before a step's action
    pub withdraw_all_chance: f64,

    /// Chance of drawing a tiny amount instead of a large one
    pub small_amount_chance: f64,
}

impl DriverConfig {
    /// Upper estimate of clock advances over a run: one optional skip per
    /// step plus one more after a setup supply
    pub fn max_clock_advances(&self) -> f64 {
        self.depth as f64 * (self.skip_chance + SETUP_SKIP_CHANCE)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            depth: 150,
            skip_chance: 0.65,
            repay_all_chance: 0.25,
            withdraw_all_chance: 0.25,
            small_amount_chance: 0.15,
        }
    }
}

impl SimulationConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SimulationConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = SimulationConfig::default();

        if let Some(value) = env_var("HUB_LEDGER_NUM_SPOKES")? {
            config.system.num_spokes = value;
        }

        if let Some(value) = env_var("HUB_LEDGER_NUM_USERS")? {
            config.system.num_users = value;
        }

        if let Some(value) = env_var("HUB_LEDGER_SEED")? {
            config.system.seed = value;
        }

        if let Some(value) = env_var("HUB_LEDGER_ASSIGNMENT")? {
            config.system.assignment = value;
        }

        if let Some(value) = env_var("HUB_LEDGER_DEPTH")? {
            config.driver.depth = value;
        }

        if let Some(value) = env_var("HUB_LEDGER_PRECISION")? {
            config.invariants.precision = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no run can satisfy
    pub fn validate(&self) -> crate::Result<()> {
        if self.system.num_spokes == 0 {
            return Err(crate::Error::Config("num_spokes must be at least 1".to_string()));
        }

        if self.rates.max_rate_bps < self.rates.min_rate_bps {
            return Err(crate::Error::Config(
                "max_rate_bps is below min_rate_bps".to_string(),
            ));
        }

        if self.rates.max_risk_premium_bps < self.rates.min_risk_premium_bps {
            return Err(crate::Error::Config(
                "max_risk_premium_bps is below min_risk_premium_bps".to_string(),
            ));
        }

        let chances = [
            self.driver.skip_chance,
            self.driver.repay_all_chance,
            self.driver.withdraw_all_chance,
            self.driver.small_amount_chance,
        ];
        if chances.iter().any(|chance| !(0.0..=1.0).contains(chance)) {
            return Err(crate::Error::Config(
                "driver chances must be within [0, 1]".to_string(),
            ));
        }

        let growth = self.driver.max_clock_advances() * self.rates.mean_log_multiplier()
            / std::f64::consts::LN_10;
        if growth > MAX_INDEX_GROWTH_LOG10 {
            return Err(crate::Error::Config(format!(
                "depth {} with rates up to {} bps may grow the index by 1e{:.0}, above 1e{}",
                self.driver.depth, self.rates.max_rate_bps, growth, MAX_INDEX_GROWTH_LOG10
            )));
        }

        Ok(())
    }
}

fn env_var<T: FromStr>(key: &str) -> crate::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(None),
    }
}
