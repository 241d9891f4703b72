//! Injectable sources of rates and spoke assignment
//!
//! The accounting core never draws randomness itself. Index multipliers,
//! risk premiums and user-to-spoke assignment all come from the strategies
//! here, so tests can script exact sequences.

use crate::config::RatesConfig;
use crate::math::RAY;
use alloy_primitives::U256;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

/// Source of per-step index multipliers and risk premiums
pub trait RateSampler: Send + fmt::Debug {
    /// Next index multiplier (ray, at least 1 ray)
    fn index_multiplier(&mut self) -> U256;

    /// Next risk premium (basis points)
    fn risk_premium(&mut self) -> U256;
}

/// Uniform sampling from a seeded PRNG
#[derive(Debug)]
pub struct SeededRates {
    rng: StdRng,
    min_multiplier: u128,
    max_multiplier: u128,
    min_risk_premium: u64,
    max_risk_premium: u64,
}

impl SeededRates {
    /// Sampler over the configured ranges
    pub fn new(seed: u64, config: &RatesConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            min_multiplier: multiplier_from_bps(config.min_rate_bps),
            max_multiplier: multiplier_from_bps(config.max_rate_bps),
            min_risk_premium: config.min_risk_premium_bps,
            max_risk_premium: config.max_risk_premium_bps,
        }
    }
}

/// `RAY * (10_000 + bps) / 10_000`
fn multiplier_from_bps(bps: u64) -> u128 {
    const RAY_U128: u128 = 1_000_000_000_000_000_000_000_000_000;
    const FACTOR: u128 = 10_000;
    RAY_U128 / FACTOR * (FACTOR + bps as u128)
}

impl RateSampler for SeededRates {
    fn index_multiplier(&mut self) -> U256 {
        if self.max_multiplier <= self.min_multiplier {
            return U256::from(self.min_multiplier);
        }
        U256::from(self.rng.gen_range(self.min_multiplier..self.max_multiplier))
    }

    fn risk_premium(&mut self) -> U256 {
        if self.max_risk_premium <= self.min_risk_premium {
            return U256::from(self.min_risk_premium);
        }
        U256::from(self.rng.gen_range(self.min_risk_premium..self.max_risk_premium))
    }
}

/// Replays fixed sequences, cycling when exhausted
#[derive(Debug, Clone)]
pub struct ScriptedRates {
    multipliers: Vec<U256>,
    risk_premiums: Vec<U256>,
    next_multiplier: usize,
    next_risk_premium: usize,
}

impl ScriptedRates {
    /// Empty sequences fall back to 1 ray and 0 bps.
    pub fn new(multipliers: Vec<U256>, risk_premiums: Vec<U256>) -> Self {
        Self {
            multipliers,
            risk_premiums,
            next_multiplier: 0,
            next_risk_premium: 0,
        }
    }

    /// Same multiplier and premium every time
    pub fn constant(multiplier: U256, risk_premium: U256) -> Self {
        Self::new(vec![multiplier], vec![risk_premium])
    }
}

fn cycle(values: &[U256], cursor: &mut usize, fallback: U256) -> U256 {
    if values.is_empty() {
        return fallback;
    }
    let value = values[*cursor % values.len()];
    *cursor += 1;
    value
}

impl RateSampler for ScriptedRates {
    fn index_multiplier(&mut self) -> U256 {
        cycle(&self.multipliers, &mut self.next_multiplier, RAY)
    }

    fn risk_premium(&mut self) -> U256 {
        cycle(&self.risk_premiums, &mut self.next_risk_premium, U256::ZERO)
    }
}

/// Chooses which spoke a new user joins
pub trait SpokeAssigner {
    /// Index into a list of `spoke_count` spokes
    fn assign(&mut self, spoke_count: usize) -> usize;
}

/// Uniformly random assignment
#[derive(Debug)]
pub struct RandomAssigner {
    rng: StdRng,
}

impl RandomAssigner {
    /// Seeded assigner
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SpokeAssigner for RandomAssigner {
    fn assign(&mut self, spoke_count: usize) -> usize {
        self.rng.gen_range(0..spoke_count.max(1))
    }
}

/// Users take spokes in turn
#[derive(Debug, Default)]
pub struct RoundRobinAssigner {
    next: usize,
}

impl SpokeAssigner for RoundRobinAssigner {
    fn assign(&mut self, spoke_count: usize) -> usize {
        let slot = self.next % spoke_count.max(1);
        self.next += 1;
        slot
    }
}
