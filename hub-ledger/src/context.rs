//! Logical clock, id generators and rate source for one simulation

use crate::config::SimulationConfig;
use crate::sampler::{RateSampler, SeededRates};
use crate::types::{SpokeId, UserId};
use alloy_primitives::U256;

/// Per-run state that would otherwise be global
#[derive(Debug)]
pub struct SimulationContext {
    current_time: u64,
    next_spoke_id: u64,
    next_user_id: u64,
    rates: Box<dyn RateSampler>,
}

impl SimulationContext {
    /// Clock at 1, ids starting at 1
    pub fn new(rates: Box<dyn RateSampler>) -> Self {
        Self {
            current_time: 1,
            next_spoke_id: 0,
            next_user_id: 0,
            rates,
        }
    }

    /// Seeded rates drawn from the configured ranges
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(Box::new(SeededRates::new(config.system.seed, &config.rates)))
    }

    /// Current logical time
    pub fn now(&self) -> u64 {
        self.current_time
    }

    /// Advance the clock by `units`
    pub fn skip(&mut self, units: u64) {
        tracing::debug!(from = self.current_time, units, "skipping");
        self.current_time = self.current_time.saturating_add(units);
    }

    /// Fresh spoke id
    pub fn next_spoke_id(&mut self) -> SpokeId {
        self.next_spoke_id += 1;
        SpokeId(self.next_spoke_id)
    }

    /// Fresh user id
    pub fn next_user_id(&mut self) -> UserId {
        self.next_user_id += 1;
        UserId(self.next_user_id)
    }

    /// Rate source used for accrual
    pub fn rates_mut(&mut self) -> &mut dyn RateSampler {
        self.rates.as_mut()
    }

    /// Sample a new risk premium (bps)
    pub fn sample_risk_premium(&mut self) -> U256 {
        self.rates.risk_premium()
    }
}
