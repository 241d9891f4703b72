//! Compounding drawn-debt index
//!
//! The index is advanced at most once per logical timestamp by multiplying
//! it with a sampled per-step rate. Drawn shares and ghost shares are both
//! valued against it.

use crate::math::{ray_div, ray_mul, Rounding, RAY};
use crate::sampler::RateSampler;
use crate::{Error, Result};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Ray-scaled compounding index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestIndex {
    value: U256,
    last_update_timestamp: u64,
}

impl Default for InterestIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InterestIndex {
    /// Index at 1 ray, never updated
    pub fn new() -> Self {
        Self {
            value: RAY,
            last_update_timestamp: 0,
        }
    }

    /// Current index value (ray)
    pub fn value(&self) -> U256 {
        self.value
    }

    /// Timestamp of the last accrual
    pub fn last_update_timestamp(&self) -> u64 {
        self.last_update_timestamp
    }

    /// Advance the index to `now`.
    ///
    /// Returns `false` without sampling when already accrued at `now`.
    pub fn accrue(&mut self, now: u64, sampler: &mut dyn RateSampler) -> Result<bool> {
        if self.last_update_timestamp == now {
            return Ok(false);
        }

        let multiplier = sampler.index_multiplier();
        if multiplier < RAY {
            return Err(Error::InvalidRate(format!(
                "index multiplier {} is below 1 ray",
                multiplier
            )));
        }

        let next = ray_mul(self.value, multiplier, Rounding::Floor)?;
        tracing::trace!(previous = %self.value, next = %next, now, "accrued drawn index");

        self.value = next;
        self.last_update_timestamp = now;
        Ok(true)
    }

    /// `shares * index`
    pub fn to_assets(&self, shares: U256, rounding: Rounding) -> Result<U256> {
        ray_mul(shares, self.value, rounding)
    }

    /// `assets / index`
    pub fn to_shares(&self, assets: U256, rounding: Rounding) -> Result<U256> {
        ray_div(assets, self.value, rounding)
    }

    /// Debt value of drawn or ghost shares; always rounds in the pool's favor
    pub fn to_drawn_debt(&self, shares: U256) -> Result<U256> {
        self.to_assets(shares, Rounding::Ceil)
    }

    /// Baseline offset for freshly minted ghost shares
    pub fn preview_offset(&self, ghost_shares: U256) -> Result<U256> {
        self.to_assets(ghost_shares, Rounding::Floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::ScriptedRates;

    fn one_and_half() -> U256 {
        RAY + RAY / U256::from(2)
    }

    #[test]
    fn test_new_index_is_one_ray() {
        let index = InterestIndex::new();
        assert_eq!(index.value(), RAY);
        assert_eq!(index.last_update_timestamp(), 0);
    }

    #[test]
    fn test_accrue_is_idempotent_within_timestamp() {
        let mut sampler = ScriptedRates::new(vec![one_and_half()], vec![U256::ZERO]);
        let mut index = InterestIndex::new();

        assert!(index.accrue(1, &mut sampler).unwrap());
        let after_first = index.value();
        assert!(!index.accrue(1, &mut sampler).unwrap());

        assert_eq!(index.value(), after_first);
        assert_eq!(after_first, one_and_half());
    }

    #[test]
    fn test_accrue_compounds() {
        let mut sampler = ScriptedRates::new(vec![one_and_half()], vec![U256::ZERO]);
        let mut index = InterestIndex::new();
        index.accrue(1, &mut sampler).unwrap();
        index.accrue(2, &mut sampler).unwrap();
        // 1.5 * 1.5 = 2.25
        assert_eq!(index.value(), RAY * U256::from(9) / U256::from(4));
    }

    #[test]
    fn test_accrue_rejects_shrinking_rate() {
        let mut sampler = ScriptedRates::new(vec![RAY - U256::from(1)], vec![U256::ZERO]);
        let mut index = InterestIndex::new();
        assert!(matches!(
            index.accrue(1, &mut sampler),
            Err(Error::InvalidRate(_))
        ));
        assert_eq!(index.value(), RAY);
    }

    #[test]
    fn test_conversions_round_as_requested() {
        let mut sampler = ScriptedRates::new(vec![one_and_half()], vec![U256::ZERO]);
        let mut index = InterestIndex::new();
        index.accrue(1, &mut sampler).unwrap();

        // 3 shares * 1.5 = 4.5 assets
        assert_eq!(index.to_assets(U256::from(3), Rounding::Floor).unwrap(), U256::from(4));
        assert_eq!(index.to_drawn_debt(U256::from(3)).unwrap(), U256::from(5));
        assert_eq!(index.preview_offset(U256::from(3)).unwrap(), U256::from(4));
        // 5 assets / 1.5 = 3.33 shares
        assert_eq!(index.to_shares(U256::from(5), Rounding::Floor).unwrap(), U256::from(3));
        assert_eq!(index.to_shares(U256::from(5), Rounding::Ceil).unwrap(), U256::from(4));
    }
}
