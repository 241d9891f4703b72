//! Fixed-point arithmetic
//!
//! All multiply-divide helpers widen to 512 bits before dividing, so
//! `a * b` never overflows ahead of the division. Only a quotient that
//! does not fit back into 256 bits is an error.

use crate::types::Entity;
use crate::{Error, Result};
use alloy_primitives::{U256, U512};
use serde::{Deserialize, Serialize};

/// 1 ray = 10^27
pub const RAY: U256 = U256::from_limbs([11_515_845_246_265_065_472, 54_210_108, 0, 0]);

/// 1 wad = 10^18
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// 100% expressed in basis points
pub const PERCENTAGE_FACTOR: U256 = U256::from_limbs([10_000, 0, 0, 0]);

/// Largest representable amount; doubles as the "everything" sentinel
pub const MAX_UINT: U256 = U256::MAX;

/// Rounding direction for `mul_div`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rounding {
    /// Truncate toward zero
    #[default]
    Floor,
    /// Round up on any nonzero remainder
    Ceil,
    /// Round half to even
    Banker,
}

/// Opposite direction of `rounding`. Banker rounding has none.
pub fn inverse(rounding: Rounding) -> Result<Rounding> {
    match rounding {
        Rounding::Floor => Ok(Rounding::Ceil),
        Rounding::Ceil => Ok(Rounding::Floor),
        Rounding::Banker => Err(Error::InvalidRounding(
            "cannot inverse banker rounding".to_string(),
        )),
    }
}

pub(crate) fn widen(value: U256) -> U512 {
    let [l0, l1, l2, l3] = *value.as_limbs();
    U512::from_limbs([l0, l1, l2, l3, 0, 0, 0, 0])
}

fn narrow(value: U512) -> Option<U256> {
    let limbs = value.as_limbs();
    if limbs[4..].iter().any(|&limb| limb != 0) {
        return None;
    }
    Some(U256::from_limbs([limbs[0], limbs[1], limbs[2], limbs[3]]))
}

/// Computes `(a * b) / c` with the given rounding
pub fn mul_div(a: U256, b: U256, c: U256, rounding: Rounding) -> Result<U256> {
    if c.is_zero() {
        return Err(Error::DivisionByZero);
    }

    let denominator = widen(c);
    let (quotient, remainder) = (widen(a) * widen(b)).div_rem(denominator);

    let round_up = match rounding {
        Rounding::Floor => false,
        Rounding::Ceil => !remainder.is_zero(),
        Rounding::Banker => {
            let double_remainder = remainder + remainder;
            if double_remainder < denominator {
                false
            } else if double_remainder > denominator {
                true
            } else {
                quotient.bit(0)
            }
        }
    };

    let result = if round_up {
        quotient + U512::from_limbs([1, 0, 0, 0, 0, 0, 0, 0])
    } else {
        quotient
    };

    narrow(result).ok_or(Error::Overflow {
        entity: Entity::Math,
        field: "mul_div",
    })
}

/// `a * b / RAY`
pub fn ray_mul(a: U256, b: U256, rounding: Rounding) -> Result<U256> {
    mul_div(a, b, RAY, rounding)
}

/// `a * RAY / b`
pub fn ray_div(a: U256, b: U256, rounding: Rounding) -> Result<U256> {
    mul_div(a, RAY, b, rounding)
}

/// `a * bps / 10_000`
pub fn percent_mul(a: U256, bps: U256, rounding: Rounding) -> Result<U256> {
    mul_div(a, bps, PERCENTAGE_FACTOR, rounding)
}

/// `|a - b|`
pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// Largest pairwise distance between three values
pub fn max_abs_diff(a: U256, b: U256, c: U256) -> U256 {
    abs_diff(a, b).max(abs_diff(b, c)).max(abs_diff(a, c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(value: u128) -> U256 {
        U256::from(value)
    }

    #[test]
    fn test_ray_constant() {
        assert_eq!(RAY, U256::from(10u64).pow(U256::from(27u64)));
        assert_eq!(WAD, U256::from(10u64).pow(U256::from(18u64)));
    }

    #[test]
    fn test_mul_div_rounding_modes() {
        // 7 * 3 / 2 = 10.5
        assert_eq!(mul_div(u(7), u(3), u(2), Rounding::Floor).unwrap(), u(10));
        assert_eq!(mul_div(u(7), u(3), u(2), Rounding::Ceil).unwrap(), u(11));
        // tie rounds to even quotient
        assert_eq!(mul_div(u(7), u(3), u(2), Rounding::Banker).unwrap(), u(10));
        // 9 * 1 / 2 = 4.5 -> 4
        assert_eq!(mul_div(u(9), u(1), u(2), Rounding::Banker).unwrap(), u(4));
        // 11 * 1 / 2 = 5.5 -> 6
        assert_eq!(mul_div(u(11), u(1), u(2), Rounding::Banker).unwrap(), u(6));
        // 10 / 3 = 3.33 -> 3, 11 / 3 = 3.67 -> 4
        assert_eq!(mul_div(u(10), u(1), u(3), Rounding::Banker).unwrap(), u(3));
        assert_eq!(mul_div(u(11), u(1), u(3), Rounding::Banker).unwrap(), u(4));
    }

    #[test]
    fn test_mul_div_exact_has_no_ceil_bump() {
        assert_eq!(mul_div(u(6), u(4), u(8), Rounding::Ceil).unwrap(), u(3));
    }

    #[test]
    fn test_mul_div_division_by_zero() {
        let result = mul_div(u(1), u(1), U256::ZERO, Rounding::Floor);
        assert!(matches!(result, Err(Error::DivisionByZero)));
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // MAX * MAX / MAX must not overflow the intermediate product
        assert_eq!(
            mul_div(MAX_UINT, MAX_UINT, MAX_UINT, Rounding::Floor).unwrap(),
            MAX_UINT
        );
    }

    #[test]
    fn test_mul_div_result_overflow() {
        let result = mul_div(MAX_UINT, u(2), u(1), Rounding::Floor);
        assert!(matches!(result, Err(Error::Overflow { .. })));
    }

    #[test]
    fn test_ray_helpers() {
        let one_and_half = RAY + RAY / u(2);
        assert_eq!(ray_mul(u(100), one_and_half, Rounding::Floor).unwrap(), u(150));
        assert_eq!(ray_div(u(150), one_and_half, Rounding::Floor).unwrap(), u(100));
        assert_eq!(ray_div(u(1), one_and_half, Rounding::Ceil).unwrap(), u(1));
        assert_eq!(ray_div(u(1), one_and_half, Rounding::Floor).unwrap(), u(0));
    }

    #[test]
    fn test_percent_mul() {
        assert_eq!(percent_mul(u(1_000), u(250), Rounding::Floor).unwrap(), u(25));
        assert_eq!(percent_mul(u(3), u(1), Rounding::Floor).unwrap(), u(0));
        assert_eq!(percent_mul(u(3), u(1), Rounding::Ceil).unwrap(), u(1));
    }

    #[test]
    fn test_inverse() {
        assert_eq!(inverse(Rounding::Floor).unwrap(), Rounding::Ceil);
        assert_eq!(inverse(Rounding::Ceil).unwrap(), Rounding::Floor);
        assert!(inverse(Rounding::Banker).is_err());
    }

    #[test]
    fn test_abs_diffs() {
        assert_eq!(abs_diff(u(3), u(10)), u(7));
        assert_eq!(max_abs_diff(u(5), u(1), u(3)), u(4));
    }
}
