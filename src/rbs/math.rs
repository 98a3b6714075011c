//! Fixed-point helpers (floor division everywhere)

use super::types::{Amount, BPS_DENOMINATOR};

const LOW_MASK: u128 = u64::MAX as u128;

/// `a * b / denominator`, floored, without intermediate overflow
///
/// The product is carried in 256 bits. Results that do not fit in `u128`
/// saturate to `Amount::MAX`; a zero denominator yields 0.
pub fn mul_div(a: Amount, b: Amount, denominator: Amount) -> Amount {
    if denominator == 0 {
        return 0;
    }
    if let Some(product) = a.checked_mul(b) {
        return product / denominator;
    }

    let (hi, lo) = widening_mul(a, b);
    if hi >= denominator {
        return Amount::MAX;
    }

    // Restoring long division of (hi, lo) by denominator, one bit at a time
    let mut rem = hi;
    let mut quotient: u128 = 0;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        quotient <<= 1;
        if carry == 1 || rem >= denominator {
            rem = rem.wrapping_sub(denominator);
            quotient |= 1;
        }
    }
    quotient
}

/// Full 256-bit product as (high, low) halves
fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    let (a1, a0) = (a >> 64, a & LOW_MASK);
    let (b1, b0) = (b >> 64, b & LOW_MASK);

    let lo = a0 * b0;
    let mid1 = a1 * b0;
    let mid2 = a0 * b1;
    let hi = a1 * b1;

    let t = (lo >> 64) + (mid1 & LOW_MASK) + (mid2 & LOW_MASK);
    let low = (lo & LOW_MASK) | ((t & LOW_MASK) << 64);
    let high = hi + (mid1 >> 64) + (mid2 >> 64) + (t >> 64);
    (high, low)
}

/// Apply a basis-point fraction to `amount`
pub fn apply_bps(amount: Amount, bps: u32) -> Amount {
    mul_div(amount, bps as Amount, BPS_DENOMINATOR as Amount)
}

/// |current − target| × 10000 / target, saturating at `u32::MAX`
pub fn deviation_bps(current: Amount, target: Amount) -> u32 {
    if target == 0 {
        return 0;
    }
    let diff = current.abs_diff(target);
    let bps = mul_div(diff, BPS_DENOMINATOR as Amount, target);
    u32::try_from(bps).unwrap_or(u32::MAX)
}
