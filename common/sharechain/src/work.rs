//! Target and work arithmetic
//!
//! This module converts between the representations of proof-of-work used
//! throughout the share chain:
//! - 256-bit targets (`U256`) and their compact `bits` encoding
//! - expected hash attempts implied by a target, and the inverse
//! - hash digests interpreted as little-endian 256-bit integers

use bitcoin::pow::{CompactTarget, Target};
use primitive_types::{U256, U512};

/// Expected number of hashes needed to find a hash at or below `target`.
///
/// Computes `2^256 / (target + 1)` without leaving 256 bits. A target of
/// zero saturates at `U256::MAX`.
pub fn target_to_average_attempts(target: U256) -> U256 {
    if target == U256::MAX {
        return U256::one();
    }
    if target.is_zero() {
        return U256::MAX;
    }
    // 2^256 / (t + 1) == (2^256 - t - 1) / (t + 1) + 1
    (!target) / (target + U256::one()) + U256::one()
}

/// Target whose expected attempt count is `attempts`: `2^256 / attempts - 1`.
pub fn average_attempts_to_target(attempts: U256) -> U256 {
    if attempts <= U256::one() {
        return U256::MAX;
    }
    // 2^256 / a - 1 == (2^256 - a) / a
    (!attempts + U256::one()) / attempts
}

/// Difficulty relative to the difficulty-1 target (`0xffff << 208`).
pub fn target_to_difficulty(target: U256) -> f64 {
    let diff1 = U256::from(0xffffu64) << 208;
    u256_to_f64(diff1) / (u256_to_f64(target) + 1.0)
}

/// Expand compact `bits` into a 256-bit target.
pub fn bits_to_target(bits: CompactTarget) -> U256 {
    U256::from_little_endian(&Target::from_compact(bits).to_le_bytes())
}

/// Smallest compact encoding whose target is not below `target`'s leading bytes.
///
/// Truncates to three mantissa bytes, so the decoded target never exceeds the input.
pub fn target_to_bits_upper_bound(target: U256) -> CompactTarget {
    Target::from_le_bytes(u256_to_le_bytes(target)).to_compact_lossy()
}

/// Interpret a digest as a little-endian 256-bit integer.
pub fn hash_to_u256(bytes: &[u8; 32]) -> U256 {
    U256::from_little_endian(bytes)
}

/// Little-endian byte representation of `value`.
pub fn u256_to_le_bytes(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (chunk, word) in out.chunks_exact_mut(8).zip(value.0.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

/// `a * b / c` with a 512-bit intermediate, saturating at `U256::MAX`.
///
/// Returns zero when `c` is zero.
pub fn mul_div(a: U256, b: U256, c: U256) -> U256 {
    if c.is_zero() {
        return U256::zero();
    }
    let quotient = a.full_mul(b) / U512::from(c);
    let words = quotient.0;
    if words[4..].iter().any(|w| *w != 0) {
        return U256::MAX;
    }
    U256([words[0], words[1], words[2], words[3]])
}

/// Clamp `value` into `[low, high]`.
pub fn clip(value: U256, low: U256, high: U256) -> U256 {
    if value < low {
        low
    } else if value > high {
        high
    } else {
        value
    }
}

fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, word| acc * 18_446_744_073_709_551_616.0 + *word as f64)
}
