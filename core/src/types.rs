//! Shared primitive types used across the entire engine.

use num_bigint::BigUint;

/// A single integer outcome of a roll.
pub type Value = i64;

/// An arbitrary-precision, non-negative weight. Weights never overflow,
/// no matter how many distributions are convolved together.
pub type Weight = BigUint;

/// Number of observed draws for one value in an empirical histogram.
pub type Count = u64;
