//! Weighted-distribution algebra.
//!
//! A Distribution is an exact probability mass function over integer
//! outcomes, held as arbitrary-precision weights plus their total.
//!
//! INVARIANTS (hold for every constructed Distribution):
//!   - `values` is strictly ascending (no duplicates).
//!   - Every stored weight is positive.
//!   - `total == Σ weights`.
//!   - `cumulative[k] == Σ_{i≤k} weights[i]`, so `cumulative.last() == total`.
//!
//! Distributions are immutable once built. Combining them goes through
//! `Distribution::convolve`, a merge-then-project fold over independent
//! inputs that keys intermediate results by a caller-chosen merge-state.

use crate::{
    error::{DiceError, DiceResult},
    types::{Value, Weight},
};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{ToPrimitive, Zero};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    values:     Vec<Value>,
    weights:    Vec<Weight>,
    cumulative: Vec<Weight>,
    total:      Weight,
    /// Copy of `cumulative` when `total` fits in a u64, for the sampler's fast path.
    small_cumulative: Option<Vec<u64>>,
}

impl Distribution {
    /// Every face in `[1, sides]` with weight 1.
    pub fn uniform(sides: Value) -> Self {
        Self::from_weights((1..=sides).map(|face| (face, Weight::from(1u32))))
    }

    /// Build from `(value, weight)` pairs in any order. Repeated values have
    /// their weights summed; zero weights are dropped.
    pub fn from_weights<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Value, Weight)>,
    {
        let mut merged: BTreeMap<Value, Weight> = BTreeMap::new();
        for (value, weight) in pairs {
            if weight.is_zero() {
                continue;
            }
            *merged.entry(value).or_insert_with(Weight::zero) += weight;
        }
        Self::from_sorted(merged)
    }

    fn from_sorted(merged: BTreeMap<Value, Weight>) -> Self {
        let mut values = Vec::with_capacity(merged.len());
        let mut weights = Vec::with_capacity(merged.len());
        let mut cumulative = Vec::with_capacity(merged.len());
        let mut running = Weight::zero();

        for (value, weight) in merged {
            running += &weight;
            values.push(value);
            weights.push(weight);
            cumulative.push(running.clone());
        }

        let small_cumulative = running
            .to_u64()
            .map(|_| cumulative.iter().filter_map(|c| c.to_u64()).collect());

        Self {
            values,
            weights,
            cumulative,
            total: running,
            small_cumulative,
        }
    }

    /// Combine independent distributions under a merge rule.
    ///
    /// - `merge(None, v)` seeds a state from the first input's value;
    ///   `merge(Some(s), v)` folds the next input's value into state `s`.
    /// - `project(s)` maps a final state to its output value. States that
    ///   project to the same value have their weights summed.
    ///
    /// Either rule may fail (e.g. on integer overflow); the first error
    /// aborts the convolution. Fails with `StateSpaceExceeded` if more than
    /// `max_states` distinct merge-states are alive after folding any input.
    pub fn convolve<S, M, P>(
        inputs: &[&Distribution],
        merge: M,
        project: P,
        max_states: usize,
    ) -> DiceResult<Distribution>
    where
        S: Eq + Hash,
        M: Fn(Option<&S>, Value) -> DiceResult<S>,
        P: Fn(&S) -> DiceResult<Value>,
    {
        if inputs.is_empty() {
            return Err(DiceError::config("convolution needs at least one input"));
        }

        let mut states: HashMap<S, Weight> = HashMap::new();
        let mut running_total = Weight::from(1u32);

        for input in inputs {
            let mut next: HashMap<S, Weight> = HashMap::new();
            running_total *= &input.total;

            for (value, weight) in input.iter() {
                if states.is_empty() {
                    let state = merge(None, value)?;
                    *next.entry(state).or_insert_with(Weight::zero) += weight;
                    continue;
                }
                for (state, accumulated) in &states {
                    let merged = merge(Some(state), value)?;
                    *next.entry(merged).or_insert_with(Weight::zero) += accumulated * weight;
                }
            }

            if next.len() > max_states {
                return Err(DiceError::StateSpaceExceeded {
                    states: next.len(),
                    limit:  max_states,
                });
            }
            states = next;
        }

        log::debug!(
            "convolve: inputs={} states={} total_bits={}",
            inputs.len(),
            states.len(),
            running_total.bits()
        );

        let projected = states
            .iter()
            .map(|(state, weight)| Ok((project(state)?, weight.clone())))
            .collect::<DiceResult<Vec<(Value, Weight)>>>()?;
        let result = Self::from_weights(projected);
        debug_assert_eq!(
            result.total, running_total,
            "convolution lost weight: product of input totals must equal output total"
        );
        Ok(result)
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Distinct outcomes, ascending.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn total(&self) -> &Weight {
        &self.total
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min(&self) -> Option<Value> {
        self.values.first().copied()
    }

    pub fn max(&self) -> Option<Value> {
        self.values.last().copied()
    }

    /// Weight of `value`; zero when the value cannot occur.
    pub fn weight(&self, value: Value) -> Weight {
        self.index_of(value)
            .map(|i| self.weights[i].clone())
            .unwrap_or_else(Weight::zero)
    }

    /// Running weight of every outcome up to and including `value`.
    pub fn cumulative(&self, value: Value) -> Weight {
        let upto = self.values.partition_point(|v| *v <= value);
        if upto == 0 {
            Weight::zero()
        } else {
            self.cumulative[upto - 1].clone()
        }
    }

    /// `(value, weight)` pairs in ascending value order.
    pub fn iter(&self) -> impl Iterator<Item = (Value, &Weight)> + '_ {
        self.values.iter().copied().zip(self.weights.iter())
    }

    pub(crate) fn cumulative_weights(&self) -> &[Weight] {
        &self.cumulative
    }

    pub(crate) fn small_cumulative(&self) -> Option<&[u64]> {
        self.small_cumulative.as_deref()
    }

    /// Exact probability of `value`.
    pub fn probability(&self, value: Value) -> BigRational {
        BigRational::new(
            BigInt::from(self.weight(value)),
            BigInt::from(self.total.clone()),
        )
    }

    /// Exact probability of every possible outcome.
    pub fn probabilities(&self) -> BTreeMap<Value, BigRational> {
        let total = BigInt::from(self.total.clone());
        self.iter()
            .map(|(value, weight)| {
                (value, BigRational::new(BigInt::from(weight.clone()), total.clone()))
            })
            .collect()
    }

    /// Expected value, computed exactly and rounded to f64 at the end.
    pub fn mean(&self) -> f64 {
        let numerator: BigInt = self
            .iter()
            .map(|(value, weight)| BigInt::from(value) * BigInt::from(weight.clone()))
            .sum();
        BigRational::new(numerator, BigInt::from(self.total.clone()))
            .to_f64()
            .unwrap_or(f64::NAN)
    }

    fn index_of(&self, value: Value) -> Option<usize> {
        self.values.binary_search(&value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_rule(state: Option<&Value>, value: Value) -> DiceResult<Value> {
        Ok(state.map_or(value, |s| s + value))
    }

    fn identity(state: &Value) -> DiceResult<Value> {
        Ok(*state)
    }

    fn assert_valid(dist: &Distribution) {
        let sum: Weight = dist.weights.iter().sum();
        assert_eq!(&sum, dist.total(), "Σ weights must equal total");
        assert!(dist.values.windows(2).all(|w| w[0] < w[1]), "values must ascend");
        assert!(
            dist.cumulative.windows(2).all(|w| w[0] <= w[1]),
            "cumulative must be non-decreasing"
        );
        assert_eq!(dist.cumulative.last(), Some(dist.total()));
    }

    #[test]
    fn duplicate_and_zero_weights_are_normalised() {
        let dist = Distribution::from_weights(vec![
            (3, Weight::from(2u32)),
            (1, Weight::from(1u32)),
            (3, Weight::from(5u32)),
            (9, Weight::zero()),
        ]);
        assert_eq!(dist.values(), &[1, 3]);
        assert_eq!(dist.weight(3), Weight::from(7u32));
        assert_eq!(dist.weight(9), Weight::zero());
        assert_eq!(dist.cumulative(2), Weight::from(1u32));
        assert_eq!(dist.cumulative(100), Weight::from(8u32));
        assert_valid(&dist);
    }

    #[test]
    fn two_dice_collapse_to_eleven_totals() {
        let d6 = Distribution::uniform(6);
        let two = Distribution::convolve(&[&d6, &d6], sum_rule, identity, 1024).unwrap();
        assert_eq!(two.len(), 11);
        assert_eq!(two.total(), &Weight::from(36u32));
        assert_eq!(two.weight(7), Weight::from(6u32));
        assert_valid(&two);
    }

    #[test]
    fn weights_beyond_u64_stay_exact() {
        let d100 = Distribution::uniform(100);
        let inputs: Vec<&Distribution> = std::iter::repeat(&d100).take(10).collect();
        let dist = Distribution::convolve(&inputs, sum_rule, identity, 1 << 16).unwrap();
        assert!(dist.total().to_u64().is_none(), "100^10 should not fit in u64");
        assert!(dist.small_cumulative().is_none());
        assert_eq!(dist.weight(10), Weight::from(1u32));
        assert_eq!(dist.weight(1000), Weight::from(1u32));
        assert_valid(&dist);
    }

    #[test]
    fn state_ceiling_is_enforced() {
        let d6 = Distribution::uniform(6);
        let ordered = |s: Option<&Vec<Value>>, v: Value| -> DiceResult<Vec<Value>> {
            let mut next = s.cloned().unwrap_or_default();
            next.push(v);
            Ok(next)
        };
        let result = Distribution::convolve(
            &[&d6, &d6, &d6],
            ordered,
            |s: &Vec<Value>| -> DiceResult<Value> { Ok(s.iter().sum()) },
            100,
        );
        assert!(matches!(
            result,
            Err(DiceError::StateSpaceExceeded { states: 216, limit: 100 })
        ));
    }

    #[test]
    fn merge_errors_abort_the_convolution() {
        let huge = Distribution::from_weights(vec![(i64::MAX, Weight::from(1u32))]);
        let checked = |s: Option<&Value>, v: Value| -> DiceResult<Value> {
            match s {
                None => Ok(v),
                Some(s) => s.checked_add(v).ok_or(DiceError::ValueOverflow),
            }
        };
        let result = Distribution::convolve(&[&huge, &huge], checked, identity, 16);
        assert!(matches!(result, Err(DiceError::ValueOverflow)));
    }

    #[test]
    fn empty_input_list_is_rejected() {
        let result = Distribution::convolve(&[], sum_rule, identity, 16);
        assert!(matches!(result, Err(DiceError::Configuration(_))));
    }

    #[test]
    fn mean_of_d6_is_three_and_a_half() {
        assert!((Distribution::uniform(6).mean() - 3.5).abs() < 1e-12);
    }
}
