//! Cumulative-weight sampler.
//!
//! Draws one outcome from a prepared Distribution in O(log k) for k
//! distinct values: pick `r` uniformly in `[0, total)`, then binary-search
//! for the first value whose cumulative weight is strictly above `r`.

use crate::{distribution::Distribution, rng::DiceRng, types::Value};
use num_bigint::RandBigInt;
use rand::Rng;

/// Draw one value. `dist` must be non-empty.
pub fn sample(dist: &Distribution, rng: &mut DiceRng) -> Value {
    // Totals that fit in a u64 skip the big-integer path entirely.
    let index = match dist.small_cumulative() {
        Some(cumulative) => {
            let total = cumulative[cumulative.len() - 1];
            let r = rng.gen_range(0..total);
            cumulative.partition_point(|c| *c <= r)
        }
        None => {
            let r = rng.gen_biguint_below(dist.total());
            dist.cumulative_weights().partition_point(|c| *c <= r)
        }
    };
    dist.values()[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Weight;

    #[test]
    fn single_value_always_drawn() {
        let dist = Distribution::from_weights(vec![(5, Weight::from(1u32))]);
        let mut rng = DiceRng::new(1);
        assert!((0..1000).all(|_| sample(&dist, &mut rng) == 5));
    }

    #[test]
    fn zero_probability_values_never_drawn() {
        let dist = Distribution::from_weights(vec![
            (1, Weight::from(3u32)),
            (2, Weight::from(0u32)),
            (3, Weight::from(1u32)),
        ]);
        let mut rng = DiceRng::new(2);
        for _ in 0..2000 {
            let v = sample(&dist, &mut rng);
            assert!(v == 1 || v == 3, "drew impossible value {v}");
        }
    }

    #[test]
    fn big_totals_use_exact_path() {
        // 2^70 per face: far beyond u64, so sampling goes through BigUint.
        let huge = Weight::from(1u32) << 70usize;
        let dist = Distribution::from_weights(vec![(1, huge.clone()), (2, huge)]);
        assert!(dist.small_cumulative().is_none());

        let mut rng = DiceRng::new(3);
        let ones = (0..4000).filter(|_| sample(&dist, &mut rng) == 1).count();
        assert!((1700..2300).contains(&ones), "expected ~2000 ones, got {ones}");
    }
}
