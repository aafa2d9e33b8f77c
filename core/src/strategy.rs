//! Roll and aggregation strategies.
//!
//! The strategy set is closed: every node of a Definition Tree holds one
//! `RollStrategy` and, if it has children, one `AggregationStrategy`.
//! Each variant has a typed parameter struct and a validating constructor.
//!
//! RULES:
//!   - Leaf rolls (`FixedSides`, `Weighted`) never look at children.
//!   - Composite rolls (`Repeat`, `Group`) only decide which child draws
//!     happen; folding their totals into one value is the aggregation's job.

use crate::{
    definition::Definition,
    distribution::Distribution,
    error::{checked_sum, DiceError, DiceResult},
    outcome::Outcome,
    rng::DiceRng,
    sampler,
    types::{Value, Weight},
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Parameters ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SidesParams {
    pub sides: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightedParams {
    pub weights: BTreeMap<Value, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepeatParams {
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyParams {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SumIndicesParams {
    pub indices: Vec<i64>,
}

// ── Roll strategies ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSides {
    sides: Value,
}

impl FixedSides {
    pub fn new(params: SidesParams) -> DiceResult<Self> {
        if params.sides < 1 {
            return Err(DiceError::config(format!(
                "sides must be positive, got {}",
                params.sides
            )));
        }
        Ok(Self { sides: params.sides })
    }

    pub fn sides(&self) -> Value {
        self.sides
    }
}

/// A leaf drawn from explicit value → weight pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Weighted {
    distribution: Distribution,
}

impl Weighted {
    pub fn new(params: WeightedParams) -> DiceResult<Self> {
        if params.weights.is_empty() {
            return Err(DiceError::config("weighted roll needs at least one value"));
        }
        if let Some((value, _)) = params.weights.iter().find(|(_, w)| **w == 0) {
            return Err(DiceError::config(format!(
                "weight for value {value} must be positive"
            )));
        }
        let distribution = Distribution::from_weights(
            params
                .weights
                .into_iter()
                .map(|(value, weight)| (value, Weight::from(weight))),
        );
        Ok(Self { distribution })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repeat {
    count: usize,
}

impl Repeat {
    pub fn new(params: RepeatParams) -> DiceResult<Self> {
        if params.count == 0 {
            return Err(DiceError::config("repeat count must be positive"));
        }
        Ok(Self { count: params.count })
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollStrategy {
    /// Uniform integer in `[1, sides]`.
    FixedSides(FixedSides),
    Weighted(Weighted),
    /// Draws its single child `count` times.
    Repeat(Repeat),
    /// Draws each child once.
    Group,
}

impl RollStrategy {
    pub fn is_leaf(&self) -> bool {
        matches!(self, RollStrategy::FixedSides(_) | RollStrategy::Weighted(_))
    }

    /// Check the node's child count fits this strategy.
    pub fn check_children(&self, children: usize) -> DiceResult<()> {
        match self {
            RollStrategy::FixedSides(_) | RollStrategy::Weighted(_) if children > 0 => Err(
                DiceError::config(format!("leaf roll cannot have children, found {children}")),
            ),
            RollStrategy::Repeat(_) if children != 1 => Err(DiceError::config(format!(
                "repeat roll needs exactly one child, found {children}"
            ))),
            RollStrategy::Group if children == 0 => {
                Err(DiceError::config("group roll needs at least one child"))
            }
            _ => Ok(()),
        }
    }

    /// How many child outcomes one draw of this node produces.
    pub fn draw_count(&self, children: usize) -> usize {
        match self {
            RollStrategy::FixedSides(_) | RollStrategy::Weighted(_) => 0,
            RollStrategy::Repeat(repeat) => repeat.count,
            RollStrategy::Group => children,
        }
    }

    /// Draw a leaf value. Composite strategies return `None`.
    pub fn draw_leaf(&self, rng: &mut DiceRng) -> Option<Value> {
        match self {
            RollStrategy::FixedSides(fixed) => Some(rng.gen_range(1..=fixed.sides)),
            RollStrategy::Weighted(weighted) => Some(sampler::sample(&weighted.distribution, rng)),
            RollStrategy::Repeat(_) | RollStrategy::Group => None,
        }
    }

    /// Draw the child outcomes for a composite node.
    pub fn draw_children(
        &self,
        children: &[Definition],
        rng: &mut DiceRng,
    ) -> DiceResult<Vec<Outcome>> {
        match self {
            RollStrategy::Repeat(repeat) => {
                let child = first_child(children)?;
                (0..repeat.count).map(|_| child.draw_outcome(rng)).collect()
            }
            RollStrategy::Group => children.iter().map(|c| c.draw_outcome(rng)).collect(),
            RollStrategy::FixedSides(_) | RollStrategy::Weighted(_) => Ok(Vec::new()),
        }
    }

    /// Draw only the child totals, skipping provenance. Appends to `out`.
    pub fn draw_child_totals(
        &self,
        children: &[Definition],
        rng: &mut DiceRng,
        out: &mut Vec<Value>,
    ) -> DiceResult<()> {
        match self {
            RollStrategy::Repeat(repeat) => {
                let child = first_child(children)?;
                for _ in 0..repeat.count {
                    out.push(child.draw_total(rng)?);
                }
            }
            RollStrategy::Group => {
                for child in children {
                    out.push(child.draw_total(rng)?);
                }
            }
            RollStrategy::FixedSides(_) | RollStrategy::Weighted(_) => {}
        }
        Ok(())
    }

    /// Exact distribution of a leaf. Composite strategies return `None`.
    pub fn leaf_distribution(&self) -> Option<Distribution> {
        match self {
            RollStrategy::FixedSides(fixed) => Some(Distribution::uniform(fixed.sides)),
            RollStrategy::Weighted(weighted) => Some(weighted.distribution.clone()),
            RollStrategy::Repeat(_) | RollStrategy::Group => None,
        }
    }

    /// The independent inputs a composite node feeds to its aggregation,
    /// one per child draw.
    pub fn expand<'a>(&self, children: &[&'a Distribution]) -> Vec<&'a Distribution> {
        match self {
            RollStrategy::Repeat(repeat) => children
                .first()
                .map(|child| vec![*child; repeat.count])
                .unwrap_or_default(),
            RollStrategy::Group => children.to_vec(),
            RollStrategy::FixedSides(_) | RollStrategy::Weighted(_) => Vec::new(),
        }
    }
}

fn first_child(children: &[Definition]) -> DiceResult<&Definition> {
    children
        .first()
        .ok_or_else(|| DiceError::config("repeat roll needs exactly one child"))
}

// ── Aggregation strategies ──────────────────────────────────────────

/// Sum of the child totals at the selected ranks, after sorting ascending.
/// Negative indices count from the highest rank (`-1` is the maximum).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumIndices {
    indices: Vec<i64>,
}

impl SumIndices {
    pub fn new(params: SumIndicesParams) -> DiceResult<Self> {
        if params.indices.is_empty() {
            return Err(DiceError::config("sumIndex needs at least one index"));
        }
        Ok(Self { indices: params.indices })
    }

    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    /// Resolve every index to a rank in `[0, draws)`.
    pub fn ranks(&self, draws: usize) -> DiceResult<Vec<usize>> {
        self.indices
            .iter()
            .map(|&index| {
                let rank = if index < 0 { index + draws as i64 } else { index };
                if rank < 0 || rank >= draws as i64 {
                    return Err(DiceError::config(format!(
                        "index {index} out of range for {draws} draws"
                    )));
                }
                Ok(rank as usize)
            })
            .collect()
    }

    fn select(&self, totals: &[Value]) -> DiceResult<(Vec<usize>, Value)> {
        let ranks = self.ranks(totals.len())?;
        // Stable: equal totals keep draw order.
        let mut order: Vec<usize> = (0..totals.len()).collect();
        order.sort_by_key(|&i| totals[i]);

        let kept: Vec<usize> = ranks.iter().map(|&rank| order[rank]).collect();
        let total = checked_sum(kept.iter().map(|&i| totals[i]))?;
        Ok((kept, total))
    }

    /// Exact order-statistic convolution.
    ///
    /// The merge-state is a sorted window of the ranks the selection can
    /// reach: the lowest `max_rank + 1` values, or the highest
    /// `draws - min_rank` values, whichever is narrower. Folding a value in
    /// and trimming the window keeps exactly the ranks that matter.
    fn distribution(&self, inputs: &[&Distribution], max_states: usize) -> DiceResult<Distribution> {
        let draws = inputs.len();
        let ranks = self.ranks(draws)?;
        let lowest = ranks.iter().max().map_or(0, |r| r + 1);
        let highest = draws - ranks.iter().min().copied().unwrap_or(0);

        if lowest <= highest {
            Distribution::convolve(
                inputs,
                |state: Option<&Vec<Value>>, value| {
                    let mut window = insert_sorted(state, value);
                    window.truncate(lowest);
                    Ok(window)
                },
                |window| checked_sum(ranks.iter().map(|&rank| window[rank])),
                max_states,
            )
        } else {
            let offset = draws - highest;
            Distribution::convolve(
                inputs,
                |state: Option<&Vec<Value>>, value| {
                    let mut window = insert_sorted(state, value);
                    if window.len() > highest {
                        window.remove(0);
                    }
                    Ok(window)
                },
                |window| checked_sum(ranks.iter().map(|&rank| window[rank - offset])),
                max_states,
            )
        }
    }
}

fn insert_sorted(state: Option<&Vec<Value>>, value: Value) -> Vec<Value> {
    let mut window = Vec::with_capacity(state.map_or(1, |s| s.len() + 1));
    if let Some(existing) = state {
        window.extend_from_slice(existing);
    }
    let at = window.partition_point(|v| *v <= value);
    window.insert(at, value);
    window
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationStrategy {
    SumAll,
    SumIndices(SumIndices),
}

impl AggregationStrategy {
    /// Reject selections that cannot be satisfied by `draws` child outcomes.
    pub fn check_draws(&self, draws: usize) -> DiceResult<()> {
        match self {
            AggregationStrategy::SumAll => Ok(()),
            AggregationStrategy::SumIndices(select) => select.ranks(draws).map(|_| ()),
        }
    }

    /// Fold child totals into one value, returning the indices of the
    /// children that contributed and the total.
    pub fn aggregate(&self, totals: &[Value]) -> DiceResult<(Vec<usize>, Value)> {
        match self {
            AggregationStrategy::SumAll => {
                Ok(((0..totals.len()).collect(), checked_sum(totals.iter().copied())?))
            }
            AggregationStrategy::SumIndices(select) => select.select(totals),
        }
    }

    /// Like `aggregate`, without provenance. May reorder `totals`.
    pub fn aggregate_total(&self, totals: &mut [Value]) -> DiceResult<Value> {
        match self {
            AggregationStrategy::SumAll => checked_sum(totals.iter().copied()),
            AggregationStrategy::SumIndices(select) => {
                let ranks = select.ranks(totals.len())?;
                totals.sort_unstable();
                checked_sum(ranks.iter().map(|&rank| totals[rank]))
            }
        }
    }

    /// Exact distribution of the aggregate over independent inputs.
    pub fn aggregate_distribution(
        &self,
        inputs: &[&Distribution],
        max_states: usize,
    ) -> DiceResult<Distribution> {
        match self {
            AggregationStrategy::SumAll => Distribution::convolve(
                inputs,
                |state: Option<&Value>, value| match state {
                    None => Ok(value),
                    Some(sum) => sum.checked_add(value).ok_or(DiceError::ValueOverflow),
                },
                |sum| Ok(*sum),
                max_states,
            ),
            AggregationStrategy::SumIndices(select) => select.distribution(inputs, max_states),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    fn keep(indices: Vec<i64>) -> AggregationStrategy {
        AggregationStrategy::SumIndices(SumIndices::new(SumIndicesParams { indices }).unwrap())
    }

    #[test]
    fn sum_indices_keeps_stable_order_provenance() {
        let agg = keep(vec![-1]);
        let (kept, total) = agg.aggregate(&[4, 9, 9, 2]).unwrap();
        assert_eq!(total, 9);
        // Two 9s: the stable sort puts the later one last.
        assert_eq!(kept, vec![2]);

        let (kept, total) = keep(vec![0, 1]).aggregate(&[4, 9, 9, 2]).unwrap();
        assert_eq!(total, 6);
        assert_eq!(kept, vec![3, 0]);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let agg = keep(vec![2]);
        assert!(agg.check_draws(2).is_err());
        assert!(agg.check_draws(3).is_ok());
        assert!(keep(vec![-3]).check_draws(2).is_err());
    }

    #[test]
    fn highest_of_two_d4_matches_hand_count() {
        let d4 = Distribution::uniform(4);
        let dist = keep(vec![-1]).aggregate_distribution(&[&d4, &d4], 1024).unwrap();
        // P(max = k) = (2k - 1) / 16
        for k in 1..=4 {
            assert_eq!(dist.weight(k), Weight::from((2 * k - 1) as u32), "max={k}");
        }
        assert_eq!(dist.total(), &Weight::from(16u32));
    }

    #[test]
    fn middle_rank_uses_full_window() {
        // Median of three d3: both windows are width 2.
        let d3 = Distribution::uniform(3);
        let dist = keep(vec![1]).aggregate_distribution(&[&d3, &d3, &d3], 1024).unwrap();
        // P(median = 2) = 13/27 by enumeration.
        assert_eq!(dist.weight(2), Weight::from(13u32));
        assert_eq!(dist.weight(1), Weight::from(7u32));
        assert_eq!(dist.weight(3), Weight::from(7u32));
        assert!(dist.weight(4).is_zero());
    }

    #[test]
    fn overflowing_totals_are_errors() {
        let big = [i64::MAX, 1];
        assert!(matches!(AggregationStrategy::SumAll.aggregate(&big), Err(DiceError::ValueOverflow)));
        assert!(matches!(
            AggregationStrategy::SumAll.aggregate_total(&mut big.clone()),
            Err(DiceError::ValueOverflow)
        ));
        assert!(matches!(keep(vec![0, 1]).aggregate(&big), Err(DiceError::ValueOverflow)));
        // Dropping the small value keeps the total in range.
        assert_eq!(keep(vec![-1]).aggregate_total(&mut big.clone()).unwrap(), i64::MAX);

        let edge = Distribution::from_weights(vec![(i64::MAX, Weight::from(1u32))]);
        let one = Distribution::uniform(1);
        assert!(matches!(
            AggregationStrategy::SumAll.aggregate_distribution(&[&edge, &one], 16),
            Err(DiceError::ValueOverflow)
        ));
        assert!(matches!(
            keep(vec![0, 1]).aggregate_distribution(&[&edge, &one], 16),
            Err(DiceError::ValueOverflow)
        ));
    }

    #[test]
    fn zero_weight_is_rejected() {
        let params = WeightedParams { weights: BTreeMap::from([(1, 2), (2, 0)]) };
        assert!(Weighted::new(params).is_err());
    }

    #[test]
    fn leaf_cannot_take_children() {
        let sides = RollStrategy::FixedSides(FixedSides::new(SidesParams { sides: 6 }).unwrap());
        assert!(sides.check_children(1).is_err());
        assert!(RollStrategy::Group.check_children(0).is_err());
    }
}
