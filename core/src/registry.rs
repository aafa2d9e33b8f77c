//! Strategy registry.
//!
//! RULE: Strategy names resolve through an explicit StrategyRegistry that
//! is built once and handed to preparation. There is no global table.
//! Unknown names are configuration errors and never fall back to a default.
//!
//! Each entry is a loader: it decodes the node's parameter mapping into the
//! strategy's typed parameter struct (unknown or missing fields are rejected)
//! and then runs the strategy's validating constructor.

use crate::{
    error::{DiceError, DiceResult},
    strategy::{
        AggregationStrategy, EmptyParams, FixedSides, Repeat, RepeatParams, RollStrategy,
        SidesParams, SumIndices, SumIndicesParams, Weighted, WeightedParams,
    },
};
use serde::de::DeserializeOwned;
use serde_json::Value as Params;
use std::collections::HashMap;

// ── Built-in names ──────────────────────────────
pub const ROLL_SIDES:    &str = "sides";
pub const ROLL_WEIGHTED: &str = "weighted";
pub const ROLL_MULTIPLE: &str = "multiple";
pub const ROLL_SKIP:     &str = "skip";

pub const AGGREGATE_SUM:       &str = "sum";
pub const AGGREGATE_SUM_INDEX: &str = "sumIndex";

pub type RollLoader = fn(&Params) -> DiceResult<RollStrategy>;
pub type AggregationLoader = fn(&Params) -> DiceResult<AggregationStrategy>;

#[derive(Clone, Default)]
pub struct StrategyRegistry {
    rolls:        HashMap<String, RollLoader>,
    aggregations: HashMap<String, AggregationLoader>,
}

impl StrategyRegistry {
    /// An empty registry. Most callers want `standard()`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in strategy.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register_roll(ROLL_SIDES, load_sides);
        registry.register_roll(ROLL_WEIGHTED, load_weighted);
        registry.register_roll(ROLL_MULTIPLE, load_multiple);
        registry.register_roll(ROLL_SKIP, load_skip);
        registry.register_aggregation(AGGREGATE_SUM, load_sum);
        registry.register_aggregation(AGGREGATE_SUM_INDEX, load_sum_index);
        registry
    }

    /// Register a roll loader. Re-registering a name replaces it.
    pub fn register_roll(&mut self, name: &str, loader: RollLoader) {
        self.rolls.insert(name.to_string(), loader);
    }

    pub fn register_aggregation(&mut self, name: &str, loader: AggregationLoader) {
        self.aggregations.insert(name.to_string(), loader);
    }

    pub fn load_roll(&self, name: &str, params: &Params) -> DiceResult<RollStrategy> {
        let loader = self
            .rolls
            .get(name)
            .ok_or_else(|| DiceError::UnknownRollStrategy { name: name.to_string() })?;
        loader(params)
    }

    pub fn load_aggregation(&self, name: &str, params: &Params) -> DiceResult<AggregationStrategy> {
        let loader = self
            .aggregations
            .get(name)
            .ok_or_else(|| DiceError::UnknownAggregation { name: name.to_string() })?;
        loader(params)
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut rolls: Vec<&String> = self.rolls.keys().collect();
        let mut aggregations: Vec<&String> = self.aggregations.keys().collect();
        rolls.sort();
        aggregations.sort();
        f.debug_struct("StrategyRegistry")
            .field("rolls", &rolls)
            .field("aggregations", &aggregations)
            .finish()
    }
}

/// Decode a parameter mapping into a typed struct. `null` reads as `{}`.
pub fn decode_params<T: DeserializeOwned>(strategy: &str, params: &Params) -> DiceResult<T> {
    let params = if params.is_null() {
        Params::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|source| DiceError::InvalidParams {
        strategy: strategy.to_string(),
        source,
    })
}

fn load_sides(params: &Params) -> DiceResult<RollStrategy> {
    let params: SidesParams = decode_params(ROLL_SIDES, params)?;
    Ok(RollStrategy::FixedSides(FixedSides::new(params)?))
}

fn load_weighted(params: &Params) -> DiceResult<RollStrategy> {
    let params: WeightedParams = decode_params(ROLL_WEIGHTED, params)?;
    Ok(RollStrategy::Weighted(Weighted::new(params)?))
}

fn load_multiple(params: &Params) -> DiceResult<RollStrategy> {
    let params: RepeatParams = decode_params(ROLL_MULTIPLE, params)?;
    Ok(RollStrategy::Repeat(Repeat::new(params)?))
}

fn load_skip(params: &Params) -> DiceResult<RollStrategy> {
    let _: EmptyParams = decode_params(ROLL_SKIP, params)?;
    Ok(RollStrategy::Group)
}

fn load_sum(params: &Params) -> DiceResult<AggregationStrategy> {
    let _: EmptyParams = decode_params(AGGREGATE_SUM, params)?;
    Ok(AggregationStrategy::SumAll)
}

fn load_sum_index(params: &Params) -> DiceResult<AggregationStrategy> {
    let params: SumIndicesParams = decode_params(AGGREGATE_SUM_INDEX, params)?;
    Ok(AggregationStrategy::SumIndices(SumIndices::new(params)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_names_are_errors() {
        let registry = StrategyRegistry::standard();
        assert!(matches!(
            registry.load_roll("exploding", &json!({})),
            Err(DiceError::UnknownRollStrategy { name }) if name == "exploding"
        ));
        assert!(matches!(
            registry.load_aggregation("product", &json!({})),
            Err(DiceError::UnknownAggregation { .. })
        ));
    }

    #[test]
    fn params_are_decoded_strictly() {
        let registry = StrategyRegistry::standard();
        assert!(registry.load_roll(ROLL_SIDES, &json!({"sides": 6})).is_ok());
        assert!(matches!(
            registry.load_roll(ROLL_SIDES, &json!({"sides": "six"})),
            Err(DiceError::InvalidParams { .. })
        ));
        assert!(matches!(
            registry.load_roll(ROLL_SIDES, &json!({"sides": 6, "faces": 6})),
            Err(DiceError::InvalidParams { .. })
        ));
        assert!(matches!(
            registry.load_roll(ROLL_SIDES, &json!({})),
            Err(DiceError::InvalidParams { .. })
        ));
        assert!(matches!(
            registry.load_roll(ROLL_SIDES, &json!({"sides": 0})),
            Err(DiceError::Configuration(_))
        ));
    }

    #[test]
    fn loaders_carry_decoded_params() {
        let registry = StrategyRegistry::standard();
        match registry.load_roll(ROLL_SIDES, &json!({"sides": 12})).unwrap() {
            RollStrategy::FixedSides(fixed) => assert_eq!(fixed.sides(), 12),
            other => panic!("expected fixed sides, got {other:?}"),
        }
        match registry.load_roll(ROLL_MULTIPLE, &json!({"count": 4})).unwrap() {
            RollStrategy::Repeat(repeat) => assert_eq!(repeat.count(), 4),
            other => panic!("expected repeat, got {other:?}"),
        }
        match registry
            .load_aggregation(AGGREGATE_SUM_INDEX, &json!({"indices": [-1, 0]}))
            .unwrap()
        {
            AggregationStrategy::SumIndices(select) => assert_eq!(select.indices(), &[-1, 0]),
            other => panic!("expected sumIndex, got {other:?}"),
        }
    }

    #[test]
    fn null_params_read_as_empty() {
        let registry = StrategyRegistry::standard();
        assert_eq!(registry.load_roll(ROLL_SKIP, &Params::Null).unwrap(), RollStrategy::Group);
        assert_eq!(
            registry.load_aggregation(AGGREGATE_SUM, &Params::Null).unwrap(),
            AggregationStrategy::SumAll
        );
    }

    #[test]
    fn weighted_keys_decode_from_strings() {
        let registry = StrategyRegistry::standard();
        let roll = registry
            .load_roll(ROLL_WEIGHTED, &json!({"weights": {"1": 1, "6": 2}}))
            .unwrap();
        let dist = roll.leaf_distribution().unwrap();
        assert_eq!(dist.values(), &[1, 6]);
    }

    #[test]
    fn custom_loaders_can_be_registered() {
        fn d6(_: &Params) -> DiceResult<RollStrategy> {
            Ok(RollStrategy::FixedSides(FixedSides::new(SidesParams { sides: 6 })?))
        }
        let mut registry = StrategyRegistry::new();
        assert!(registry.load_roll("d6", &Params::Null).is_err());
        registry.register_roll("d6", d6);
        let roll = registry.load_roll("d6", &Params::Null).unwrap();
        assert_eq!(roll.leaf_distribution().unwrap().len(), 6);
    }
}
