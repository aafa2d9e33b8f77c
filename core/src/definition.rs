//! Definition Tree.
//!
//! A Definition describes how a compound roll is built. Leaves name a
//! primitive roll strategy; composites also name an aggregation strategy
//! and own their ordered children (a tree: no sharing, no cycles).
//!
//! LIFECYCLE:
//!   1. Build the tree from strategy names + parameter mappings.
//!   2. `prepare()` resolves every strategy through a StrategyRegistry,
//!      bottom-up, and checks the tree's shape. Idempotent.
//!   3. `distribution()` computes the exact Distribution bottom-up on first
//!      use and caches it per node. Idempotent.
//!   4. Draws (`draw_outcome`, `draw_total`, `sample`) read a prepared tree
//!      and never mutate it, so one prepared tree can be shared by many
//!      threads as long as each brings its own DiceRng.
//!
//! Cloning deep-copies the structure and drops any prepared state, so the
//! copy is prepared independently.

use crate::{
    distribution::Distribution,
    error::{DiceError, DiceResult},
    outcome::Outcome,
    registry::StrategyRegistry,
    rng::DiceRng,
    sampler,
    strategy::{AggregationStrategy, RollStrategy},
    types::Value,
};
use serde_json::Value as Params;

#[derive(Debug)]
struct Loaded {
    roll:        RollStrategy,
    aggregation: Option<AggregationStrategy>,
}

#[derive(Debug)]
pub struct Definition {
    roll_type:          String,
    roll_params:        Params,
    aggregation_type:   Option<String>,
    aggregation_params: Params,
    children:           Vec<Definition>,

    loaded:       Option<Loaded>,
    distribution: Option<Distribution>,
}

impl Clone for Definition {
    fn clone(&self) -> Self {
        Self {
            roll_type:          self.roll_type.clone(),
            roll_params:        self.roll_params.clone(),
            aggregation_type:   self.aggregation_type.clone(),
            aggregation_params: self.aggregation_params.clone(),
            children:           self.children.clone(),
            loaded:             None,
            distribution:       None,
        }
    }
}

impl Definition {
    pub fn leaf(roll_type: &str, roll_params: Params) -> Self {
        Self {
            roll_type:          roll_type.to_string(),
            roll_params,
            aggregation_type:   None,
            aggregation_params: Params::Null,
            children:           Vec::new(),
            loaded:             None,
            distribution:       None,
        }
    }

    pub fn composite(
        roll_type: &str,
        roll_params: Params,
        aggregation_type: &str,
        aggregation_params: Params,
        children: Vec<Definition>,
    ) -> Self {
        Self {
            roll_type:          roll_type.to_string(),
            roll_params,
            aggregation_type:   Some(aggregation_type.to_string()),
            aggregation_params,
            children,
            loaded:             None,
            distribution:       None,
        }
    }

    pub fn roll_type(&self) -> &str {
        &self.roll_type
    }

    pub fn roll_params(&self) -> &Params {
        &self.roll_params
    }

    pub fn aggregation_type(&self) -> Option<&str> {
        self.aggregation_type.as_deref()
    }

    pub fn aggregation_params(&self) -> &Params {
        &self.aggregation_params
    }

    pub fn children(&self) -> &[Definition] {
        &self.children
    }

    pub fn is_prepared(&self) -> bool {
        self.loaded.is_some()
    }

    /// The loaded roll strategy, once prepared.
    pub fn roll(&self) -> Option<&RollStrategy> {
        self.loaded.as_ref().map(|l| &l.roll)
    }

    /// The loaded aggregation strategy, once prepared. Leaves have none.
    pub fn aggregation(&self) -> Option<&AggregationStrategy> {
        self.loaded.as_ref().and_then(|l| l.aggregation.as_ref())
    }

    /// Resolve strategies for this node and every descendant.
    pub fn prepare(&mut self, registry: &StrategyRegistry) -> DiceResult<()> {
        if self.loaded.is_some() {
            return Ok(());
        }
        for child in &mut self.children {
            child.prepare(registry)?;
        }

        let roll = registry.load_roll(&self.roll_type, &self.roll_params)?;
        roll.check_children(self.children.len())?;

        let aggregation = match (&self.aggregation_type, roll.is_leaf()) {
            (None, true) => None,
            (Some(name), false) => {
                let aggregation = registry.load_aggregation(name, &self.aggregation_params)?;
                aggregation.check_draws(roll.draw_count(self.children.len()))?;
                Some(aggregation)
            }
            (Some(name), true) => {
                return Err(DiceError::config(format!(
                    "leaf roll '{}' cannot take aggregation '{name}'",
                    self.roll_type
                )))
            }
            (None, false) => {
                return Err(DiceError::config(format!(
                    "composite roll '{}' needs an aggregation",
                    self.roll_type
                )))
            }
        };

        if !roll.is_leaf() {
            log::debug!(
                "definition: prepared roll={} aggregation={:?} children={}",
                self.roll_type,
                self.aggregation_type,
                self.children.len()
            );
        }
        self.loaded = Some(Loaded { roll, aggregation });
        Ok(())
    }

    /// Exact distribution of this node, computed bottom-up and cached.
    pub fn distribution(
        &mut self,
        registry: &StrategyRegistry,
        max_states: usize,
    ) -> DiceResult<&Distribution> {
        self.prepare(registry)?;
        if self.distribution.is_none() {
            for child in &mut self.children {
                child.distribution(registry, max_states)?;
            }
            let computed = self.compute_distribution(max_states)?;
            self.distribution = Some(computed);
        }
        self.cached_distribution()
    }

    /// The cached distribution, if `distribution()` has already run.
    pub fn cached_distribution(&self) -> DiceResult<&Distribution> {
        self.distribution.as_ref().ok_or_else(|| self.not_prepared())
    }

    fn compute_distribution(&self, max_states: usize) -> DiceResult<Distribution> {
        let loaded = self.loaded()?;
        if let Some(leaf) = loaded.roll.leaf_distribution() {
            return Ok(leaf);
        }

        let children = self
            .children
            .iter()
            .map(Definition::cached_distribution)
            .collect::<DiceResult<Vec<&Distribution>>>()?;
        let inputs = loaded.roll.expand(&children);
        match &loaded.aggregation {
            Some(aggregation) => aggregation.aggregate_distribution(&inputs, max_states),
            None => Err(self.not_prepared()),
        }
    }

    // ── Draws ───────────────────────────────────────────────────────

    /// One draw from the cached exact distribution.
    pub fn sample(&self, rng: &mut DiceRng) -> DiceResult<Value> {
        Ok(sampler::sample(self.cached_distribution()?, rng))
    }

    /// One draw by walking the tree, recording which child draws counted.
    pub fn draw_outcome(&self, rng: &mut DiceRng) -> DiceResult<Outcome> {
        let loaded = self.loaded()?;
        if let Some(value) = loaded.roll.draw_leaf(rng) {
            return Ok(Outcome::Base { value });
        }

        let children = loaded.roll.draw_children(&self.children, rng)?;
        let totals: Vec<Value> = children.iter().map(Outcome::total).collect();
        let (kept, total) = self.aggregation_of(loaded)?.aggregate(&totals)?;
        Ok(Outcome::Composite { children, kept, total })
    }

    /// One draw by walking the tree, keeping only the total.
    pub fn draw_total(&self, rng: &mut DiceRng) -> DiceResult<Value> {
        let loaded = self.loaded()?;
        if let Some(value) = loaded.roll.draw_leaf(rng) {
            return Ok(value);
        }

        let mut totals = Vec::with_capacity(loaded.roll.draw_count(self.children.len()));
        loaded.roll.draw_child_totals(&self.children, rng, &mut totals)?;
        self.aggregation_of(loaded)?.aggregate_total(&mut totals)
    }

    fn loaded(&self) -> DiceResult<&Loaded> {
        self.loaded.as_ref().ok_or_else(|| self.not_prepared())
    }

    fn aggregation_of<'a>(&self, loaded: &'a Loaded) -> DiceResult<&'a AggregationStrategy> {
        loaded.aggregation.as_ref().ok_or_else(|| self.not_prepared())
    }

    fn not_prepared(&self) -> DiceError {
        DiceError::NotPrepared { roll_type: self.roll_type.clone() }
    }
}
