//! The public dice handle.
//!
//! A `Dice` owns a Definition Tree, the registry used to prepare it, the
//! engine configuration and its own random stream. Constructors and
//! combinators prepare the tree eagerly, so invalid parameters surface
//! as soon as the dice are built. Exact distributions are computed lazily
//! on first use.
//!
//! ```
//! use dice_core::Dice;
//!
//! # fn main() -> Result<(), dice_core::DiceError> {
//! let mut d20 = Dice::uniform(20)?.advantage()?.with_seed(7);
//! let roll = d20.sample()?;
//! assert!((1..=20).contains(&roll));
//!
//! let exact = d20.exact_distribution()?;
//! assert_eq!(exact.len(), 20);
//!
//! let stats = d20.analyze_count(8192, 2)?;
//! assert_eq!(stats.n, 8192);
//! # Ok(())
//! # }
//! ```

use crate::{
    analysis::{self, Analysis, Budget},
    config::EngineConfig,
    definition::Definition,
    distribution::Distribution,
    error::{DiceError, DiceResult},
    outcome::Outcome,
    registry::{
        StrategyRegistry, AGGREGATE_SUM, AGGREGATE_SUM_INDEX, ROLL_MULTIPLE, ROLL_SIDES,
        ROLL_SKIP, ROLL_WEIGHTED,
    },
    rng::DiceRng,
    sampler,
    types::Value,
};
use num_rational::BigRational;
use rand::RngCore;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cloning copies the tree unprepared (it is re-prepared on next use) and
/// copies the stream, so a clone replays the original's draws.
#[derive(Debug, Clone)]
pub struct Dice {
    definition: Definition,
    registry:   Arc<StrategyRegistry>,
    config:     EngineConfig,
    rng:        DiceRng,
    /// Set once the exact distribution is known to exceed the state ceiling.
    walk_only:  bool,
}

impl Dice {
    // ── Construction ────────────────────────────────────────────────

    /// A die with faces `1..=sides`, each equally likely.
    pub fn uniform(sides: Value) -> DiceResult<Self> {
        Self::from_definition(
            Definition::leaf(ROLL_SIDES, json!({ "sides": sides })),
            Arc::new(StrategyRegistry::standard()),
            EngineConfig::default(),
        )
    }

    /// A die drawn from explicit value → weight pairs. `{1: 1, 6: 2}`
    /// rolls a 6 twice as often as a 1 and never anything else.
    pub fn weighted(weights: BTreeMap<Value, u64>) -> DiceResult<Self> {
        Self::from_definition(
            Definition::leaf(ROLL_WEIGHTED, json!({ "weights": weights })),
            Arc::new(StrategyRegistry::standard()),
            EngineConfig::default(),
        )
    }

    /// Wrap an arbitrary tree. The tree is prepared against `registry`
    /// immediately; the stream is seeded from `config.seed` or OS entropy.
    pub fn from_definition(
        mut definition: Definition,
        registry: Arc<StrategyRegistry>,
        config: EngineConfig,
    ) -> DiceResult<Self> {
        config.validate()?;
        definition.prepare(&registry)?;
        let rng = match config.seed {
            Some(seed) => DiceRng::new(seed),
            None => DiceRng::from_entropy(),
        };
        Ok(Self { definition, registry, config, rng, walk_only: false })
    }

    /// Replace the configuration. Reseeds when the new config has a seed.
    pub fn with_config(mut self, config: EngineConfig) -> DiceResult<Self> {
        config.validate()?;
        if let Some(seed) = config.seed {
            self.rng = DiceRng::new(seed);
        }
        self.config = config;
        self.walk_only = false;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = DiceRng::new(seed);
        self.config.seed = Some(seed);
        self
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Combinators ─────────────────────────────────────────────────

    /// Roll `count` times and add the results.
    pub fn repeat(self, count: usize) -> DiceResult<Self> {
        self.wrap(
            ROLL_MULTIPLE,
            json!({ "count": count }),
            AGGREGATE_SUM,
            json!({}),
        )
    }

    /// Roll twice and keep the higher result.
    pub fn advantage(self) -> DiceResult<Self> {
        self.keep_highest(2, 1)
    }

    /// Roll twice and keep the lower result.
    pub fn disadvantage(self) -> DiceResult<Self> {
        self.keep_lowest(2, 1)
    }

    /// Roll `count` times and add the `keep` highest results.
    pub fn keep_highest(self, count: usize, keep: usize) -> DiceResult<Self> {
        let indices: Vec<i64> = (1..=keep as i64).map(|i| -i).collect();
        self.keep_ranks(count, keep, indices)
    }

    /// Roll `count` times and add the `keep` lowest results.
    pub fn keep_lowest(self, count: usize, keep: usize) -> DiceResult<Self> {
        let indices: Vec<i64> = (0..keep as i64).collect();
        self.keep_ranks(count, keep, indices)
    }

    fn keep_ranks(self, count: usize, keep: usize, indices: Vec<i64>) -> DiceResult<Self> {
        if keep == 0 || keep > count {
            return Err(DiceError::config(format!(
                "cannot keep {keep} of {count} rolls"
            )));
        }
        self.wrap(
            ROLL_MULTIPLE,
            json!({ "count": count }),
            AGGREGATE_SUM_INDEX,
            json!({ "indices": indices }),
        )
    }

    /// Roll every part once and add the results, e.g. `d6 + d8`.
    /// The combined dice take the first part's registry, config and stream.
    pub fn group(parts: Vec<Dice>) -> DiceResult<Self> {
        let mut parts = parts.into_iter();
        let first = parts
            .next()
            .ok_or_else(|| DiceError::config("group needs at least one part"))?;

        let mut children = vec![first.definition];
        children.extend(parts.map(|part| part.definition));
        Self::assemble(
            Definition::composite(ROLL_SKIP, json!({}), AGGREGATE_SUM, json!({}), children),
            first.registry,
            first.config,
            first.rng,
        )
    }

    fn wrap(
        self,
        roll_type: &str,
        roll_params: serde_json::Value,
        aggregation_type: &str,
        aggregation_params: serde_json::Value,
    ) -> DiceResult<Self> {
        let definition = Definition::composite(
            roll_type,
            roll_params,
            aggregation_type,
            aggregation_params,
            vec![self.definition],
        );
        Self::assemble(definition, self.registry, self.config, self.rng)
    }

    fn assemble(
        mut definition: Definition,
        registry: Arc<StrategyRegistry>,
        config: EngineConfig,
        rng: DiceRng,
    ) -> DiceResult<Self> {
        definition.prepare(&registry)?;
        Ok(Self { definition, registry, config, rng, walk_only: false })
    }

    // ── Exact queries ───────────────────────────────────────────────

    /// The exact distribution, computed on first call and cached.
    pub fn distribution(&mut self) -> DiceResult<&Distribution> {
        self.definition
            .distribution(&self.registry, self.config.max_merge_states)
    }

    /// Exact probability of every possible outcome.
    pub fn exact_distribution(&mut self) -> DiceResult<BTreeMap<Value, BigRational>> {
        Ok(self.distribution()?.probabilities())
    }

    // ── Draws ───────────────────────────────────────────────────────

    /// One draw from the exact distribution.
    ///
    /// When the exact distribution would exceed `max_merge_states`, draws
    /// by walking the tree instead. Both paths sample the same distribution.
    pub fn sample(&mut self) -> DiceResult<Value> {
        if !self.walk_only {
            match self
                .definition
                .distribution(&self.registry, self.config.max_merge_states)
            {
                Ok(dist) => return Ok(sampler::sample(dist, &mut self.rng)),
                Err(DiceError::StateSpaceExceeded { states, limit }) => {
                    log::info!(
                        "dice: exact distribution unavailable states={states} limit={limit}, sampling by tree walk"
                    );
                    self.walk_only = true;
                }
                Err(e) => return Err(e),
            }
        }
        self.definition.prepare(&self.registry)?;
        self.definition.draw_total(&mut self.rng)
    }

    /// One draw by walking the tree, with full provenance.
    pub fn sample_outcome(&mut self) -> DiceResult<Outcome> {
        self.definition.prepare(&self.registry)?;
        self.definition.draw_outcome(&mut self.rng)
    }

    // ── Empirical analysis ──────────────────────────────────────────

    /// Exactly `n` draws split across `threads` workers.
    pub fn analyze_count(&mut self, n: u64, threads: usize) -> DiceResult<Analysis> {
        self.analyze(Budget::Count(n), threads)
    }

    /// Draw for `seconds` of wall-clock time across `threads` workers.
    pub fn analyze_duration(&mut self, seconds: f64, threads: usize) -> DiceResult<Analysis> {
        self.analyze(Budget::seconds(seconds)?, threads)
    }

    /// Run an analysis. Worker streams derive from a master seed drawn from
    /// this handle's stream.
    pub fn analyze(&mut self, budget: Budget, threads: usize) -> DiceResult<Analysis> {
        self.definition.prepare(&self.registry)?;
        let master_seed = self.rng.next_u64();
        analysis::analyze(
            &self.definition,
            budget,
            threads,
            self.config.batch_size,
            master_seed,
        )
    }
}
