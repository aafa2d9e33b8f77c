//! Engine configuration.
//!
//! Defaults suit interactive use. Load overrides from a JSON file with
//! `EngineConfig::load`; in tests, use `EngineConfig::default_test()`.

use crate::error::{DiceError, DiceResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: usize = 1024;
pub const DEFAULT_MAX_MERGE_STATES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Draws per batch. Analysis workers check the stop signal once per batch.
    pub batch_size: usize,
    /// Ceiling on live merge-states during an exact convolution.
    pub max_merge_states: usize,
    /// Master seed. `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size:       DEFAULT_BATCH_SIZE,
            max_merge_states: DEFAULT_MAX_MERGE_STATES,
            seed:             None,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        log::info!(
            "config: loaded {path} batch_size={} max_merge_states={} seed={:?}",
            config.batch_size,
            config.max_merge_states,
            config.seed
        );
        Ok(config)
    }

    pub fn validate(&self) -> DiceResult<()> {
        if self.batch_size == 0 {
            return Err(DiceError::config("batch_size must be positive"));
        }
        if self.max_merge_states == 0 {
            return Err(DiceError::config("max_merge_states must be positive"));
        }
        Ok(())
    }

    /// Config with a fixed seed for use in tests.
    pub fn default_test() -> Self {
        Self {
            seed: Some(0xD1CE_5EED),
            ..Self::default()
        }
    }
}
