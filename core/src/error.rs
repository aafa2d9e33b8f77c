use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiceError {
    // ── Configuration ─────────────────────────────
    #[error("Unknown roll strategy '{name}'")]
    UnknownRollStrategy { name: String },

    #[error("Unknown aggregation strategy '{name}'")]
    UnknownAggregation { name: String },

    #[error("Invalid parameters for strategy '{strategy}': {source}")]
    InvalidParams {
        strategy: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // ── State ─────────────────────────────────────
    #[error("Definition '{roll_type}' has not been prepared")]
    NotPrepared { roll_type: String },

    #[error("Exact distribution needs {states} merge states, limit is {limit}")]
    StateSpaceExceeded { states: usize, limit: usize },

    #[error("Roll total does not fit in a 64-bit integer")]
    ValueOverflow,

    // ── Analysis ──────────────────────────────────
    #[error("Analysis worker {worker} panicked")]
    WorkerFailed { worker: usize },
}

impl DiceError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        DiceError::Configuration(message.into())
    }
}

pub type DiceResult<T> = Result<T, DiceError>;

/// Add roll values, failing instead of wrapping.
pub(crate) fn checked_sum<I>(values: I) -> DiceResult<i64>
where
    I: IntoIterator<Item = i64>,
{
    values
        .into_iter()
        .try_fold(0i64, |acc, value| acc.checked_add(value))
        .ok_or(DiceError::ValueOverflow)
}
