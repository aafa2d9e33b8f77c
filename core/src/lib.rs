//! Exact and empirical outcome distributions for compound dice rolls.
//!
//! Dice are composed into a Definition Tree (repeat, keep best/worst of N,
//! independent groups). A prepared tree answers two kinds of questions:
//!   - exact: arbitrary-precision convolution of every node's Distribution;
//!   - empirical: a multi-threaded Monte Carlo Analysis with a two-phase
//!     mean/deviation reduction.

pub mod analysis;
pub mod config;
pub mod definition;
pub mod dice;
pub mod distribution;
pub mod error;
pub mod outcome;
pub mod registry;
pub mod rng;
pub mod sampler;
pub mod strategy;
pub mod types;

pub use analysis::{Analysis, Budget};
pub use config::EngineConfig;
pub use definition::Definition;
pub use dice::Dice;
pub use distribution::Distribution;
pub use error::{DiceError, DiceResult};
pub use outcome::Outcome;
pub use registry::StrategyRegistry;
