//! Seeded random number generation.
//!
//! RULE: Nothing in the engine may call a platform RNG while drawing.
//! All randomness flows through DiceRng instances. A handle owns one
//! stream; analysis workers each get their own stream derived from a
//! single master seed, so no stream is ever shared between threads.
//!
//! Worker streams are seeded from (master_seed XOR worker_index * phi):
//!   - The same master seed reproduces every worker's stream.
//!   - Changing the thread count never changes existing workers' streams.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Golden-ratio increment used to spread worker seeds apart.
const SEED_SPREAD: u64 = 0x9e37_79b9_7f4a_7c15;

/// A deterministic random stream for one owner (a handle or a worker).
#[derive(Debug, Clone)]
pub struct DiceRng {
    seed:  u64,
    inner: Pcg64Mcg,
}

impl DiceRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Seed a stream from OS entropy. The chosen seed is kept so the
    /// run can be reproduced later via `seed()`.
    pub fn from_entropy() -> Self {
        let seed = rand::random::<u64>();
        log::debug!("rng: seeded from entropy seed={seed}");
        Self::new(seed)
    }

    /// The seed this stream was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RngCore for DiceRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

/// Per-worker streams for a single analysis run, indexed by worker slot.
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    pub fn for_worker(&self, worker: usize) -> DiceRng {
        let index = worker as u64 + 1;
        DiceRng::new(self.master_seed ^ index.wrapping_mul(SEED_SPREAD))
    }
}
