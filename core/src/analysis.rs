//! Parallel statistical analysis of a prepared Definition Tree.
//!
//! EXECUTION ORDER (fixed, two fan-outs joined by the coordinator):
//!   Phase 1: `threads` workers draw in batches until their quota is met
//!            (count budget) or the stop signal is seen (duration budget).
//!            Each returns a local histogram, draw count and running sum.
//!            The coordinator merges them and computes the global mean.
//!   Phase 2: one task per worker histogram computes the second moment
//!            around the global mean, split into up/down halves by a
//!            tanh partition. The coordinator sums the five partials.
//!
//! RULES:
//!   - Phase 2 starts only after phase 1 has joined, so every partial is
//!     computed against the final global mean, never a local one.
//!   - Workers share the prepared tree read-only; each owns its DiceRng.
//!   - The stop signal is checked once per batch. A worker may overshoot a
//!     duration budget by at most one batch, and always finishes at least one.
//!   - Any worker error or panic fails the whole analysis. Nothing is retried.

use crate::{
    definition::Definition,
    error::{DiceError, DiceResult},
    rng::{DiceRng, RngBank},
    types::{Count, Value},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How often the coordinator checks on workers while a duration budget runs.
const COORDINATOR_POLL: Duration = Duration::from_millis(5);

/// How much sampling an analysis may do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Budget {
    /// Exactly this many draws in total, split evenly across workers.
    /// The remainder of an uneven split is dropped.
    Count(u64),
    /// Draw until this much wall-clock time has elapsed.
    Duration(Duration),
}

impl Budget {
    /// Duration budget from seconds. Rejects non-positive, non-finite or
    /// unrepresentably large values.
    pub fn seconds(seconds: f64) -> DiceResult<Self> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(DiceError::config(format!(
                "duration must be a positive number of seconds, got {seconds}"
            )));
        }
        Duration::try_from_secs_f64(seconds)
            .map(Budget::Duration)
            .map_err(|e| DiceError::config(format!("duration of {seconds}s is out of range: {e}")))
    }
}

/// Empirical summary of many draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Draws actually completed.
    pub n:              Count,
    /// Observed count per value.
    pub rolls:          BTreeMap<Value, Count>,
    pub mean:           f64,
    pub deviation:      f64,
    pub deviation_up:   f64,
    pub deviation_down: f64,
    /// Wall-clock time for the whole analysis, including both reductions.
    pub duration:       Duration,
}

impl Analysis {
    /// Fraction of draws that were at least `value`.
    pub fn at_least(&self, value: Value) -> f64 {
        let hits: Count = self.rolls.range(value..).map(|(_, count)| count).sum();
        hits as f64 / self.n as f64
    }

    /// Fraction of draws that were at most `value`.
    pub fn at_most(&self, value: Value) -> f64 {
        value
            .checked_add(1)
            .map_or(1.0, |next| 1.0 - self.at_least(next))
    }

    /// Fraction of draws equal to `value`.
    pub fn probability(&self, value: Value) -> f64 {
        self.rolls.get(&value).copied().unwrap_or(0) as f64 / self.n as f64
    }
}

// ── Worker state ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct WorkerTally {
    counts: HashMap<Value, Count>,
    draws:  Count,
    sum:    i128,
}

impl WorkerTally {
    fn record(&mut self, value: Value) {
        *self.counts.entry(value).or_insert(0) += 1;
        self.draws += 1;
        self.sum += value as i128;
    }

    fn second_moment(&self, mean: f64) -> SecondMoment {
        let mut moment = SecondMoment::default();
        for (&value, &count) in &self.counts {
            let count = count as f64;
            let offset = value as f64 - mean;
            let deviation = count * offset * offset;
            // 0.5 at the mean, toward 1 above it, toward 0 below it.
            let up = (offset.tanh() + 1.0) / 2.0;

            moment.deviation += deviation;
            moment.up_count += count * up;
            moment.down_count += count * (1.0 - up);
            moment.up_deviation += deviation * up;
            moment.down_deviation += deviation * (1.0 - up);
        }
        moment
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SecondMoment {
    deviation:      f64,
    up_deviation:   f64,
    up_count:       f64,
    down_deviation: f64,
    down_count:     f64,
}

impl SecondMoment {
    fn add(mut self, other: SecondMoment) -> Self {
        self.deviation += other.deviation;
        self.up_deviation += other.up_deviation;
        self.up_count += other.up_count;
        self.down_deviation += other.down_deviation;
        self.down_count += other.down_count;
        self
    }
}

/// Run one worker until its quota is met or the stop signal is seen.
/// `quota: None` means run until stopped.
fn run_worker(
    definition: &Definition,
    rng: &mut DiceRng,
    quota: Option<Count>,
    batch_size: usize,
    stop: &AtomicBool,
) -> DiceResult<WorkerTally> {
    let mut tally = WorkerTally::default();
    loop {
        let batch = match quota {
            Some(quota) => (quota - tally.draws).min(batch_size as Count),
            None => batch_size as Count,
        };
        for _ in 0..batch {
            tally.record(definition.draw_total(rng)?);
        }

        let quota_met = quota.is_some_and(|quota| tally.draws >= quota);
        if quota_met || stop.load(Ordering::Acquire) {
            return Ok(tally);
        }
    }
}

// ── Coordinator ─────────────────────────────────────────────────────

/// Analyze a prepared tree with `threads` workers.
///
/// Worker streams derive from `master_seed`, so the same seed, budget and
/// thread count reproduce a count-budget analysis exactly.
pub fn analyze(
    definition: &Definition,
    budget: Budget,
    threads: usize,
    batch_size: usize,
    master_seed: u64,
) -> DiceResult<Analysis> {
    if threads == 0 {
        return Err(DiceError::config("threads must be positive"));
    }
    if batch_size == 0 {
        return Err(DiceError::config("batch_size must be positive"));
    }
    if !definition.is_prepared() {
        return Err(DiceError::NotPrepared { roll_type: definition.roll_type().to_string() });
    }

    let quota = match budget {
        Budget::Count(n) => {
            let per_worker = n / threads as Count;
            if per_worker == 0 {
                return Err(DiceError::config(format!(
                    "{n} draws cannot be split across {threads} threads"
                )));
            }
            let remainder = n % threads as Count;
            if remainder > 0 {
                log::warn!("analysis: dropping remainder={remainder} of n={n} across threads={threads}");
            }
            Some(per_worker)
        }
        Budget::Duration(limit) => {
            if limit.is_zero() {
                return Err(DiceError::config("duration must be positive"));
            }
            None
        }
    };

    log::info!(
        "analysis: start roll={} budget={budget:?} threads={threads} batch_size={batch_size} seed={master_seed}",
        definition.roll_type()
    );
    let started = Instant::now();

    // ── Phase 1: draw, publish histograms, compute the global mean ──
    let tallies = draw_phase(definition, budget, quota, threads, batch_size, master_seed)?;

    let mut rolls: BTreeMap<Value, Count> = BTreeMap::new();
    let mut n: Count = 0;
    let mut sum: i128 = 0;
    for (worker, tally) in tallies.iter().enumerate() {
        log::debug!("analysis: worker={worker} draws={} sum={}", tally.draws, tally.sum);
        for (&value, &count) in &tally.counts {
            *rolls.entry(value).or_insert(0) += count;
        }
        n += tally.draws;
        sum += tally.sum;
    }
    let mean = sum as f64 / n as f64;

    // ── Phase 2: second moment against the global mean ──
    let moment = moment_phase(&tallies, mean)?;

    let analysis = Analysis {
        n,
        rolls,
        mean,
        deviation: (moment.deviation / n as f64).sqrt(),
        deviation_up: (moment.up_deviation / moment.up_count).sqrt(),
        deviation_down: (moment.down_deviation / moment.down_count).sqrt(),
        duration: started.elapsed(),
    };
    log::info!(
        "analysis: done n={} mean={:.4} dev={:.4} up={:.4} down={:.4} elapsed={:?}",
        analysis.n,
        analysis.mean,
        analysis.deviation,
        analysis.deviation_up,
        analysis.deviation_down,
        analysis.duration
    );
    Ok(analysis)
}

fn draw_phase(
    definition: &Definition,
    budget: Budget,
    quota: Option<Count>,
    threads: usize,
    batch_size: usize,
    master_seed: u64,
) -> DiceResult<Vec<WorkerTally>> {
    let bank = RngBank::new(master_seed);
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|worker| {
                let mut rng = bank.for_worker(worker);
                let stop = &stop;
                scope.spawn(move || {
                    let result = run_worker(definition, &mut rng, quota, batch_size, stop);
                    if result.is_err() {
                        // Stop the others early; this analysis has already failed.
                        stop.store(true, Ordering::Release);
                    }
                    result
                })
            })
            .collect();

        if let Budget::Duration(limit) = budget {
            let deadline = Instant::now() + limit;
            loop {
                let now = Instant::now();
                if now >= deadline || handles.iter().any(|h| h.is_finished()) {
                    break;
                }
                thread::sleep(COORDINATOR_POLL.min(deadline - now));
            }
            stop.store(true, Ordering::Release);
        }

        handles
            .into_iter()
            .enumerate()
            .map(|(worker, handle)| {
                handle
                    .join()
                    .unwrap_or(Err(DiceError::WorkerFailed { worker }))
            })
            .collect()
    })
}

fn moment_phase(tallies: &[WorkerTally], mean: f64) -> DiceResult<SecondMoment> {
    thread::scope(|scope| {
        let handles: Vec<_> = tallies
            .iter()
            .map(|tally| scope.spawn(move || tally.second_moment(mean)))
            .collect();

        handles
            .into_iter()
            .enumerate()
            .try_fold(SecondMoment::default(), |acc, (worker, handle)| {
                let partial = handle.join().map_err(|_| DiceError::WorkerFailed { worker })?;
                log::debug!(
                    "analysis: worker={worker} deviation={:.4} up_count={:.2} down_count={:.2}",
                    partial.deviation,
                    partial.up_count,
                    partial.down_count
                );
                Ok(acc.add(partial))
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tanh_split_halves_mean_value() {
        let mut tally = WorkerTally::default();
        tally.record(5);
        tally.record(5);
        let moment = tally.second_moment(5.0);
        assert_eq!(moment.deviation, 0.0);
        assert!((moment.up_count - 1.0).abs() < 1e-12);
        assert!((moment.down_count - 1.0).abs() < 1e-12);
    }

    #[test]
    fn far_values_go_almost_entirely_to_one_side() {
        let mut tally = WorkerTally::default();
        tally.record(100);
        tally.record(0);
        let moment = tally.second_moment(50.0);
        assert!((moment.deviation - 5000.0).abs() < 1e-9);
        assert!((moment.up_deviation - 2500.0).abs() < 1e-6);
        assert!((moment.down_deviation - 2500.0).abs() < 1e-6);
    }

    #[test]
    fn seconds_budget_rejects_nonsense() {
        assert!(Budget::seconds(0.0).is_err());
        assert!(Budget::seconds(-1.0).is_err());
        assert!(Budget::seconds(f64::NAN).is_err());
        assert!(matches!(Budget::seconds(1e20), Err(DiceError::Configuration(_))));
        assert!(matches!(Budget::seconds(f64::MAX), Err(DiceError::Configuration(_))));
        assert!(Budget::seconds(0.25).is_ok());
    }

    #[test]
    fn at_most_complements_at_least() {
        let analysis = Analysis {
            n:              4,
            rolls:          BTreeMap::from([(1, 1), (2, 2), (3, 1)]),
            mean:           2.0,
            deviation:      0.0,
            deviation_up:   0.0,
            deviation_down: 0.0,
            duration:       Duration::ZERO,
        };
        assert_eq!(analysis.at_least(2), 0.75);
        assert_eq!(analysis.at_most(2), 0.75);
        assert_eq!(analysis.probability(2), 0.5);
        assert_eq!(analysis.probability(9), 0.0);
        assert_eq!(analysis.at_most(Value::MAX), 1.0);
        assert_eq!(analysis.at_least(Value::MIN), 1.0);
    }
}
