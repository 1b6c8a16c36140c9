//! The stepping contract every training/testing environment satisfies.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::counter::{CounterStack, Scale};
use crate::engine::RewardSource;
use crate::error::SimError;
use crate::log::LogRecord;
use crate::prng::Prng;

/// Activation pattern for one named element.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pattern {
    #[cfg_attr(feature = "serde", serde(default))]
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl Pattern {
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self { shape, values }
    }

    /// One-dimensional pattern.
    pub fn flat(values: Vec<f32>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    pub fn one_hot(len: usize, hot: usize) -> Self {
        let mut values = vec![0.0; len];
        if let Some(v) = values.get_mut(hot) {
            *v = 1.0;
        }
        Self::flat(values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Epoch counter as seen right after `Environment::step()`.
///
/// By the time `step()` returns, the Epoch counter has already rolled to the
/// next epoch. `epoch` is that new value and drives the test-interval and
/// max-epoch checks; `finished` is the epoch that just ended and is what an
/// epoch log row reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochSnapshot {
    pub epoch: i64,
    pub finished: i64,
    pub changed: bool,
}

/// Presentation order over an index space of size `n`.
///
/// Sequential orders are the identity and never change. Permuted orders are a
/// fresh uniform permutation each time the index space is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOrder {
    order: Vec<usize>,
    sequential: bool,
}

impl IndexOrder {
    pub fn new(sequential: bool) -> Self {
        Self {
            order: Vec::new(),
            sequential,
        }
    }

    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    pub fn set_sequential(&mut self, sequential: bool) {
        self.sequential = sequential;
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.order
    }

    /// Rebuild for `n` items, shuffled unless sequential.
    pub fn reset(&mut self, n: usize, rng: &mut Prng) {
        self.order.clear();
        self.order.extend(0..n);
        if !self.sequential {
            rng.shuffle(&mut self.order);
        }
    }

    pub fn reshuffle(&mut self, rng: &mut Prng) {
        if !self.sequential {
            rng.shuffle(&mut self.order);
        }
    }

    /// Item index presented at position `pos` (a counter value).
    pub fn index(&self, pos: i64) -> Option<usize> {
        usize::try_from(pos)
            .ok()
            .and_then(|p| self.order.get(p).copied())
    }
}

pub trait Environment {
    fn name(&self) -> &str;

    /// Reset for `run`: counters restart (Run = `run`, finest scale at -1),
    /// permuted orders are regenerated. Rejects an empty index space.
    fn init(&mut self, run: i64) -> Result<(), SimError>;

    /// Advance to the next item, cascading counter rollover and reshuffling
    /// on wrap. Always succeeds once initialized.
    fn step(&mut self) -> bool;

    fn counters(&self) -> &CounterStack;

    fn counters_mut(&mut self) -> &mut CounterStack;

    /// Pattern for element `element` on the current item. `None` means the
    /// element is not used this trial.
    fn state(&self, element: &str) -> Option<Pattern>;

    fn reseed(&mut self, seed: u64);

    /// Human-readable name of the current item, for logs and view refreshes.
    fn item_name(&self) -> String {
        String::new()
    }

    /// Reward-driven environments expose their reward source here.
    fn reward_source(&mut self) -> Option<&mut dyn RewardSource> {
        None
    }

    /// Task-specific columns appended to each epoch record.
    fn epoch_fields(&self, rec: LogRecord) -> LogRecord {
        rec
    }

    fn counter_cur(&self, scale: Scale) -> Option<i64> {
        self.counters().cur(scale)
    }

    fn counter_chg(&self, scale: Scale) -> bool {
        self.counters().chg(scale)
    }

    /// Read the Epoch counter after `step()` and before inputs are applied.
    ///
    /// Always use this rather than reading `counter_cur(Scale::Epoch)` at the
    /// call site: after `step()` the current value already belongs to the
    /// next epoch.
    fn pre_step_snapshot(&self) -> EpochSnapshot {
        let counters = self.counters();
        match counters.counter(Scale::Epoch) {
            Some(c) => EpochSnapshot {
                epoch: c.cur,
                finished: if counters.chg(Scale::Epoch) {
                    c.prev
                } else {
                    c.cur
                },
                changed: counters.chg(Scale::Epoch),
            },
            None => EpochSnapshot::default(),
        }
    }
}
