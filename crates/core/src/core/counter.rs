//! Hierarchical counters.
//!
//! A [`Counter`] tracks one time scale. A [`CounterStack`] orders counters from
//! finest to coarsest and cascades rollover: when a level reaches its `max`, it
//! wraps to 0 and the next coarser level is stepped.

use core::fmt::Write as _;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Named time scale tracked by a counter level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Scale {
    Tick,
    Trial,
    Sequence,
    Epoch,
    Run,
}

impl Scale {
    pub fn label(self) -> &'static str {
        match self {
            Scale::Tick => "Tick",
            Scale::Trial => "Trial",
            Scale::Sequence => "Sequence",
            Scale::Epoch => "Epoch",
            Scale::Run => "Run",
        }
    }
}

/// One counter level.
///
/// `max <= 0` means unbounded: `step()` never wraps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counter {
    pub cur: i64,
    pub prev: i64,
    pub max: i64,
    /// True iff the most recent `step()` wrapped this counter back to 0.
    pub changed: bool,
}

impl Counter {
    pub fn new(max: i64) -> Self {
        Self {
            cur: 0,
            prev: 0,
            max,
            changed: false,
        }
    }

    #[inline]
    pub fn is_bounded(&self) -> bool {
        self.max > 0
    }

    pub fn init(&mut self, start: i64) {
        self.cur = start;
        self.prev = start;
        self.changed = false;
    }

    /// Advance by one, wrapping at `max`. Returns true on wrap so the caller
    /// can step the next coarser scale.
    pub fn step(&mut self) -> bool {
        self.prev = self.cur;
        self.cur += 1;
        if self.is_bounded() && self.cur >= self.max {
            self.cur = 0;
            self.changed = true;
        } else {
            self.changed = false;
        }
        self.changed
    }

    /// Advance by one without wrapping.
    ///
    /// Returns true iff the counter reached `max`, i.e. no further value is
    /// available at this scale. Used at run level to decide between "start
    /// another run" and "completely done".
    pub fn incr(&mut self) -> bool {
        self.prev = self.cur;
        self.cur += 1;
        self.is_bounded() && self.cur >= self.max
    }

    /// Clear the change flag without moving the value.
    #[inline]
    pub fn same(&mut self) {
        self.changed = false;
    }
}

/// Ordered counter levels, finest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterStack {
    levels: Vec<(Scale, Counter)>,
    stepped: bool,
}

impl CounterStack {
    /// Build a stack from `(scale, max)` pairs listed finest to coarsest.
    pub fn new(levels: impl IntoIterator<Item = (Scale, i64)>) -> Self {
        Self {
            levels: levels
                .into_iter()
                .map(|(scale, max)| (scale, Counter::new(max)))
                .collect(),
            stepped: false,
        }
    }

    /// The common Trial < Epoch < Run layout. Epoch is unbounded: epochs are
    /// ended by the run controller, not by rollover.
    pub fn trial_epoch_run(trials: i64, runs: i64) -> Self {
        Self::new([(Scale::Trial, trials), (Scale::Epoch, 0), (Scale::Run, runs)])
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn scales(&self) -> impl Iterator<Item = Scale> + '_ {
        self.levels.iter().map(|(s, _)| *s)
    }

    /// The finest scale, stepped directly by `step()`.
    pub fn finest(&self) -> Option<Scale> {
        self.levels.first().map(|(s, _)| *s)
    }

    fn position(&self, scale: Scale) -> Option<usize> {
        self.levels.iter().position(|(s, _)| *s == scale)
    }

    pub fn counter(&self, scale: Scale) -> Option<&Counter> {
        self.levels
            .iter()
            .find(|(s, _)| *s == scale)
            .map(|(_, c)| c)
    }

    pub fn counter_mut(&mut self, scale: Scale) -> Option<&mut Counter> {
        self.levels
            .iter_mut()
            .find(|(s, _)| *s == scale)
            .map(|(_, c)| c)
    }

    pub fn cur(&self, scale: Scale) -> Option<i64> {
        self.counter(scale).map(|c| c.cur)
    }

    pub fn prev(&self, scale: Scale) -> Option<i64> {
        self.counter(scale).map(|c| c.prev)
    }

    pub fn max(&self, scale: Scale) -> Option<i64> {
        self.counter(scale).map(|c| c.max)
    }

    /// Did `scale` advance on the most recent `step()`?
    ///
    /// The finest scale advances on every step; any coarser scale advances
    /// exactly when the level below it wrapped.
    pub fn chg(&self, scale: Scale) -> bool {
        match self.position(scale) {
            Some(0) => self.stepped,
            Some(i) => self.levels[i - 1].1.changed,
            None => false,
        }
    }

    /// Did `scale` itself wrap to 0 on the most recent `step()`?
    pub fn wrapped(&self, scale: Scale) -> bool {
        self.counter(scale).is_some_and(|c| c.changed)
    }

    pub fn set_max(&mut self, scale: Scale, max: i64) {
        if let Some(c) = self.counter_mut(scale) {
            c.max = max;
        }
    }

    pub fn set_cur(&mut self, scale: Scale, cur: i64) {
        if let Some(c) = self.counter_mut(scale) {
            c.init(cur);
        }
    }

    /// Reset for a new run: every level to 0, `Run` to `run`, and the finest
    /// level to -1 so that the first `step()` lands on index 0.
    pub fn reset(&mut self, run: i64) {
        for (i, (scale, ctr)) in self.levels.iter_mut().enumerate() {
            let start = match *scale {
                Scale::Run => run,
                _ if i == 0 => -1,
                _ => 0,
            };
            ctr.init(start);
        }
        self.stepped = false;
    }

    /// Advance the finest level and cascade rollover upward.
    ///
    /// Returns true if the finest level wrapped.
    pub fn step(&mut self) -> bool {
        for (_, ctr) in self.levels.iter_mut() {
            ctr.same();
        }
        self.stepped = true;
        for (_, ctr) in self.levels.iter_mut() {
            if !ctr.step() {
                break;
            }
        }
        self.levels.first().is_some_and(|(_, c)| c.changed)
    }

    /// Explicit roll-to-next at `scale` (see [`Counter::incr`]).
    ///
    /// A missing scale reports true: nothing further is possible there.
    pub fn incr(&mut self, scale: Scale) -> bool {
        match self.counter_mut(scale) {
            Some(c) => c.incr(),
            None => true,
        }
    }

    /// Reject layouts that cannot cascade.
    ///
    /// Every level finer than `Epoch` (or than the coarsest level when there
    /// is no `Epoch`) must wrap, so it must be bounded.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.levels.is_empty() {
            return Err(SimError::Config("counter stack has no levels".into()));
        }
        let top = self
            .position(Scale::Epoch)
            .unwrap_or(self.levels.len() - 1);
        for (scale, ctr) in &self.levels[..top] {
            if !ctr.is_bounded() {
                return Err(SimError::Config(format!(
                    "scale {} must be bounded (max > 0), got max = {}",
                    scale.label(),
                    ctr.max
                )));
            }
        }
        Ok(())
    }

    /// Counter summary for view refreshes, coarsest first.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (scale, ctr) in self.levels.iter().rev() {
            if !out.is_empty() {
                out.push('\t');
            }
            let _ = write!(out, "{}:\t{}", scale.label(), ctr.cur);
        }
        out
    }
}
