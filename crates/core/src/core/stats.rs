use crate::engine::OutputError;
use crate::log::LogRecord;

/// One settled trial.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrialOutcome {
    pub sse: f32,
    pub avg_sse: f32,
    pub cycles: usize,
}

impl TrialOutcome {
    pub fn new(err: OutputError, cycles: usize) -> Self {
        Self {
            sse: err.sse,
            avg_sse: err.avg_sse,
            cycles,
        }
    }

    /// Any residual output error counts the trial as wrong.
    pub fn is_error(&self) -> bool {
        self.sse > 0.0
    }
}

/// Sums accumulated over one epoch, consumed at the epoch boundary.
#[derive(Debug, Clone, Default)]
pub struct EpochStats {
    trials: u32,
    errors: u32,
    sum_sse: f64,
    sum_avg_sse: f64,
    sum_cycles: u64,
}

impl EpochStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, trial: &TrialOutcome) {
        self.trials += 1;
        if trial.is_error() {
            self.errors += 1;
        }
        self.sum_sse += trial.sse as f64;
        self.sum_avg_sse += trial.avg_sse as f64;
        self.sum_cycles += trial.cycles as u64;
    }

    pub fn trials(&self) -> u32 {
        self.trials
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn summary(&self) -> EpochSummary {
        if self.trials == 0 {
            return EpochSummary::default();
        }
        let n = self.trials as f64;
        let pct_err = self.errors as f64 / n;
        EpochSummary {
            trials: self.trials,
            errors: self.errors,
            sse: self.sum_sse / n,
            avg_sse: self.sum_avg_sse / n,
            pct_err,
            pct_cor: 1.0 - pct_err,
            mean_cycles: self.sum_cycles as f64 / n,
        }
    }

    /// Summarize and start the next epoch from zero.
    pub fn take(&mut self) -> EpochSummary {
        let out = self.summary();
        self.reset();
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EpochSummary {
    pub trials: u32,
    pub errors: u32,
    pub sse: f64,
    pub avg_sse: f64,
    pub pct_err: f64,
    pub pct_cor: f64,
    pub mean_cycles: f64,
}

impl EpochSummary {
    pub fn is_error_free(&self) -> bool {
        self.trials > 0 && self.errors == 0
    }

    pub fn append_to(&self, rec: LogRecord) -> LogRecord {
        rec.with("Trials", self.trials)
            .with("SSE", self.sse)
            .with("AvgSSE", self.avg_sse)
            .with("PctErr", self.pct_err)
            .with("PctCor", self.pct_cor)
            .with("Cycles", self.mean_cycles)
    }
}

/// Per-run bookkeeping across epochs.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub epochs: u32,
    /// Consecutive error-free epochs up to the latest one.
    pub n_zero: u32,
    /// First epoch that was error free.
    pub first_zero: Option<i64>,
    pub last: Option<EpochSummary>,
}

impl RunStats {
    pub fn record_epoch(&mut self, epoch: i64, summary: &EpochSummary) {
        self.epochs += 1;
        if summary.is_error_free() {
            self.n_zero += 1;
            self.first_zero.get_or_insert(epoch);
        } else {
            self.n_zero = 0;
        }
        self.last = Some(*summary);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Convergence test evaluated at every training epoch boundary.
pub trait StopCriterion {
    fn should_stop(&mut self, epoch: &EpochSummary, run: &RunStats) -> bool;
}

/// Stop after `n` consecutive error-free epochs. `n == 0` never stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroErrorStreak(pub u32);

impl StopCriterion for ZeroErrorStreak {
    fn should_stop(&mut self, _epoch: &EpochSummary, run: &RunStats) -> bool {
        self.0 > 0 && run.n_zero >= self.0
    }
}

/// Only `max_epochs` ends a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl StopCriterion for Never {
    fn should_stop(&mut self, _: &EpochSummary, _: &RunStats) -> bool {
        false
    }
}

/// Task-specific criterion from a closure.
pub struct StopWhen<F>(pub F);

impl<F> StopCriterion for StopWhen<F>
where
    F: FnMut(&EpochSummary, &RunStats) -> bool,
{
    fn should_stop(&mut self, epoch: &EpochSummary, run: &RunStats) -> bool {
        (self.0)(epoch, run)
    }
}
