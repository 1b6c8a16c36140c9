//! Collaborator interfaces.
//!
//! The run controller never computes activations or weights itself. It drives
//! a [`NetworkEngine`], requests refreshes from an optional [`View`], and, for
//! reward-driven environments, asks a [`RewardSource`] what reward the chosen
//! output earned.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::environment::Pattern;

/// Failure reported by an engine. Carried unchanged inside
/// [`SimError::Engine`](crate::error::SimError::Engine).
pub type EngineError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How an engine layer treats externally applied patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LayerMode {
    /// Pattern is clamped as input.
    Input,
    /// Pattern is the supervised target, clamped in the plus phase.
    Target,
    /// Pattern is only compared against, never clamped.
    Compare,
}

/// Pool-level maximum activity of a layer and the unit holding it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoolMax {
    pub act: f32,
    pub index: usize,
}

/// Output error for the trial that just settled.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputError {
    pub sse: f32,
    pub avg_sse: f32,
}

/// Position inside an alpha cycle, handed to the engine on every call that
/// needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettleTime {
    /// Zero-based quarter, `0..4`.
    pub quarter: usize,
    /// Cycle within the current quarter.
    pub cycle: usize,
    /// Cycles run so far in this trial.
    pub total_cycles: usize,
}

pub trait NetworkEngine {
    /// Fresh weights for a new run.
    fn init_weights(&mut self) -> Result<(), EngineError>;

    fn set_layer_mode(&mut self, layer: &str, mode: LayerMode) -> Result<(), EngineError>;

    /// Drop every externally applied pattern.
    fn clear_external(&mut self) -> Result<(), EngineError>;

    fn apply_external(&mut self, layer: &str, pattern: &Pattern) -> Result<(), EngineError>;

    /// Apply weight changes computed by the previous `compute_deltas`.
    fn flush_deltas(&mut self) -> Result<(), EngineError>;

    fn init_settle(&mut self, train: bool) -> Result<(), EngineError>;

    fn cycle(&mut self, time: &SettleTime) -> Result<(), EngineError>;

    fn quarter_final(&mut self, time: &SettleTime) -> Result<(), EngineError>;

    /// Compute, but do not apply, weight changes from this trial's activity.
    fn compute_deltas(&mut self) -> Result<(), EngineError>;

    fn max_activity(&self, layer: &str) -> PoolMax;

    fn output_error(&self) -> OutputError;
}

/// Display collaborator. Fire-and-forget: nothing here may block the loop.
pub trait View {
    fn request_refresh(&mut self, counters: &str);

    /// Called once per cycle so a host event loop can stay responsive.
    fn pump_events(&mut self) {}
}

/// Reward for reinforcement-learning environments.
pub trait RewardSource {
    fn compute_reward(&mut self, chosen: usize) -> Pattern;
}
