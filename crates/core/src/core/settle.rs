//! The alpha cycle: one trial's settling pass.
//!
//! Four quarters of `cycles_per_quarter` engine cycles each. Training settles
//! flush the previous trial's weight changes *before* settling and compute new
//! ones after, so a trial's update shows up in the next trial's activity.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{NetworkEngine, RewardSource, SettleTime, View};
use crate::error::SimError;

pub const QUARTERS_PER_TRIAL: usize = 4;

/// `FastSpike` refreshes on every n-th cycle.
pub const FAST_SPIKE_INTERVAL: usize = 10;

/// Zero-based quarter whose end receives the reward.
pub const REWARD_QUARTER: usize = 2;

/// First quarter of the plus phase.
pub const PLUS_PHASE_QUARTER: usize = 2;

/// How often the view is asked to refresh. Never affects numerical results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ViewUpdate {
    Cycle,
    FastSpike,
    Quarter,
    Phase,
    #[default]
    AlphaCycle,
    /// Only at epoch boundaries, handled by the run controller.
    Epoch,
}

impl ViewUpdate {
    /// Ordering table, finest to coarsest. Comparisons go through this rather
    /// than declaration order.
    pub const fn rank(self) -> u8 {
        match self {
            ViewUpdate::Cycle => 0,
            ViewUpdate::FastSpike => 1,
            ViewUpdate::Quarter => 2,
            ViewUpdate::Phase => 3,
            ViewUpdate::AlphaCycle => 4,
            ViewUpdate::Epoch => 5,
        }
    }

    /// True if `self` is at least as fine as `other`.
    pub const fn at_most(self, other: ViewUpdate) -> bool {
        self.rank() <= other.rank()
    }

    pub fn label(self) -> &'static str {
        match self {
            ViewUpdate::Cycle => "Cycle",
            ViewUpdate::FastSpike => "FastSpike",
            ViewUpdate::Quarter => "Quarter",
            ViewUpdate::Phase => "Phase",
            ViewUpdate::AlphaCycle => "AlphaCycle",
            ViewUpdate::Epoch => "Epoch",
        }
    }
}

/// Stop a testing settle once `layer`'s pool max exceeds `threshold`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EarlyStop {
    pub layer: String,
    pub threshold: f32,
}

/// Where the reward hook reads the choice and writes the reward.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RewardTiming {
    pub readout_layer: String,
    pub reward_layer: String,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SettleConfig {
    pub cycles_per_quarter: usize,
    pub view_update: ViewUpdate,
    pub early_stop: Option<EarlyStop>,
    pub reward: Option<RewardTiming>,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            cycles_per_quarter: 25,
            view_update: ViewUpdate::AlphaCycle,
            early_stop: None,
            reward: None,
        }
    }
}

impl SettleConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.cycles_per_quarter == 0 {
            return Err(SimError::Config("cycles_per_quarter must be > 0".into()));
        }
        if let Some(es) = &self.early_stop {
            if es.layer.trim().is_empty() {
                return Err(SimError::Config("early_stop.layer is empty".into()));
            }
            if !es.threshold.is_finite() {
                return Err(SimError::Config(format!(
                    "early_stop.threshold must be finite, got {}",
                    es.threshold
                )));
            }
        }
        if let Some(r) = &self.reward {
            if r.readout_layer.trim().is_empty() || r.reward_layer.trim().is_empty() {
                return Err(SimError::Config("reward layers must be named".into()));
            }
        }
        Ok(())
    }
}

/// What happened during one settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettleOutcome {
    /// Engine cycles run; the reaction time when early stop fired.
    pub cycles: usize,
    /// Quarter in which early stop fired.
    pub early_stopped: Option<usize>,
    pub rewarded: bool,
}

/// Optional per-settle collaborators.
#[derive(Default)]
pub struct SettleHooks<'a> {
    pub view: Option<&'a mut dyn View>,
    pub reward: Option<&'a mut dyn RewardSource>,
    /// Counter summary prefixed to every refresh request.
    pub counters: &'a str,
}

impl SettleHooks<'_> {
    fn refresh(&mut self, total_cycles: usize) {
        if let Some(view) = self.view.as_deref_mut() {
            let summary = format!("{}\tCycle:\t{}", self.counters, total_cycles);
            view.request_refresh(&summary);
        }
    }

    fn pump(&mut self) {
        if let Some(view) = self.view.as_deref_mut() {
            view.pump_events();
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettleLoop {
    cfg: SettleConfig,
}

impl SettleLoop {
    pub fn new(cfg: SettleConfig) -> Result<Self, SimError> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &SettleConfig {
        &self.cfg
    }

    pub fn cycles_per_trial(&self) -> usize {
        QUARTERS_PER_TRIAL * self.cfg.cycles_per_quarter
    }

    /// Run one alpha cycle.
    ///
    /// The reward hook fires only when both a [`RewardTiming`] is configured
    /// and `hooks.reward` is set. Early stop applies only to non-training
    /// settles; once it fires, remaining quarters skip their cycles but still
    /// run `quarter_final`.
    pub fn run<E>(
        &self,
        net: &mut E,
        train: bool,
        hooks: &mut SettleHooks<'_>,
    ) -> Result<SettleOutcome, SimError>
    where
        E: NetworkEngine + ?Sized,
    {
        let view_update = self.cfg.view_update;
        let early_stop = if train {
            None
        } else {
            self.cfg.early_stop.as_ref()
        };

        if train {
            net.flush_deltas().map_err(SimError::engine("flush_deltas"))?;
        }
        net.init_settle(train)
            .map_err(SimError::engine("init_settle"))?;

        let mut time = SettleTime::default();
        let mut outcome = SettleOutcome::default();

        for qtr in 0..QUARTERS_PER_TRIAL {
            time.quarter = qtr;
            if outcome.early_stopped.is_none() {
                for cyc in 0..self.cfg.cycles_per_quarter {
                    time.cycle = cyc;
                    net.cycle(&time).map_err(SimError::engine("cycle"))?;
                    time.total_cycles += 1;

                    match view_update {
                        ViewUpdate::Cycle => hooks.refresh(time.total_cycles),
                        ViewUpdate::FastSpike if (cyc + 1) % FAST_SPIKE_INTERVAL == 0 => {
                            hooks.refresh(time.total_cycles)
                        }
                        _ => {}
                    }
                    hooks.pump();

                    if let Some(es) = early_stop {
                        if net.max_activity(&es.layer).act > es.threshold {
                            outcome.early_stopped = Some(qtr);
                            break;
                        }
                    }
                }
            }

            if qtr == REWARD_QUARTER {
                if let (Some(timing), Some(source)) =
                    (self.cfg.reward.as_ref(), hooks.reward.as_deref_mut())
                {
                    let chosen = net.max_activity(&timing.readout_layer).index;
                    let reward = source.compute_reward(chosen);
                    net.apply_external(&timing.reward_layer, &reward)
                        .map_err(SimError::engine("apply_reward"))?;
                    outcome.rewarded = true;
                }
            }

            net.quarter_final(&time)
                .map_err(SimError::engine("quarter_final"))?;

            let plus_phase = view_update == ViewUpdate::Phase && qtr >= PLUS_PHASE_QUARTER;
            if view_update.at_most(ViewUpdate::Quarter) || plus_phase {
                hooks.refresh(time.total_cycles);
            }
        }

        if train {
            net.compute_deltas()
                .map_err(SimError::engine("compute_deltas"))?;
        }
        if view_update == ViewUpdate::AlphaCycle {
            hooks.refresh(time.total_cycles);
        }

        outcome.cycles = time.total_cycles;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, LayerMode, OutputError, PoolMax};
    use crate::environment::Pattern;

    #[derive(Debug, Default)]
    struct CountingNet {
        calls: Vec<String>,
        cycles: usize,
        quarter_finals: usize,
        /// Activity crosses 1.0 once this many cycles have run.
        spike_after: Option<usize>,
        fail_cycle: Option<usize>,
    }

    impl NetworkEngine for CountingNet {
        fn init_weights(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
        fn set_layer_mode(&mut self, _: &str, _: LayerMode) -> Result<(), EngineError> {
            Ok(())
        }
        fn clear_external(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
        fn apply_external(&mut self, layer: &str, p: &Pattern) -> Result<(), EngineError> {
            self.calls.push(format!("apply:{layer}:{}", p.values[0]));
            Ok(())
        }
        fn flush_deltas(&mut self) -> Result<(), EngineError> {
            self.calls.push("flush".into());
            Ok(())
        }
        fn init_settle(&mut self, train: bool) -> Result<(), EngineError> {
            self.calls.push(format!("init:{train}"));
            Ok(())
        }
        fn cycle(&mut self, _: &SettleTime) -> Result<(), EngineError> {
            if self.fail_cycle == Some(self.cycles) {
                return Err("engine fault".into());
            }
            self.cycles += 1;
            Ok(())
        }
        fn quarter_final(&mut self, t: &SettleTime) -> Result<(), EngineError> {
            self.quarter_finals += 1;
            self.calls.push(format!("qf:{}", t.quarter));
            Ok(())
        }
        fn compute_deltas(&mut self) -> Result<(), EngineError> {
            self.calls.push("dwt".into());
            Ok(())
        }
        fn max_activity(&self, _: &str) -> PoolMax {
            let spiking = self.spike_after.is_some_and(|n| self.cycles >= n);
            PoolMax {
                act: if spiking { 1.0 } else { 0.0 },
                index: 1,
            }
        }
        fn output_error(&self) -> OutputError {
            OutputError::default()
        }
    }

    #[derive(Default)]
    struct CountingView {
        refreshes: Vec<String>,
        pumps: usize,
    }

    impl View for CountingView {
        fn request_refresh(&mut self, counters: &str) {
            self.refreshes.push(counters.to_string());
        }
        fn pump_events(&mut self) {
            self.pumps += 1;
        }
    }

    struct FixedReward(Vec<usize>);

    impl RewardSource for FixedReward {
        fn compute_reward(&mut self, chosen: usize) -> Pattern {
            self.0.push(chosen);
            Pattern::flat(vec![0.5])
        }
    }

    fn settle(cfg: SettleConfig) -> SettleLoop {
        SettleLoop::new(cfg).unwrap()
    }

    fn refreshes(view_update: ViewUpdate, train: bool) -> usize {
        let lp = settle(SettleConfig {
            cycles_per_quarter: 20,
            view_update,
            ..Default::default()
        });
        let mut view = CountingView::default();
        let mut net = CountingNet::default();
        let mut hooks = SettleHooks {
            view: Some(&mut view),
            ..Default::default()
        };
        lp.run(&mut net, train, &mut hooks).unwrap();
        assert_eq!(view.pumps, 80);
        view.refreshes.len()
    }

    #[test]
    fn runs_four_quarters_of_cycles() {
        for cpq in [1, 5, 25] {
            let lp = settle(SettleConfig {
                cycles_per_quarter: cpq,
                ..Default::default()
            });
            let mut net = CountingNet::default();
            let out = lp.run(&mut net, true, &mut SettleHooks::default()).unwrap();
            assert_eq!(net.cycles, 4 * cpq);
            assert_eq!(net.quarter_finals, 4);
            assert_eq!(out.cycles, 4 * cpq);
            assert_eq!(out.early_stopped, None);
        }
    }

    #[test]
    fn training_flushes_before_and_computes_after() {
        let lp = settle(SettleConfig {
            cycles_per_quarter: 2,
            ..Default::default()
        });
        let mut net = CountingNet::default();
        lp.run(&mut net, true, &mut SettleHooks::default()).unwrap();
        assert_eq!(
            net.calls,
            vec!["flush", "init:true", "qf:0", "qf:1", "qf:2", "qf:3", "dwt"]
        );

        let mut net = CountingNet::default();
        lp.run(&mut net, false, &mut SettleHooks::default()).unwrap();
        assert_eq!(net.calls, vec!["init:false", "qf:0", "qf:1", "qf:2", "qf:3"]);
    }

    #[test]
    fn early_stop_cuts_cycles_but_keeps_quarter_finals() {
        let lp = settle(SettleConfig {
            cycles_per_quarter: 25,
            early_stop: Some(EarlyStop {
                layer: "Output".into(),
                threshold: 0.5,
            }),
            ..Default::default()
        });
        let mut net = CountingNet {
            spike_after: Some(30),
            ..Default::default()
        };
        let out = lp.run(&mut net, false, &mut SettleHooks::default()).unwrap();
        assert_eq!(out.cycles, 30);
        assert_eq!(out.early_stopped, Some(1));
        assert_eq!(net.cycles, 30);
        assert_eq!(net.quarter_finals, 4);
    }

    #[test]
    fn early_stop_is_ignored_while_training() {
        let lp = settle(SettleConfig {
            cycles_per_quarter: 10,
            early_stop: Some(EarlyStop {
                layer: "Output".into(),
                threshold: 0.5,
            }),
            ..Default::default()
        });
        let mut net = CountingNet {
            spike_after: Some(1),
            ..Default::default()
        };
        let out = lp.run(&mut net, true, &mut SettleHooks::default()).unwrap();
        assert_eq!(out.cycles, 40);
        assert_eq!(out.early_stopped, None);
    }

    #[test]
    fn reward_lands_before_third_quarter_final() {
        let lp = settle(SettleConfig {
            cycles_per_quarter: 3,
            reward: Some(RewardTiming {
                readout_layer: "Output".into(),
                reward_layer: "Reward".into(),
            }),
            ..Default::default()
        });
        let mut net = CountingNet::default();
        let mut source = FixedReward(Vec::new());
        let mut hooks = SettleHooks {
            reward: Some(&mut source),
            ..Default::default()
        };
        let out = lp.run(&mut net, true, &mut hooks).unwrap();
        assert!(out.rewarded);
        assert_eq!(source.0, vec![1]);
        let at = net.calls.iter().position(|c| c == "apply:Reward:0.5").unwrap();
        assert_eq!(net.calls[at - 1], "qf:1");
        assert_eq!(net.calls[at + 1], "qf:2");
    }

    #[test]
    fn reward_needs_both_timing_and_source() {
        let lp = settle(SettleConfig {
            cycles_per_quarter: 1,
            ..Default::default()
        });
        let mut net = CountingNet::default();
        let mut source = FixedReward(Vec::new());
        let mut hooks = SettleHooks {
            reward: Some(&mut source),
            ..Default::default()
        };
        let out = lp.run(&mut net, true, &mut hooks).unwrap();
        assert!(!out.rewarded);
        assert!(source.0.is_empty());
    }

    #[test]
    fn view_refresh_frequency_follows_scale() {
        assert_eq!(refreshes(ViewUpdate::Cycle, true), 80 + 4);
        assert_eq!(refreshes(ViewUpdate::FastSpike, true), 8 + 4);
        assert_eq!(refreshes(ViewUpdate::Quarter, false), 4);
        assert_eq!(refreshes(ViewUpdate::Phase, false), 2);
        assert_eq!(refreshes(ViewUpdate::AlphaCycle, true), 1);
        assert_eq!(refreshes(ViewUpdate::Epoch, true), 0);
    }

    #[test]
    fn refresh_carries_counter_summary_and_cycle() {
        let lp = settle(SettleConfig {
            cycles_per_quarter: 5,
            ..Default::default()
        });
        let mut view = CountingView::default();
        let mut net = CountingNet::default();
        let mut hooks = SettleHooks {
            view: Some(&mut view),
            reward: None,
            counters: "Run:\t0\tEpoch:\t2",
        };
        lp.run(&mut net, true, &mut hooks).unwrap();
        assert_eq!(view.refreshes, vec!["Run:\t0\tEpoch:\t2\tCycle:\t20"]);
    }

    #[test]
    fn engine_failure_aborts_the_settle() {
        let lp = settle(SettleConfig {
            cycles_per_quarter: 5,
            ..Default::default()
        });
        let mut net = CountingNet {
            fail_cycle: Some(7),
            ..Default::default()
        };
        let err = lp
            .run(&mut net, true, &mut SettleHooks::default())
            .unwrap_err();
        assert!(matches!(err, SimError::Engine { stage: "cycle", .. }));
        assert_eq!(net.quarter_finals, 1);
        assert!(!net.calls.iter().any(|c| c == "dwt"));
    }

    #[test]
    fn rank_table_orders_scales() {
        assert!(ViewUpdate::Cycle.at_most(ViewUpdate::Quarter));
        assert!(ViewUpdate::FastSpike.at_most(ViewUpdate::Quarter));
        assert!(ViewUpdate::Quarter.at_most(ViewUpdate::Quarter));
        assert!(!ViewUpdate::Phase.at_most(ViewUpdate::Quarter));
        assert!(!ViewUpdate::Epoch.at_most(ViewUpdate::AlphaCycle));
    }

    #[test]
    fn rejects_zero_cycles() {
        let err = SettleLoop::new(SettleConfig {
            cycles_per_quarter: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
    }
}
