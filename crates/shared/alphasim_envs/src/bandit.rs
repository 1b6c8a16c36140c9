use alphasim::counter::{CounterStack, Scale};
use alphasim::engine::RewardSource;
use alphasim::environment::{Environment, Pattern};
use alphasim::error::SimError;
use alphasim::log::LogRecord;
use alphasim::prng::Prng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::stats::ChoiceStats;

/// Arm reward probabilities and epoch length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BanditConfig {
    pub arm_probs: Vec<f32>,
    pub trials_per_epoch: i64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            // Simple asymmetric schedule.
            arm_probs: vec![0.8, 0.2],
            trials_per_epoch: 20,
        }
    }
}

/// Multi-armed bandit: a constant context on `Input` and no supervised
/// target. The network's choice is read out mid-settle and rewarded with
/// +1/-1 drawn from the chosen arm's probability.
#[derive(Debug)]
pub struct BanditEnv {
    name: String,
    cfg: BanditConfig,
    counters: CounterStack,
    rng: Prng,
    stats: ChoiceStats,
}

impl BanditEnv {
    pub fn new(name: &str, cfg: BanditConfig) -> Self {
        let trials = cfg.trials_per_epoch;
        Self {
            name: name.to_string(),
            cfg,
            counters: CounterStack::trial_epoch_run(trials, 0),
            rng: Prng::new(1),
            stats: ChoiceStats::new(),
        }
    }

    pub fn config(&self) -> &BanditConfig {
        &self.cfg
    }

    /// Choices scored against the best arm since the run started.
    pub fn stats(&self) -> &ChoiceStats {
        &self.stats
    }

    pub fn arms(&self) -> usize {
        self.cfg.arm_probs.len()
    }

    /// Arm with the highest reward probability (lowest index on ties).
    pub fn best_arm(&self) -> usize {
        let mut best = 0;
        for (i, &p) in self.cfg.arm_probs.iter().enumerate() {
            if p > self.cfg.arm_probs[best] {
                best = i;
            }
        }
        best
    }
}

impl Environment for BanditEnv {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, run: i64) -> Result<(), SimError> {
        if self.cfg.arm_probs.is_empty() {
            return Err(SimError::env_init(&self.name, "bandit has no arms"));
        }
        if self.cfg.trials_per_epoch <= 0 {
            return Err(SimError::env_init(
                &self.name,
                format!(
                    "trials_per_epoch must be > 0, got {}",
                    self.cfg.trials_per_epoch
                ),
            ));
        }
        self.counters.set_max(Scale::Trial, self.cfg.trials_per_epoch);
        self.counters.reset(run);
        self.stats = ChoiceStats::new();
        Ok(())
    }

    fn step(&mut self) -> bool {
        self.counters.step();
        true
    }

    fn counters(&self) -> &CounterStack {
        &self.counters
    }

    fn counters_mut(&mut self) -> &mut CounterStack {
        &mut self.counters
    }

    fn state(&self, element: &str) -> Option<Pattern> {
        match element {
            "Input" => Some(Pattern::flat(vec![1.0])),
            _ => None,
        }
    }

    fn reseed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    fn item_name(&self) -> String {
        "bandit".to_string()
    }

    fn reward_source(&mut self) -> Option<&mut dyn RewardSource> {
        Some(self)
    }

    fn epoch_fields(&self, rec: LogRecord) -> LogRecord {
        rec.with("PctBest", self.stats.accuracy())
            .with("RecentBest", self.stats.last_100_rate())
            .with(
                "LearnedAt",
                self.stats.learned_at_trial.map_or(-1, i64::from),
            )
    }
}

impl RewardSource for BanditEnv {
    fn compute_reward(&mut self, chosen: usize) -> Pattern {
        // Choices outside the arm range are never rewarded.
        let p = self.cfg.arm_probs.get(chosen).copied().unwrap_or(0.0);
        let rewarded = self.rng.next_f32_01() < p;
        self.stats.record(chosen == self.best_arm());
        debug!(env = %self.name, chosen, rewarded, "bandit reward");
        Pattern::flat(vec![if rewarded { 1.0 } else { -1.0 }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_arm_and_context() {
        let env = BanditEnv::new(
            "rl",
            BanditConfig {
                arm_probs: vec![0.1, 0.7, 0.7],
                trials_per_epoch: 5,
            },
        );
        assert_eq!(env.best_arm(), 1);
        assert_eq!(env.state("Input"), Some(Pattern::flat(vec![1.0])));
        assert_eq!(env.state("Output"), None);
    }

    #[test]
    fn rewards_follow_arm_probabilities() {
        let mut env = BanditEnv::new(
            "rl",
            BanditConfig {
                arm_probs: vec![1.0, 0.0],
                trials_per_epoch: 4,
            },
        );
        env.init(0).unwrap();
        assert!(env.reward_source().is_some());

        assert_eq!(env.compute_reward(0).values, vec![1.0]);
        assert_eq!(env.compute_reward(1).values, vec![-1.0]);
        assert_eq!(env.compute_reward(7).values, vec![-1.0]);
        assert_eq!(env.stats().correct, 1);
        assert_eq!(env.stats().incorrect, 2);
    }

    #[test]
    fn epoch_records_carry_choice_accuracy() {
        let mut env = BanditEnv::new(
            "rl",
            BanditConfig {
                arm_probs: vec![0.9, 0.1],
                trials_per_epoch: 4,
            },
        );
        env.init(0).unwrap();
        let rec = env.epoch_fields(LogRecord::new().with("Epoch", 0i64));
        assert_eq!(rec.float("PctBest"), Some(0.5));
        assert_eq!(rec.int("LearnedAt"), Some(-1));

        for _ in 0..19 {
            env.compute_reward(0);
        }
        env.compute_reward(1);
        let rec = env.epoch_fields(LogRecord::new());
        assert!((rec.float("PctBest").unwrap() - 0.95).abs() < 1e-6);
        assert_eq!(rec.int("LearnedAt"), Some(20));

        // A new run starts the tally over.
        env.init(1).unwrap();
        assert_eq!(env.stats().trials, 0);
    }

    #[test]
    fn epochs_are_fixed_length() {
        let mut env = BanditEnv::new(
            "rl",
            BanditConfig {
                trials_per_epoch: 3,
                ..Default::default()
            },
        );
        env.init(2).unwrap();
        let mut chg = Vec::new();
        for _ in 0..7 {
            env.step();
            chg.push(env.counter_chg(Scale::Epoch));
        }
        assert_eq!(chg, vec![false, false, false, true, false, false, true]);
        assert_eq!(env.counter_cur(Scale::Run), Some(2));
    }

    #[test]
    fn bad_configs_fail_init() {
        let mut env = BanditEnv::new(
            "rl",
            BanditConfig {
                arm_probs: Vec::new(),
                trials_per_epoch: 3,
            },
        );
        assert!(matches!(env.init(0), Err(SimError::EnvInit { .. })));

        let mut env = BanditEnv::new(
            "rl",
            BanditConfig {
                trials_per_epoch: 0,
                ..Default::default()
            },
        );
        assert!(matches!(env.init(0), Err(SimError::EnvInit { .. })));
    }
}
