//! A deliberately small network engine for driving the controller from the
//! command line.
//!
//! One logistic output pool fed by every applied input layer through its own
//! weight matrix. Activity integrates toward the net input each cycle; in the
//! plus phase (last quarter) a training target, when present, is clamped.
//! Learning is the delta rule on the minus-phase activity, or reward times the
//! chosen unit when there is no target. Deltas computed at the end of one
//! trial are applied at the start of the next.

use std::collections::BTreeMap;

use alphasim::engine::{
    EngineError, LayerMode, NetworkEngine, OutputError, PoolMax, SettleTime,
};
use alphasim::environment::Pattern;
use alphasim::prng::Prng;

/// Units within this distance of their target do not count as errors.
const ERR_TOLERANCE: f32 = 0.5;
const MINUS_PHASE_QUARTER: usize = 2;
const PLUS_PHASE_QUARTER: usize = 3;

#[derive(Debug, Clone)]
pub struct ToyNet {
    output: String,
    reward_layer: String,
    out_units: usize,
    lrate: f32,
    dt: f32,
    rng: Prng,

    mode: LayerMode,
    train: bool,
    inputs: BTreeMap<String, Vec<f32>>,
    target: Option<Vec<f32>>,
    reward: Option<f32>,

    weights: BTreeMap<String, Vec<f32>>,
    deltas: BTreeMap<String, Vec<f32>>,
    act: Vec<f32>,
    minus: Vec<f32>,
}

impl ToyNet {
    pub fn new(output: &str, out_units: usize, seed: u64) -> Self {
        Self {
            output: output.to_string(),
            reward_layer: "Reward".to_string(),
            out_units,
            lrate: 0.5,
            dt: 0.3,
            rng: Prng::new(seed),
            mode: LayerMode::Target,
            train: false,
            inputs: BTreeMap::new(),
            target: None,
            reward: None,
            weights: BTreeMap::new(),
            deltas: BTreeMap::new(),
            act: vec![0.0; out_units],
            minus: vec![0.0; out_units],
        }
    }

    pub fn with_reward_layer(mut self, layer: &str) -> Self {
        self.reward_layer = layer.to_string();
        self
    }

    pub fn with_lrate(mut self, lrate: f32) -> Self {
        self.lrate = lrate;
        self
    }

    pub fn output_act(&self) -> &[f32] {
        &self.act
    }

    fn ensure_weights(&mut self) {
        for (layer, x) in &self.inputs {
            let n = self.out_units * x.len();
            let w = self.weights.entry(layer.clone()).or_default();
            if w.len() != n {
                w.clear();
                w.extend((0..n).map(|_| self.rng.gen_range_f32(-0.1, 0.1)));
            }
        }
    }

    fn net_input(&self) -> Vec<f32> {
        let mut net = vec![0.0; self.out_units];
        for (layer, x) in &self.inputs {
            let Some(w) = self.weights.get(layer) else {
                continue;
            };
            let n_in = x.len();
            for (o, acc) in net.iter_mut().enumerate() {
                let row = &w[o * n_in..(o + 1) * n_in];
                *acc += row.iter().zip(x).map(|(w, x)| w * x).sum::<f32>();
            }
        }
        net
    }

    fn argmax(values: &[f32]) -> PoolMax {
        let mut best = PoolMax::default();
        for (i, &v) in values.iter().enumerate() {
            if i == 0 || v > best.act {
                best = PoolMax { act: v, index: i };
            }
        }
        best
    }

    /// Per-unit error signal on the minus phase, if anything is learnable.
    fn error_signal(&self) -> Option<Vec<f32>> {
        if let Some(target) = &self.target {
            return Some(target.iter().zip(&self.minus).map(|(t, m)| t - m).collect());
        }
        let reward = self.reward?;
        let chosen = Self::argmax(&self.minus).index;
        Some(
            (0..self.out_units)
                .map(|o| if o == chosen { reward } else { 0.0 })
                .collect(),
        )
    }
}

impl NetworkEngine for ToyNet {
    fn init_weights(&mut self) -> Result<(), EngineError> {
        self.weights.clear();
        self.deltas.clear();
        Ok(())
    }

    fn set_layer_mode(&mut self, layer: &str, mode: LayerMode) -> Result<(), EngineError> {
        if layer == self.output {
            self.mode = mode;
        }
        Ok(())
    }

    fn clear_external(&mut self) -> Result<(), EngineError> {
        self.inputs.clear();
        self.target = None;
        self.reward = None;
        Ok(())
    }

    fn apply_external(&mut self, layer: &str, pattern: &Pattern) -> Result<(), EngineError> {
        if layer == self.output {
            if pattern.len() != self.out_units {
                return Err(format!(
                    "`{layer}` has {} units, pattern has {}",
                    self.out_units,
                    pattern.len()
                )
                .into());
            }
            self.target = Some(pattern.values.clone());
        } else if layer == self.reward_layer {
            self.reward = pattern.values.first().copied();
        } else {
            self.inputs.insert(layer.to_string(), pattern.values.clone());
        }
        Ok(())
    }

    fn flush_deltas(&mut self) -> Result<(), EngineError> {
        for (layer, d) in std::mem::take(&mut self.deltas) {
            if let Some(w) = self.weights.get_mut(&layer) {
                if w.len() == d.len() {
                    w.iter_mut().zip(&d).for_each(|(w, d)| *w += d);
                }
            }
        }
        Ok(())
    }

    fn init_settle(&mut self, train: bool) -> Result<(), EngineError> {
        self.train = train;
        self.ensure_weights();
        self.act.iter_mut().for_each(|a| *a = 0.0);
        self.minus.iter_mut().for_each(|a| *a = 0.0);
        Ok(())
    }

    fn cycle(&mut self, time: &SettleTime) -> Result<(), EngineError> {
        let clamp = self.train && self.mode == LayerMode::Target && time.quarter >= PLUS_PHASE_QUARTER;
        if let (true, Some(target)) = (clamp, &self.target) {
            self.act.copy_from_slice(target);
            return Ok(());
        }
        let net = self.net_input();
        for (a, n) in self.act.iter_mut().zip(net) {
            let goal = 1.0 / (1.0 + (-n).exp());
            *a += self.dt * (goal - *a);
        }
        Ok(())
    }

    fn quarter_final(&mut self, time: &SettleTime) -> Result<(), EngineError> {
        if time.quarter == MINUS_PHASE_QUARTER {
            self.minus.copy_from_slice(&self.act);
        }
        Ok(())
    }

    fn compute_deltas(&mut self) -> Result<(), EngineError> {
        let Some(err) = self.error_signal() else {
            return Ok(());
        };
        for (layer, x) in &self.inputs {
            let n_in = x.len();
            let d = self
                .deltas
                .entry(layer.clone())
                .or_insert_with(|| vec![0.0; self.out_units * n_in]);
            if d.len() != self.out_units * n_in {
                continue;
            }
            for (o, e) in err.iter().enumerate() {
                for (i, xi) in x.iter().enumerate() {
                    d[o * n_in + i] += self.lrate * e * xi;
                }
            }
        }
        Ok(())
    }

    fn max_activity(&self, layer: &str) -> PoolMax {
        if layer == self.output {
            Self::argmax(&self.act)
        } else {
            self.inputs
                .get(layer)
                .map(|x| Self::argmax(x))
                .unwrap_or_default()
        }
    }

    fn output_error(&self) -> OutputError {
        let sse = match (&self.target, self.reward) {
            (Some(target), _) => target
                .iter()
                .zip(&self.minus)
                .map(|(t, m)| t - m)
                .filter(|d| d.abs() >= ERR_TOLERANCE)
                .map(|d| d * d)
                .sum(),
            (None, Some(r)) if r <= 0.0 => 1.0,
            _ => 0.0,
        };
        OutputError {
            sse,
            avg_sse: sse / self.out_units.max(1) as f32,
        }
    }
}
