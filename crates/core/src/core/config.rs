#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::settle::SettleConfig;

/// Everything the run controller needs besides its collaborators.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RunConfig {
    /// Seed for environment presentation order; reapplied on every `init()`.
    pub seed: u64,
    pub start_run: i64,
    pub max_runs: i64,
    pub max_epochs: i64,
    /// Stop a run after this many consecutive error-free epochs. 0 disables.
    pub nzero_stop: u32,
    /// Run a full test pass every n training epochs. 0 disables.
    pub test_interval: i64,

    /// Elements read from the environment and applied to same-named layers.
    pub input_layers: Vec<String>,
    /// Layers switched between Target (training) and Compare (testing).
    pub output_layers: Vec<String>,

    /// Master switch for view refreshes.
    pub view_on: bool,
    pub train_settle: SettleConfig,
    pub test_settle: SettleConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            start_run: 0,
            max_runs: 1,
            max_epochs: 100,
            nzero_stop: 5,
            test_interval: 0,
            input_layers: vec!["Input".to_string()],
            output_layers: vec!["Output".to_string()],
            view_on: false,
            train_settle: SettleConfig::default(),
            test_settle: SettleConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.max_runs <= 0 {
            return Err(SimError::Config(format!(
                "max_runs must be > 0, got {}",
                self.max_runs
            )));
        }
        if self.start_run < 0 || self.start_run >= self.max_runs {
            return Err(SimError::Config(format!(
                "start_run {} outside 0..{}",
                self.start_run, self.max_runs
            )));
        }
        if self.max_epochs <= 0 {
            return Err(SimError::Config(format!(
                "max_epochs must be > 0, got {}",
                self.max_epochs
            )));
        }
        if self.test_interval < 0 {
            return Err(SimError::Config(format!(
                "test_interval must be >= 0, got {}",
                self.test_interval
            )));
        }
        if self.input_layers.is_empty() {
            return Err(SimError::Config("no input layers".into()));
        }
        self.train_settle.validate()?;
        self.test_settle.validate()?;
        Ok(())
    }

    #[cfg(feature = "serde")]
    pub fn from_json_str(s: &str) -> Result<Self, SimError> {
        let cfg: RunConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[cfg(feature = "serde")]
    pub fn load(path: &std::path::Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settle::ViewUpdate;

    #[test]
    fn defaults_are_valid() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_bounds() {
        let bad = [
            RunConfig {
                max_runs: 0,
                ..Default::default()
            },
            RunConfig {
                start_run: 1,
                max_runs: 1,
                ..Default::default()
            },
            RunConfig {
                max_epochs: 0,
                ..Default::default()
            },
            RunConfig {
                test_interval: -1,
                ..Default::default()
            },
            RunConfig {
                input_layers: Vec::new(),
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(SimError::Config(_))), "{cfg:?}");
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_fills_in_defaults() {
        let cfg = RunConfig::from_json_str(
            r#"{
                "max_epochs": 7,
                "test_settle": { "cycles_per_quarter": 75, "view_update": "Quarter",
                                 "early_stop": { "layer": "Output", "threshold": 0.9 } }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.max_epochs, 7);
        assert_eq!(cfg.max_runs, 1);
        assert_eq!(cfg.train_settle.cycles_per_quarter, 25);
        assert_eq!(cfg.test_settle.cycles_per_quarter, 75);
        assert_eq!(cfg.test_settle.view_update, ViewUpdate::Quarter);
        assert_eq!(
            cfg.test_settle.early_stop.as_ref().map(|e| e.threshold),
            Some(0.9)
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_is_validated() {
        let err = RunConfig::from_json_str(r#"{ "max_runs": -2 }"#).unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
        let err = RunConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SimError::Json(_)));
    }
}
