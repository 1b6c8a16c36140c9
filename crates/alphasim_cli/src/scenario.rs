//! What the CLI runs: a run configuration plus which environment to build.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use alphasim::config::RunConfig;
use alphasim::environment::Environment;
use alphasim::settle::RewardTiming;
use alphasim_envs::sentence::MODIFIER;
use alphasim_envs::{BanditConfig, BanditEnv, PatternTable, SentenceCorpus, SentenceEnv, TableEnv};
use serde::{Deserialize, Serialize};

use crate::error::CliError;
use crate::toy::ToyNet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvKind {
    #[default]
    Table,
    Sentence,
    Bandit,
}

impl FromStr for EnvKind {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(EnvKind::Table),
            "sentence" => Ok(EnvKind::Sentence),
            "bandit" => Ok(EnvKind::Bandit),
            other => Err(CliError::Usage(format!(
                "unknown env `{other}` (expected table, sentence or bandit)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub run: RunConfig,
    pub env: EnvKind,
    /// Present training items in table/corpus order instead of permuting.
    pub sequential: bool,
    /// Dataset file: a pattern table, a sentence corpus or a bandit config,
    /// depending on `env`. Built-in data is used when absent.
    pub data: Option<PathBuf>,
    /// Size of the built-in mirror table.
    pub mirror_size: usize,
    pub bandit: BanditConfig,
    pub lrate: f32,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            env: EnvKind::Table,
            sequential: false,
            data: None,
            mirror_size: 4,
            bandit: BanditConfig::default(),
            lrate: 0.5,
        }
    }
}

/// Everything a controller needs, freshly built.
pub struct Built {
    pub cfg: RunConfig,
    pub net: ToyNet,
    pub train_env: Box<dyn Environment>,
    pub test_env: Box<dyn Environment>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn output_layer(&self) -> Result<String, CliError> {
        self.run
            .output_layers
            .first()
            .cloned()
            .ok_or_else(|| CliError::Config("no output layer configured".into()))
    }

    /// Run config with the layers and reward timing the chosen env needs.
    pub fn effective_run_config(&self) -> RunConfig {
        let mut cfg = self.run.clone();
        match self.env {
            EnvKind::Table => {}
            EnvKind::Sentence => {
                if !cfg.input_layers.iter().any(|l| l == MODIFIER) {
                    cfg.input_layers.push(MODIFIER.to_string());
                }
            }
            EnvKind::Bandit => {
                let readout = cfg
                    .output_layers
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "Output".to_string());
                cfg.train_settle.reward.get_or_insert(RewardTiming {
                    readout_layer: readout,
                    reward_layer: "Reward".to_string(),
                });
            }
        }
        cfg
    }

    pub fn build(&self) -> Result<Built, CliError> {
        let cfg = self.effective_run_config();
        let output = self.output_layer()?;
        let seed = cfg.seed;

        let (out_units, train_env, test_env): (usize, Box<dyn Environment>, Box<dyn Environment>) =
            match self.env {
                EnvKind::Table => {
                    let table = match &self.data {
                        Some(p) => PatternTable::load(p)?,
                        None => PatternTable::builtin_mirror(self.mirror_size),
                    };
                    let out_units = table
                        .rows
                        .iter()
                        .find_map(|r| r.elements.get(&output))
                        .map(Vec::len)
                        .ok_or_else(|| {
                            CliError::Config(format!("pattern table has no `{output}` element"))
                        })?;
                    (
                        out_units,
                        Box::new(TableEnv::new("train", table.clone(), self.sequential)),
                        Box::new(TableEnv::new("test", table, true)),
                    )
                }
                EnvKind::Sentence => {
                    let corpus = match &self.data {
                        Some(p) => SentenceCorpus::load(p)?,
                        None => SentenceCorpus::builtin_roles(),
                    };
                    let train = SentenceEnv::new("train", corpus.clone(), self.sequential);
                    (
                        train.vocab_size(),
                        Box::new(train),
                        Box::new(SentenceEnv::new("test", corpus, true)),
                    )
                }
                EnvKind::Bandit => {
                    let bandit = match &self.data {
                        Some(p) => serde_json::from_str(&std::fs::read_to_string(p)?)?,
                        None => self.bandit.clone(),
                    };
                    let train = BanditEnv::new("train", bandit.clone());
                    (
                        train.arms(),
                        Box::new(train),
                        Box::new(BanditEnv::new("test", bandit)),
                    )
                }
            };

        let mut net = ToyNet::new(&output, out_units, seed).with_lrate(self.lrate);
        if let Some(timing) = &cfg.train_settle.reward {
            net = net.with_reward_layer(&timing.reward_layer);
        }
        Ok(Built {
            cfg,
            net,
            train_env,
            test_env,
        })
    }
}
