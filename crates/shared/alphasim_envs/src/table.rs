use std::collections::BTreeMap;
use std::path::Path;

use alphasim::counter::{CounterStack, Scale};
use alphasim::environment::{Environment, IndexOrder, Pattern};
use alphasim::error::SimError;
use alphasim::prng::Prng;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PatternRow {
    /// Item name shown in logs and view refreshes.
    #[serde(default)]
    pub name: String,

    /// Element name to flat pattern values. Elements missing from a row are
    /// not applied on that trial.
    #[serde(default)]
    pub elements: BTreeMap<String, Vec<f32>>,
}

impl PatternRow {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            elements: BTreeMap::new(),
        }
    }

    pub fn with(mut self, element: &str, values: &[f32]) -> Self {
        self.elements.insert(element.to_string(), values.to_vec());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PatternTable {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rows: Vec<PatternRow>,
}

impl PatternTable {
    /// `n` one-hot rows, each mapped to the mirrored unit on `Output`.
    pub fn builtin_mirror(n: usize) -> Self {
        let rows = (0..n)
            .map(|i| {
                let mut row = PatternRow::new(&format!("row{i}"));
                row.elements
                    .insert("Input".to_string(), Pattern::one_hot(n, i).values);
                row.elements
                    .insert("Output".to_string(), Pattern::one_hot(n, n - 1 - i).values);
                row
            })
            .collect();
        Self {
            name: format!("mirror{n}"),
            rows,
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Fixed table of patterns, one row per trial, sequential or permuted.
#[derive(Debug)]
pub struct TableEnv {
    name: String,
    table: PatternTable,
    counters: CounterStack,
    order: IndexOrder,
    rng: Prng,
}

impl TableEnv {
    pub fn new(name: &str, table: PatternTable, sequential: bool) -> Self {
        let trials = table.rows.len() as i64;
        Self {
            name: name.to_string(),
            table,
            counters: CounterStack::trial_epoch_run(trials, 0),
            order: IndexOrder::new(sequential),
            rng: Prng::new(1),
        }
    }

    pub fn table(&self) -> &PatternTable {
        &self.table
    }

    pub fn order(&self) -> &[usize] {
        self.order.as_slice()
    }

    /// Row index of the current trial; `None` before the first step.
    pub fn current_index(&self) -> Option<usize> {
        self.counters
            .cur(Scale::Trial)
            .and_then(|t| self.order.index(t))
    }

    fn current_row(&self) -> Option<&PatternRow> {
        self.current_index().and_then(|i| self.table.rows.get(i))
    }
}

impl Environment for TableEnv {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, run: i64) -> Result<(), SimError> {
        let n = self.table.rows.len();
        if n == 0 {
            return Err(SimError::env_init(&self.name, "pattern table has no rows"));
        }
        self.counters.set_max(Scale::Trial, n as i64);
        self.counters.reset(run);
        self.order.reset(n, &mut self.rng);
        Ok(())
    }

    fn step(&mut self) -> bool {
        if self.counters.step() {
            self.order.reshuffle(&mut self.rng);
            debug!(env = %self.name, "reshuffled");
        }
        true
    }

    fn counters(&self) -> &CounterStack {
        &self.counters
    }

    fn counters_mut(&mut self) -> &mut CounterStack {
        &mut self.counters
    }

    fn state(&self, element: &str) -> Option<Pattern> {
        self.current_row()?
            .elements
            .get(element)
            .map(|v| Pattern::flat(v.clone()))
    }

    fn reseed(&mut self, seed: u64) {
        self.rng.reseed(seed);
    }

    fn item_name(&self) -> String {
        self.current_row().map(|r| r.name.clone()).unwrap_or_default()
    }
}
