//! Flat log records and the sinks that store them.
//!
//! The controller computes one record per epoch/run boundary (and per test
//! trial); what happens to it is up to the sink.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Number, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Int(v)
    }
}

impl From<u32> for Field {
    fn from(v: u32) -> Self {
        Field::Int(v as i64)
    }
}

impl From<usize> for Field {
    fn from(v: usize) -> Self {
        Field::Int(v as i64)
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Float(v)
    }
}

impl From<f32> for Field {
    fn from(v: f32) -> Self {
        Field::Float(v as f64)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Str(v.to_string())
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Str(v)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::Float(v) => write!(f, "{v:.4}"),
            Field::Str(v) => f.write_str(v),
        }
    }
}

impl Field {
    fn to_json(&self) -> Value {
        match self {
            Field::Int(v) => Value::from(*v),
            // NaN/inf have no JSON form.
            Field::Float(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
            Field::Str(v) => Value::String(v.clone()),
        }
    }
}

/// Ordered named fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogRecord {
    fields: Vec<(&'static str, Field)>,
}

impl LogRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<Field>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: &'static str, value: impl Into<Field>) {
        self.fields.push((name, value.into()));
    }

    pub fn fields(&self) -> &[(&'static str, Field)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Field::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Field::Float(v) => Some(*v),
            Field::Int(v) => Some(*v as f64),
            Field::Str(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert((*name).to_string(), value.to_json());
        }
        Value::Object(map)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogScope {
    TrainEpoch,
    TestEpoch,
    TestTrial,
    Run,
}

impl LogScope {
    pub fn label(self) -> &'static str {
        match self {
            LogScope::TrainEpoch => "train_epoch",
            LogScope::TestEpoch => "test_epoch",
            LogScope::TestTrial => "test_trial",
            LogScope::Run => "run",
        }
    }
}

pub trait LogSink {
    fn record(&mut self, scope: LogScope, rec: &LogRecord);

    /// Drop everything logged under `scope` (per-run logs restart each run).
    fn reset(&mut self, _scope: LogScope) {}

    /// Push buffered records to their destination and surface any write
    /// error seen since the last flush.
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn record(&mut self, _: LogScope, _: &LogRecord) {}
}

/// Emits every record as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&mut self, scope: LogScope, rec: &LogRecord) {
        match scope {
            LogScope::TestTrial => tracing::debug!(scope = scope.label(), "{rec}"),
            _ => info!(scope = scope.label(), "{rec}"),
        }
    }
}

/// In-memory sink. Clones share storage, so a caller can keep one handle
/// while the controller owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<(LogScope, LogRecord)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(LogScope, LogRecord)>> {
        // A panic elsewhere cannot leave a Vec of records half-written.
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn records(&self, scope: LogScope) -> Vec<LogRecord> {
        self.lock()
            .iter()
            .filter(|(s, _)| *s == scope)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn count(&self, scope: LogScope) -> usize {
        self.lock().iter().filter(|(s, _)| *s == scope).count()
    }
}

impl LogSink for MemorySink {
    fn record(&mut self, scope: LogScope, rec: &LogRecord) {
        self.lock().push((scope, rec.clone()));
    }

    fn reset(&mut self, scope: LogScope) {
        self.lock().retain(|(s, _)| *s != scope);
    }
}

/// One JSON object per line: `{"scope": "...", <fields>}`.
///
/// Recording is fire-and-forget; the first write error is kept and further
/// records are dropped.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    out: W,
    error: Option<std::io::Error>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    pub fn finish(mut self) -> std::io::Result<W> {
        LogSink::flush(&mut self)?;
        Ok(self.out)
    }
}

impl<W: Write> LogSink for JsonLinesSink<W> {
    fn record(&mut self, scope: LogScope, rec: &LogRecord) {
        if self.error.is_some() {
            return;
        }
        let mut obj = Map::new();
        obj.insert("scope".into(), Value::String(scope.label().into()));
        if let Value::Object(fields) = rec.to_json() {
            obj.extend(fields);
        }
        let line = Value::Object(obj).to_string();
        if let Err(e) = writeln!(self.out, "{line}") {
            warn!("log sink write failed: {e}");
            self.error = Some(e);
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()
    }
}
