use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use alphasim::controller::{RunController, StopHandle};
use alphasim::log::{JsonLinesSink, LogRecord, LogScope, LogSink, MemorySink, TracingSink};
use tracing::warn;

use crate::error::CliError;
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Train,
    Test,
}

impl Command {
    pub fn label(self) -> &'static str {
        match self {
            Command::Train => "train",
            Command::Test => "test",
        }
    }
}

/// Sends every record to each inner sink in turn.
struct Tee(Vec<Box<dyn LogSink>>);

impl LogSink for Tee {
    fn record(&mut self, scope: LogScope, rec: &LogRecord) {
        for sink in &mut self.0 {
            sink.record(scope, rec);
        }
    }

    fn reset(&mut self, scope: LogScope) {
        for sink in &mut self.0 {
            sink.reset(scope);
        }
    }

    /// Flushes every sink; the first error wins.
    fn flush(&mut self) -> std::io::Result<()> {
        let mut first = Ok(());
        for sink in &mut self.0 {
            if let Err(e) = sink.flush() {
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        first
    }
}

/// What a finished command prints.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub command: &'static str,
    pub stopped_early: bool,
    pub runs: Vec<LogRecord>,
    pub last_train_epoch: Option<LogRecord>,
    pub last_test_epoch: Option<LogRecord>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} finished", self.command)?;
        if self.stopped_early {
            writeln!(f, "  interrupted before completion")?;
        }
        for run in &self.runs {
            writeln!(f, "  run: {run}")?;
        }
        if let Some(rec) = &self.last_train_epoch {
            writeln!(f, "  last train epoch: {rec}")?;
        }
        if let Some(rec) = &self.last_test_epoch {
            writeln!(f, "  last test epoch: {rec}")?;
        }
        Ok(())
    }
}

/// Build a controller for `scenario` and run `command` to completion or
/// until `stop` is requested.
pub fn run(
    command: Command,
    scenario: &Scenario,
    jsonl: &Path,
    stop: StopHandle,
) -> Result<Report, CliError> {
    let file = BufWriter::new(File::create(jsonl)?);
    run_with_log(command, scenario, JsonLinesSink::new(file), stop)
}

fn run_with_log<W: Write + 'static>(
    command: Command,
    scenario: &Scenario,
    jsonl: JsonLinesSink<W>,
    stop: StopHandle,
) -> Result<Report, CliError> {
    let built = scenario.build()?;
    let memory = MemorySink::new();
    let sinks: Vec<Box<dyn LogSink>> = vec![
        Box::new(TracingSink),
        Box::new(memory.clone()),
        Box::new(jsonl),
    ];

    let mut ctrl = RunController::new(built.cfg, built.net, built.train_env, built.test_env)?
        .with_sink(Box::new(Tee(sinks)))
        .with_stop_handle(stop.clone());
    ctrl.init()?;
    // Ctrl-C while the scenario was loading.
    let interrupted = stop.is_requested();
    if interrupted {
        warn!("stop requested before {} started", command.label());
    } else {
        match command {
            Command::Train => ctrl.train()?,
            Command::Test => ctrl.run_test_all()?,
        }
    }
    ctrl.flush_log()?;

    let stopped_early = interrupted
        || match command {
            Command::Train => !ctrl.is_done(),
            Command::Test => ctrl.stop_handle().is_requested(),
        };
    Ok(Report {
        command: command.label(),
        stopped_early,
        runs: memory.records(LogScope::Run),
        last_train_epoch: memory.records(LogScope::TrainEpoch).pop(),
        last_test_epoch: memory.records(LogScope::TestEpoch).pop(),
    })
}
