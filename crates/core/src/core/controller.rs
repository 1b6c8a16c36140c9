//! Train/test run control.
//!
//! A [`RunController`] owns the network engine, a training and a testing
//! environment, and the two settle loops. It is built once and handed to
//! whatever drives it (CLI, test harness, GUI adapter). Everything runs on the
//! caller's thread; the only cross-thread value is the [`StopHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::counter::Scale;
use crate::engine::{LayerMode, NetworkEngine, View};
use crate::environment::Environment;
use crate::error::SimError;
use crate::log::{LogRecord, LogScope, LogSink, TracingSink};
use crate::settle::{SettleHooks, SettleLoop, SettleOutcome, ViewUpdate};
use crate::stats::{
    EpochStats, EpochSummary, Never, RunStats, StopCriterion, TrialOutcome, ZeroErrorStreak,
};

/// The test environment is seeded apart from the training one so the two
/// never share a presentation order.
const TEST_SEED_OFFSET: u64 = 0x5DEECE66D;

/// Cooperative cancellation flag, safe to set from another thread.
///
/// Checked only between trials; a settle in progress always completes.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Which natural boundary ends a training loop.
#[derive(Debug, Clone, Copy)]
enum Until {
    Stopped,
    EpochChanges(Option<i64>),
    RunChanges(Option<i64>),
}

pub struct RunController<N: NetworkEngine> {
    cfg: RunConfig,
    net: N,
    train_env: Box<dyn Environment>,
    test_env: Box<dyn Environment>,
    train_settle: SettleLoop,
    test_settle: SettleLoop,
    view: Option<Box<dyn View>>,
    sink: Box<dyn LogSink>,
    criterion: Box<dyn StopCriterion>,

    state: RunState,
    stop: StopHandle,
    initialized: bool,
    needs_new_run: bool,
    /// Every run is complete.
    done: bool,
    stopped: bool,
    output_mode: Option<LayerMode>,

    train_stats: EpochStats,
    test_stats: EpochStats,
    run_stats: RunStats,
    last_trial: Option<TrialOutcome>,
}

impl<N: NetworkEngine> RunController<N> {
    pub fn new(
        cfg: RunConfig,
        net: N,
        train_env: Box<dyn Environment>,
        test_env: Box<dyn Environment>,
    ) -> Result<Self, SimError> {
        cfg.validate()?;
        let train_settle = SettleLoop::new(cfg.train_settle.clone())?;
        let test_settle = SettleLoop::new(cfg.test_settle.clone())?;
        let criterion: Box<dyn StopCriterion> = if cfg.nzero_stop > 0 {
            Box::new(ZeroErrorStreak(cfg.nzero_stop))
        } else {
            Box::new(Never)
        };
        Ok(Self {
            cfg,
            net,
            train_env,
            test_env,
            train_settle,
            test_settle,
            view: None,
            sink: Box::new(TracingSink),
            criterion,
            state: RunState::Idle,
            stop: StopHandle::new(),
            initialized: false,
            needs_new_run: false,
            done: false,
            stopped: false,
            output_mode: None,
            train_stats: EpochStats::new(),
            test_stats: EpochStats::new(),
            run_stats: RunStats::default(),
            last_trial: None,
        })
    }

    pub fn with_view(mut self, view: Box<dyn View>) -> Self {
        self.view = Some(view);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the convergence test derived from `nzero_stop`.
    pub fn with_stop_criterion(mut self, criterion: Box<dyn StopCriterion>) -> Self {
        self.criterion = criterion;
        self
    }

    /// Share a stop flag created elsewhere (e.g. before the controller moves
    /// onto a worker thread).
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.cfg
    }

    pub fn engine(&self) -> &N {
        &self.net
    }

    pub fn engine_mut(&mut self) -> &mut N {
        &mut self.net
    }

    pub fn train_env(&self) -> &dyn Environment {
        self.train_env.as_ref()
    }

    pub fn test_env(&self) -> &dyn Environment {
        self.test_env.as_ref()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn needs_new_run(&self) -> bool {
        self.needs_new_run
    }

    /// True once every run is complete or a loop observed a stop request.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn run_stats(&self) -> &RunStats {
        &self.run_stats
    }

    pub fn last_trial(&self) -> Option<&TrialOutcome> {
        self.last_trial.as_ref()
    }

    /// Request a stop from any state. Takes effect between trials.
    pub fn stop(&mut self) {
        self.stop.request();
        if self.state == RunState::Running {
            self.state = RunState::Stopping;
        }
    }

    /// Reseed, reset all statistics, configure the run counter and start the
    /// first run. Configuration and environment errors surface here; after a
    /// failed `init()` every train/test call reports `NotInitialized`.
    pub fn init(&mut self) -> Result<(), SimError> {
        self.initialized = false;
        self.state = RunState::Idle;
        // Only the request raised by finishing the last run is ours to drop.
        if self.done {
            self.stop.clear();
        }
        self.done = false;
        self.stopped = false;
        self.output_mode = None;
        self.last_trial = None;

        self.train_env.reseed(self.cfg.seed);
        self.test_env.reseed(self.cfg.seed.wrapping_add(TEST_SEED_OFFSET));

        let counters = self.train_env.counters();
        if counters.counter(Scale::Run).is_none() || counters.counter(Scale::Epoch).is_none() {
            return Err(SimError::env_init(
                self.train_env.name(),
                "training environment needs Epoch and Run counters",
            ));
        }
        let counters = self.train_env.counters_mut();
        counters.set_max(Scale::Run, self.cfg.max_runs);
        counters.set_cur(Scale::Run, self.cfg.start_run);

        if self.test_env.counters().counter(Scale::Epoch).is_none() {
            return Err(SimError::env_init(
                self.test_env.name(),
                "testing environment needs an Epoch counter",
            ));
        }
        if self.train_settle.config().reward.is_some() && self.train_env.reward_source().is_none()
        {
            return Err(SimError::Config(format!(
                "reward timing configured but `{}` has no reward source",
                self.train_env.name()
            )));
        }
        if self.test_settle.config().reward.is_some() && self.test_env.reward_source().is_none() {
            return Err(SimError::Config(format!(
                "reward timing configured but `{}` has no reward source",
                self.test_env.name()
            )));
        }

        self.run_stats.reset();
        self.train_stats.reset();
        self.test_stats.reset();
        self.sink.reset(LogScope::Run);

        self.new_run()?;
        self.initialized = true;
        info!(
            seed = self.cfg.seed,
            start_run = self.cfg.start_run,
            max_runs = self.cfg.max_runs,
            max_epochs = self.cfg.max_epochs,
            "initialized"
        );
        Ok(())
    }

    /// Begin a run at the current Run counter value.
    pub fn new_run(&mut self) -> Result<(), SimError> {
        let run = self
            .train_env
            .counter_cur(Scale::Run)
            .unwrap_or(self.cfg.start_run);
        self.train_env.init(run)?;
        self.test_env.init(run)?;
        self.train_env.counters().validate()?;
        self.test_env.counters().validate()?;

        self.net
            .init_weights()
            .map_err(SimError::engine("init_weights"))?;
        self.output_mode = None;

        self.train_stats.reset();
        self.test_stats.reset();
        self.run_stats.reset();
        self.sink.reset(LogScope::TrainEpoch);
        self.sink.reset(LogScope::TestEpoch);
        self.sink.reset(LogScope::TestTrial);

        self.needs_new_run = false;
        info!(run, env = self.train_env.name(), "new run");
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<(), SimError> {
        if self.initialized {
            Ok(())
        } else {
            Err(SimError::NotInitialized)
        }
    }

    /// One training trial, including any epoch/run boundary it lands on.
    pub fn train_trial(&mut self) -> Result<(), SimError> {
        self.ensure_initialized()?;
        if self.done {
            self.stop.request();
            self.state = RunState::Stopping;
            return Ok(());
        }
        if self.needs_new_run {
            self.new_run()?;
        }
        if self.state == RunState::Idle {
            self.state = RunState::Running;
        }

        self.train_env.step();
        let snap = self.train_env.pre_step_snapshot();
        if snap.changed {
            let summary = self.log_train_epoch(snap.finished);
            if self.cfg.view_on && self.cfg.train_settle.view_update == ViewUpdate::Epoch {
                self.refresh_view(true);
            }
            if self.cfg.test_interval > 0 && snap.epoch % self.cfg.test_interval == 0 {
                self.test_all()?;
            }
            if snap.epoch >= self.cfg.max_epochs
                || self.criterion.should_stop(&summary, &self.run_stats)
            {
                self.end_run();
                if self.train_env.counters_mut().incr(Scale::Run) {
                    info!("all runs complete");
                    self.done = true;
                    self.stopped = true;
                    self.stop.request();
                    self.state = RunState::Stopping;
                } else {
                    self.needs_new_run = true;
                }
                return Ok(());
            }
        }

        self.apply_inputs(true)?;
        let outcome = self.settle(true)?;
        self.record_trial(true, outcome);
        Ok(())
    }

    /// Train until every run is complete or a stop is requested.
    pub fn train(&mut self) -> Result<(), SimError> {
        self.train_loop(Until::Stopped)
    }

    /// Train until the epoch counter moves.
    ///
    /// A pending run is started first so its Epoch reset does not read as
    /// the boundary.
    pub fn train_epoch(&mut self) -> Result<(), SimError> {
        self.ensure_initialized()?;
        if self.needs_new_run && !self.done {
            self.new_run()?;
        }
        let epoch = self.train_env.counter_cur(Scale::Epoch);
        self.train_loop(Until::EpochChanges(epoch))
    }

    /// Train until the run counter moves.
    pub fn train_run(&mut self) -> Result<(), SimError> {
        let run = self.train_env.counter_cur(Scale::Run);
        self.train_loop(Until::RunChanges(run))
    }

    fn train_loop(&mut self, until: Until) -> Result<(), SimError> {
        self.ensure_initialized()?;
        if self.done {
            self.stopped = true;
            return Ok(());
        }
        self.clear_stale_stop();
        self.stopped = false;
        self.state = RunState::Running;

        let result = loop {
            if let Err(e) = self.train_trial() {
                break Err(e);
            }
            if self.stop.is_requested() {
                if !self.done {
                    warn!("stop requested; training halted between trials");
                }
                self.stopped = true;
                break Ok(());
            }
            let crossed = match until {
                Until::Stopped => false,
                Until::EpochChanges(start) => self.train_env.counter_cur(Scale::Epoch) != start,
                Until::RunChanges(start) => self.train_env.counter_cur(Scale::Run) != start,
            };
            if crossed {
                break Ok(());
            }
        };

        self.state = RunState::Idle;
        if self.cfg.view_on {
            self.refresh_view(true);
        }
        result
    }

    /// One testing trial on the separate test environment.
    ///
    /// With `return_on_chg`, a trial that lands on a test-epoch boundary logs
    /// the epoch and returns without presenting an item, so batch testing
    /// never runs past the last one.
    pub fn test_trial(&mut self, return_on_chg: bool) -> Result<(), SimError> {
        self.ensure_initialized()?;
        self.test_env.step();
        let snap = self.test_env.pre_step_snapshot();
        if snap.changed {
            if self.cfg.view_on && self.cfg.test_settle.view_update == ViewUpdate::Epoch {
                self.refresh_view(false);
            }
            self.log_test_epoch(snap.finished);
            if return_on_chg {
                return Ok(());
            }
        }

        self.apply_inputs(false)?;
        let outcome = self.settle(false)?;
        self.record_trial(false, outcome);
        Ok(())
    }

    /// One full pass through the test environment at the current run.
    pub fn test_all(&mut self) -> Result<(), SimError> {
        self.ensure_initialized()?;
        let run = self.train_env.counter_cur(Scale::Run).unwrap_or(0);
        self.test_env.init(run)?;
        self.test_stats.reset();
        loop {
            self.test_trial(true)?;
            if self.test_env.counter_chg(Scale::Epoch) || self.stop.is_requested() {
                break;
            }
        }
        Ok(())
    }

    /// Standalone `test_all` with the Idle/Running transitions a caller sees.
    pub fn run_test_all(&mut self) -> Result<(), SimError> {
        self.ensure_initialized()?;
        self.clear_stale_stop();
        self.state = RunState::Running;
        let result = self.test_all();
        self.state = RunState::Idle;
        result
    }

    /// Flush buffered log records, reporting any write error the sink kept.
    pub fn flush_log(&mut self) -> Result<(), SimError> {
        Ok(self.sink.flush()?)
    }

    fn clear_stale_stop(&mut self) {
        if self.stop.is_requested() {
            warn!("discarding stop request left over from before this loop");
            self.stop.clear();
        }
    }

    fn apply_inputs(&mut self, train: bool) -> Result<(), SimError> {
        let mode = if train {
            LayerMode::Target
        } else {
            LayerMode::Compare
        };
        if self.output_mode != Some(mode) {
            for layer in &self.cfg.output_layers {
                self.net
                    .set_layer_mode(layer, mode)
                    .map_err(SimError::engine("set_layer_mode"))?;
            }
            self.output_mode = Some(mode);
        }

        let env = if train {
            &self.train_env
        } else {
            &self.test_env
        };
        self.net
            .clear_external()
            .map_err(SimError::engine("apply_inputs"))?;
        for layer in self.cfg.input_layers.iter().chain(&self.cfg.output_layers) {
            if let Some(pattern) = env.state(layer) {
                self.net
                    .apply_external(layer, &pattern)
                    .map_err(SimError::engine("apply_inputs"))?;
            }
        }
        Ok(())
    }

    fn settle(&mut self, train: bool) -> Result<SettleOutcome, SimError> {
        let (env, settle) = if train {
            (&mut self.train_env, &self.train_settle)
        } else {
            (&mut self.test_env, &self.test_settle)
        };
        let view = if self.cfg.view_on {
            self.view.as_mut().map(|v| &mut **v as &mut dyn View)
        } else {
            None
        };
        let counters = if view.is_some() {
            format!("{}\tName:\t{}", env.counters().summary(), env.item_name())
        } else {
            String::new()
        };
        let mut hooks = SettleHooks {
            view,
            reward: env.reward_source(),
            counters: &counters,
        };
        settle.run(&mut self.net, train, &mut hooks)
    }

    fn record_trial(&mut self, train: bool, outcome: SettleOutcome) {
        let trial = TrialOutcome::new(self.net.output_error(), outcome.cycles);
        if train {
            self.train_stats.record(&trial);
            debug!(
                item = %self.train_env.item_name(),
                sse = trial.sse,
                cycles = trial.cycles,
                "train trial"
            );
        } else {
            self.test_stats.record(&trial);
            let rec = self
                .counter_record(self.test_env.as_ref())
                .with("Name", self.test_env.item_name())
                .with("SSE", trial.sse)
                .with("AvgSSE", trial.avg_sse)
                .with("Err", u32::from(trial.is_error()))
                .with("Cycles", trial.cycles);
            self.sink.record(LogScope::TestTrial, &rec);
        }
        self.last_trial = Some(trial);
    }

    fn counter_record(&self, env: &dyn Environment) -> LogRecord {
        let run = self.train_env.counter_cur(Scale::Run).unwrap_or_default();
        LogRecord::new()
            .with("Run", run)
            .with("Epoch", env.counter_cur(Scale::Epoch).unwrap_or_default())
    }

    fn log_train_epoch(&mut self, epoch: i64) -> EpochSummary {
        let summary = self.train_stats.take();
        self.run_stats.record_epoch(epoch, &summary);
        let run = self.train_env.counter_cur(Scale::Run).unwrap_or_default();
        let rec = summary
            .append_to(LogRecord::new().with("Run", run).with("Epoch", epoch))
            .with("NZero", self.run_stats.n_zero)
            .with("FirstZero", self.run_stats.first_zero.unwrap_or(-1));
        let rec = self.train_env.epoch_fields(rec);
        self.sink.record(LogScope::TrainEpoch, &rec);
        summary
    }

    fn log_test_epoch(&mut self, epoch: i64) {
        let summary = self.test_stats.take();
        let run = self.train_env.counter_cur(Scale::Run).unwrap_or_default();
        let train_epoch = self.train_env.counter_cur(Scale::Epoch).unwrap_or_default();
        let rec = summary.append_to(
            LogRecord::new()
                .with("Run", run)
                .with("Epoch", train_epoch)
                .with("TestEpoch", epoch),
        );
        let rec = self.test_env.epoch_fields(rec);
        self.sink.record(LogScope::TestEpoch, &rec);
    }

    fn end_run(&mut self) {
        let run = self.train_env.counter_cur(Scale::Run).unwrap_or_default();
        let last = self.run_stats.last.unwrap_or_default();
        let rec = LogRecord::new()
            .with("Run", run)
            .with("Epochs", self.run_stats.epochs)
            .with("FirstZero", self.run_stats.first_zero.unwrap_or(-1))
            .with("NZero", self.run_stats.n_zero)
            .with("SSE", last.sse)
            .with("PctErr", last.pct_err)
            .with("PctCor", last.pct_cor);
        self.sink.record(LogScope::Run, &rec);
        info!(run, epochs = self.run_stats.epochs, "run finished");
    }

    fn refresh_view(&mut self, train: bool) {
        let env = if train {
            &self.train_env
        } else {
            &self.test_env
        };
        if let Some(view) = self.view.as_mut() {
            view.request_refresh(&env.counters().summary());
        }
    }
}
