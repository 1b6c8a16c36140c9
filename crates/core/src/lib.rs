//! # alphasim
//!
//! Run control for alpha-cycle network simulations.
//!
//! This crate decides *when* things happen in a simulation: when an item is
//! presented, when weights are updated, when a view refresh is requested and
//! when a trial, epoch or run boundary has been crossed. What the network
//! actually computes is delegated to a [`NetworkEngine`](engine::NetworkEngine)
//! supplied by the caller.
//!
//! ## Quick Start
//!
//! ```ignore
//! use alphasim::prelude::*;
//!
//! let cfg = RunConfig::default();
//! let mut ctrl = RunController::new(cfg, my_engine, Box::new(train_env), Box::new(test_env))?;
//! ctrl.init()?;
//! ctrl.train()?;
//! assert!(ctrl.stopped());
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): Serialize/deserialize configs and patterns, load JSON configs
//!
//! ## Modules
//!
//! - [`counter`]: Hierarchical counters with cascading rollover
//! - [`environment`]: The stepping contract environments satisfy
//! - [`settle`]: The alpha-cycle settle loop
//! - [`controller`]: Train/test run control
//! - [`engine`]: Collaborator interfaces (network engine, view, reward source)
//! - [`stats`]: Trial/epoch/run statistics and stop criteria
//! - [`log`]: Flat log records and sinks

#[path = "core/config.rs"]
pub mod config;

#[path = "core/controller.rs"]
pub mod controller;

#[path = "core/counter.rs"]
pub mod counter;

#[path = "core/engine.rs"]
pub mod engine;

#[path = "core/environment.rs"]
pub mod environment;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/log.rs"]
pub mod log;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/settle.rs"]
pub mod settle;

#[path = "core/stats.rs"]
pub mod stats;

/// Prelude module for convenient imports.
///
/// ```
/// use alphasim::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::RunConfig;
    pub use crate::controller::{RunController, RunState, StopHandle};
    pub use crate::counter::{Counter, CounterStack, Scale};
    pub use crate::engine::{
        EngineError, LayerMode, NetworkEngine, OutputError, PoolMax, RewardSource, SettleTime,
        View,
    };
    pub use crate::environment::{EpochSnapshot, Environment, IndexOrder, Pattern};
    pub use crate::error::SimError;
    pub use crate::log::{Field, LogRecord, LogScope, LogSink, MemorySink, TracingSink};
    pub use crate::prng::Prng;
    pub use crate::settle::{
        EarlyStop, RewardTiming, SettleConfig, SettleHooks, SettleLoop, SettleOutcome, ViewUpdate,
    };
    pub use crate::stats::{EpochStats, EpochSummary, RunStats, StopCriterion, ZeroErrorStreak};
}
