use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced by the run controller.
///
/// Counter and environment stepping never fail once initialized; exhaustion of
/// an index space is handled by wrapping and reshuffling. What remains is
/// configuration trouble caught at `init()` and failures of the external engine.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("environment `{env}` could not be initialized: {reason}")]
    EnvInit { env: String, reason: String },

    #[error("run controller is not initialized; call init() first")]
    NotInitialized,

    #[error("network engine failed during {stage}")]
    Engine {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Adapter for `map_err` at engine call sites.
    pub fn engine(stage: &'static str) -> impl FnOnce(EngineError) -> SimError {
        move |source| SimError::Engine { stage, source }
    }

    pub fn env_init(env: &str, reason: impl Into<String>) -> Self {
        SimError::EnvInit {
            env: env.to_string(),
            reason: reason.into(),
        }
    }
}
