use thiserror::Error;

/// Errors raised while loading or validating a [`crate::Script`].
///
/// Everything in here is detected once, before any virtual user starts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse script: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Script defines no steps")]
    NoSteps,

    #[error("Invalid variable '{name}': {reason}")]
    InvalidVariable { name: String, reason: String },

    #[error("Invalid step {index} ({transaction}): {reason}")]
    InvalidStep {
        index: usize,
        transaction: String,
        reason: String,
    },

    #[error("Invalid load stages: {0}")]
    InvalidStages(String),
}

/// A `unique` pool has no value left for this virtual user.
///
/// This never travels past the owning session: the session turns it into
/// [`crate::session::SessionState::Exhausted`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("All unique values for {variable} used")]
pub struct PoolExhausted {
    pub variable: String,
}

/// Failures of the host scheduler itself (not of the script under test).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Load shape has no stages")]
    EmptyShape,

    #[error("Scheduler tick must be greater than zero")]
    ZeroTick,
}
