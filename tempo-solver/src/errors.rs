//! Solver-side errors.

use tempo_db::errors::{ClientError, ModellingError};

/// Declarative configuration failed validation at load time. Reported once;
/// not recovered from.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration does not parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("priority {priority} outside [0, {limit}) in rule {rule:?}")]
    PriorityOutOfRange {
        priority: i64,
        limit: i64,
        rule: String,
    },

    #[error("guard {name:?} has no value")]
    EmptyGuard { name: String },
}

/// A structural failure inside the search loop. Domain inconsistency is NOT
/// an error here — the solver consumes that as a backtrack signal.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Modelling(#[from] ModellingError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
