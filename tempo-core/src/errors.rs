//! Engine-level errors.

use crate::keys::{ConstraintKey, VarKey};

/// The constraint network has a proven-empty domain or a negative cycle.
///
/// This is a control-flow value, not a fault: `propagate()` surfaces it and
/// the solver translates it into a backtrack. Everything outside the solver
/// forwards it to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("constraint network is inconsistent")]
pub struct Inconsistent;

/// Structural misuse of the constraint engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown constraint type {name:?}")]
    UnknownConstraintType { name: String },

    #[error("constraint {kind} expects {expected} variables, got {actual}")]
    ScopeArity {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown variable {0}")]
    UnknownVariable(VarKey),

    #[error("unknown constraint {0}")]
    UnknownConstraint(ConstraintKey),

    #[error("variable {0} cannot be specified")]
    SpecifyForbidden(VarKey),

    #[error("value {value} is not a member of the derived domain of {var}")]
    ValueNotInDomain { var: VarKey, value: i64 },
}
