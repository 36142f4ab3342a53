//! # tempo-solver
//!
//! The flaw pipeline and the chronological-backtracking search loop: matching
//! rules, flaw managers, decision points, the solver, declarative
//! configuration, and the partial-plan trace writer.

pub mod config;
pub mod decisions;
pub mod errors;
pub mod flaws;
pub mod matching;
pub mod solver;
pub mod trace;

pub use config::{ManagerConfig, ManagerKind, RuleConfig, SolverConfig, DEFAULT_PRIORITY};
pub use decisions::{
    DecisionPoint, ThreatDecisionPoint, TokenDecisionPoint, VariableDecisionPoint,
};
pub use errors::{ConfigError, SolverError};
pub use flaws::{Flaw, FlawEntity, FlawKind, FlawManager};
pub use matching::{Guard, MatchingRule, WEIGHT_BASE};
pub use solver::{Outcome, Solver, StepResult};
pub use trace::PartialPlanWriter;
