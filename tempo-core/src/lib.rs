//! # tempo-core
//!
//! Foundation crate for the tempo temporal planner.
//! Defines typed entity keys, the entity arena, the domain algebra, constrained
//! variables, the constraint engine, the temporal distance graph, event records,
//! errors, and configuration. Every other crate in the workspace depends on this.

pub mod arena;
pub mod collections;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod events;
pub mod keys;
pub mod logging;
pub mod stn;
pub mod variable;

// Re-export the most commonly used types at the crate root.
pub use arena::{CoreContext, EntityKind};
pub use collections::{FxHashMap, FxHashSet};
pub use config::EngineConfig;
pub use domain::{Domain, DomainChange, EnumeratedDomain, IntervalIntDomain, ObjectDomain};
pub use domain::{MINUS_INFINITY, PLUS_INFINITY};
pub use engine::{ConstraintEngine, ConstraintKind};
pub use errors::{EngineError, Inconsistent};
pub use events::{DbEvent, DbEventHandler, EventDispatcher, EventKind};
pub use keys::{ConstraintKey, EntityKey, ObjectKey, TokenKey, VarKey};
pub use stn::DistanceGraph;
pub use variable::Variable;
