//! Shared collection aliases.
//!
//! All internal indexes use FxHash maps; hashing entity keys dominates lookup
//! cost in the hot paths, and the keys are small integers.

pub use rustc_hash::{FxHashMap, FxHashSet};

use smallvec::SmallVec;

use crate::keys::{ConstraintKey, VarKey};

/// Constraint scopes are almost always binary or ternary.
pub type Scope = SmallVec<[VarKey; 4]>;

/// Per-variable constraint fan-out is small in practice.
pub type ConstraintList = SmallVec<[ConstraintKey; 4]>;
