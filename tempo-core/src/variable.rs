//! Constrained variables: a (base, derived) domain pair under engine control.

use crate::domain::Domain;
use crate::keys::{EntityKey, VarKey};

/// A variable owned by the constraint engine.
///
/// The base domain is the declared value set; the derived domain is the
/// current propagated restriction of it. A *specified* variable has had its
/// derived domain user-forced to a singleton; that choice survives
/// repropagation until `reset`.
#[derive(Debug, Clone)]
pub struct Variable {
    key: VarKey,
    name: String,
    base: Domain,
    derived: Domain,
    specified: Option<i64>,
    can_be_specified: bool,
    parent: Option<EntityKey>,
}

impl Variable {
    pub(crate) fn new(
        key: VarKey,
        name: String,
        base: Domain,
        can_be_specified: bool,
        parent: Option<EntityKey>,
    ) -> Self {
        let derived = base.clone();
        Self {
            key,
            name,
            base,
            derived,
            specified: None,
            can_be_specified,
            parent,
        }
    }

    pub fn key(&self) -> VarKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared domain.
    pub fn base(&self) -> &Domain {
        &self.base
    }

    /// The current propagated domain. This is the "last domain" every query
    /// in the planner reads.
    pub fn derived(&self) -> &Domain {
        &self.derived
    }

    pub fn is_specified(&self) -> bool {
        self.specified.is_some()
    }

    pub fn specified_value(&self) -> Option<i64> {
        self.specified
    }

    pub fn can_be_specified(&self) -> bool {
        self.can_be_specified
    }

    /// Owning entity (token or object), if any.
    pub fn parent(&self) -> Option<EntityKey> {
        self.parent
    }

    pub(crate) fn base_mut(&mut self) -> &mut Domain {
        &mut self.base
    }

    pub(crate) fn derived_mut(&mut self) -> &mut Domain {
        &mut self.derived
    }

    pub(crate) fn set_specified(&mut self, value: Option<i64>) {
        self.specified = value;
    }
}
