//! The constraint engine: variables, propagators, and the consistency gate.
//!
//! The engine owns every constrained variable and the three propagators the
//! planner core needs (`precedes`, `eq`, `startEndDuration`). Propagation is
//! agenda-driven and monotone; any relaxation (reset, constraint removal,
//! domain growth) schedules a full repropagation that rebuilds every derived
//! domain from base ∩ specified before re-running the agenda to fixpoint.
//!
//! Inconsistency is a value, not an unwind: `propagate()` returns
//! `Err(Inconsistent)` and the engine stays proven-inconsistent until the next
//! relaxation.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::arena::{CoreContext, EntityKind};
use crate::collections::{ConstraintList, FxHashMap, FxHashSet, Scope};
use crate::domain::{Domain, DomainChange, IntervalIntDomain};
use crate::errors::{EngineError, Inconsistent};
use crate::keys::{ConstraintKey, EntityKey, VarKey};
use crate::variable::Variable;

const TARGET: &str = "tempo_core::engine";

/// The propagators built into the engine.
///
/// The wider constraint library is an external collaborator; these three are
/// the ones the object/timeline subsystem itself posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `precedes(a, b)`: `a ≤ b` on two interval variables.
    Precedes,
    /// `eq(x, y)`: domains are mutually intersected.
    Eq,
    /// `startEndDuration(start, duration, end)`: `start + duration = end`.
    StartEndDuration,
}

impl ConstraintKind {
    pub fn name(self) -> &'static str {
        match self {
            ConstraintKind::Precedes => "precedes",
            ConstraintKind::Eq => "eq",
            ConstraintKind::StartEndDuration => "startEndDuration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "precedes" => Some(ConstraintKind::Precedes),
            "eq" => Some(ConstraintKind::Eq),
            "startEndDuration" => Some(ConstraintKind::StartEndDuration),
            _ => None,
        }
    }

    pub fn arity(self) -> usize {
        match self {
            ConstraintKind::Precedes | ConstraintKind::Eq => 2,
            ConstraintKind::StartEndDuration => 3,
        }
    }
}

/// A posted constraint.
#[derive(Debug, Clone)]
pub struct ConstraintRec {
    pub key: ConstraintKey,
    pub kind: ConstraintKind,
    pub scope: Scope,
}

/// Agenda-driven propagation engine.
pub struct ConstraintEngine {
    ctx: CoreContext,
    variables: FxHashMap<VarKey, Variable>,
    var_order: Vec<VarKey>,
    constraints: FxHashMap<ConstraintKey, ConstraintRec>,
    constraint_order: Vec<ConstraintKey>,
    by_var: FxHashMap<VarKey, ConstraintList>,
    agenda: VecDeque<ConstraintKey>,
    in_agenda: FxHashSet<ConstraintKey>,
    dirty: bool,
    full_repropagation: bool,
    proven_inconsistent: bool,
    repropagation_count: u64,
    propagation_epoch: u64,
    auto_propagate: bool,
    changes: Vec<(VarKey, DomainChange)>,
}

impl ConstraintEngine {
    pub fn new(ctx: CoreContext) -> Self {
        Self {
            ctx,
            variables: FxHashMap::default(),
            var_order: Vec::new(),
            constraints: FxHashMap::default(),
            constraint_order: Vec::new(),
            by_var: FxHashMap::default(),
            agenda: VecDeque::new(),
            in_agenda: FxHashSet::default(),
            dirty: false,
            full_repropagation: false,
            proven_inconsistent: false,
            repropagation_count: 0,
            propagation_epoch: 0,
            auto_propagate: true,
            changes: Vec::new(),
        }
    }

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    /// When set, mutating operations themselves drive propagation. The solver
    /// turns this off and drives the gate explicitly.
    pub fn set_auto_propagate(&mut self, on: bool) {
        self.auto_propagate = on;
    }

    pub fn auto_propagate(&self) -> bool {
        self.auto_propagate
    }

    // ---- variables ----

    pub fn new_variable(
        &mut self,
        name: impl Into<String>,
        base: Domain,
        can_be_specified: bool,
        parent: Option<EntityKey>,
    ) -> VarKey {
        let key = VarKey(self.ctx.allocate(EntityKind::Variable));
        let name = name.into();
        trace!(target: TARGET, var = %key, %name, "new variable");
        self.variables
            .insert(key, Variable::new(key, name, base, can_be_specified, parent));
        self.var_order.push(key);
        key
    }

    pub fn variable(&self, key: VarKey) -> Option<&Variable> {
        self.variables.get(&key)
    }

    /// Panics on a stale key; lookups of released entities are programmer
    /// errors per the discard protocol.
    pub fn var(&self, key: VarKey) -> &Variable {
        match self.variables.get(&key) {
            Some(v) => v,
            None => panic!("access to unknown or purged variable {key}"),
        }
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.var_order.iter().filter_map(|k| self.variables.get(k))
    }

    /// Remove a variable and every constraint touching it.
    pub fn delete_variable(&mut self, key: VarKey) {
        let touching: Vec<ConstraintKey> = self.by_var.remove(&key).into_iter().flatten().collect();
        for c in touching {
            let _ = self.remove_constraint(c);
        }
        if self.variables.remove(&key).is_some() {
            self.var_order.retain(|k| *k != key);
            self.ctx.release(key.into());
            self.mark_relaxed();
        }
    }

    /// Derived interval bounds of an interval variable.
    pub fn bounds(&self, key: VarKey) -> (i64, i64) {
        match self.var(key).derived() {
            Domain::Interval(d) => (d.lb(), d.ub()),
            other => {
                debug_assert!(false, "bounds() on non-interval domain {other:?}");
                (0, 0)
            }
        }
    }

    pub fn interval(&self, key: VarKey) -> IntervalIntDomain {
        let (lb, ub) = self.bounds(key);
        IntervalIntDomain::new(lb, ub)
    }

    // ---- constraints ----

    pub fn add_constraint(
        &mut self,
        kind: ConstraintKind,
        scope: &[VarKey],
    ) -> Result<ConstraintKey, EngineError> {
        if scope.len() != kind.arity() {
            return Err(EngineError::ScopeArity {
                kind: kind.name(),
                expected: kind.arity(),
                actual: scope.len(),
            });
        }
        for v in scope {
            if !self.variables.contains_key(v) {
                return Err(EngineError::UnknownVariable(*v));
            }
        }
        let key = ConstraintKey(self.ctx.allocate(EntityKind::Constraint));
        let rec = ConstraintRec {
            key,
            kind,
            scope: Scope::from_slice(scope),
        };
        for v in scope {
            self.by_var.entry(*v).or_default().push(key);
        }
        self.constraints.insert(key, rec);
        self.constraint_order.push(key);
        self.enqueue(key);
        self.dirty = true;
        debug!(target: TARGET, constraint = %key, kind = kind.name(), "posted");
        Ok(key)
    }

    pub fn create_constraint_by_name(
        &mut self,
        name: &str,
        scope: &[VarKey],
    ) -> Result<ConstraintKey, EngineError> {
        let kind = ConstraintKind::from_name(name).ok_or_else(|| {
            EngineError::UnknownConstraintType {
                name: name.to_string(),
            }
        })?;
        self.add_constraint(kind, scope)
    }

    pub fn constraint(&self, key: ConstraintKey) -> Option<&ConstraintRec> {
        self.constraints.get(&key)
    }

    pub fn constraints(&self) -> impl Iterator<Item = &ConstraintRec> + '_ {
        self.constraint_order
            .iter()
            .filter_map(|k| self.constraints.get(k))
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Remove a constraint. Removal is a relaxation: derived domains may have
    /// depended on it, so a full repropagation is scheduled.
    pub fn remove_constraint(&mut self, key: ConstraintKey) -> Result<(), EngineError> {
        let rec = self
            .constraints
            .remove(&key)
            .ok_or(EngineError::UnknownConstraint(key))?;
        self.constraint_order.retain(|k| *k != key);
        for v in &rec.scope {
            if let Some(list) = self.by_var.get_mut(v) {
                list.retain(|c| *c != key);
            }
        }
        self.in_agenda.remove(&key);
        self.ctx.release(key.into());
        debug!(target: TARGET, constraint = %key, "removed");
        self.mark_relaxed();
        Ok(())
    }

    // ---- user decisions ----

    /// Force the derived domain to a singleton. The choice survives
    /// repropagation until `reset`.
    pub fn specify(&mut self, key: VarKey, value: i64) -> Result<(), EngineError> {
        let var = self
            .variables
            .get_mut(&key)
            .ok_or(EngineError::UnknownVariable(key))?;
        if !var.can_be_specified() {
            return Err(EngineError::SpecifyForbidden(key));
        }
        if !var.derived().is_member(value) {
            return Err(EngineError::ValueNotInDomain { var: key, value });
        }
        var.set_specified(Some(value));
        if let Ok(Some(change)) = var.derived_mut().restrict_to_singleton(value) {
            self.record_change(key, change);
            self.enqueue_dependents(key);
        }
        debug!(target: TARGET, var = %key, value, "specified");
        self.dirty = true;
        if self.auto_propagate {
            let _ = self.propagate();
        }
        Ok(())
    }

    /// Return a specified variable to its base domain.
    pub fn reset(&mut self, key: VarKey) -> Result<(), EngineError> {
        let var = self
            .variables
            .get_mut(&key)
            .ok_or(EngineError::UnknownVariable(key))?;
        var.set_specified(None);
        let base = var.base().clone();
        if let Some(change) = var.derived_mut().relax_to(&base) {
            self.record_change(key, change);
        }
        debug!(target: TARGET, var = %key, "reset");
        self.mark_relaxed();
        Ok(())
    }

    /// Permanently narrow the base (and derived) domain.
    pub fn restrict_base(&mut self, key: VarKey, restriction: &Domain) -> Result<(), EngineError> {
        let var = self
            .variables
            .get_mut(&key)
            .ok_or(EngineError::UnknownVariable(key))?;
        if var.base_mut().intersect(restriction).is_err() {
            self.proven_inconsistent = true;
            self.record_change(key, DomainChange::Emptied);
            return Ok(());
        }
        match var.derived_mut().intersect(restriction) {
            Ok(Some(change)) => {
                self.record_change(key, change);
                self.enqueue_dependents(key);
                self.dirty = true;
            }
            Ok(None) => {}
            Err(Inconsistent) => {
                self.proven_inconsistent = true;
                self.record_change(key, DomainChange::Emptied);
            }
        }
        if self.auto_propagate && !self.proven_inconsistent {
            let _ = self.propagate();
        }
        Ok(())
    }

    /// Grow an open (object) domain with a new member, in both base and
    /// derived. Growth is a relaxation.
    pub fn insert_open_domain_member(&mut self, key: VarKey, value: i64) -> Result<(), EngineError> {
        let var = self
            .variables
            .get_mut(&key)
            .ok_or(EngineError::UnknownVariable(key))?;
        debug_assert!(var.base().is_open(), "insert into a closed domain");
        let changed = match var.base_mut() {
            Domain::Enumerated(d) => d.insert(value).is_some(),
            Domain::Object(d) => d.insert_object(crate::keys::ObjectKey(EntityKey(value as u32))).is_some(),
            Domain::Interval(_) => false,
        };
        match var.derived_mut() {
            Domain::Enumerated(d) => {
                d.insert(value);
            }
            Domain::Object(d) => {
                d.insert_object(crate::keys::ObjectKey(EntityKey(value as u32)));
            }
            Domain::Interval(_) => {}
        }
        if changed {
            self.record_change(key, DomainChange::Relaxed);
            self.mark_relaxed();
        }
        Ok(())
    }

    /// Close an open domain: no further members.
    pub fn close_domain(&mut self, key: VarKey) -> Result<(), EngineError> {
        let var = self
            .variables
            .get_mut(&key)
            .ok_or(EngineError::UnknownVariable(key))?;
        let changed = match var.base_mut() {
            Domain::Enumerated(d) => d.close().is_some(),
            Domain::Object(d) => d.close().is_some(),
            Domain::Interval(_) => false,
        };
        match var.derived_mut() {
            Domain::Enumerated(d) => {
                d.close();
            }
            Domain::Object(d) => {
                d.close();
            }
            Domain::Interval(_) => {}
        }
        if changed {
            self.record_change(key, DomainChange::Closed);
        }
        Ok(())
    }

    // ---- propagation ----

    /// Propagate to fixpoint. Returns `Err(Inconsistent)` if any domain
    /// empties; the engine then stays proven-inconsistent until relaxed.
    pub fn propagate(&mut self) -> Result<(), Inconsistent> {
        if self.proven_inconsistent && !self.full_repropagation {
            return Err(Inconsistent);
        }

        if self.full_repropagation {
            self.full_repropagation = false;
            self.proven_inconsistent = false;
            self.repropagation_count += 1;
            trace!(target: TARGET, count = self.repropagation_count, "full repropagation");
            // Rebuild every derived domain from base ∩ specified.
            let keys: Vec<VarKey> = self.var_order.clone();
            for key in keys {
                let var = self.variables.get_mut(&key).expect("ordered var exists");
                let base = var.base().clone();
                var.derived_mut().relax_to(&base);
                if let Some(value) = var.specified_value() {
                    if var.derived_mut().restrict_to_singleton(value).is_err() {
                        self.proven_inconsistent = true;
                        self.record_change(key, DomainChange::Emptied);
                        return Err(Inconsistent);
                    }
                }
            }
            self.agenda.clear();
            self.in_agenda.clear();
            let all: Vec<ConstraintKey> = self.constraint_order.clone();
            for c in all {
                self.enqueue(c);
            }
        }

        while let Some(key) = self.agenda.pop_front() {
            self.in_agenda.remove(&key);
            let Some(rec) = self.constraints.get(&key).cloned() else {
                continue;
            };
            if let Err(Inconsistent) = self.apply(&rec) {
                self.proven_inconsistent = true;
                self.agenda.clear();
                self.in_agenda.clear();
                debug!(target: TARGET, constraint = %key, "propagation emptied a domain");
                return Err(Inconsistent);
            }
        }

        self.dirty = false;
        self.propagation_epoch += 1;
        Ok(())
    }

    /// True when the network is propagated and no domain is empty.
    pub fn constraint_consistent(&self) -> bool {
        !self.dirty && !self.full_repropagation && !self.proven_inconsistent
    }

    pub fn proven_inconsistent(&self) -> bool {
        self.proven_inconsistent
    }

    /// True if there is pending work for `propagate`.
    pub fn pending(&self) -> bool {
        self.dirty || self.full_repropagation
    }

    /// True if a relaxation is scheduled, i.e. the next propagation rebuilds
    /// derived domains from scratch and a proven inconsistency may clear.
    pub fn pending_relaxation(&self) -> bool {
        self.full_repropagation
    }

    /// Monotonic counter of repropagations following relaxations. Callers use
    /// it to invalidate cached feasibility answers.
    pub fn most_recent_repropagation(&self) -> u64 {
        self.repropagation_count
    }

    /// Monotonic counter bumped on every completed propagation.
    pub fn propagation_epoch(&self) -> u64 {
        self.propagation_epoch
    }

    /// Drain the domain-change trail accumulated since the last call.
    pub fn take_changes(&mut self) -> Vec<(VarKey, DomainChange)> {
        std::mem::take(&mut self.changes)
    }

    /// Bulk teardown: drop every variable and constraint, releasing their
    /// keys. Intended for the purge path, where cascade order is irrelevant.
    pub fn purge(&mut self) {
        for key in self.var_order.drain(..) {
            self.ctx.release(key.into());
        }
        for key in self.constraint_order.drain(..) {
            self.ctx.release(key.into());
        }
        self.variables.clear();
        self.constraints.clear();
        self.by_var.clear();
        self.agenda.clear();
        self.in_agenda.clear();
        self.changes.clear();
        self.dirty = false;
        self.full_repropagation = false;
        self.proven_inconsistent = false;
    }

    // ---- internals ----

    fn mark_relaxed(&mut self) {
        self.full_repropagation = true;
        self.dirty = true;
    }

    fn record_change(&mut self, key: VarKey, change: DomainChange) {
        self.changes.push((key, change));
    }

    fn enqueue(&mut self, key: ConstraintKey) {
        if self.in_agenda.insert(key) {
            self.agenda.push_back(key);
        }
    }

    fn enqueue_dependents(&mut self, var: VarKey) {
        if let Some(list) = self.by_var.get(&var) {
            for key in list.clone() {
                self.enqueue(key);
            }
        }
    }

    /// Intersect `var`'s derived interval with `[lb, ub]`, recording and
    /// fanning out on change.
    fn restrict_interval(&mut self, var: VarKey, lb: i64, ub: i64) -> Result<(), Inconsistent> {
        let v = self.variables.get_mut(&var).expect("scope var exists");
        let Domain::Interval(d) = v.derived_mut() else {
            debug_assert!(false, "interval propagator on non-interval var");
            return Err(Inconsistent);
        };
        match d.intersect_bounds(lb, ub) {
            Ok(Some(change)) => {
                self.record_change(var, change);
                self.enqueue_dependents(var);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(Inconsistent) => {
                self.record_change(var, DomainChange::Emptied);
                Err(Inconsistent)
            }
        }
    }

    fn apply(&mut self, rec: &ConstraintRec) -> Result<(), Inconsistent> {
        match rec.kind {
            ConstraintKind::Precedes => {
                let a = rec.scope[0];
                let b = rec.scope[1];
                let (a_lb, a_ub) = self.bounds(a);
                let (b_lb, b_ub) = self.bounds(b);
                // a ≤ b
                self.restrict_interval(a, a_lb, a_ub.min(b_ub))?;
                self.restrict_interval(b, b_lb.max(a_lb), b_ub)?;
                Ok(())
            }
            ConstraintKind::StartEndDuration => {
                let s = rec.scope[0];
                let d = rec.scope[1];
                let e = rec.scope[2];
                let si = self.interval(s);
                let di = self.interval(d);
                let ei = self.interval(e);
                // end = start + duration
                let e_new = si.plus(&di);
                self.restrict_interval(e, e_new.lb(), e_new.ub())?;
                let s_new = ei.minus(&di);
                self.restrict_interval(s, s_new.lb(), s_new.ub())?;
                let d_new = ei.minus(&si);
                self.restrict_interval(d, d_new.lb(), d_new.ub())?;
                Ok(())
            }
            ConstraintKind::Eq => {
                let x = rec.scope[0];
                let y = rec.scope[1];
                let dy = self.var(y).derived().clone();
                {
                    let vx = self.variables.get_mut(&x).expect("scope var exists");
                    match vx.derived_mut().intersect(&dy) {
                        Ok(Some(change)) => {
                            self.record_change(x, change);
                            self.enqueue_dependents(x);
                        }
                        Ok(None) => {}
                        Err(Inconsistent) => {
                            self.record_change(x, DomainChange::Emptied);
                            return Err(Inconsistent);
                        }
                    }
                }
                let dx = self.var(x).derived().clone();
                let vy = self.variables.get_mut(&y).expect("scope var exists");
                match vy.derived_mut().intersect(&dx) {
                    Ok(Some(change)) => {
                        self.record_change(y, change);
                        self.enqueue_dependents(y);
                    }
                    Ok(None) => {}
                    Err(Inconsistent) => {
                        self.record_change(y, DomainChange::Emptied);
                        return Err(Inconsistent);
                    }
                }
                Ok(())
            }
        }
    }
}
