//! The plan database: single owner of objects, tokens, and global variables.
//!
//! Publishes every lifecycle event, keeps the name/type/predicate indexes and
//! the tokens-to-order flaw index live, and orchestrates the precedence
//! bookkeeping between objects, timelines, and the constraint engine.

use std::collections::BTreeSet;

use tracing::{debug, trace, warn};

use tempo_core::arena::{CoreContext, EntityKind};
use tempo_core::collections::{FxHashMap, FxHashSet};
use tempo_core::config::EngineConfig;
use tempo_core::domain::{Domain, EnumeratedDomain, ObjectDomain};
use tempo_core::engine::{ConstraintEngine, ConstraintKind};
use tempo_core::errors::Inconsistent;
use tempo_core::events::{DbEvent, DbEventHandler, EventDispatcher};
use tempo_core::keys::{ConstraintKey, ObjectKey, TokenKey, VarKey};

use crate::advisor::{DefaultTemporalAdvisor, StnTemporalAdvisor, TemporalAdvisor};
use crate::errors::ModellingError;
use crate::object::{ObjectBehavior, ObjectData, ObjectState, TimelineState};
use crate::token::{Token, TokenSpec, TokenState};

const TARGET: &str = "tempo_db::database";

/// Database lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    Open,
    Closed,
    Purged,
}

/// Registered object type: parent link, behavior, and closure flag.
#[derive(Debug, Clone)]
struct TypeInfo {
    parent: Option<String>,
    timeline: bool,
    closed: bool,
}

/// An ordering choice: commit it by calling `constrain(object, pred, succ)`.
pub type OrderingChoice = (ObjectKey, (TokenKey, TokenKey));

pub struct PlanDatabase {
    ctx: CoreContext,
    config: EngineConfig,
    engine: ConstraintEngine,
    advisor: Box<dyn TemporalAdvisor>,
    types: FxHashMap<String, TypeInfo>,
    objects: FxHashMap<ObjectKey, ObjectData>,
    object_order: Vec<ObjectKey>,
    tokens: FxHashMap<TokenKey, Token>,
    token_order: Vec<TokenKey>,
    by_name: FxHashMap<String, ObjectKey>,
    by_type: FxHashMap<String, Vec<ObjectKey>>,
    active_by_predicate: FxHashMap<String, Vec<TokenKey>>,
    tokens_to_order: FxHashMap<TokenKey, BTreeSet<ObjectKey>>,
    globals: FxHashMap<String, VarKey>,
    open_type_vars: FxHashMap<String, Vec<VarKey>>,
    dispatcher: EventDispatcher,
    state: DbState,
}

impl PlanDatabase {
    /// A database answering temporal queries by bound arithmetic.
    pub fn new() -> Self {
        Self::with_advisor(
            EngineConfig::default(),
            Box::new(DefaultTemporalAdvisor::new()),
        )
    }

    /// A database answering temporal queries exactly, through the temporal
    /// distance graph.
    pub fn with_stn_advisor() -> Self {
        Self::with_advisor(EngineConfig::default(), Box::new(StnTemporalAdvisor::new()))
    }

    pub fn with_advisor(config: EngineConfig, advisor: Box<dyn TemporalAdvisor>) -> Self {
        let ctx = CoreContext::new();
        let mut engine = ConstraintEngine::new(ctx.clone());
        // The database drives propagation itself so that index reconciliation
        // rides along with every engine propagation.
        engine.set_auto_propagate(false);
        Self {
            ctx,
            config,
            engine,
            advisor,
            types: FxHashMap::default(),
            objects: FxHashMap::default(),
            object_order: Vec::new(),
            tokens: FxHashMap::default(),
            token_order: Vec::new(),
            by_name: FxHashMap::default(),
            by_type: FxHashMap::default(),
            active_by_predicate: FxHashMap::default(),
            tokens_to_order: FxHashMap::default(),
            globals: FxHashMap::default(),
            open_type_vars: FxHashMap::default(),
            dispatcher: EventDispatcher::new(),
            state: DbState::Open,
        }
    }

    // ---- accessors ----

    pub fn context(&self) -> &CoreContext {
        &self.ctx
    }

    pub fn engine(&self) -> &ConstraintEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ConstraintEngine {
        &mut self.engine
    }

    pub fn advisor(&self) -> &dyn TemporalAdvisor {
        self.advisor.as_ref()
    }

    pub fn state(&self) -> DbState {
        self.state
    }

    pub fn subscribe(&mut self, handler: Box<dyn DbEventHandler>) {
        self.dispatcher.subscribe(handler);
    }

    pub fn auto_propagate(&self) -> bool {
        self.config.effective_auto_propagate()
    }

    pub fn set_auto_propagate(&mut self, on: bool) {
        self.config.auto_propagate = Some(on);
    }

    pub fn object(&self, key: ObjectKey) -> Option<&ObjectData> {
        self.objects.get(&key)
    }

    pub fn object_by_name(&self, name: &str) -> Option<&ObjectData> {
        self.by_name.get(name).and_then(|k| self.objects.get(k))
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectData> + '_ {
        self.object_order.iter().filter_map(|k| self.objects.get(k))
    }

    /// Objects of the type or any of its subtypes, in creation order.
    pub fn objects_by_type(&self, type_name: &str) -> &[ObjectKey] {
        self.by_type
            .get(type_name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn token(&self, key: TokenKey) -> Option<&Token> {
        self.tokens.get(&key)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> + '_ {
        self.token_order.iter().filter_map(|k| self.tokens.get(k))
    }

    /// Active tokens with the given qualified predicate name
    /// (`Type.predicate`). An active token is indexed under its declaring
    /// type and every supertype, so the bucket for a type also yields the
    /// actives of its subtypes.
    pub fn active_tokens(&self, predicate: &str) -> &[TokenKey] {
        self.active_by_predicate
            .get(predicate)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Index keys for an active token: the bare predicate qualified by the
    /// declaring type and each of its supertypes.
    fn predicate_fanout(&self, object_type: &str, predicate: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut current = Some(object_type.to_string());
        while let Some(type_of) = current {
            keys.push(format!("{type_of}.{predicate}"));
            current = self.types.get(&type_of).and_then(|t| t.parent.clone());
        }
        keys
    }

    pub fn global_variable(&self, name: &str) -> Option<VarKey> {
        self.globals.get(name).copied()
    }

    pub fn global_variables(&self) -> impl Iterator<Item = (&str, VarKey)> + '_ {
        self.globals.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// The flaw index: token → objects still demanding an ordering decision.
    pub fn tokens_to_order(&self) -> &FxHashMap<TokenKey, BTreeSet<ObjectKey>> {
        &self.tokens_to_order
    }

    pub fn has_tokens_to_order(&self) -> bool {
        !self.tokens_to_order.is_empty()
    }

    /// Fatal lookup: a missing key here is use of a purged or foreign entity.
    fn tok(&self, key: TokenKey) -> &Token {
        match self.tokens.get(&key) {
            Some(t) => t,
            None => panic!("access to unknown or purged token {key}"),
        }
    }

    fn token_ref(&self, key: TokenKey) -> Result<&Token, ModellingError> {
        self.tokens.get(&key).ok_or(ModellingError::UnknownToken(key))
    }

    fn object_ref(&self, key: ObjectKey) -> Result<&ObjectData, ModellingError> {
        self.objects
            .get(&key)
            .ok_or(ModellingError::UnknownObject(key))
    }

    // ---- propagation ----

    /// Propagate the engine, then reconcile token/object membership with the
    /// freshly derived object domains.
    pub fn propagate(&mut self) -> Result<(), Inconsistent> {
        self.engine.propagate()?;
        self.reconcile_token_objects();
        Ok(())
    }

    pub fn is_consistent(&self) -> bool {
        self.engine.constraint_consistent()
    }

    fn auto_propagate_now(&mut self) {
        if self.config.effective_auto_propagate() {
            let _ = self.propagate();
        }
    }

    /// Align object membership of active tokens with their derived object
    /// domains. Objects that fell out of a domain release the token; newly
    /// admitted complete objects receive it.
    fn reconcile_token_objects(&mut self) {
        let active: Vec<(TokenKey, VarKey)> = self
            .token_order
            .iter()
            .filter_map(|k| self.tokens.get(k))
            .filter(|t| t.state() == TokenState::Active)
            .map(|t| (t.key(), t.object_var()))
            .collect();

        for (token, object_var) in active {
            let candidates: BTreeSet<ObjectKey> = match self.engine.variable(object_var) {
                Some(var) => match var.derived() {
                    Domain::Object(d) => d.object_keys().collect(),
                    _ => continue,
                },
                None => continue,
            };
            let holding: Vec<ObjectKey> = self
                .object_order
                .iter()
                .filter(|o| {
                    self.objects
                        .get(o)
                        .is_some_and(|od| od.tokens().contains(&token))
                })
                .copied()
                .collect();

            for obj in &holding {
                if !candidates.contains(obj) {
                    self.object_remove_token(*obj, token);
                }
            }
            for obj in candidates {
                if !holding.contains(&obj)
                    && self.objects.get(&obj).is_some_and(|o| o.is_complete())
                {
                    self.object_add_token(obj, token);
                }
            }
        }
    }

    // ---- schema ----

    /// Register an object type. `timeline` selects the total-order behavior
    /// for instances.
    pub fn register_object_type(
        &mut self,
        name: impl Into<String>,
        parent: Option<&str>,
        timeline: bool,
    ) -> Result<(), ModellingError> {
        let name = name.into();
        if let Some(parent) = parent {
            if !self.types.contains_key(parent) {
                return Err(ModellingError::UnknownType {
                    name: parent.to_string(),
                });
            }
        }
        self.types.insert(
            name.clone(),
            TypeInfo {
                parent: parent.map(str::to_string),
                timeline,
                closed: false,
            },
        );
        self.by_type.entry(name).or_default();
        Ok(())
    }

    /// True when `sub` is `sup` or a descendant of it.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        let mut current = Some(sub);
        while let Some(name) = current {
            if name == sup {
                return true;
            }
            current = self.types.get(name).and_then(|t| t.parent.as_deref());
        }
        false
    }

    /// Close a type: no further instances; listening object variables close.
    pub fn close_type(&mut self, name: &str) -> Result<(), ModellingError> {
        let info = self
            .types
            .get_mut(name)
            .ok_or_else(|| ModellingError::UnknownType {
                name: name.to_string(),
            })?;
        if info.closed {
            return Err(ModellingError::TypeAlreadyClosed {
                name: name.to_string(),
            });
        }
        info.closed = true;
        for var in self.open_type_vars.remove(name).unwrap_or_default() {
            let _ = self.engine.close_domain(var);
        }
        self.dispatcher.publish(&DbEvent::TypeClosed {
            type_name: name.to_string(),
        });
        Ok(())
    }

    /// Close the database: every still-open type closes, and no further
    /// objects may be created.
    pub fn close(&mut self) -> Result<(), ModellingError> {
        if self.state != DbState::Open {
            return Err(ModellingError::DatabaseClosed);
        }
        let open: Vec<String> = self
            .types
            .iter()
            .filter(|(_, info)| !info.closed)
            .map(|(name, _)| name.clone())
            .collect();
        for name in open {
            self.close_type(&name)?;
        }
        self.state = DbState::Closed;
        self.dispatcher.publish(&DbEvent::DatabaseClosed);
        Ok(())
    }

    // ---- objects ----

    pub fn create_object(
        &mut self,
        type_name: &str,
        name: impl Into<String>,
    ) -> Result<ObjectKey, ModellingError> {
        self.create_object_inner(type_name, name.into(), None)
    }

    /// Create a component object under `parent`; its name is qualified by the
    /// parent's name.
    pub fn create_component_object(
        &mut self,
        parent: ObjectKey,
        type_name: &str,
        local_name: &str,
    ) -> Result<ObjectKey, ModellingError> {
        let parent_name = self.object_ref(parent)?.name().to_string();
        self.create_object_inner(
            type_name,
            format!("{parent_name}.{local_name}"),
            Some(parent),
        )
    }

    fn create_object_inner(
        &mut self,
        type_name: &str,
        name: String,
        parent: Option<ObjectKey>,
    ) -> Result<ObjectKey, ModellingError> {
        self.ensure_not_purged()?;
        if self.state == DbState::Closed {
            return Err(ModellingError::DatabaseClosed);
        }
        let info = self
            .types
            .get(type_name)
            .ok_or_else(|| ModellingError::UnknownType {
                name: type_name.to_string(),
            })?
            .clone();
        if info.closed {
            return Err(ModellingError::TypeAlreadyClosed {
                name: type_name.to_string(),
            });
        }
        if self.by_name.contains_key(&name) {
            return Err(ModellingError::DuplicateObjectName { name });
        }

        let key = ObjectKey(self.ctx.allocate(EntityKind::Object));
        let this_var = self.engine.new_variable(
            name.clone(),
            Domain::Object(ObjectDomain::closed(type_name, [key])),
            false,
            Some(key.entity()),
        );
        let behavior = if info.timeline {
            ObjectBehavior::Timeline(TimelineState::default())
        } else {
            ObjectBehavior::Base
        };
        let object = ObjectData {
            key,
            object_type: type_name.to_string(),
            name: name.clone(),
            parent,
            components: Vec::new(),
            this_var,
            member_vars: Vec::new(),
            state: ObjectState::Incomplete,
            tokens: BTreeSet::new(),
            precedence_by_pair: FxHashMap::default(),
            pair_by_constraint: FxHashMap::default(),
            constraints_by_token: FxHashMap::default(),
            explicit_marks: FxHashSet::default(),
            behavior,
            last_ordering_choice_count: 0,
        };
        self.objects.insert(key, object);
        self.object_order.push(key);
        self.by_name.insert(name, key);

        // Index under the declared type and every supertype; grow listening
        // open object variables along the same chain.
        let mut current = Some(type_name.to_string());
        while let Some(type_of) = current {
            self.by_type.entry(type_of.clone()).or_default().push(key);
            if let Some(vars) = self.open_type_vars.get(&type_of) {
                for var in vars.clone() {
                    let _ = self
                        .engine
                        .insert_open_domain_member(var, key.raw() as i64);
                }
            }
            current = self.types.get(&type_of).and_then(|t| t.parent.clone());
        }

        if let Some(parent_key) = parent {
            if let Some(p) = self.objects.get_mut(&parent_key) {
                p.components.push(key);
            }
        }
        debug!(target: TARGET, object = %key, type_name, "object created");
        Ok(key)
    }

    /// Add a member variable; only legal while the object is incomplete.
    pub fn add_member_variable(
        &mut self,
        object: ObjectKey,
        name: &str,
        base: Domain,
    ) -> Result<VarKey, ModellingError> {
        let (object_name, complete) = {
            let o = self.object_ref(object)?;
            (o.name().to_string(), o.is_complete())
        };
        if complete {
            return Err(ModellingError::ObjectComplete(object));
        }
        let var = self.engine.new_variable(
            format!("{object_name}.{name}"),
            base,
            true,
            Some(object.entity()),
        );
        if let Some(o) = self.objects.get_mut(&object) {
            o.member_vars.push((name.to_string(), var));
        }
        Ok(var)
    }

    /// Complete construction; the object may receive tokens from here on.
    pub fn close_object(&mut self, object: ObjectKey) -> Result<(), ModellingError> {
        let o = self
            .objects
            .get_mut(&object)
            .ok_or(ModellingError::UnknownObject(object))?;
        o.state = ObjectState::Complete;
        self.dispatcher.publish(&DbEvent::ObjectAdded { object });
        Ok(())
    }

    /// Create a complete object in one step.
    pub fn create_closed_object(
        &mut self,
        type_name: &str,
        name: impl Into<String>,
    ) -> Result<ObjectKey, ModellingError> {
        let key = self.create_object(type_name, name)?;
        self.close_object(key)?;
        Ok(key)
    }

    /// Delete an object, cascading to components, member variables, and owned
    /// precedence constraints.
    pub fn delete_object(&mut self, object: ObjectKey) -> Result<(), ModellingError> {
        self.ensure_not_purged()?;
        let (components, held, this_var, member_vars, parent, name, object_type) = {
            let o = self.object_ref(object)?;
            (
                o.components.clone(),
                o.tokens.iter().copied().collect::<Vec<_>>(),
                o.this_var,
                o.member_vars.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
                o.parent,
                o.name().to_string(),
                o.object_type().to_string(),
            )
        };
        for component in components {
            self.delete_object(component)?;
        }
        for token in held {
            self.object_remove_token(object, token);
        }
        self.engine.delete_variable(this_var);
        for var in member_vars {
            self.engine.delete_variable(var);
        }
        if let Some(parent_key) = parent {
            if let Some(p) = self.objects.get_mut(&parent_key) {
                p.components.retain(|c| *c != object);
            }
        }
        self.by_name.remove(&name);
        let mut current = Some(object_type);
        while let Some(type_of) = current {
            if let Some(list) = self.by_type.get_mut(&type_of) {
                list.retain(|k| *k != object);
            }
            current = self.types.get(&type_of).and_then(|t| t.parent.clone());
        }
        self.objects.remove(&object);
        self.object_order.retain(|k| *k != object);
        self.ctx.schedule_discard(object.entity());
        self.dispatcher.publish(&DbEvent::ObjectRemoved { object });
        Ok(())
    }

    // ---- global variables ----

    pub fn create_global_variable(
        &mut self,
        name: impl Into<String>,
        base: Domain,
    ) -> Result<VarKey, ModellingError> {
        let name = name.into();
        if self.globals.contains_key(&name) {
            return Err(ModellingError::DuplicateGlobalName { name });
        }
        let var = self.engine.new_variable(name.clone(), base, true, None);
        self.globals.insert(name, var);
        Ok(var)
    }

    /// Create a variable over the current instances of a type. While the type
    /// stays open the variable listens for new instances; it closes when the
    /// type does (or stays open if `leave_open`).
    pub fn make_object_variable(
        &mut self,
        type_name: &str,
        name: impl Into<String>,
        leave_open: bool,
    ) -> Result<VarKey, ModellingError> {
        let info = self
            .types
            .get(type_name)
            .ok_or_else(|| ModellingError::UnknownType {
                name: type_name.to_string(),
            })?;
        let type_open = !info.closed;
        let members: Vec<ObjectKey> = self.objects_by_type(type_name).to_vec();
        let domain = if type_open || leave_open {
            ObjectDomain::open(type_name, members)
        } else {
            ObjectDomain::closed(type_name, members)
        };
        let var = self
            .engine
            .new_variable(name.into(), Domain::Object(domain), true, None);
        if type_open {
            self.open_type_vars
                .entry(type_name.to_string())
                .or_default()
                .push(var);
        }
        Ok(var)
    }

    // ---- variable decisions (client surface) ----

    pub fn specify_variable(&mut self, var: VarKey, value: i64) -> Result<(), ModellingError> {
        self.engine.specify(var, value)?;
        self.auto_propagate_now();
        Ok(())
    }

    pub fn reset_variable(&mut self, var: VarKey) -> Result<(), ModellingError> {
        self.engine.reset(var)?;
        self.auto_propagate_now();
        Ok(())
    }

    pub fn restrict_variable(
        &mut self,
        var: VarKey,
        restriction: &Domain,
    ) -> Result<(), ModellingError> {
        self.engine.restrict_base(var, restriction)?;
        self.auto_propagate_now();
        Ok(())
    }

    pub fn close_variable(&mut self, var: VarKey) -> Result<(), ModellingError> {
        self.engine.close_domain(var)?;
        Ok(())
    }

    // ---- tokens ----

    pub fn create_token(&mut self, spec: TokenSpec) -> Result<TokenKey, ModellingError> {
        self.create_token_inner(spec, None)
    }

    /// Create a sub-goal token under `master` with the given relation name.
    pub fn create_slave_token(
        &mut self,
        master: TokenKey,
        relation: impl Into<String>,
        spec: TokenSpec,
    ) -> Result<TokenKey, ModellingError> {
        self.token_ref(master)?;
        self.create_token_inner(spec, Some((master, relation.into())))
    }

    fn create_token_inner(
        &mut self,
        spec: TokenSpec,
        master: Option<(TokenKey, String)>,
    ) -> Result<TokenKey, ModellingError> {
        self.ensure_not_purged()?;
        let info = self
            .types
            .get(&spec.object_type)
            .ok_or_else(|| ModellingError::UnknownType {
                name: spec.object_type.clone(),
            })?;
        let type_open = !info.closed;

        let key = TokenKey(self.ctx.allocate(EntityKind::Token));
        let label = format!("{}.{}({})", spec.object_type, spec.predicate, key.raw());

        let members: Vec<ObjectKey> = self.objects_by_type(&spec.object_type).to_vec();
        let object_domain = if type_open {
            ObjectDomain::open(&spec.object_type, members)
        } else {
            ObjectDomain::closed(&spec.object_type, members)
        };
        let object_var = self.engine.new_variable(
            format!("{label}.object"),
            Domain::Object(object_domain),
            true,
            Some(key.entity()),
        );
        if type_open {
            self.open_type_vars
                .entry(spec.object_type.clone())
                .or_default()
                .push(object_var);
        }

        let start = self.engine.new_variable(
            format!("{label}.start"),
            Domain::interval(spec.start.0, spec.start.1),
            true,
            Some(key.entity()),
        );
        let end = self.engine.new_variable(
            format!("{label}.end"),
            Domain::interval(spec.end.0, spec.end.1),
            true,
            Some(key.entity()),
        );
        let duration = self.engine.new_variable(
            format!("{label}.duration"),
            Domain::interval(spec.duration.0, spec.duration.1),
            true,
            Some(key.entity()),
        );
        let duration_constraint = self
            .engine
            .add_constraint(ConstraintKind::StartEndDuration, &[start, duration, end])?;

        let mut state_values = vec![
            TokenState::Inactive.code(),
            TokenState::Active.code(),
            TokenState::Merged.code(),
        ];
        if spec.rejectable {
            state_values.push(TokenState::Rejected.code());
        }
        let state_var = self.engine.new_variable(
            format!("{label}.state"),
            Domain::Enumerated(EnumeratedDomain::closed(state_values)),
            true,
            Some(key.entity()),
        );

        let mut params = Vec::with_capacity(spec.params.len());
        for (name, base) in &spec.params {
            let var = self.engine.new_variable(
                format!("{label}.{name}"),
                base.clone(),
                true,
                Some(key.entity()),
            );
            params.push((name.clone(), var));
        }

        let token = Token {
            key,
            object_type: spec.object_type,
            predicate: spec.predicate,
            state: TokenState::Inactive,
            state_var,
            object_var,
            start,
            end,
            duration,
            params,
            duration_constraint,
            master: master.as_ref().map(|(m, _)| *m),
            relation: master.as_ref().map(|(_, r)| r.clone()),
            slaves: Vec::new(),
            merged_onto: None,
            merged_tokens: BTreeSet::new(),
            merge_constraints: Vec::new(),
            committed: false,
            terminated: false,
            rejectable: spec.rejectable,
            is_fact: spec.is_fact,
        };
        self.tokens.insert(key, token);
        self.token_order.push(key);
        if let Some((master_key, _)) = master {
            if let Some(m) = self.tokens.get_mut(&master_key) {
                m.slaves.push(key);
            }
        }
        debug!(target: TARGET, token = %key, "token created");
        self.dispatcher.publish(&DbEvent::TokenAdded { token: key });
        Ok(key)
    }

    fn expect_state(
        &self,
        token: TokenKey,
        expected: TokenState,
    ) -> Result<(), ModellingError> {
        let actual = self.token_ref(token)?.state();
        if actual != expected {
            return Err(ModellingError::WrongTokenState {
                token,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Activate an inactive token: it commits to its predicate and registers
    /// with every candidate object.
    pub fn activate(&mut self, token: TokenKey) -> Result<(), ModellingError> {
        self.expect_state(token, TokenState::Inactive)?;
        let (state_var, object_type, predicate, object_var) = {
            let t = self.tok(token);
            (
                t.state_var(),
                t.object_type().to_string(),
                t.predicate().to_string(),
                t.object_var(),
            )
        };
        self.engine.specify(state_var, TokenState::Active.code())?;
        if let Some(t) = self.tokens.get_mut(&token) {
            t.state = TokenState::Active;
        }
        for key in self.predicate_fanout(&object_type, &predicate) {
            self.active_by_predicate.entry(key).or_default().push(token);
        }
        self.dispatcher.publish(&DbEvent::TokenActivated { token });

        let candidates: Vec<ObjectKey> = match self.engine.var(object_var).derived() {
            Domain::Object(d) => d.object_keys().collect(),
            _ => Vec::new(),
        };
        for obj in candidates {
            if self.objects.get(&obj).is_some_and(|o| o.is_complete()) {
                self.object_add_token(obj, token);
            }
        }
        self.auto_propagate_now();
        Ok(())
    }

    /// Merge an inactive token onto a compatible active one. Corresponding
    /// variables are joined with equality constraints so the unification
    /// survives repropagation and is undone by `cancel`.
    pub fn merge(&mut self, token: TokenKey, active: TokenKey) -> Result<(), ModellingError> {
        self.expect_state(token, TokenState::Inactive)?;
        self.expect_state(active, TokenState::Active)?;
        let (t_vars, t_state_var, t_pred, t_type) = {
            let t = self.tok(token);
            (
                t.alignable_vars(),
                t.state_var(),
                t.predicate().to_string(),
                t.object_type().to_string(),
            )
        };
        let (a_vars, a_pred, a_type) = {
            let a = self.tok(active);
            (
                a.alignable_vars(),
                a.predicate().to_string(),
                a.object_type().to_string(),
            )
        };
        // The active token's predicate must be the inactive one's predicate
        // or a subtype of it, never the reverse.
        let subtype = self.is_subtype(&a_type, &t_type);
        if t_pred != a_pred || !subtype || t_vars.len() != a_vars.len() {
            return Err(ModellingError::IncompatiblePredicates { a: token, b: active });
        }

        let mut merge_constraints = Vec::with_capacity(t_vars.len());
        for (x, y) in t_vars.iter().zip(a_vars.iter()) {
            merge_constraints.push(self.engine.add_constraint(ConstraintKind::Eq, &[*x, *y])?);
        }
        self.engine.specify(t_state_var, TokenState::Merged.code())?;
        if let Some(t) = self.tokens.get_mut(&token) {
            t.state = TokenState::Merged;
            t.merged_onto = Some(active);
            t.merge_constraints = merge_constraints;
        }
        if let Some(a) = self.tokens.get_mut(&active) {
            a.merged_tokens.insert(token);
        }
        self.dispatcher.publish(&DbEvent::TokenMerged { token, active });
        self.auto_propagate_now();
        Ok(())
    }

    /// Reject an inactive, rejectable token.
    pub fn reject(&mut self, token: TokenKey) -> Result<(), ModellingError> {
        self.expect_state(token, TokenState::Inactive)?;
        let (state_var, rejectable) = {
            let t = self.tok(token);
            (t.state_var(), t.is_rejectable())
        };
        if !rejectable {
            return Err(ModellingError::NotRejectable { token });
        }
        self.engine
            .specify(state_var, TokenState::Rejected.code())?;
        if let Some(t) = self.tokens.get_mut(&token) {
            t.state = TokenState::Rejected;
        }
        self.dispatcher.publish(&DbEvent::TokenRejected { token });
        self.auto_propagate_now();
        Ok(())
    }

    /// Cancel a state decision, returning the token to inactive.
    pub fn cancel(&mut self, token: TokenKey) -> Result<(), ModellingError> {
        let state = self.token_ref(token)?.state();
        match state {
            TokenState::Active => {
                let (state_var, object_type, predicate, committed) = {
                    let t = self.tok(token);
                    (
                        t.state_var(),
                        t.object_type().to_string(),
                        t.predicate().to_string(),
                        t.is_committed(),
                    )
                };
                if committed {
                    return Err(ModellingError::TokenCommitted(token));
                }
                if !self.tok(token).merged_tokens().is_empty() {
                    return Err(ModellingError::ActiveHasMergedTokens(token));
                }
                for obj in self.objects_holding(token) {
                    self.object_remove_token(obj, token);
                }
                for key in self.predicate_fanout(&object_type, &predicate) {
                    if let Some(list) = self.active_by_predicate.get_mut(&key) {
                        list.retain(|t| *t != token);
                    }
                }
                self.engine.reset(state_var)?;
                if let Some(t) = self.tokens.get_mut(&token) {
                    t.state = TokenState::Inactive;
                }
                self.dispatcher
                    .publish(&DbEvent::TokenDeactivated { token });
            }
            TokenState::Merged => {
                let (state_var, active, merge_constraints) = {
                    let t = self.tok(token);
                    (
                        t.state_var(),
                        t.active_token().expect("merged token has an active token"),
                        t.merge_constraints.clone(),
                    )
                };
                for c in merge_constraints {
                    let _ = self.engine.remove_constraint(c);
                }
                if let Some(a) = self.tokens.get_mut(&active) {
                    a.merged_tokens.remove(&token);
                }
                self.engine.reset(state_var)?;
                if let Some(t) = self.tokens.get_mut(&token) {
                    t.state = TokenState::Inactive;
                    t.merged_onto = None;
                    t.merge_constraints.clear();
                }
                self.dispatcher.publish(&DbEvent::TokenSplit { token, active });
            }
            TokenState::Rejected => {
                let state_var = self.tok(token).state_var();
                self.engine.reset(state_var)?;
                if let Some(t) = self.tokens.get_mut(&token) {
                    t.state = TokenState::Inactive;
                }
                self.dispatcher
                    .publish(&DbEvent::TokenReinstated { token });
            }
            TokenState::Inactive => {
                return Err(ModellingError::WrongTokenState {
                    token,
                    expected: TokenState::Active,
                    actual: TokenState::Inactive,
                });
            }
        }
        self.auto_propagate_now();
        Ok(())
    }

    /// Commit an active token as a permanent part of the plan.
    pub fn commit(&mut self, token: TokenKey) -> Result<(), ModellingError> {
        self.expect_state(token, TokenState::Active)?;
        if let Some(t) = self.tokens.get_mut(&token) {
            t.committed = true;
        }
        self.dispatcher.publish(&DbEvent::TokenCommitted { token });
        Ok(())
    }

    /// Mark a token eligible for archival.
    pub fn terminate(&mut self, token: TokenKey) -> Result<(), ModellingError> {
        self.token_ref(token)?;
        if let Some(t) = self.tokens.get_mut(&token) {
            t.terminated = true;
        }
        self.dispatcher.publish(&DbEvent::TokenTerminated { token });
        Ok(())
    }

    /// Delete a token. Slaves cascade; an active token with merged tokens is
    /// refused (cancel or re-merge the merged tokens first).
    pub fn delete_token(&mut self, token: TokenKey) -> Result<(), ModellingError> {
        self.ensure_not_purged()?;
        let t = self.token_ref(token)?;
        if !t.merged_tokens().is_empty() {
            return Err(ModellingError::ActiveHasMergedTokens(token));
        }
        let slaves = t.slaves().to_vec();
        for slave in slaves {
            if self.tokens.contains_key(&slave) {
                self.delete_token(slave)?;
            }
        }

        let state = self.tok(token).state();
        match state {
            TokenState::Active => {
                let (object_type, predicate) = {
                    let t = self.tok(token);
                    (t.object_type().to_string(), t.predicate().to_string())
                };
                for obj in self.objects_holding(token) {
                    self.object_remove_token(obj, token);
                }
                for key in self.predicate_fanout(&object_type, &predicate) {
                    if let Some(list) = self.active_by_predicate.get_mut(&key) {
                        list.retain(|t| *t != token);
                    }
                }
            }
            TokenState::Merged => {
                let (active, merge_constraints) = {
                    let t = self.tok(token);
                    (
                        t.active_token().expect("merged token has an active token"),
                        t.merge_constraints.clone(),
                    )
                };
                for c in merge_constraints {
                    let _ = self.engine.remove_constraint(c);
                }
                if let Some(a) = self.tokens.get_mut(&active) {
                    a.merged_tokens.remove(&token);
                }
            }
            TokenState::Inactive | TokenState::Rejected => {}
        }

        let (master, vars) = {
            let t = self.tok(token);
            let mut vars = vec![t.object_var(), t.start(), t.end(), t.duration(), t.state_var()];
            vars.extend(t.params().iter().map(|(_, v)| *v));
            (t.master(), vars)
        };
        if let Some(master_key) = master {
            if let Some(m) = self.tokens.get_mut(&master_key) {
                m.slaves.retain(|s| *s != token);
            }
        }
        for var in vars {
            self.open_type_vars
                .values_mut()
                .for_each(|list| list.retain(|v| *v != var));
            self.engine.delete_variable(var);
        }
        self.tokens_to_order.remove(&token);
        self.tokens.remove(&token);
        self.token_order.retain(|t| *t != token);
        self.ctx.schedule_discard(token.entity());
        self.dispatcher.publish(&DbEvent::TokenRemoved { token });
        Ok(())
    }

    fn objects_holding(&self, token: TokenKey) -> Vec<ObjectKey> {
        self.object_order
            .iter()
            .filter(|o| {
                self.objects
                    .get(o)
                    .is_some_and(|od| od.tokens().contains(&token))
            })
            .copied()
            .collect()
    }

    // ---- token/object association and the flaw index ----

    fn behavior_inserted(&self, object: ObjectKey, token: TokenKey) -> bool {
        let Some(o) = self.objects.get(&object) else {
            return false;
        };
        match &o.behavior {
            ObjectBehavior::Timeline(tl) => tl.is_sequenced(token),
            ObjectBehavior::Base => o.is_constrained_to_this_object(token),
        }
    }

    fn object_add_token(&mut self, object: ObjectKey, token: TokenKey) {
        {
            let Some(o) = self.objects.get_mut(&object) else {
                return;
            };
            debug_assert!(o.is_complete(), "tokens attach to complete objects only");
            if !o.tokens.insert(token) {
                return;
            }
            trace!(target: TARGET, object = %object, token = %token, "token received");
        }
        if !self.behavior_inserted(object, token) {
            self.notify_ordering_required(object, token);
        }
    }

    /// Release a token from an object entirely: unsequence with chain repair
    /// if needed, then strip membership and owned constraints.
    fn object_remove_token(&mut self, object: ObjectKey, token: TokenKey) {
        let sequenced = self
            .objects
            .get(&object)
            .and_then(|o| o.timeline())
            .is_some_and(|tl| tl.is_sequenced(token));
        if sequenced {
            self.timeline_unsequence_for_removal(object, token);
        }
        self.object_remove_base(object, token);
    }

    fn notify_ordering_required(&mut self, object: ObjectKey, token: TokenKey) {
        let fresh = self.tokens_to_order.entry(token).or_default().insert(object);
        if fresh {
            self.dispatcher
                .publish(&DbEvent::OrderingRequired { object, token });
        }
    }

    fn notify_ordering_no_longer_required(&mut self, object: ObjectKey, token: TokenKey) {
        let mut removed = false;
        if let Some(set) = self.tokens_to_order.get_mut(&token) {
            removed = set.remove(&object);
            if set.is_empty() {
                self.tokens_to_order.remove(&token);
            }
        }
        if removed {
            self.dispatcher
                .publish(&DbEvent::OrderingNoLongerRequired { object, token });
        }
    }

    /// Re-raise the ordering flaw for a token that is still hosted, active,
    /// and no longer inserted per the object's behavior.
    fn refresh_ordering_required(&mut self, object: ObjectKey, token: TokenKey) {
        let hosted = self
            .objects
            .get(&object)
            .is_some_and(|o| o.tokens().contains(&token));
        let active = self
            .tokens
            .get(&token)
            .is_some_and(|t| t.state() == TokenState::Active);
        if hosted && active && !self.behavior_inserted(object, token) {
            self.notify_ordering_required(object, token);
        }
    }

    // ---- precedence: constrain ----

    /// Impose `predecessor ≤ successor` on the object, explicitly.
    pub fn constrain(
        &mut self,
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
    ) -> Result<(), ModellingError> {
        if self.object_ref(object)?.is_timeline() {
            self.timeline_constrain(object, predecessor, successor, true)
        } else {
            self.constrain_base(object, predecessor, successor, true)
        }
    }

    /// Object-level constrain: implicit object assignment, the precedence
    /// constraint itself, index registration, and the explicit marker.
    fn constrain_base(
        &mut self,
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
        explicit: bool,
    ) -> Result<(), ModellingError> {
        self.ensure_not_purged()?;
        if self.engine.proven_inconsistent() && !self.engine.pending_relaxation() {
            return Err(ModellingError::EngineInconsistent);
        }
        self.expect_state(predecessor, TokenState::Active)?;
        if successor != predecessor {
            self.expect_state(successor, TokenState::Active)?;
        }
        {
            let o = self.object_ref(object)?;
            if o.is_constrained_to_precede(predecessor, successor) {
                return Err(ModellingError::AlreadyConstrained {
                    object,
                    predecessor,
                    successor,
                });
            }
        }

        self.constrain_to_this_object_as_needed(object, predecessor)?;

        let mut pair_constraint = None;
        if predecessor != successor {
            self.constrain_to_this_object_as_needed(object, successor)?;
            let (pred_end, succ_start) = {
                let p = self.tok(predecessor);
                let s = self.tok(successor);
                (p.end(), s.start())
            };
            let ck = self
                .engine
                .add_constraint(ConstraintKind::Precedes, &[pred_end, succ_start])?;
            let Some(o) = self.objects.get_mut(&object) else {
                return Err(ModellingError::UnknownObject(object));
            };
            o.precedence_by_pair
                .insert((predecessor, successor), ck);
            o.pair_by_constraint.insert(ck, (predecessor, successor));
            o.constraints_by_token
                .entry(predecessor)
                .or_default()
                .push(ck);
            o.constraints_by_token
                .entry(successor)
                .or_default()
                .push(ck);
            pair_constraint = Some(ck);
        }

        if explicit {
            let mark = match pair_constraint {
                Some(ck) => ck.entity(),
                None => predecessor.entity(),
            };
            if let Some(o) = self.objects.get_mut(&object) {
                o.explicit_marks.insert(mark);
            }
        }

        // A base object's only ordering decision is the assignment itself.
        if self
            .objects
            .get(&object)
            .is_some_and(|o| !o.is_timeline())
        {
            self.notify_ordering_no_longer_required(object, predecessor);
            self.notify_ordering_no_longer_required(object, successor);
        }

        debug!(
            target: TARGET,
            object = %object, predecessor = %predecessor, successor = %successor, explicit,
            "constrained"
        );
        self.dispatcher.publish(&DbEvent::Constrained {
            object,
            predecessor,
            successor,
        });
        self.auto_propagate_now();
        Ok(())
    }

    /// Post the implicit object-assignment constraint once per token.
    fn constrain_to_this_object_as_needed(
        &mut self,
        object: ObjectKey,
        token: TokenKey,
    ) -> Result<(), ModellingError> {
        let (object_var, this_var, already) = {
            let t = self.token_ref(token)?;
            let o = self.object_ref(object)?;
            (
                t.object_var(),
                o.this_var(),
                o.is_constrained_to_this_object(token),
            )
        };
        if !self
            .engine
            .var(object_var)
            .derived()
            .is_member(object.raw() as i64)
        {
            return Err(ModellingError::ObjectNotCandidate { object, token });
        }
        if !already {
            let ck = self
                .engine
                .add_constraint(ConstraintKind::Eq, &[object_var, this_var])?;
            if let Some(o) = self.objects.get_mut(&object) {
                o.constraints_by_token.entry(token).or_default().push(ck);
            }
        }
        Ok(())
    }

    /// Timeline constrain: base bookkeeping plus sequence splicing with
    /// implicit chain constraints.
    fn timeline_constrain(
        &mut self,
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
        explicit: bool,
    ) -> Result<(), ModellingError> {
        {
            let o = self.object_ref(object)?;
            let tl = o.timeline().expect("timeline behavior checked by caller");
            let pred_seq = tl.is_sequenced(predecessor);
            let succ_seq = tl.is_sequenced(successor);
            if pred_seq && succ_seq {
                return Err(ModellingError::AlreadyConstrained {
                    object,
                    predecessor,
                    successor,
                });
            }
            if !tl.sequence.is_empty() && !pred_seq && !succ_seq {
                // One endpoint must anchor the splice in a non-empty sequence.
                return Err(ModellingError::NotSequenced {
                    object,
                    token: predecessor,
                });
            }
            if !tl.sequence.is_empty() && predecessor == successor {
                return Err(ModellingError::AlreadyConstrained {
                    object,
                    predecessor,
                    successor,
                });
            }
        }

        self.constrain_base(object, predecessor, successor, explicit)?;

        let mut newly_sequenced: Vec<TokenKey> = Vec::new();
        let mut implicit_link: Option<(TokenKey, TokenKey)> = None;
        {
            let Some(o) = self.objects.get_mut(&object) else {
                return Err(ModellingError::UnknownObject(object));
            };
            let tl = o.timeline_mut().expect("timeline behavior");
            if tl.sequence.is_empty() {
                tl.insert_at(0, successor);
                newly_sequenced.push(successor);
                if predecessor != successor {
                    tl.insert_at(0, predecessor);
                    newly_sequenced.push(predecessor);
                }
            } else if let Some(pos) = tl.position(successor) {
                // Splice the predecessor in front of the sequenced successor.
                tl.insert_at(pos, predecessor);
                newly_sequenced.push(predecessor);
                if pos > 0 {
                    implicit_link = Some((tl.sequence[pos - 1], predecessor));
                }
            } else {
                let pos = tl
                    .position(predecessor)
                    .expect("one endpoint is sequenced");
                tl.insert_at(pos + 1, successor);
                newly_sequenced.push(successor);
                if pos + 2 < tl.sequence.len() {
                    implicit_link = Some((successor, tl.sequence[pos + 2]));
                }
            }
        }

        // Close the chain so adjacency invariants hold; the link is implicit
        // and disappears with its rationale.
        if let Some((from, to)) = implicit_link {
            if !self
                .object_ref(object)?
                .is_constrained_to_precede(from, to)
            {
                self.constrain_base(object, from, to, false)?;
            }
        }

        for token in newly_sequenced {
            self.notify_ordering_no_longer_required(object, token);
        }
        debug_assert!(self.object_ref(object)?.check_invariants());
        Ok(())
    }

    // ---- precedence: free ----

    /// Retract an explicit ordering.
    pub fn free(
        &mut self,
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
    ) -> Result<(), ModellingError> {
        if self.object_ref(object)?.is_timeline() {
            self.timeline_free(object, predecessor, successor)
        } else {
            self.free_base(object, predecessor, successor, true)
        }
    }

    /// Object-level free: marker bookkeeping, constraint removal, and cleanup
    /// of unsupported implicit object assignments.
    fn free_base(
        &mut self,
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
        explicit: bool,
    ) -> Result<(), ModellingError> {
        if self.ctx.is_purging() {
            return Err(ModellingError::Purging);
        }
        {
            let o = self.object_ref(object)?;
            if !o.is_constrained_to_this_object(predecessor) {
                return Err(ModellingError::TokenNotOnObject {
                    object,
                    token: predecessor,
                });
            }
            if !o.is_constrained_to_this_object(successor) {
                return Err(ModellingError::TokenNotOnObject {
                    object,
                    token: successor,
                });
            }
            if predecessor != successor
                && o.precedence_constraint(predecessor, successor).is_none()
            {
                return Err(ModellingError::NoSuchPrecedence {
                    object,
                    predecessor,
                    successor,
                });
            }
        }

        if predecessor == successor {
            if explicit {
                let Some(o) = self.objects.get_mut(&object) else {
                    return Err(ModellingError::UnknownObject(object));
                };
                if !o.explicit_marks.remove(&predecessor.entity()) {
                    return Err(ModellingError::NoExplicitMarker {
                        object,
                        token: predecessor,
                    });
                }
            }
            self.clean(object, predecessor);
        } else {
            let ck = self
                .object_ref(object)?
                .precedence_constraint(predecessor, successor)
                .expect("checked above");
            self.remove_precedence_constraint(object, ck);
            self.clean(object, predecessor);
            self.clean(object, successor);
        }

        if self
            .objects
            .get(&object)
            .is_some_and(|o| !o.is_timeline())
        {
            self.refresh_ordering_required(object, predecessor);
            self.refresh_ordering_required(object, successor);
        }

        debug!(
            target: TARGET,
            object = %object, predecessor = %predecessor, successor = %successor,
            "freed"
        );
        self.dispatcher.publish(&DbEvent::Freed {
            object,
            predecessor,
            successor,
        });
        self.auto_propagate_now();
        Ok(())
    }

    /// Drop a precedence constraint from all three indexes and the engine.
    fn remove_precedence_constraint(&mut self, object: ObjectKey, constraint: ConstraintKey) {
        let Some(o) = self.objects.get_mut(&object) else {
            return;
        };
        let Some((p, s)) = o.pair_by_constraint.remove(&constraint) else {
            return;
        };
        o.precedence_by_pair.remove(&(p, s));
        o.explicit_marks.remove(&constraint.entity());
        for token in [p, s] {
            if let Some(list) = o.constraints_by_token.get_mut(&token) {
                list.retain(|c| *c != constraint);
                if list.is_empty() {
                    o.constraints_by_token.remove(&token);
                }
            }
        }
        let _ = self.engine.remove_constraint(constraint);
    }

    /// Remove the implicit object-assignment constraint when it is the
    /// token's last remaining constraint here and nothing explicit holds it.
    fn clean(&mut self, object: ObjectKey, token: TokenKey) {
        let candidate = {
            let Some(o) = self.objects.get(&object) else {
                return;
            };
            match o.constraints_by_token.get(&token) {
                Some(list) if list.len() == 1 && !o.has_explicit_constraint(token) => {
                    Some(list[0])
                }
                _ => None,
            }
        };
        if let Some(ck) = candidate {
            if let Some(o) = self.objects.get_mut(&object) {
                o.constraints_by_token.remove(&token);
            }
            let _ = self.engine.remove_constraint(ck);
        }
    }

    /// Free every remaining (by construction implicit) precedence constraint
    /// touching the token.
    fn free_implicit_constraints(
        &mut self,
        object: ObjectKey,
        token: TokenKey,
    ) -> Result<(), ModellingError> {
        let pairs: Vec<(TokenKey, TokenKey)> = {
            let o = self.object_ref(object)?;
            o.precedence_constraints(token)
                .into_iter()
                .filter_map(|ck| {
                    debug_assert!(
                        !o.explicit_marks.contains(&ck.entity()),
                        "explicit constraints are never freed implicitly"
                    );
                    o.pair_by_constraint.get(&ck).copied()
                })
                .collect()
        };
        for (p, s) in pairs {
            self.free_base(object, p, s, false)?;
        }
        Ok(())
    }

    /// Timeline free: marker first, then base free, then sequence surgery
    /// with chain repair.
    fn timeline_free(
        &mut self,
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
    ) -> Result<(), ModellingError> {
        {
            let o = self.object_ref(object)?;
            let tl = o.timeline().expect("timeline behavior checked by caller");
            for token in [predecessor, successor] {
                if !tl.is_sequenced(token) {
                    return Err(ModellingError::NotSequenced { object, token });
                }
            }
            if predecessor != successor
                && o.precedence_constraint(predecessor, successor).is_none()
            {
                return Err(ModellingError::NoSuchPrecedence {
                    object,
                    predecessor,
                    successor,
                });
            }
        }

        // Clear the explicit marker before the base free deletes the
        // constraint out from under it.
        {
            let mark = if predecessor == successor {
                predecessor.entity()
            } else {
                self.object_ref(object)?
                    .precedence_constraint(predecessor, successor)
                    .expect("checked above")
                    .entity()
            };
            if let Some(o) = self.objects.get_mut(&object) {
                o.explicit_marks.remove(&mark);
            }
        }

        let pred_required = self
            .object_ref(object)?
            .has_explicit_constraint(predecessor);
        let succ_required = self.object_ref(object)?.has_explicit_constraint(successor);

        // Both endpoints are still pinned by other explicit orderings: the
        // constraint survives, demoted to implicit.
        if pred_required && succ_required {
            return Ok(());
        }

        self.free_base(object, predecessor, successor, false)?;

        if predecessor == successor {
            self.unlink(object, predecessor)?;
            self.refresh_ordering_required(object, predecessor);
            debug_assert!(self.object_ref(object)?.check_invariants());
            return Ok(());
        }

        let mut start_tok = Some(predecessor);
        let mut end_tok = Some(successor);
        if !succ_required {
            end_tok = self.remove_successor(object, successor)?;
        }
        if !pred_required {
            start_tok = self.remove_predecessor(object, predecessor)?;
        }

        if let (Some(s), Some(e)) = (start_tok, end_tok) {
            let o = self.object_ref(object)?;
            let adjacent = o.timeline().is_some_and(|tl| tl.adjacent(s, e));
            if adjacent && !o.is_constrained_to_precede(s, e) {
                self.constrain_base(object, s, e, false)?;
            }
        }

        for token in [predecessor, successor] {
            self.refresh_ordering_required(object, token);
        }
        debug_assert!(self.object_ref(object)?.check_invariants());
        Ok(())
    }

    /// Unlink an unsupported successor endpoint; returns the token that now
    /// bounds the freed gap from the right.
    fn remove_successor(
        &mut self,
        object: ObjectKey,
        token: TokenKey,
    ) -> Result<Option<TokenKey>, ModellingError> {
        self.free_implicit_constraints(object, token)?;
        let Some(o) = self.objects.get_mut(&object) else {
            return Ok(None);
        };
        let tl = o.timeline_mut().expect("timeline behavior");
        let Some(pos) = tl.position(token) else {
            return Ok(None);
        };
        tl.remove_at(pos);
        if tl.sequence.is_empty() {
            return Ok(None);
        }
        if pos >= tl.sequence.len() {
            return Ok(tl.sequence.last().copied());
        }
        Ok(Some(tl.sequence[pos]))
    }

    /// Unlink an unsupported predecessor endpoint; returns the token that now
    /// bounds the freed gap from the left.
    fn remove_predecessor(
        &mut self,
        object: ObjectKey,
        token: TokenKey,
    ) -> Result<Option<TokenKey>, ModellingError> {
        self.free_implicit_constraints(object, token)?;
        let Some(o) = self.objects.get_mut(&object) else {
            return Ok(None);
        };
        let tl = o.timeline_mut().expect("timeline behavior");
        let Some(pos) = tl.position(token) else {
            return Ok(None);
        };
        tl.remove_at(pos);
        if tl.sequence.is_empty() {
            return Ok(None);
        }
        if pos == 0 {
            return Ok(tl.sequence.first().copied());
        }
        Ok(Some(tl.sequence[pos - 1]))
    }

    /// Take a token out of the sequence entirely, re-linking its neighbors.
    fn unlink(&mut self, object: ObjectKey, token: TokenKey) -> Result<(), ModellingError> {
        self.free_implicit_constraints(object, token)?;
        let bridge = {
            let Some(o) = self.objects.get_mut(&object) else {
                return Ok(());
            };
            let tl = o.timeline_mut().expect("timeline behavior");
            let Some(pos) = tl.position(token) else {
                return Ok(());
            };
            tl.remove_at(pos);
            if pos > 0 && pos < tl.sequence.len() {
                Some((tl.sequence[pos - 1], tl.sequence[pos]))
            } else {
                None
            }
        };
        if let Some((left, right)) = bridge {
            if !self
                .object_ref(object)?
                .is_constrained_to_precede(left, right)
            {
                self.constrain_base(object, left, right, false)?;
            }
        }
        Ok(())
    }

    /// Sequence surgery for removing a (possibly sequenced) token from the
    /// object: bridge the neighbors, then drop it from the index.
    fn timeline_unsequence_for_removal(&mut self, object: ObjectKey, token: TokenKey) {
        let (earlier, later) = {
            let Some(o) = self.objects.get(&object) else {
                return;
            };
            let Some(tl) = o.timeline() else {
                return;
            };
            let Some(pos) = tl.position(token) else {
                return;
            };
            let earlier = (pos > 0).then(|| tl.sequence[pos - 1]);
            let later = (pos + 1 < tl.sequence.len()).then(|| tl.sequence[pos + 1]);
            (earlier, later)
        };
        if let (Some(e), Some(l)) = (earlier, later) {
            if !self
                .objects
                .get(&object)
                .is_some_and(|o| o.is_constrained_to_precede(e, l))
            {
                let _ = self.constrain_base(object, e, l, false);
            }
        }
        if let Some(o) = self.objects.get_mut(&object) {
            if let Some(tl) = o.timeline_mut() {
                if let Some(pos) = tl.position(token) {
                    tl.remove_at(pos);
                }
            }
        }
    }

    /// Strip a token's membership and every constraint this object owns on
    /// it, in a gather-then-remove pass that never double-deletes.
    fn object_remove_base(&mut self, object: ObjectKey, token: TokenKey) {
        let gathered: Vec<ConstraintKey> = {
            let Some(o) = self.objects.get_mut(&object) else {
                return;
            };
            o.tokens.remove(&token);
            o.explicit_marks.remove(&token.entity());
            let mut list = o.constraints_by_token.remove(&token).unwrap_or_default();
            list.dedup();
            list
        };
        for ck in gathered {
            let is_pair = self
                .objects
                .get(&object)
                .is_some_and(|o| o.pair_by_constraint.contains_key(&ck));
            if is_pair {
                self.remove_precedence_constraint(object, ck);
            } else {
                let _ = self.engine.remove_constraint(ck);
            }
        }
        self.notify_ordering_no_longer_required(object, token);
    }

    // ---- ordering choices ----

    /// Ordering choices across every candidate object of the token,
    /// concatenated in ascending object-key order and truncated to `limit`.
    pub fn ordering_choices(
        &mut self,
        token: TokenKey,
        limit: usize,
    ) -> Result<Vec<OrderingChoice>, ModellingError> {
        if self.propagate().is_err() {
            return Ok(Vec::new());
        }
        let object_var = self.token_ref(token)?.object_var();
        let candidates: Vec<ObjectKey> = match self.engine.var(object_var).derived() {
            Domain::Object(d) => d.object_keys().collect(),
            _ => Vec::new(),
        };
        let mut out = Vec::new();
        for obj in candidates {
            if out.len() >= limit {
                break;
            }
            if !self.objects.contains_key(&obj) {
                continue;
            }
            let remaining = limit - out.len();
            let choices = self.object_ordering_choices_inner(obj, token, remaining)?;
            out.extend(choices.into_iter().map(|pair| (obj, pair)));
        }
        Ok(out)
    }

    /// Ordering choices on one object. Propagates first; an inconsistent
    /// network yields no choices.
    pub fn object_ordering_choices(
        &mut self,
        object: ObjectKey,
        token: TokenKey,
        limit: usize,
    ) -> Result<Vec<(TokenKey, TokenKey)>, ModellingError> {
        if self.propagate().is_err() {
            return Ok(Vec::new());
        }
        self.object_ordering_choices_inner(object, token, limit)
    }

    fn object_ordering_choices_inner(
        &self,
        object: ObjectKey,
        token: TokenKey,
        limit: usize,
    ) -> Result<Vec<(TokenKey, TokenKey)>, ModellingError> {
        let o = self.object_ref(object)?;
        self.token_ref(token)?;
        match &o.behavior {
            ObjectBehavior::Base => {
                debug_assert!(limit > 0, "choice limit must be positive");
                Ok(vec![(token, token)])
            }
            ObjectBehavior::Timeline(tl) => {
                self.timeline_ordering_choices(tl, token, limit)
            }
        }
    }

    /// The insertion-slot walk over a timeline's sequence.
    fn timeline_ordering_choices(
        &self,
        tl: &TimelineState,
        token: TokenKey,
        limit: usize,
    ) -> Result<Vec<(TokenKey, TokenKey)>, ModellingError> {
        debug_assert!(limit > 0, "choice limit must be positive");
        if tl.is_sequenced(token) {
            return Err(ModellingError::TokenAlreadySequenced(token));
        }
        let mut results = Vec::new();

        // An empty timeline admits exactly one placement.
        if tl.sequence.is_empty() {
            results.push((token, token));
            return Ok(results);
        }

        let seq = &tl.sequence;
        let tok = self.tok(token);
        let engine = &self.engine;

        // Walk forward to the first sequenced token we could precede.
        let mut i = 0;
        while i < seq.len() {
            if self.advisor.can_precede(engine, tok, self.tok(seq[i])) {
                trace!(
                    target: "tempo_db::timeline",
                    token = %token, before = %seq[i], "insertion scan anchor"
                );
                break;
            }
            i += 1;
        }

        let mut count = 0;

        // Preceding the head needs no fit test.
        if i == 0 && count < limit {
            results.push((token, seq[0]));
            count += 1;
            i = 1;
        }

        // Walk adjacent pairs; stop once the predecessor can no longer come
        // before the token, since no later slot can accept it either.
        if i > 0 {
            let mut prev = i - 1;
            while i < seq.len() && count < limit {
                let predecessor = self.tok(seq[prev]);
                let successor = self.tok(seq[i]);
                if !self.advisor.can_precede(engine, predecessor, tok) {
                    break;
                }
                if self
                    .advisor
                    .can_fit_between(engine, tok, predecessor, successor)
                {
                    results.push((token, seq[i]));
                    count += 1;
                }
                prev = i;
                i += 1;
            }
        }

        // Appending after the tail.
        let last = seq[seq.len() - 1];
        if count < limit && self.advisor.can_precede(engine, self.tok(last), tok) {
            results.push((last, token));
        }

        Ok(results)
    }

    /// Count the choices, caching the result on the object.
    pub fn count_ordering_choices(
        &mut self,
        object: ObjectKey,
        token: TokenKey,
        limit: usize,
    ) -> Result<usize, ModellingError> {
        let count = self.object_ordering_choices(object, token, limit)?.len();
        if let Some(o) = self.objects.get_mut(&object) {
            o.last_ordering_choice_count = count;
        }
        Ok(count)
    }

    /// Early-exit variant: does any candidate object offer a choice?
    pub fn has_ordering_choices(&mut self, token: TokenKey) -> Result<bool, ModellingError> {
        Ok(!self.ordering_choices(token, 1)?.is_empty())
    }

    // ---- merge candidates ----

    /// Candidates an inactive token could merge with, per the pairwise
    /// variable-intersection filter; `exact` adds the concurrency test.
    /// Returns nothing while the engine is inconsistent.
    pub fn compatible_tokens(
        &mut self,
        token: TokenKey,
        limit: usize,
        exact: bool,
    ) -> Vec<TokenKey> {
        if self.propagate().is_err() {
            return Vec::new();
        }
        let Some(t) = self.tokens.get(&token) else {
            return Vec::new();
        };
        let t_vars = t.alignable_vars();
        let qualified = t.qualified_predicate();

        // Actives are indexed up their ancestor chain, so this bucket holds
        // exactly the tokens whose predicate is this one or a subtype of it.
        let candidates: Vec<TokenKey> = self
            .active_by_predicate
            .get(&qualified)
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::new();
        for cand in candidates {
            if out.len() >= limit {
                break;
            }
            if cand == token {
                continue;
            }
            let Some(c) = self.tokens.get(&cand) else {
                continue;
            };
            let c_vars = c.alignable_vars();
            if c_vars.len() != t_vars.len() {
                continue;
            }
            let mut compatible = true;
            for (a, b) in t_vars.iter().zip(c_vars.iter()) {
                let mut meet = self.engine.var(*a).derived().clone();
                if meet.intersect(self.engine.var(*b).derived()).is_err() {
                    compatible = false;
                    break;
                }
            }
            if !compatible {
                continue;
            }
            if exact {
                let t_ref = self.tok(token);
                let c_ref = self.tok(cand);
                if !self.advisor.can_be_concurrent(&self.engine, t_ref, c_ref) {
                    continue;
                }
            }
            out.push(cand);
        }
        out
    }

    // ---- archive ----

    /// Can this token be retired at `tick`? Conservative: every merged token
    /// supported by it must also be out of the window, judged by its own
    /// declared end bound — the unification narrows the derived bound, and a
    /// split would widen it right back past the tick.
    pub fn can_be_terminated(&self, token: TokenKey, tick: i64) -> bool {
        let Some(t) = self.tokens.get(&token) else {
            return false;
        };
        // A merged token is judged by its declared window too: unification
        // narrowed its derived bound, and a split would widen it back.
        let end_ub = if t.state() == TokenState::Merged {
            match self.base_end_ub(token) {
                Some(ub) => ub,
                None => return false,
            }
        } else {
            self.engine.bounds(t.end()).1
        };
        if end_ub > tick {
            return false;
        }
        t.merged_tokens()
            .iter()
            .all(|m| self.base_end_ub(*m).is_some_and(|ub| ub <= tick))
    }

    /// Declared (base-domain) end upper bound of a token.
    fn base_end_ub(&self, token: TokenKey) -> Option<i64> {
        let t = self.tokens.get(&token)?;
        match self.engine.variable(t.end())?.base() {
            Domain::Interval(d) => Some(d.ub()),
            _ => None,
        }
    }

    /// Remove every token retirable at `tick`, in ascending earliest-start
    /// order. Returns the number of tokens removed.
    pub fn archive(&mut self, tick: i64) -> usize {
        let mut eligible: Vec<(i64, TokenKey)> = self
            .token_order
            .iter()
            .filter(|k| self.can_be_terminated(**k, tick))
            .map(|k| (self.engine.bounds(self.tok(*k).start()).0, *k))
            .collect();
        eligible.sort();

        let mut removed = 0;
        for (_, token) in eligible {
            if !self.tokens.contains_key(&token) {
                continue; // already cascaded away
            }
            // Merged supporters go first so the active token can be deleted.
            let merged: Vec<TokenKey> =
                self.tok(token).merged_tokens().iter().copied().collect();
            let mut blocked = false;
            for m in merged {
                if self.can_be_terminated(m, tick) {
                    if self.delete_token(m).is_ok() {
                        removed += 1;
                    }
                } else {
                    blocked = true;
                }
            }
            if blocked {
                warn!(
                    target: TARGET,
                    token = %token, tick, "archive skipped: merged token outlives the tick"
                );
                continue;
            }
            if self.delete_token(token).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    // ---- purge & garbage collection ----

    fn ensure_not_purged(&self) -> Result<(), ModellingError> {
        if self.ctx.is_purging() || self.state == DbState::Purged {
            return Err(ModellingError::Purging);
        }
        Ok(())
    }

    /// Bulk teardown. Notifications and cross-entity invariants are suspended
    /// while the purge flag is up.
    pub fn purge(&mut self) {
        self.ctx.begin_purge();
        self.dispatcher.set_muted(true);

        self.engine.purge();
        for key in self.token_order.drain(..) {
            self.ctx.release(key.into());
        }
        for key in self.object_order.drain(..) {
            self.ctx.release(key.into());
        }
        self.tokens.clear();
        self.objects.clear();
        self.by_name.clear();
        self.by_type.clear();
        self.active_by_predicate.clear();
        self.tokens_to_order.clear();
        self.globals.clear();
        self.open_type_vars.clear();
        self.state = DbState::Purged;

        self.dispatcher.set_muted(false);
        self.ctx.end_purge();
        debug!(target: TARGET, "purged");
    }

    /// Drain the deferred-discard batch, releasing keys. Returns the number
    /// of entities collected.
    pub fn garbage_collect(&mut self) -> usize {
        let batch = self.ctx.drain_discards();
        let count = batch.len();
        for key in batch {
            self.ctx.release(key);
        }
        count
    }
}

impl Default for PlanDatabase {
    fn default() -> Self {
        Self::new()
    }
}
