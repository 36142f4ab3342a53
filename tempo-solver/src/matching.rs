//! Matching rules: pattern filters and guards that score flaws.
//!
//! A rule filters flaws by class, predicate, variable name, and master
//! relation, optionally gated by guard equations on (possibly master-token)
//! variables. Rules carry a priority — lower dominates — and derive a weight
//! from their specificity for tie-breaking: the more static filters and
//! guards a rule carries, the further its weight sits from the priority.

use tempo_db::database::PlanDatabase;
use tempo_db::token::Token;

use tempo_core::keys::VarKey;

/// Priorities live in `[0, WEIGHT_BASE)`; the weight formula spreads rules
/// with different specificity into disjoint bands.
pub const WEIGHT_BASE: i64 = 100_000;

/// A runtime equality condition `variable == value` on a token variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub variable: String,
    pub value: i64,
}

/// A registered flaw-matching rule.
#[derive(Debug, Clone, Default)]
pub struct MatchingRule {
    pub class: Option<String>,
    pub predicate: Option<String>,
    pub variable: Option<String>,
    pub master_class: Option<String>,
    pub master_predicate: Option<String>,
    pub master_relation: Option<String>,
    pub guards: Vec<Guard>,
    pub master_guards: Vec<Guard>,
    pub priority: i64,
}

impl MatchingRule {
    pub fn with_priority(priority: i64) -> Self {
        debug_assert!((0..WEIGHT_BASE).contains(&priority));
        Self {
            priority,
            ..Self::default()
        }
    }

    /// Number of static (`*-match`) filters the rule carries.
    pub fn static_filter_count(&self) -> usize {
        [
            self.class.is_some(),
            self.predicate.is_some(),
            self.variable.is_some(),
            self.master_class.is_some(),
            self.master_predicate.is_some(),
            self.master_relation.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// `|priority − (N + M + 2)·BASE|` where `N` counts static filters and
    /// `M` counts guards. The `+2` keeps zero-filter rules away from zero so
    /// built-in discounts cannot underflow the band.
    pub fn weight(&self) -> i64 {
        let terms = (2 + self.static_filter_count() + self.guards.len() + self.master_guards.len())
            as i64;
        (self.priority - terms * WEIGHT_BASE).abs()
    }

    /// Specificity used to pick among several matching rules.
    pub fn specificity(&self) -> usize {
        self.static_filter_count() + self.guards.len() + self.master_guards.len()
    }

    // ---- matching ----

    /// Static filters plus guards against a token flaw.
    pub fn matches_token(&self, db: &PlanDatabase, token: &Token) -> bool {
        if let Some(class) = &self.class {
            if !db.is_subtype(token.object_type(), class) {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if token.predicate() != predicate {
                return false;
            }
        }
        if !self.matches_master(db, token) {
            return false;
        }
        self.guards_satisfied(db, token, &self.guards)
            && self.master_guards_satisfied(db, token)
    }

    /// Static filters plus guards against a variable flaw; the variable
    /// filter compares the unqualified name.
    pub fn matches_variable(
        &self,
        db: &PlanDatabase,
        var: VarKey,
        owner: Option<&Token>,
    ) -> bool {
        if let Some(wanted) = &self.variable {
            let name = db
                .engine()
                .variable(var)
                .map(|v| v.name().rsplit('.').next().unwrap_or(v.name()).to_string());
            if name.as_deref() != Some(wanted.as_str()) {
                return false;
            }
        }
        match owner {
            Some(token) => self.matches_token(db, token),
            None => {
                // Global variables carry no class/predicate context; any
                // token-level filter disqualifies them.
                self.class.is_none()
                    && self.predicate.is_none()
                    && self.master_class.is_none()
                    && self.master_predicate.is_none()
                    && self.master_relation.is_none()
                    && self.guards.is_empty()
                    && self.master_guards.is_empty()
            }
        }
    }

    fn matches_master(&self, db: &PlanDatabase, token: &Token) -> bool {
        let needs_master = self.master_class.is_some()
            || self.master_predicate.is_some()
            || self.master_relation.is_some()
            || !self.master_guards.is_empty();
        if !needs_master {
            return true;
        }
        let Some(master) = token.master().and_then(|m| db.token(m)) else {
            return false;
        };
        if let Some(class) = &self.master_class {
            if !db.is_subtype(master.object_type(), class) {
                return false;
            }
        }
        if let Some(predicate) = &self.master_predicate {
            if master.predicate() != predicate {
                return false;
            }
        }
        if let Some(relation) = &self.master_relation {
            if token.relation() != Some(relation.as_str()) {
                return false;
            }
        }
        true
    }

    fn master_guards_satisfied(&self, db: &PlanDatabase, token: &Token) -> bool {
        if self.master_guards.is_empty() {
            return true;
        }
        match token.master().and_then(|m| db.token(m)) {
            Some(master) => self.guards_satisfied(db, master, &self.master_guards),
            None => false,
        }
    }

    /// A guard holds when the named variable's derived domain is the
    /// singleton of the guard value.
    fn guards_satisfied(&self, db: &PlanDatabase, token: &Token, guards: &[Guard]) -> bool {
        guards.iter().all(|guard| {
            let Some(var) = token_variable_by_name(token, &guard.variable) else {
                return false;
            };
            db.engine()
                .variable(var)
                .and_then(|v| v.derived().singleton_value())
                == Some(guard.value)
        })
    }
}

/// Resolve a token variable by name: built-ins first, then parameters.
pub fn token_variable_by_name(token: &Token, name: &str) -> Option<VarKey> {
    match name {
        "start" => Some(token.start()),
        "end" => Some(token.end()),
        "duration" => Some(token.duration()),
        "object" => Some(token.object_var()),
        "state" => Some(token.state_var()),
        _ => token.param(name),
    }
}
