//! Flaw managers: enumeration and scoring of residual choices.
//!
//! Three manager families share one implementation, differing only in what
//! they iterate: variables whose derived domain is not yet a singleton,
//! inactive tokens whose state is undecided, and the plan database's
//! tokens-to-order index. Each flaw is scored by the most specific matching
//! rule; priority dominates, weight breaks ties.

use tempo_core::arena::EntityKind;
use tempo_core::keys::{EntityKey, TokenKey, VarKey};

use tempo_db::database::PlanDatabase;
use tempo_db::token::{Token, TokenState};

use crate::matching::{MatchingRule, WEIGHT_BASE};

/// The manager families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlawKind {
    UnboundVariable,
    OpenCondition,
    Threat,
}

/// The flawed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlawEntity {
    Variable(VarKey),
    Token(TokenKey),
}

impl FlawEntity {
    pub fn entity_key(&self) -> EntityKey {
        match self {
            FlawEntity::Variable(v) => v.entity(),
            FlawEntity::Token(t) => t.entity(),
        }
    }
}

/// A scored residual choice.
#[derive(Debug, Clone, Copy)]
pub struct Flaw {
    pub kind: FlawKind,
    pub entity: FlawEntity,
    pub priority: i64,
    pub weight: i64,
}

/// One manager family with its registered rules.
pub struct FlawManager {
    kind: FlawKind,
    rules: Vec<MatchingRule>,
    default_priority: i64,
}

impl FlawManager {
    pub fn new(kind: FlawKind, default_priority: i64) -> Self {
        Self {
            kind,
            rules: Vec::new(),
            default_priority,
        }
    }

    pub fn kind(&self) -> FlawKind {
        self.kind
    }

    pub fn add_rule(&mut self, rule: MatchingRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[MatchingRule] {
        &self.rules
    }

    /// Stream of flawed entities, scored. The engine must be propagated.
    pub fn iterate(&self, db: &PlanDatabase) -> Vec<Flaw> {
        match self.kind {
            FlawKind::UnboundVariable => self.unbound_variables(db),
            FlawKind::OpenCondition => self.open_conditions(db),
            FlawKind::Threat => self.threats(db),
        }
    }

    /// Variables whose derived domain is non-singleton. The token-structural
    /// variables (state, object, start, end, duration) are excluded: state is
    /// the open-condition manager's decision and the rest are resolved by
    /// ordering, not labelling.
    fn unbound_variables(&self, db: &PlanDatabase) -> Vec<Flaw> {
        let mut flaws = Vec::new();
        for var in db.engine().variables() {
            if !var.can_be_specified() || var.is_specified() {
                continue;
            }
            let derived = var.derived();
            if derived.is_singleton() || derived.is_empty() || derived.is_open() {
                continue;
            }
            let owner = var
                .parent()
                .filter(|p| db.context().kind_of(*p) == Some(EntityKind::Token))
                .and_then(|p| db.token(TokenKey(p)));
            if let Some(token) = owner {
                if token.state() != TokenState::Active {
                    continue;
                }
                let key = var.key();
                if key == token.state_var()
                    || key == token.object_var()
                    || key == token.start()
                    || key == token.end()
                    || key == token.duration()
                {
                    continue;
                }
            }
            if let Some((priority, weight)) = self.score_variable(db, var.key(), owner) {
                flaws.push(Flaw {
                    kind: self.kind,
                    entity: FlawEntity::Variable(var.key()),
                    priority,
                    weight,
                });
            }
        }
        flaws
    }

    /// Inactive tokens whose state is not yet decided.
    fn open_conditions(&self, db: &PlanDatabase) -> Vec<Flaw> {
        db.tokens()
            .filter(|t| t.state() == TokenState::Inactive)
            .filter_map(|t| {
                self.score_token(db, t).map(|(priority, weight)| Flaw {
                    kind: self.kind,
                    entity: FlawEntity::Token(t.key()),
                    priority,
                    weight,
                })
            })
            .collect()
    }

    /// Active tokens the database reports as needing an ordering decision.
    fn threats(&self, db: &PlanDatabase) -> Vec<Flaw> {
        let mut keys: Vec<TokenKey> = db.tokens_to_order().keys().copied().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| {
                let token = db.token(key)?;
                self.score_token(db, token).map(|(priority, weight)| Flaw {
                    kind: self.kind,
                    entity: FlawEntity::Token(key),
                    priority,
                    weight,
                })
            })
            .collect()
    }

    /// Score by the most specific matching rule; rules filter, so a flaw
    /// matched by no rule falls back to the default priority.
    fn score_token(&self, db: &PlanDatabase, token: &Token) -> Option<(i64, i64)> {
        let best = self
            .rules
            .iter()
            .filter(|r| r.matches_token(db, token))
            .max_by_key(|r| r.specificity());
        Some(match best {
            Some(rule) => (rule.priority, rule.weight()),
            None => (self.default_priority, default_weight(self.default_priority)),
        })
    }

    fn score_variable(
        &self,
        db: &PlanDatabase,
        var: VarKey,
        owner: Option<&Token>,
    ) -> Option<(i64, i64)> {
        let best = self
            .rules
            .iter()
            .filter(|r| r.matches_variable(db, var, owner))
            .max_by_key(|r| r.specificity());
        Some(match best {
            Some(rule) => (rule.priority, rule.weight()),
            None => (self.default_priority, default_weight(self.default_priority)),
        })
    }
}

/// Weight of a rule-less flaw: zero filters, zero guards.
fn default_weight(priority: i64) -> i64 {
    (priority - 2 * WEIGHT_BASE).abs()
}
