//! Decision points: stateful commit/undo wrappers around one flaw.
//!
//! A decision point is initialized once, then driven through
//! `has_next → execute → undo` by the solver. `undo` reverses the applied
//! choice and advances the internal cursor, so a subsequent `execute` tries
//! the next alternative. A decision with no remaining choices is exhausted.

use tempo_core::domain::Domain;
use tempo_core::keys::{EntityKey, ObjectKey, TokenKey, VarKey};

use tempo_db::client::DbClient;
use tempo_db::database::OrderingChoice;
use tempo_db::token::TokenState;

use crate::errors::SolverError;

/// Cap on values enumerated from an interval domain; enumerated domains are
/// finite already.
const MAX_INTERVAL_CHOICES: usize = 64;

pub trait DecisionPoint {
    /// Key of the flawed entity, for logging and display.
    fn entity_key(&self) -> EntityKey;

    /// Compute the choice set. Called exactly once before the first execute.
    fn initialize(&mut self, client: &mut DbClient) -> Result<(), SolverError>;

    fn has_next(&self) -> bool;

    fn is_executed(&self) -> bool;

    /// Apply the current choice through the client. Does not propagate; the
    /// solver drives the consistency gate.
    fn execute(&mut self, client: &mut DbClient) -> Result<(), SolverError>;

    /// Reverse the applied choice and advance to the next alternative.
    fn undo(&mut self, client: &mut DbClient) -> Result<(), SolverError>;

    /// Short display form of the current choice.
    fn describe(&self) -> String;
}

// ---- threat ----

/// Orders a token onto one of its candidate objects.
pub struct ThreatDecisionPoint {
    token: TokenKey,
    choices: Vec<OrderingChoice>,
    index: usize,
    executed: bool,
}

impl ThreatDecisionPoint {
    pub fn new(token: TokenKey) -> Self {
        Self {
            token,
            choices: Vec::new(),
            index: 0,
            executed: false,
        }
    }

    fn current(&self) -> Option<&OrderingChoice> {
        self.choices.get(self.index)
    }
}

impl DecisionPoint for ThreatDecisionPoint {
    fn entity_key(&self) -> EntityKey {
        self.token.entity()
    }

    fn initialize(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        self.choices = client.db_mut().ordering_choices(self.token, usize::MAX)?;
        // Deterministic order across candidate objects; the per-object walk
        // order is preserved by the stable sort.
        self.choices.sort_by_key(|(object, _)| *object);
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.index < self.choices.len()
    }

    fn is_executed(&self) -> bool {
        self.executed
    }

    fn execute(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        let (object, (predecessor, successor)) =
            *self.current().expect("execute within has_next");
        debug_assert!(
            predecessor == self.token || successor == self.token,
            "the ordered token is part of its own assignment"
        );
        client.constrain(object, predecessor, successor)?;
        self.executed = true;
        Ok(())
    }

    fn undo(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        let (object, (predecessor, successor)) =
            *self.current().expect("undo of an executed choice");
        client.free(object, predecessor, successor)?;
        self.executed = false;
        self.index += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        match self.current() {
            Some((object, (p, s))) => {
                format!("THR{{{} ({})<({})}}", object, p.raw(), s.raw())
            }
            None => format!("THR{{token {} exhausted}}", self.token),
        }
    }
}

// ---- open condition ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenChoice {
    Activate,
    MergeWith(TokenKey),
    Reject,
}

/// Decides an inactive token's state: activate, merge, or reject.
pub struct TokenDecisionPoint {
    token: TokenKey,
    choices: Vec<TokenChoice>,
    index: usize,
    executed: bool,
}

impl TokenDecisionPoint {
    pub fn new(token: TokenKey) -> Self {
        Self {
            token,
            choices: Vec::new(),
            index: 0,
            executed: false,
        }
    }
}

impl DecisionPoint for TokenDecisionPoint {
    fn entity_key(&self) -> EntityKey {
        self.token.entity()
    }

    fn initialize(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        self.choices.push(TokenChoice::Activate);
        let compatible = client.db_mut().compatible_tokens(self.token, usize::MAX, true);
        self.choices
            .extend(compatible.into_iter().map(TokenChoice::MergeWith));
        let rejectable = client
            .db()
            .token(self.token)
            .is_some_and(|t| t.is_rejectable());
        if rejectable {
            self.choices.push(TokenChoice::Reject);
        }
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.index < self.choices.len()
    }

    fn is_executed(&self) -> bool {
        self.executed
    }

    fn execute(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        match self.choices[self.index] {
            TokenChoice::Activate => client.activate(self.token)?,
            TokenChoice::MergeWith(active) => client.merge(self.token, active)?,
            TokenChoice::Reject => client.reject(self.token)?,
        }
        self.executed = true;
        Ok(())
    }

    fn undo(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        // A merge candidate can disappear between initialize and execute;
        // cancel is the uniform inverse for all three choices.
        if client.db().token(self.token).map(|t| t.state()) != Some(TokenState::Inactive) {
            client.cancel(self.token)?;
        }
        self.executed = false;
        self.index += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        match self.choices.get(self.index) {
            Some(TokenChoice::Activate) => format!("TOK{{activate ({})}}", self.token.raw()),
            Some(TokenChoice::MergeWith(active)) => {
                format!("TOK{{merge ({})->({})}}", self.token.raw(), active.raw())
            }
            Some(TokenChoice::Reject) => format!("TOK{{reject ({})}}", self.token.raw()),
            None => format!("TOK{{token {} exhausted}}", self.token),
        }
    }
}

// ---- unbound variable ----

/// Binds a variable to one value from its derived domain.
pub struct VariableDecisionPoint {
    var: VarKey,
    choices: Vec<i64>,
    index: usize,
    executed: bool,
}

impl VariableDecisionPoint {
    pub fn new(var: VarKey) -> Self {
        Self {
            var,
            choices: Vec::new(),
            index: 0,
            executed: false,
        }
    }
}

impl DecisionPoint for VariableDecisionPoint {
    fn entity_key(&self) -> EntityKey {
        self.var.entity()
    }

    fn initialize(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        let Some(var) = client.db().engine().variable(self.var) else {
            return Ok(());
        };
        self.choices = match var.derived() {
            Domain::Enumerated(d) => d.values().collect(),
            Domain::Object(d) => d.object_keys().map(|k: ObjectKey| k.raw() as i64).collect(),
            Domain::Interval(d) => {
                let span = (d.ub() - d.lb() + 1).max(0) as usize;
                (d.lb()..=d.ub())
                    .take(span.min(MAX_INTERVAL_CHOICES))
                    .collect()
            }
        };
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.index < self.choices.len()
    }

    fn is_executed(&self) -> bool {
        self.executed
    }

    fn execute(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        client.specify(self.var, self.choices[self.index])?;
        self.executed = true;
        Ok(())
    }

    fn undo(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        client.reset(self.var)?;
        self.executed = false;
        self.index += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        match self.choices.get(self.index) {
            Some(value) => format!("VAR{{{} == {}}}", self.var, value),
            None => format!("VAR{{{} exhausted}}", self.var),
        }
    }
}
