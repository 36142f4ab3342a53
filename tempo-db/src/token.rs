//! Tokens: predicate instances with temporal extent.

use std::collections::BTreeSet;

use tempo_core::domain::Domain;
use tempo_core::keys::{ConstraintKey, TokenKey, VarKey};

/// Token lifecycle state. The same values back the token's state variable, so
/// a solver decision on the state variable and a direct lifecycle call agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenState {
    Inactive,
    Active,
    Merged,
    Rejected,
}

impl TokenState {
    pub fn code(self) -> i64 {
        match self {
            TokenState::Inactive => 0,
            TokenState::Active => 1,
            TokenState::Merged => 2,
            TokenState::Rejected => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TokenState::Inactive),
            1 => Some(TokenState::Active),
            2 => Some(TokenState::Merged),
            3 => Some(TokenState::Rejected),
            _ => None,
        }
    }
}

/// Blueprint for a new token.
#[derive(Debug, Clone)]
pub struct TokenSpec {
    pub object_type: String,
    pub predicate: String,
    pub start: (i64, i64),
    pub end: (i64, i64),
    pub duration: (i64, i64),
    pub params: Vec<(String, Domain)>,
    pub rejectable: bool,
    pub is_fact: bool,
}

impl TokenSpec {
    /// An interval token with non-zero duration.
    pub fn interval(
        object_type: impl Into<String>,
        predicate: impl Into<String>,
        start: (i64, i64),
        end: (i64, i64),
        duration: (i64, i64),
    ) -> Self {
        debug_assert!(duration.0 >= 1, "interval tokens have positive duration");
        Self {
            object_type: object_type.into(),
            predicate: predicate.into(),
            start,
            end,
            duration,
            params: Vec::new(),
            rejectable: false,
            is_fact: false,
        }
    }

    /// An event token: a single time point, zero duration.
    pub fn event(
        object_type: impl Into<String>,
        predicate: impl Into<String>,
        time: (i64, i64),
    ) -> Self {
        Self {
            object_type: object_type.into(),
            predicate: predicate.into(),
            start: time,
            end: time,
            duration: (0, 0),
            params: Vec::new(),
            rejectable: false,
            is_fact: false,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, domain: Domain) -> Self {
        self.params.push((name.into(), domain));
        self
    }

    pub fn rejectable(mut self, rejectable: bool) -> Self {
        self.rejectable = rejectable;
        self
    }

    pub fn fact(mut self, is_fact: bool) -> Self {
        self.is_fact = is_fact;
        self
    }
}

/// A predicate instance held by the plan database.
#[derive(Debug)]
pub struct Token {
    pub(crate) key: TokenKey,
    pub(crate) object_type: String,
    pub(crate) predicate: String,
    pub(crate) state: TokenState,
    pub(crate) state_var: VarKey,
    pub(crate) object_var: VarKey,
    pub(crate) start: VarKey,
    pub(crate) end: VarKey,
    pub(crate) duration: VarKey,
    pub(crate) params: Vec<(String, VarKey)>,
    pub(crate) duration_constraint: ConstraintKey,
    pub(crate) master: Option<TokenKey>,
    pub(crate) relation: Option<String>,
    pub(crate) slaves: Vec<TokenKey>,
    pub(crate) merged_onto: Option<TokenKey>,
    pub(crate) merged_tokens: BTreeSet<TokenKey>,
    pub(crate) merge_constraints: Vec<ConstraintKey>,
    pub(crate) committed: bool,
    pub(crate) terminated: bool,
    pub(crate) rejectable: bool,
    pub(crate) is_fact: bool,
}

impl Token {
    pub fn key(&self) -> TokenKey {
        self.key
    }

    /// Unqualified predicate name.
    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    /// Declaring object type.
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Predicate qualified by object type, e.g. `Rover.At`.
    pub fn qualified_predicate(&self) -> String {
        format!("{}.{}", self.object_type, self.predicate)
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TokenState::Active
    }

    pub fn is_inactive(&self) -> bool {
        self.state == TokenState::Inactive
    }

    pub fn state_var(&self) -> VarKey {
        self.state_var
    }

    pub fn object_var(&self) -> VarKey {
        self.object_var
    }

    pub fn start(&self) -> VarKey {
        self.start
    }

    pub fn end(&self) -> VarKey {
        self.end
    }

    pub fn duration(&self) -> VarKey {
        self.duration
    }

    /// Parameter variables in declaration order.
    pub fn params(&self) -> &[(String, VarKey)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<VarKey> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Every variable of the token except the state variable, in the fixed
    /// correspondence order used by compatibility tests and merging:
    /// object, start, end, duration, then parameters.
    pub fn alignable_vars(&self) -> Vec<VarKey> {
        let mut vars = vec![self.object_var, self.start, self.end, self.duration];
        vars.extend(self.params.iter().map(|(_, v)| *v));
        vars
    }

    pub fn master(&self) -> Option<TokenKey> {
        self.master
    }

    /// Relation to the master token, e.g. `meets`, when this is a sub-goal.
    pub fn relation(&self) -> Option<&str> {
        self.relation.as_deref()
    }

    pub fn slaves(&self) -> &[TokenKey] {
        &self.slaves
    }

    /// The active token this one merged onto, if merged.
    pub fn active_token(&self) -> Option<TokenKey> {
        self.merged_onto
    }

    /// Inactive tokens currently merged onto this active token.
    pub fn merged_tokens(&self) -> &BTreeSet<TokenKey> {
        &self.merged_tokens
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_rejectable(&self) -> bool {
        self.rejectable
    }

    pub fn is_fact(&self) -> bool {
        self.is_fact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip() {
        for state in [
            TokenState::Inactive,
            TokenState::Active,
            TokenState::Merged,
            TokenState::Rejected,
        ] {
            assert_eq!(TokenState::from_code(state.code()), Some(state));
        }
        assert_eq!(TokenState::from_code(9), None);
    }

    #[test]
    fn event_spec_is_zero_duration() {
        let spec = TokenSpec::event("Rover", "Ping", (3, 8));
        assert_eq!(spec.duration, (0, 0));
        assert_eq!(spec.start, spec.end);
    }
}
