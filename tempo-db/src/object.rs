//! Objects and timelines: token hosting and precedence bookkeeping.
//!
//! An object passively hosts tokens and tracks the precedence constraints it
//! owns through three indexes: by ordered token-key pair (duplicate
//! detection), by constraint key (reverse lookup), and by token key (per-token
//! enumeration, which also carries the implicit object-assignment
//! constraints). Explicitly requested orderings are marked separately so that
//! implicit bookkeeping can be retracted when its rationale disappears.
//!
//! Behavior differences between a plain object (no ordering beyond
//! assignment) and a timeline (total order) live in [`ObjectBehavior`];
//! the mutation orchestration is in the plan database, which owns the
//! engine those mutations must touch.

use tempo_core::collections::{FxHashMap, FxHashSet};
use tempo_core::keys::{ConstraintKey, EntityKey, ObjectKey, TokenKey, VarKey};

use std::collections::BTreeSet;

/// Construction state: member variables may only be added while incomplete;
/// tokens may only be attached once complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Incomplete,
    Complete,
}

/// Total-order bookkeeping for a timeline.
#[derive(Debug, Default)]
pub struct TimelineState {
    pub(crate) sequence: Vec<TokenKey>,
    pub(crate) index: FxHashMap<TokenKey, usize>,
}

impl TimelineState {
    pub fn sequence(&self) -> &[TokenKey] {
        &self.sequence
    }

    pub fn position(&self, token: TokenKey) -> Option<usize> {
        self.index.get(&token).copied()
    }

    pub fn is_sequenced(&self, token: TokenKey) -> bool {
        self.index.contains_key(&token)
    }

    pub fn at_start(&self, token: TokenKey) -> bool {
        self.sequence.first() == Some(&token)
    }

    pub fn at_end(&self, token: TokenKey) -> bool {
        self.sequence.last() == Some(&token)
    }

    /// True when `y` immediately follows `x`.
    pub fn adjacent(&self, x: TokenKey, y: TokenKey) -> bool {
        match (self.index.get(&x), self.index.get(&y)) {
            (Some(&px), Some(&py)) => py == px + 1,
            _ => false,
        }
    }

    pub(crate) fn insert_at(&mut self, pos: usize, token: TokenKey) {
        self.sequence.insert(pos, token);
        for (i, t) in self.sequence.iter().enumerate().skip(pos) {
            self.index.insert(*t, i);
        }
    }

    pub(crate) fn remove_at(&mut self, pos: usize) -> TokenKey {
        let token = self.sequence.remove(pos);
        self.index.remove(&token);
        for (i, t) in self.sequence.iter().enumerate().skip(pos) {
            self.index.insert(*t, i);
        }
        token
    }
}

/// Behavioral variant of an object.
#[derive(Debug)]
pub enum ObjectBehavior {
    /// Assignment is the only decision; ordering choices degenerate to the
    /// self pair.
    Base,
    /// Tokens are kept in a single totally ordered sequence.
    Timeline(TimelineState),
}

/// An instance of a declared class, hosting tokens.
#[derive(Debug)]
pub struct ObjectData {
    pub(crate) key: ObjectKey,
    pub(crate) object_type: String,
    pub(crate) name: String,
    pub(crate) parent: Option<ObjectKey>,
    pub(crate) components: Vec<ObjectKey>,
    pub(crate) this_var: VarKey,
    pub(crate) member_vars: Vec<(String, VarKey)>,
    pub(crate) state: ObjectState,
    pub(crate) tokens: BTreeSet<TokenKey>,
    pub(crate) precedence_by_pair: FxHashMap<(TokenKey, TokenKey), ConstraintKey>,
    pub(crate) pair_by_constraint: FxHashMap<ConstraintKey, (TokenKey, TokenKey)>,
    pub(crate) constraints_by_token: FxHashMap<TokenKey, Vec<ConstraintKey>>,
    pub(crate) explicit_marks: FxHashSet<EntityKey>,
    pub(crate) behavior: ObjectBehavior,
    pub(crate) last_ordering_choice_count: usize,
}

impl ObjectData {
    pub fn key(&self) -> ObjectKey {
        self.key
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ObjectKey> {
        self.parent
    }

    pub fn components(&self) -> &[ObjectKey] {
        &self.components
    }

    /// Singleton object-domain variable denoting this object itself; the
    /// right-hand side of implicit object-assignment constraints.
    pub fn this_var(&self) -> VarKey {
        self.this_var
    }

    pub fn member_vars(&self) -> &[(String, VarKey)] {
        &self.member_vars
    }

    pub fn member_var(&self, name: &str) -> Option<VarKey> {
        self.member_vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn is_complete(&self) -> bool {
        self.state == ObjectState::Complete
    }

    /// Tokens currently associated with this object. Association is passive
    /// indexing; it does not imply assignment.
    pub fn tokens(&self) -> &BTreeSet<TokenKey> {
        &self.tokens
    }

    pub fn is_timeline(&self) -> bool {
        matches!(self.behavior, ObjectBehavior::Timeline(_))
    }

    pub fn timeline(&self) -> Option<&TimelineState> {
        match &self.behavior {
            ObjectBehavior::Timeline(state) => Some(state),
            ObjectBehavior::Base => None,
        }
    }

    pub(crate) fn timeline_mut(&mut self) -> Option<&mut TimelineState> {
        match &mut self.behavior {
            ObjectBehavior::Timeline(state) => Some(state),
            ObjectBehavior::Base => None,
        }
    }

    /// The token sequence, empty for base objects.
    pub fn token_sequence(&self) -> &[TokenKey] {
        self.timeline().map(|t| t.sequence()).unwrap_or(&[])
    }

    pub fn is_sequenced(&self, token: TokenKey) -> bool {
        self.timeline().is_some_and(|t| t.is_sequenced(token))
    }

    // ---- precedence bookkeeping (reads) ----

    pub fn precedence_constraint(
        &self,
        predecessor: TokenKey,
        successor: TokenKey,
    ) -> Option<ConstraintKey> {
        self.precedence_by_pair
            .get(&(predecessor, successor))
            .copied()
    }

    pub fn is_constrained_to_precede(&self, predecessor: TokenKey, successor: TokenKey) -> bool {
        self.precedence_by_pair
            .contains_key(&(predecessor, successor))
    }

    /// True if any constraint owned by this object touches the token. At
    /// least the implicit object-assignment constraint is present whenever a
    /// token has been constrained here.
    pub fn is_constrained_to_this_object(&self, token: TokenKey) -> bool {
        self.constraints_by_token
            .get(&token)
            .is_some_and(|list| !list.is_empty())
    }

    /// The precedence (pair) constraints touching `token`, excluding the
    /// singleton object-assignment constraint.
    pub fn precedence_constraints(&self, token: TokenKey) -> Vec<ConstraintKey> {
        self.constraints_by_token
            .get(&token)
            .map(|list| {
                list.iter()
                    .copied()
                    .filter(|c| self.pair_by_constraint.contains_key(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The ordered token pair a precedence constraint stands for.
    pub fn pair_of_constraint(&self, constraint: ConstraintKey) -> Option<(TokenKey, TokenKey)> {
        self.pair_by_constraint.get(&constraint).copied()
    }

    /// Was this pair constraint explicitly requested?
    pub fn is_explicitly_marked_pair(&self, constraint: ConstraintKey) -> bool {
        self.explicit_marks.contains(&constraint.entity())
    }

    /// Does the token carry the degenerate self-ordering marker?
    pub fn is_explicitly_self_marked(&self, token: TokenKey) -> bool {
        self.explicit_marks.contains(&token.entity())
    }

    /// True if the token participates in any explicitly requested ordering,
    /// including the degenerate self-ordering marker.
    pub fn has_explicit_constraint(&self, token: TokenKey) -> bool {
        if self.explicit_marks.contains(&token.entity()) {
            return true;
        }
        self.precedence_constraints(token)
            .iter()
            .any(|c| self.explicit_marks.contains(&c.entity()))
    }

    /// Result of the most recent `count_ordering_choices` on this object.
    pub fn last_ordering_choice_count(&self) -> usize {
        self.last_ordering_choice_count
    }

    /// Structural invariants of the three indexes. Cheap enough for tests and
    /// debug assertions, not called on hot paths.
    pub fn check_invariants(&self) -> bool {
        if self.precedence_by_pair.len() != self.pair_by_constraint.len() {
            return false;
        }
        for (pair, c) in &self.precedence_by_pair {
            if self.pair_by_constraint.get(c) != Some(pair) {
                return false;
            }
        }
        if let Some(tl) = self.timeline() {
            if tl.sequence.len() != tl.index.len() {
                return false;
            }
            for (i, t) in tl.sequence.iter().enumerate() {
                if tl.index.get(t) != Some(&i) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(raw: u32) -> TokenKey {
        TokenKey(EntityKey(raw))
    }

    #[test]
    fn sequence_positions_stay_dense() {
        let mut tl = TimelineState::default();
        tl.insert_at(0, token(1));
        tl.insert_at(1, token(3));
        tl.insert_at(1, token(2));
        assert_eq!(tl.sequence(), &[token(1), token(2), token(3)]);
        assert_eq!(tl.position(token(3)), Some(2));
        assert!(tl.adjacent(token(1), token(2)));
        assert!(!tl.adjacent(token(1), token(3)));

        let removed = tl.remove_at(1);
        assert_eq!(removed, token(2));
        assert_eq!(tl.position(token(3)), Some(1));
        assert!(tl.adjacent(token(1), token(3)));
        assert!(tl.at_start(token(1)));
        assert!(tl.at_end(token(3)));
    }
}
