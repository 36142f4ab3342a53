//! Timeline ordering: insertion-slot enumeration, chain closure, and the
//! constrain/free symmetry.

use tempo_core::domain::{MINUS_INFINITY, PLUS_INFINITY};
use tempo_core::keys::{ObjectKey, TokenKey};

use tempo_db::{PlanDatabase, TokenSpec};

// ---- helpers ----

fn timeline_db() -> (PlanDatabase, ObjectKey) {
    let mut db = PlanDatabase::new();
    db.register_object_type("Machine", None, true).unwrap();
    let tl = db.create_closed_object("Machine", "tl").unwrap();
    (db, tl)
}

fn active_token(
    db: &mut PlanDatabase,
    start: (i64, i64),
    end: (i64, i64),
    duration: (i64, i64),
) -> TokenKey {
    let token = db
        .create_token(TokenSpec::interval("Machine", "Run", start, end, duration))
        .unwrap();
    db.activate(token).unwrap();
    token
}

fn free_token(db: &mut PlanDatabase, duration: (i64, i64)) -> TokenKey {
    active_token(
        db,
        (MINUS_INFINITY, PLUS_INFINITY),
        (MINUS_INFINITY, PLUS_INFINITY),
        duration,
    )
}

fn sequence(db: &PlanDatabase, tl: ObjectKey) -> Vec<TokenKey> {
    db.object(tl).unwrap().token_sequence().to_vec()
}

/// Every adjacent pair in the sequence is bridged by a precedence constraint.
fn assert_chain_closed(db: &PlanDatabase, tl: ObjectKey) {
    let o = db.object(tl).unwrap();
    let seq = o.token_sequence();
    for pair in seq.windows(2) {
        assert!(
            o.is_constrained_to_precede(pair[0], pair[1]),
            "adjacent pair {}..{} has no precedence constraint",
            pair[0],
            pair[1]
        );
    }
    assert!(o.check_invariants());
}

// ---- single-token timeline ----

#[test]
fn empty_timeline_offers_the_self_pair() {
    let (mut db, tl) = timeline_db();
    let t = active_token(&mut db, (0, 10), (0, 15), (1, 5));

    let choices = db.object_ordering_choices(tl, t, 10).unwrap();
    assert_eq!(choices, vec![(t, t)]);

    // The database-level query wraps the same pair with the object.
    let all = db.ordering_choices(t, 10).unwrap();
    assert_eq!(all, vec![(tl, (t, t))]);
}

#[test]
fn self_pair_insertion_sequences_the_token() {
    let (mut db, tl) = timeline_db();
    let t = active_token(&mut db, (0, 10), (0, 15), (1, 5));

    db.constrain(tl, t, t).unwrap();
    assert_eq!(sequence(&db, tl), vec![t]);
    assert!(db.object(tl).unwrap().is_sequenced(t));
    assert!(db.tokens_to_order().is_empty());

    // Querying choices for an inserted token is a modelling error.
    assert!(db.object_ordering_choices(tl, t, 10).is_err());
}

// ---- forced slots ----

#[test]
fn three_token_timeline_enumerates_forced_slots() {
    let (mut db, tl) = timeline_db();
    let a = active_token(&mut db, (0, 0), (5, 5), (5, 5));
    let b = active_token(&mut db, (10, 10), (15, 15), (5, 5));
    let t = free_token(&mut db, (1, 3));

    db.constrain(tl, a, b).unwrap();
    db.propagate().unwrap();
    assert_eq!(sequence(&db, tl), vec![a, b]);

    let choices = db.object_ordering_choices(tl, t, 10).unwrap();
    assert_eq!(choices, vec![(t, a), (t, b), (b, t)]);
}

#[test]
fn insert_then_free_restores_the_pair_sequence() {
    let (mut db, tl) = timeline_db();
    let a = active_token(&mut db, (0, 0), (5, 5), (5, 5));
    let b = active_token(&mut db, (10, 10), (15, 15), (5, 5));
    let t = free_token(&mut db, (1, 3));

    db.constrain(tl, a, b).unwrap();
    db.constrain(tl, t, a).unwrap();
    assert_eq!(sequence(&db, tl), vec![t, a, b]);
    assert_chain_closed(&db, tl);

    db.free(tl, t, a).unwrap();
    assert_eq!(sequence(&db, tl), vec![a, b]);
    assert_chain_closed(&db, tl);
    assert!(db.propagate().is_ok());
}

// ---- constrain/free symmetry ----

#[test]
fn constrain_free_round_trip_is_bit_exact_on_base_objects() {
    let mut db = PlanDatabase::new();
    db.register_object_type("Store", None, false).unwrap();
    let o = db.create_closed_object("Store", "s1").unwrap();
    let p = {
        let t = db
            .create_token(TokenSpec::interval("Store", "Hold", (0, 10), (1, 15), (1, 5)))
            .unwrap();
        db.activate(t).unwrap();
        t
    };
    let s = {
        let t = db
            .create_token(TokenSpec::interval("Store", "Hold", (0, 10), (1, 15), (1, 5)))
            .unwrap();
        db.activate(t).unwrap();
        t
    };
    db.propagate().unwrap();

    let constraints_before = db.engine().constraint_count();

    db.constrain(o, p, s).unwrap();
    {
        let od = db.object(o).unwrap();
        assert!(od.is_constrained_to_precede(p, s));
        assert!(od.has_explicit_constraint(p));
        assert!(od.has_explicit_constraint(s));
    }

    db.free(o, p, s).unwrap();
    {
        let od = db.object(o).unwrap();
        assert!(!od.is_constrained_to_precede(p, s));
        assert!(!od.has_explicit_constraint(p));
        assert!(!od.has_explicit_constraint(s));
        assert!(!od.is_constrained_to_this_object(p));
        assert!(!od.is_constrained_to_this_object(s));
        assert!(od.check_invariants());
    }
    assert_eq!(db.engine().constraint_count(), constraints_before);
    assert!(db.propagate().is_ok());
}

#[test]
fn timeline_chain_stays_closed_across_mixed_operations() {
    let (mut db, tl) = timeline_db();
    let a = active_token(&mut db, (0, 2), (2, 6), (2, 4));
    let b = active_token(&mut db, (4, 10), (6, 14), (2, 4));
    let c = active_token(&mut db, (10, 20), (12, 24), (2, 4));
    let d = free_token(&mut db, (1, 2));

    db.constrain(tl, a, b).unwrap();
    assert_chain_closed(&db, tl);

    db.constrain(tl, b, c).unwrap();
    assert_chain_closed(&db, tl);

    // Splice in front of b: an implicit chain link to a is posted.
    db.constrain(tl, d, b).unwrap();
    assert_eq!(sequence(&db, tl), vec![a, d, b, c]);
    assert_chain_closed(&db, tl);

    // Freeing the explicit link unsequences d and re-closes the chain.
    db.free(tl, d, b).unwrap();
    assert_eq!(sequence(&db, tl), vec![a, b, c]);
    assert_chain_closed(&db, tl);

    db.free(tl, b, c).unwrap();
    assert_chain_closed(&db, tl);
}

// ---- ordering monotonicity ----

#[test]
fn sequenced_bounds_are_monotone_when_consistent() {
    let (mut db, tl) = timeline_db();
    let a = active_token(&mut db, (0, 3), (1, 8), (1, 5));
    let b = active_token(&mut db, (2, 12), (3, 16), (1, 4));
    let c = active_token(&mut db, (5, 30), (6, 33), (1, 3));

    db.constrain(tl, a, b).unwrap();
    db.constrain(tl, b, c).unwrap();
    db.propagate().unwrap();
    assert!(db.is_consistent());

    let seq = sequence(&db, tl);
    for pair in seq.windows(2) {
        let prev = db.token(pair[0]).unwrap();
        let next = db.token(pair[1]).unwrap();
        let (end_lb, end_ub) = db.engine().bounds(prev.end());
        let (start_lb, start_ub) = db.engine().bounds(next.start());
        assert!(end_lb <= start_lb, "earliest bounds must be ordered");
        assert!(end_ub <= start_ub, "latest bounds must be ordered");
    }
}

// ---- object-domain membership ----

#[test]
fn constrained_tokens_keep_the_object_in_their_domain() {
    let (mut db, tl) = timeline_db();
    let a = active_token(&mut db, (0, 5), (1, 9), (1, 4));
    let b = active_token(&mut db, (2, 12), (3, 15), (1, 3));

    db.constrain(tl, a, b).unwrap();
    db.propagate().unwrap();

    for token in [a, b] {
        let object_var = db.token(token).unwrap().object_var();
        let derived = db.engine().var(object_var).derived();
        assert!(
            derived.is_member(tl.raw() as i64),
            "token {token} constrained to {tl} must keep it in its domain"
        );
    }
}

#[test]
fn removing_a_middle_token_bridges_its_neighbors() {
    let (mut db, tl) = timeline_db();
    let a = active_token(&mut db, (0, 2), (1, 6), (1, 4));
    let b = active_token(&mut db, (3, 12), (4, 15), (1, 3));
    let c = active_token(&mut db, (6, 30), (7, 32), (1, 2));

    db.constrain(tl, a, b).unwrap();
    db.constrain(tl, b, c).unwrap();

    // Deleting the middle token must leave a..c bridged.
    db.delete_token(b).unwrap();
    assert_eq!(sequence(&db, tl), vec![a, c]);
    assert_chain_closed(&db, tl);
    assert!(db.propagate().is_ok());
}
