//! Plan-database behavior: compatibility queries, the flaw index, archiving,
//! merging, and dynamic object variables.

use tempo_core::domain::Domain;
use tempo_core::keys::TokenKey;

use tempo_db::{PlanDatabase, TokenSpec, TokenState};

fn db_with_type(type_name: &str, timeline: bool) -> PlanDatabase {
    let mut db = PlanDatabase::new();
    db.register_object_type(type_name, None, timeline).unwrap();
    db
}

fn token_with_param(db: &mut PlanDatabase, values: &[i64]) -> TokenKey {
    db.create_token(
        TokenSpec::interval("Store", "P", (0, 100), (1, 110), (1, 10))
            .with_param("x", Domain::enumerated(values.iter().copied())),
    )
    .unwrap()
}

// ---- compatibility (merge candidates) ----

#[test]
fn compatible_tokens_filters_on_parameter_intersection() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();

    let t1 = token_with_param(&mut db, &[1, 2, 3]);
    let t2 = token_with_param(&mut db, &[4]);
    let t3 = token_with_param(&mut db, &[2, 3, 4]);
    db.activate(t2).unwrap();
    db.activate(t3).unwrap();

    let compatible = db.compatible_tokens(t1, usize::MAX, false);
    assert_eq!(compatible, vec![t3]);
}

#[test]
fn compatibility_is_symmetric_across_the_pair() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();

    let a = token_with_param(&mut db, &[1, 2]);
    let b = token_with_param(&mut db, &[2, 3]);

    // a active, query from b.
    db.activate(a).unwrap();
    let from_b = db.compatible_tokens(b, usize::MAX, true);
    assert_eq!(from_b, vec![a]);
    db.cancel(a).unwrap();

    // b active, query from a: the relation holds in the other direction.
    db.activate(b).unwrap();
    let from_a = db.compatible_tokens(a, usize::MAX, true);
    assert_eq!(from_a, vec![b]);
}

#[test]
fn supertype_actives_are_never_offered_to_subtype_tokens() {
    let mut db = PlanDatabase::new();
    db.register_object_type("Vehicle", None, false).unwrap();
    db.register_object_type("Rover", Some("Vehicle"), false)
        .unwrap();
    db.create_closed_object("Rover", "r1").unwrap();

    let spec = |object_type: &str| {
        TokenSpec::interval(object_type, "At", (0, 100), (1, 110), (1, 10))
            .with_param("x", Domain::enumerated([1, 2]))
    };
    let sup = db.create_token(spec("Vehicle")).unwrap();
    let sub = db.create_token(spec("Rover")).unwrap();

    // An active supertype token never merges an inactive subtype token: the
    // candidate's predicate must be the inactive one's or a subtype of it.
    db.activate(sup).unwrap();
    assert!(db.compatible_tokens(sub, usize::MAX, false).is_empty());
    assert!(db.merge(sub, sup).is_err());
    db.cancel(sup).unwrap();

    // The other direction is the sanctioned one.
    db.activate(sub).unwrap();
    assert_eq!(db.compatible_tokens(sup, usize::MAX, false), vec![sub]);
    db.merge(sup, sub).unwrap();
    db.cancel(sup).unwrap();
    db.cancel(sub).unwrap();
}

#[test]
fn active_predicate_index_fans_up_the_ancestor_chain() {
    let mut db = PlanDatabase::new();
    db.register_object_type("Vehicle", None, false).unwrap();
    db.register_object_type("Rover", Some("Vehicle"), false)
        .unwrap();
    db.create_closed_object("Rover", "r1").unwrap();

    let sub = db
        .create_token(TokenSpec::interval("Rover", "At", (0, 100), (1, 110), (1, 10)))
        .unwrap();
    db.activate(sub).unwrap();

    // Indexed under the declaring type and its supertype, never the bare name.
    assert_eq!(db.active_tokens("Rover.At"), &[sub]);
    assert_eq!(db.active_tokens("Vehicle.At"), &[sub]);
    assert!(db.active_tokens("At").is_empty());

    db.cancel(sub).unwrap();
    assert!(db.active_tokens("Rover.At").is_empty());
    assert!(db.active_tokens("Vehicle.At").is_empty());
}

#[test]
fn compatible_tokens_returns_nothing_when_inconsistent() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();
    let t1 = token_with_param(&mut db, &[1]);
    let t2 = token_with_param(&mut db, &[1]);
    db.activate(t2).unwrap();

    // Force an inconsistency through contradictory bounds on a global.
    let g = db
        .create_global_variable("deadline", Domain::interval(0, 10))
        .unwrap();
    db.restrict_variable(g, &Domain::interval(20, 30)).unwrap();
    assert!(db.propagate().is_err());

    assert!(db.compatible_tokens(t1, usize::MAX, false).is_empty());
}

// ---- merge / cancel ----

#[test]
fn merge_joins_variables_and_cancel_splits_them() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();

    let active = token_with_param(&mut db, &[2, 3, 4]);
    let inactive = token_with_param(&mut db, &[1, 2, 3]);
    db.activate(active).unwrap();

    db.merge(inactive, active).unwrap();
    db.propagate().unwrap();

    assert_eq!(db.token(inactive).unwrap().state(), TokenState::Merged);
    assert_eq!(db.token(inactive).unwrap().active_token(), Some(active));
    assert!(db.token(active).unwrap().merged_tokens().contains(&inactive));

    // The unification narrowed the active token's parameter.
    let x = db.token(active).unwrap().param("x").unwrap();
    let derived = db.engine().var(x).derived();
    assert!(derived.is_member(2) && derived.is_member(3) && !derived.is_member(4));

    db.cancel(inactive).unwrap();
    db.propagate().unwrap();
    assert_eq!(db.token(inactive).unwrap().state(), TokenState::Inactive);
    assert!(db.token(active).unwrap().merged_tokens().is_empty());

    // The restriction is gone after the split.
    let derived = db.engine().var(x).derived();
    assert!(derived.is_member(4));
}

#[test]
fn deleting_an_active_with_merged_tokens_is_refused() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();
    let active = token_with_param(&mut db, &[1]);
    let slave = token_with_param(&mut db, &[1]);
    db.activate(active).unwrap();
    db.merge(slave, active).unwrap();

    assert!(db.delete_token(active).is_err());

    db.cancel(slave).unwrap();
    assert!(db.delete_token(active).is_ok());
}

// ---- the flaw index ----

#[test]
fn flaw_index_tracks_activation_insertion_and_freeing() {
    let mut db = db_with_type("Machine", true);
    let tl = db.create_closed_object("Machine", "m").unwrap();
    let t = db
        .create_token(TokenSpec::interval("Machine", "Run", (0, 10), (1, 15), (1, 5)))
        .unwrap();

    // Inactive tokens are not ordering flaws.
    assert!(db.tokens_to_order().is_empty());

    db.activate(t).unwrap();
    assert!(db.tokens_to_order().get(&t).is_some_and(|s| s.contains(&tl)));

    db.constrain(tl, t, t).unwrap();
    db.propagate().unwrap();
    assert!(db.tokens_to_order().is_empty());

    db.free(tl, t, t).unwrap();
    db.propagate().unwrap();
    assert!(db.tokens_to_order().get(&t).is_some_and(|s| s.contains(&tl)));

    db.cancel(t).unwrap();
    assert!(db.tokens_to_order().is_empty());
}

#[test]
fn insertion_on_one_candidate_clears_the_other() {
    let mut db = db_with_type("Machine", true);
    let x = db.create_closed_object("Machine", "x").unwrap();
    let y = db.create_closed_object("Machine", "y").unwrap();
    let t = db
        .create_token(TokenSpec::interval("Machine", "Run", (0, 10), (1, 15), (1, 5)))
        .unwrap();
    db.activate(t).unwrap();

    let entry = db.tokens_to_order().get(&t).cloned().unwrap();
    assert!(entry.contains(&x) && entry.contains(&y));

    db.constrain(x, t, t).unwrap();
    db.propagate().unwrap();

    // Sequenced on x; propagation excluded y entirely.
    assert!(db.tokens_to_order().is_empty());
    assert!(db.object(y).unwrap().token_sequence().is_empty());
    assert!(!db.object(y).unwrap().tokens().contains(&t));
}

// ---- archive ----

#[test]
fn archive_removes_expired_tokens_in_start_order() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();

    let mk = |db: &mut PlanDatabase, start: (i64, i64), end: (i64, i64)| {
        db.create_token(TokenSpec::interval("Store", "P", start, end, (1, 3)))
            .unwrap()
    };
    let a = mk(&mut db, (0, 2), (1, 3));
    let b = mk(&mut db, (4, 6), (5, 7));
    let c = mk(&mut db, (9, 11), (10, 12));
    db.propagate().unwrap();

    assert_eq!(db.archive(8), 2);
    assert!(db.token(a).is_none());
    assert!(db.token(b).is_none());
    assert!(db.token(c).is_some());
}

#[test]
fn archive_is_conservative_about_merged_supporters() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();

    // The active token expires, but its merged supporter may not.
    let active = db
        .create_token(TokenSpec::interval("Store", "P", (0, 2), (1, 4), (1, 3)))
        .unwrap();
    let late = db
        .create_token(TokenSpec::interval("Store", "P", (0, 20), (1, 30), (1, 3)))
        .unwrap();
    db.activate(active).unwrap();
    db.merge(late, active).unwrap();

    // Merged supporter still admits end > tick: nothing is archived.
    assert_eq!(db.archive(8), 0);
    assert!(db.token(active).is_some());
    assert!(db.token(late).is_some());
}

// ---- dynamic object variables ----

#[test]
fn object_variable_listens_while_the_type_is_open() {
    let mut db = db_with_type("Machine", false);
    let m1 = db.create_closed_object("Machine", "m1").unwrap();

    let var = db.make_object_variable("Machine", "anyMachine", false).unwrap();
    assert!(db.engine().var(var).derived().is_member(m1.raw() as i64));
    assert!(db.engine().var(var).derived().is_open());

    // A new instance grows the listening domain.
    let m2 = db.create_closed_object("Machine", "m2").unwrap();
    assert!(db.engine().var(var).derived().is_member(m2.raw() as i64));

    // Closing the type closes the variable.
    db.close_type("Machine").unwrap();
    assert!(!db.engine().var(var).derived().is_open());
    assert!(db.create_object("Machine", "m3").is_err());
}

#[test]
fn close_closes_every_open_type() {
    let mut db = PlanDatabase::new();
    db.register_object_type("A", None, false).unwrap();
    db.register_object_type("B", None, true).unwrap();
    let var = db.make_object_variable("A", "anyA", false).unwrap();

    db.close().unwrap();
    assert!(!db.engine().var(var).derived().is_open());
    assert!(db.create_object("B", "b1").is_err());
    assert!(db.close().is_err());
}

// ---- strictness ----

#[test]
fn duplicate_names_are_fatal() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();
    assert!(db.create_object("Store", "s1").is_err());

    db.create_global_variable("g", Domain::interval(0, 1)).unwrap();
    assert!(db
        .create_global_variable("g", Domain::interval(0, 1))
        .is_err());
}

#[test]
fn constrain_requires_active_endpoints_and_no_duplicates() {
    let mut db = db_with_type("Machine", true);
    let tl = db.create_closed_object("Machine", "m").unwrap();
    let a = db
        .create_token(TokenSpec::interval("Machine", "Run", (0, 5), (1, 9), (1, 4)))
        .unwrap();
    let b = db
        .create_token(TokenSpec::interval("Machine", "Run", (2, 9), (3, 12), (1, 3)))
        .unwrap();

    // Inactive endpoints are rejected.
    assert!(db.constrain(tl, a, b).is_err());

    db.activate(a).unwrap();
    db.activate(b).unwrap();
    db.constrain(tl, a, b).unwrap();

    // Both endpoints sequenced: a duplicate ordering is rejected.
    assert!(db.constrain(tl, a, b).is_err());
}

// ---- purge & garbage collection ----

#[test]
fn purge_tears_everything_down_without_notifications() {
    let mut db = db_with_type("Machine", true);
    let tl = db.create_closed_object("Machine", "m").unwrap();
    let t = db
        .create_token(TokenSpec::interval("Machine", "Run", (0, 5), (1, 9), (1, 4)))
        .unwrap();
    db.activate(t).unwrap();
    db.constrain(tl, t, t).unwrap();

    db.purge();
    assert!(db.token(t).is_none());
    assert!(db.object(tl).is_none());
    assert_eq!(db.engine().constraint_count(), 0);
    assert!(!db.context().is_purging());
}

#[test]
fn deferred_discards_are_collected_in_batch() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();
    let t = db
        .create_token(TokenSpec::interval("Store", "P", (0, 5), (1, 9), (1, 4)))
        .unwrap();
    db.delete_token(t).unwrap();

    let collected = db.garbage_collect();
    assert_eq!(collected, 1);
    assert!(db.context().is_released(t.entity()));
    assert_eq!(db.garbage_collect(), 0);
}

// ---- event tokens ----

#[test]
fn event_tokens_pin_start_to_end() {
    let mut db = db_with_type("Store", false);
    db.create_closed_object("Store", "s1").unwrap();
    let e = db
        .create_token(TokenSpec::event("Store", "Ping", (3, 9)))
        .unwrap();
    db.propagate().unwrap();

    let token = db.token(e).unwrap();
    assert_eq!(db.engine().bounds(token.duration()), (0, 0));
    assert_eq!(
        db.engine().bounds(token.start()),
        db.engine().bounds(token.end())
    );
}
