//! Temporal advisors: bound arithmetic vs exact distance-graph answers.

use tempo_core::domain::PLUS_INFINITY;
use tempo_core::keys::TokenKey;

use tempo_db::advisor::{DefaultTemporalAdvisor, StnTemporalAdvisor, TemporalAdvisor};
use tempo_db::{PlanDatabase, TokenSpec};

fn setup() -> PlanDatabase {
    let mut db = PlanDatabase::new();
    db.register_object_type("Machine", None, true).unwrap();
    db.create_closed_object("Machine", "m").unwrap();
    db
}

fn token(
    db: &mut PlanDatabase,
    start: (i64, i64),
    end: (i64, i64),
    duration: (i64, i64),
) -> TokenKey {
    let t = db
        .create_token(TokenSpec::interval("Machine", "Run", start, end, duration))
        .unwrap();
    db.activate(t).unwrap();
    t
}

#[test]
fn can_precede_follows_the_bound_test() {
    let mut db = setup();
    let early = token(&mut db, (0, 2), (1, 5), (1, 3));
    let late = token(&mut db, (8, 12), (9, 15), (1, 3));
    db.propagate().unwrap();

    let advisor = DefaultTemporalAdvisor::new();
    let e = db.token(early).unwrap();
    let l = db.token(late).unwrap();
    assert!(advisor.can_precede(db.engine(), e, l));
    // late.end.lb = 9 > early.start.ub = 2
    assert!(!advisor.can_precede(db.engine(), l, e));
}

#[test]
fn can_fit_between_needs_room_for_the_minimum_duration() {
    let mut db = setup();
    let a = token(&mut db, (0, 0), (5, 5), (5, 5));
    let b = token(&mut db, (9, 9), (12, 12), (3, 3));
    let small = token(&mut db, (0, 20), (0, 25), (2, 4));
    let large = token(&mut db, (0, 20), (0, 25), (6, 8));
    db.propagate().unwrap();

    let advisor = DefaultTemporalAdvisor::new();
    let (a, b) = (db.token(a).unwrap(), db.token(b).unwrap());
    // Gap between a.end.lb = 5 and b.start.ub = 9 is 4.
    assert!(advisor.can_fit_between(db.engine(), db.token(small).unwrap(), a, b));
    assert!(!advisor.can_fit_between(db.engine(), db.token(large).unwrap(), a, b));
}

#[test]
fn exact_distance_domain_tightens_over_bound_arithmetic() {
    let mut db = setup();
    let t = token(&mut db, (0, 10), (0, 20), (3, 5));
    db.propagate().unwrap();

    let tok = db.token(t).unwrap();
    let default = DefaultTemporalAdvisor::new();
    let stn = StnTemporalAdvisor::new();

    // Bound arithmetic sees start ∈ [0,10], end ∈ [3,15] and concludes the
    // distance may be as low as 3 − 10; the network knows end − start is the
    // duration.
    let loose = default.temporal_distance_domain(db.engine(), tok.start(), tok.end(), true);
    let tight = stn.temporal_distance_domain(db.engine(), tok.start(), tok.end(), true);
    assert!(loose.lb() < tight.lb());
    assert_eq!(tight.lb(), 3);
    assert_eq!(tight.ub(), 5);
}

#[test]
fn exact_and_approximate_agree_on_pinned_networks() {
    let mut db = setup();
    let a = token(&mut db, (0, 0), (4, 4), (4, 4));
    let b = token(&mut db, (10, 10), (12, 12), (2, 2));
    db.propagate().unwrap();

    let (ta, tb) = (db.token(a).unwrap(), db.token(b).unwrap());
    let default = DefaultTemporalAdvisor::new();
    let stn = StnTemporalAdvisor::new();

    let loose = default.temporal_distance_domain(db.engine(), ta.end(), tb.start(), false);
    let tight = stn.temporal_distance_domain(db.engine(), ta.end(), tb.start(), true);
    assert_eq!(loose.lb(), tight.lb());
    assert_eq!(loose.ub(), tight.ub());
    assert_eq!(tight.lb(), 6);
}

#[test]
fn concurrency_is_exact_only_on_the_stn_advisor() {
    let mut db = setup();
    // Disjoint by necessity: a ends before b can start.
    let a = token(&mut db, (0, 0), (2, 2), (2, 2));
    let b = token(&mut db, (5, 8), (7, 10), (2, 2));
    db.propagate().unwrap();

    let (ta, tb) = (db.token(a).unwrap(), db.token(b).unwrap());
    let default = DefaultTemporalAdvisor::new();
    let stn = StnTemporalAdvisor::new();

    // The default is a pure pairwise stub.
    assert!(default.can_be_concurrent(db.engine(), ta, tb));
    // The network sees b.start − a.end ≥ 3: never concurrent.
    assert!(!stn.can_be_concurrent(db.engine(), ta, tb));

    // Overlap is possible here, and both advisors admit it.
    let c = token(&mut db, (1, 6), (3, 9), (2, 3));
    db.propagate().unwrap();
    let (ta, tc) = (db.token(a).unwrap(), db.token(c).unwrap());
    assert!(stn.can_be_concurrent(db.engine(), ta, tc));
}

#[test]
fn distance_to_unregistered_variables_is_unbounded() {
    let mut db = setup();
    let t = token(&mut db, (0, 5), (1, 9), (1, 4));
    db.propagate().unwrap();

    let g = db
        .create_global_variable("flag", tempo_core::domain::Domain::enumerated([0, 1]))
        .unwrap();
    let stn = StnTemporalAdvisor::new();
    let tok = db.token(t).unwrap();
    let d = stn.temporal_distance_domain(db.engine(), tok.start(), g, true);
    assert_eq!(d.ub(), PLUS_INFINITY);
}

#[test]
fn repropagation_counter_is_surfaced() {
    let mut db = setup();
    let t = token(&mut db, (0, 5), (1, 9), (1, 4));
    db.propagate().unwrap();

    let advisor = StnTemporalAdvisor::new();
    let before = advisor.most_recent_repropagation(db.engine());
    let start = db.token(t).unwrap().start();
    db.specify_variable(start, 3).unwrap();
    db.reset_variable(start).unwrap();
    db.propagate().unwrap();
    assert!(advisor.most_recent_repropagation(db.engine()) > before);
}
