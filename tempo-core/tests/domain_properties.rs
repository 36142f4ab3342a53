//! Property tests for the domain algebra.

use proptest::prelude::*;

use tempo_core::domain::{Domain, EnumeratedDomain, IntervalIntDomain};

fn interval_strategy() -> impl Strategy<Value = IntervalIntDomain> {
    (-1000i64..1000, 0i64..500).prop_map(|(lb, width)| IntervalIntDomain::new(lb, lb + width))
}

fn enumerated_strategy() -> impl Strategy<Value = EnumeratedDomain> {
    proptest::collection::btree_set(-50i64..50, 1..12)
        .prop_map(|values| EnumeratedDomain::closed(values))
}

proptest! {
    /// Intersection result is a subset of both operands, or an error when
    /// the operands are disjoint.
    #[test]
    fn interval_intersection_is_sound(a in interval_strategy(), b in interval_strategy()) {
        let mut meet = a;
        match meet.intersect(&b) {
            Ok(_) => {
                prop_assert!(meet.is_subset_of(&a));
                prop_assert!(meet.is_subset_of(&b));
                prop_assert!(!meet.is_empty());
            }
            Err(_) => {
                prop_assert!(a.ub() < b.lb() || b.ub() < a.lb());
            }
        }
    }

    /// Intersection is commutative in the surviving value set.
    #[test]
    fn interval_intersection_commutes(a in interval_strategy(), b in interval_strategy()) {
        let mut ab = a;
        let mut ba = b;
        let r1 = ab.intersect(&b);
        let r2 = ba.intersect(&a);
        prop_assert_eq!(r1.is_err(), r2.is_err());
        if r1.is_ok() {
            prop_assert_eq!(ab, ba);
        }
    }

    /// Restrict-then-relax restores the original domain exactly.
    #[test]
    fn restrict_relax_round_trip(base in interval_strategy(), value in -1000i64..1000) {
        prop_assume!(base.is_member(value));
        let mut d = Domain::Interval(base);
        d.restrict_to_singleton(value).unwrap();
        prop_assert_eq!(d.singleton_value(), Some(value));
        d.relax_to(&Domain::Interval(base));
        prop_assert_eq!(d, Domain::Interval(base));
    }

    /// Enumerated intersection keeps exactly the common members.
    #[test]
    fn enumerated_intersection_is_exact(a in enumerated_strategy(), b in enumerated_strategy()) {
        let mut meet = a.clone();
        let expected: Vec<i64> = a.values().filter(|v| b.is_member(*v)).collect();
        match meet.intersect(&b) {
            Ok(_) => prop_assert_eq!(meet.values().collect::<Vec<_>>(), expected),
            Err(_) => prop_assert!(expected.is_empty()),
        }
    }

    /// Removing members classifies down to singleton and errors on empty.
    #[test]
    fn enumerated_removal_terminates_in_error(a in enumerated_strategy()) {
        let mut d = a.clone();
        let values: Vec<i64> = a.values().collect();
        for (i, v) in values.iter().enumerate() {
            let result = d.remove(*v);
            if i + 1 == values.len() {
                prop_assert!(result.is_err());
            } else {
                prop_assert!(result.is_ok());
            }
        }
    }

    /// An open domain grows monotonically until closed.
    #[test]
    fn open_insert_monotone(values in proptest::collection::vec(-50i64..50, 1..20)) {
        let mut d = EnumeratedDomain::open([]);
        let mut count = 0usize;
        for v in &values {
            if d.insert(*v).is_some() {
                count += 1;
            }
            prop_assert!(d.is_member(*v));
        }
        prop_assert_eq!(d.len(), count);
        d.close();
        prop_assert!(!d.is_open());
    }
}
