//! Properties of the rule weight formula.

use proptest::prelude::*;

use tempo_solver::{Guard, MatchingRule, WEIGHT_BASE};

fn rule(priority: i64, filters: usize, guards: usize) -> MatchingRule {
    let mut r = MatchingRule::with_priority(priority);
    let slots: [&mut Option<String>; 6] = [
        &mut r.class,
        &mut r.predicate,
        &mut r.variable,
        &mut r.master_class,
        &mut r.master_predicate,
        &mut r.master_relation,
    ];
    for slot in slots.into_iter().take(filters) {
        *slot = Some("x".to_string());
    }
    for i in 0..guards {
        r.guards.push(Guard {
            variable: format!("g{i}"),
            value: 0,
        });
    }
    r
}

proptest! {
    /// Every added filter or guard moves the weight exactly one band away.
    #[test]
    fn specificity_shifts_the_weight_band(
        priority in 0i64..WEIGHT_BASE,
        filters in 0usize..6,
        guards in 0usize..4,
    ) {
        let base = rule(priority, filters, guards);
        let more_guarded = rule(priority, filters, guards + 1);
        prop_assert_eq!(more_guarded.weight() - base.weight(), WEIGHT_BASE);

        if filters < 6 {
            let more_filtered = rule(priority, filters + 1, guards);
            prop_assert_eq!(more_filtered.weight() - base.weight(), WEIGHT_BASE);
        }
    }

    /// Within one specificity band, weight orders inversely to priority, so
    /// (priority, weight) comparisons stay total.
    #[test]
    fn same_band_weights_reflect_priority(
        a in 0i64..WEIGHT_BASE,
        b in 0i64..WEIGHT_BASE,
        filters in 0usize..6,
    ) {
        let ra = rule(a, filters, 0);
        let rb = rule(b, filters, 0);
        prop_assert_eq!(a < b, ra.weight() > rb.weight());
    }
}
