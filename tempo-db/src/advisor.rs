//! Temporal advisors: feasibility and distance queries over time points.
//!
//! Queries are pure and never fail; if the engine is proven inconsistent a
//! positive answer is not a commitment. The default advisor answers from
//! individual bound arithmetic, which is necessary but not exact. The
//! STN-backed advisor treats a negative default answer as final and refines
//! positive ones through the temporal distance graph.

use std::cell::RefCell;

use tempo_core::domain::{IntervalIntDomain, MINUS_INFINITY, PLUS_INFINITY};
use tempo_core::engine::ConstraintEngine;
use tempo_core::keys::VarKey;
use tempo_core::stn::DistanceGraph;

use crate::token::Token;

/// Query surface over the underlying temporal network.
pub trait TemporalAdvisor {
    /// Can `first` end no later than `second` starts?
    fn can_precede(&self, engine: &ConstraintEngine, first: &Token, second: &Token) -> bool {
        self.can_precede_vars(engine, first.end(), second.start())
    }

    /// The raw time-variable form of `can_precede`.
    fn can_precede_vars(&self, engine: &ConstraintEngine, x: VarKey, y: VarKey) -> bool;

    /// Can `token` fit between `predecessor` and `successor`?
    fn can_fit_between(
        &self,
        engine: &ConstraintEngine,
        token: &Token,
        predecessor: &Token,
        successor: &Token,
    ) -> bool;

    /// Can the two tokens overlap in time?
    fn can_be_concurrent(&self, engine: &ConstraintEngine, first: &Token, second: &Token) -> bool;

    /// Bounds on `y − x`. Exact only when requested and both variables are
    /// registered with the temporal network.
    fn temporal_distance_domain(
        &self,
        engine: &ConstraintEngine,
        x: VarKey,
        y: VarKey,
        exact: bool,
    ) -> IntervalIntDomain;

    /// Monotonic repropagation counter, for invalidating cached choices.
    fn most_recent_repropagation(&self, engine: &ConstraintEngine) -> u64 {
        engine.most_recent_repropagation()
    }
}

/// Pairwise bound arithmetic; necessary conditions only.
#[derive(Debug, Default)]
pub struct DefaultTemporalAdvisor;

impl DefaultTemporalAdvisor {
    pub fn new() -> Self {
        Self
    }

    fn bound_distance(engine: &ConstraintEngine, x: VarKey, y: VarKey) -> IntervalIntDomain {
        let interval_of = |key: VarKey| match engine.variable(key).map(|v| v.derived()) {
            Some(tempo_core::domain::Domain::Interval(d)) => Some(*d),
            _ => None,
        };
        let (Some(dx), Some(dy)) = (interval_of(x), interval_of(y)) else {
            return IntervalIntDomain::full();
        };
        let (x_lb, x_ub) = (dx.lb(), dx.ub());
        let (y_lb, y_ub) = (dy.lb(), dy.ub());

        let mut min_distance = MINUS_INFINITY;
        if y_lb > MINUS_INFINITY && x_ub < PLUS_INFINITY {
            min_distance = min_distance.max(y_lb - x_ub);
        }
        let mut max_distance = PLUS_INFINITY;
        if x_lb > MINUS_INFINITY && y_ub < PLUS_INFINITY {
            max_distance = max_distance.min(y_ub - x_lb);
        }
        IntervalIntDomain::new(min_distance, max_distance)
    }
}

impl TemporalAdvisor for DefaultTemporalAdvisor {
    fn can_precede_vars(&self, engine: &ConstraintEngine, x: VarKey, y: VarKey) -> bool {
        let (x_lb, _) = engine.bounds(x);
        let (_, y_ub) = engine.bounds(y);
        x_lb <= y_ub
    }

    fn can_fit_between(
        &self,
        engine: &ConstraintEngine,
        token: &Token,
        predecessor: &Token,
        successor: &Token,
    ) -> bool {
        debug_assert!(token.key() != predecessor.key() && token.key() != successor.key());
        let (_, latest_start) = engine.bounds(successor.start());
        let (earliest_end, _) = engine.bounds(predecessor.end());
        let available = latest_start - earliest_end;
        let (min_duration, _) = engine.bounds(token.duration());
        available >= min_duration
    }

    /// Trivially true: the pairwise domain-intersection tests are done by the
    /// plan database before this is consulted.
    fn can_be_concurrent(&self, _engine: &ConstraintEngine, _first: &Token, _second: &Token) -> bool {
        true
    }

    fn temporal_distance_domain(
        &self,
        engine: &ConstraintEngine,
        x: VarKey,
        y: VarKey,
        _exact: bool,
    ) -> IntervalIntDomain {
        Self::bound_distance(engine, x, y)
    }
}

/// Exact answers backed by a snapshot of the temporal distance graph.
///
/// The snapshot is cached and rebuilt whenever the engine's propagation epoch
/// moves, so queries between mutations share one graph.
#[derive(Default)]
pub struct StnTemporalAdvisor {
    default: DefaultTemporalAdvisor,
    cache: RefCell<Option<(u64, DistanceGraph)>>,
}

impl StnTemporalAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_graph<R>(&self, engine: &ConstraintEngine, f: impl FnOnce(&DistanceGraph) -> R) -> R {
        let epoch = engine.propagation_epoch();
        let mut cache = self.cache.borrow_mut();
        let stale = match cache.as_ref() {
            Some((cached, _)) => *cached != epoch,
            None => true,
        };
        if stale {
            *cache = Some((epoch, DistanceGraph::build(engine)));
        }
        f(&cache.as_ref().expect("graph just built").1)
    }
}

impl TemporalAdvisor for StnTemporalAdvisor {
    fn can_precede_vars(&self, engine: &ConstraintEngine, x: VarKey, y: VarKey) -> bool {
        if !self.default.can_precede_vars(engine, x, y) {
            return false;
        }
        self.with_graph(engine, |g| {
            if !g.is_registered(x) || !g.is_registered(y) {
                return true;
            }
            // Some schedule admits y − x ≥ 0.
            g.distance_domain(x, y).ub() >= 0
        })
    }

    fn can_fit_between(
        &self,
        engine: &ConstraintEngine,
        token: &Token,
        predecessor: &Token,
        successor: &Token,
    ) -> bool {
        if !self
            .default
            .can_fit_between(engine, token, predecessor, successor)
        {
            return false;
        }
        let (min_duration, _) = engine.bounds(token.duration());
        self.with_graph(engine, |g| {
            if !g.is_registered(predecessor.end()) || !g.is_registered(successor.start()) {
                return true;
            }
            g.distance_domain(predecessor.end(), successor.start()).ub() >= min_duration
        })
    }

    fn can_be_concurrent(&self, engine: &ConstraintEngine, first: &Token, second: &Token) -> bool {
        self.with_graph(engine, |g| {
            let a = g.distance_domain(first.start(), second.end());
            let b = g.distance_domain(second.start(), first.end());
            // Both (second.end − first.start) and (first.end − second.start)
            // must admit a non-negative value.
            a.ub() >= 0 && b.ub() >= 0
        })
    }

    fn temporal_distance_domain(
        &self,
        engine: &ConstraintEngine,
        x: VarKey,
        y: VarKey,
        exact: bool,
    ) -> IntervalIntDomain {
        if exact {
            let registered = self.with_graph(engine, |g| g.is_registered(x) && g.is_registered(y));
            if registered {
                return self.with_graph(engine, |g| g.distance_domain(x, y));
            }
        }
        DefaultTemporalAdvisor::bound_distance(engine, x, y)
    }
}
