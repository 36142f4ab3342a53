//! Temporal distance graph over the engine's interval variables.
//!
//! A snapshot of the simple temporal network implied by the current
//! constraints: `precedes` and `startEndDuration` constraints become weighted
//! edges, variable bounds become edges to a virtual origin. An edge `u → v`
//! with weight `w` encodes `v − u ≤ w`; the tightest bound on `y − x` is the
//! shortest-path distance from `x` to `y`.
//!
//! The graph is rebuilt on demand and cached by propagation epoch — cheaper
//! and far simpler than incremental maintenance, and exact as long as the
//! engine has been propagated.

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};

use crate::collections::FxHashMap;
use crate::domain::{Domain, IntervalIntDomain, MINUS_INFINITY, PLUS_INFINITY};
use crate::engine::{ConstraintEngine, ConstraintKind};
use crate::keys::VarKey;

/// Snapshot of the temporal network.
pub struct DistanceGraph {
    graph: StableDiGraph<Option<VarKey>, i64>,
    nodes: FxHashMap<VarKey, NodeIndex>,
    origin: NodeIndex,
    consistent: bool,
}

impl DistanceGraph {
    /// Build from the engine's current constraint set and derived bounds.
    pub fn build(engine: &ConstraintEngine) -> Self {
        let mut graph: StableDiGraph<Option<VarKey>, i64> = StableDiGraph::new();
        let mut nodes: FxHashMap<VarKey, NodeIndex> = FxHashMap::default();
        let origin = graph.add_node(None);

        for var in engine.variables() {
            if let Domain::Interval(d) = var.derived() {
                let idx = graph.add_node(Some(var.key()));
                nodes.insert(var.key(), idx);
                // v ≤ ub  ⇒  v − origin ≤ ub
                if d.ub() < PLUS_INFINITY {
                    graph.add_edge(origin, idx, d.ub());
                }
                // v ≥ lb  ⇒  origin − v ≤ −lb
                if d.lb() > MINUS_INFINITY {
                    graph.add_edge(idx, origin, -d.lb());
                }
            }
        }

        for rec in engine.constraints() {
            match rec.kind {
                ConstraintKind::Precedes => {
                    // a ≤ b  ⇒  a − b ≤ 0
                    if let (Some(&a), Some(&b)) =
                        (nodes.get(&rec.scope[0]), nodes.get(&rec.scope[1]))
                    {
                        graph.add_edge(b, a, 0);
                    }
                }
                ConstraintKind::StartEndDuration => {
                    let (s, d, e) = (rec.scope[0], rec.scope[1], rec.scope[2]);
                    let (d_lb, d_ub) = engine.bounds(d);
                    if let (Some(&s_idx), Some(&e_idx)) = (nodes.get(&s), nodes.get(&e)) {
                        // e − s ≤ d.ub
                        if d_ub < PLUS_INFINITY {
                            graph.add_edge(s_idx, e_idx, d_ub);
                        }
                        // s − e ≤ −d.lb
                        if d_lb > MINUS_INFINITY {
                            graph.add_edge(e_idx, s_idx, -d_lb);
                        }
                    }
                }
                ConstraintKind::Eq => {}
            }
        }

        let mut this = Self {
            graph,
            nodes,
            origin,
            consistent: true,
        };
        this.consistent = !this.has_negative_cycle();
        this
    }

    pub fn is_registered(&self, var: VarKey) -> bool {
        self.nodes.contains_key(&var)
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    /// Tight bounds on `y − x` reachable in the network.
    pub fn distance_domain(&self, x: VarKey, y: VarKey) -> IntervalIntDomain {
        let (Some(&sx), Some(&sy)) = (self.nodes.get(&x), self.nodes.get(&y)) else {
            return IntervalIntDomain::full();
        };
        let ub = self.shortest_path(sx, sy).unwrap_or(PLUS_INFINITY);
        let lb = self
            .shortest_path(sy, sx)
            .map(|d| -d)
            .unwrap_or(MINUS_INFINITY);
        IntervalIntDomain::new(lb, ub)
    }

    /// Bellman–Ford shortest path; `None` when the target is unreachable.
    fn shortest_path(&self, from: NodeIndex, to: NodeIndex) -> Option<i64> {
        let dist = self.single_source(from);
        dist.get(&to).copied()
    }

    fn single_source(&self, from: NodeIndex) -> FxHashMap<NodeIndex, i64> {
        let mut dist: FxHashMap<NodeIndex, i64> = FxHashMap::default();
        dist.insert(from, 0);
        let n = self.graph.node_count();
        for _ in 0..n {
            let mut changed = false;
            for edge in self.graph.edge_references() {
                let (u, v, w) = (edge.source(), edge.target(), *edge.weight());
                if let Some(&du) = dist.get(&u) {
                    let candidate = du.saturating_add(w);
                    if dist.get(&v).map_or(true, |&dv| candidate < dv) {
                        dist.insert(v, candidate);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        dist
    }

    fn has_negative_cycle(&self) -> bool {
        // One more relaxation round from the origin after convergence.
        let dist = self.single_source(self.origin);
        for edge in self.graph.edge_references() {
            let (u, v, w) = (edge.source(), edge.target(), *edge.weight());
            if let (Some(&du), Some(&dv)) = (dist.get(&u), dist.get(&v)) {
                if du.saturating_add(w) < dv {
                    return true;
                }
            }
        }
        false
    }
}
