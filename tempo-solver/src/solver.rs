//! The chronological-backtracking solver.
//!
//! A stack of live decision points, driven one `step` at a time. The loop
//! invariant at the top of each step: the engine is propagated and either
//! consistent (new flaws may be enumerated) or inconsistent (the stack must
//! backtrack). Domain inconsistency is consumed here — translated into
//! undo/advance/pop — and never unwinds.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use tempo_db::client::DbClient;

use crate::config::SolverConfig;
use crate::decisions::{
    DecisionPoint, ThreatDecisionPoint, TokenDecisionPoint, VariableDecisionPoint,
};
use crate::errors::{ConfigError, SolverError};
use crate::flaws::{Flaw, FlawEntity, FlawKind, FlawManager};

const TARGET: &str = "tempo_solver::solver";

/// Why `solve` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No flaws remain; the plan is complete for this tick.
    Solution,
    /// The search space is exhausted within the current bounds.
    Exhausted,
    /// The timeout elapsed between steps.
    TimedOut,
    /// Step or depth budget exceeded.
    BudgetExceeded,
}

/// Result of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A decision committed; the engine is consistent.
    Progress,
    Solution,
    Exhausted,
}

pub struct Solver {
    managers: Vec<FlawManager>,
    stack: Vec<Box<dyn DecisionPoint>>,
    step_count: u64,
    depth: usize,
    exhausted: bool,
    timed_out: bool,
    last_executed: Option<String>,
    timeout: Option<Duration>,
    started: Option<Instant>,
}

impl Solver {
    pub fn new(config: &SolverConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            managers: config.build_managers()?,
            stack: Vec::new(),
            step_count: 0,
            depth: 0,
            exhausted: false,
            timed_out: false,
            last_executed: None,
            timeout: None,
            started: None,
        })
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    // ---- observable state ----

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Display form of the most recently committed decision.
    pub fn last_executed_decision(&self) -> Option<&str> {
        self.last_executed.as_deref()
    }

    /// Display forms of the live decision stack, bottom first.
    pub fn stack_summaries(&self) -> Vec<String> {
        self.stack.iter().map(|d| d.describe()).collect()
    }

    /// Are any flaws left? Propagates first; an inconsistent network reports
    /// no flaws (it must backtrack, not branch).
    pub fn has_flaws(&mut self, client: &mut DbClient) -> bool {
        if client.propagate().is_err() {
            return false;
        }
        self.best_flaw(client).is_some()
    }

    /// Open flaws with their scores, for observation.
    pub fn open_flaws(&self, client: &DbClient) -> Vec<Flaw> {
        let mut flaws = Vec::new();
        for manager in &self.managers {
            flaws.extend(manager.iterate(client.db()));
        }
        flaws
    }

    fn best_flaw(&self, client: &DbClient) -> Option<Flaw> {
        let mut best: Option<(i64, i64, usize, Flaw)> = None;
        for (rank, manager) in self.managers.iter().enumerate() {
            for flaw in manager.iterate(client.db()) {
                let candidate = (flaw.priority, flaw.weight, rank, flaw);
                let better = match &best {
                    None => true,
                    Some((priority, weight, manager_rank, incumbent)) => {
                        (candidate.0, candidate.1, candidate.2, candidate.3.entity.entity_key())
                            < (*priority, *weight, *manager_rank, incumbent.entity.entity_key())
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }
        }
        best.map(|(_, _, _, flaw)| flaw)
    }

    fn make_decision(flaw: &Flaw) -> Box<dyn DecisionPoint> {
        match (flaw.kind, flaw.entity) {
            (FlawKind::Threat, FlawEntity::Token(token)) => {
                Box::new(ThreatDecisionPoint::new(token))
            }
            (FlawKind::OpenCondition, FlawEntity::Token(token)) => {
                Box::new(TokenDecisionPoint::new(token))
            }
            (FlawKind::UnboundVariable, FlawEntity::Variable(var)) => {
                Box::new(VariableDecisionPoint::new(var))
            }
            (kind, entity) => unreachable!("manager {kind:?} produced mismatched flaw {entity:?}"),
        }
    }

    // ---- the loop ----

    /// One step: pick a flaw (when consistent), then execute choices and
    /// backtrack until one commits or the stack empties.
    pub fn step(&mut self, client: &mut DbClient) -> Result<StepResult, SolverError> {
        self.step_count += 1;
        let consistent = client.propagate().is_ok();

        if consistent {
            match self.best_flaw(client) {
                None => {
                    trace!(target: TARGET, "no flaws remain");
                    return Ok(StepResult::Solution);
                }
                Some(flaw) => {
                    debug!(
                        target: TARGET,
                        kind = ?flaw.kind, entity = %flaw.entity.entity_key(),
                        priority = flaw.priority, weight = flaw.weight,
                        "opening decision"
                    );
                    let mut decision = Self::make_decision(&flaw);
                    decision.initialize(client)?;
                    self.stack.push(decision);
                }
            }
        }

        loop {
            let Some(top) = self.stack.last_mut() else {
                self.exhausted = true;
                self.depth = 0;
                debug!(target: TARGET, steps = self.step_count, "search exhausted");
                return Ok(StepResult::Exhausted);
            };

            if top.is_executed() {
                // We are backtracking into this decision: its committed
                // choice led to a dead end below.
                top.undo(client)?;
                continue;
            }

            if !top.has_next() {
                self.stack.pop();
                trace!(target: TARGET, "decision exhausted, backtracking");
                continue;
            }

            top.execute(client)?;
            if client.propagate().is_ok() {
                self.last_executed = Some(top.describe());
                self.depth = self.stack.len();
                trace!(target: TARGET, depth = self.depth, "committed");
                return Ok(StepResult::Progress);
            }
            // The choice is infeasible: reverse it and advance the cursor.
            top.undo(client)?;
        }
    }

    /// Run `step` until success, exhaustion, timeout, or a bound trips.
    pub fn solve(
        &mut self,
        client: &mut DbClient,
        max_steps: u64,
        max_depth: usize,
    ) -> Result<Outcome, SolverError> {
        self.started = Some(Instant::now());
        loop {
            if let (Some(timeout), Some(started)) = (self.timeout, self.started) {
                if started.elapsed() > timeout {
                    self.timed_out = true;
                    return Ok(Outcome::TimedOut);
                }
            }
            if self.step_count >= max_steps || self.depth >= max_depth {
                return Ok(Outcome::BudgetExceeded);
            }
            match self.step(client)? {
                StepResult::Progress => continue,
                StepResult::Solution => return Ok(Outcome::Solution),
                StepResult::Exhausted => return Ok(Outcome::Exhausted),
            }
        }
    }

    /// Undo every live decision, newest first, emptying the stack.
    pub fn retract(&mut self, client: &mut DbClient) -> Result<(), SolverError> {
        while let Some(mut decision) = self.stack.pop() {
            if decision.is_executed() {
                decision.undo(client)?;
            }
        }
        self.depth = 0;
        self.exhausted = false;
        debug!(target: TARGET, "retracted");
        Ok(())
    }
}
