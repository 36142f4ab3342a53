//! Partial-plan trace writer.
//!
//! Emits one JSON record per step — decision stack, step count, and the
//! open-flaw priority queue — for operator observation. Nothing in the core
//! consumes this output.

use std::io::{self, Write};

use serde::Serialize;

use tempo_db::client::DbClient;

use crate::solver::Solver;

#[derive(Debug, Serialize)]
struct StepRecord<'a> {
    step: u64,
    depth: usize,
    last_executed: Option<&'a str>,
    stack: Vec<String>,
    open_flaws: Vec<FlawRecord>,
}

#[derive(Debug, Serialize)]
struct FlawRecord {
    kind: String,
    entity: u32,
    priority: i64,
    weight: i64,
}

/// Writes one textual record per tick to any sink.
pub struct PartialPlanWriter<W: Write> {
    sink: W,
}

impl<W: Write> PartialPlanWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn write_step(&mut self, solver: &Solver, client: &DbClient) -> io::Result<()> {
        let mut open_flaws: Vec<FlawRecord> = solver
            .open_flaws(client)
            .into_iter()
            .map(|f| FlawRecord {
                kind: format!("{:?}", f.kind),
                entity: f.entity.entity_key().0,
                priority: f.priority,
                weight: f.weight,
            })
            .collect();
        open_flaws.sort_by_key(|f| (f.priority, f.weight, f.entity));

        let record = StepRecord {
            step: solver.step_count(),
            depth: solver.depth(),
            last_executed: solver.last_executed_decision(),
            stack: solver.stack_summaries(),
            open_flaws,
        };
        serde_json::to_writer(&mut self.sink, &record)?;
        self.sink.write_all(b"\n")
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
