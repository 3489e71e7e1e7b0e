//! Worklist scheduler: the fixed-point loop.
//!
//! Seeds a FIFO worklist with the entry instruction and the initial
//! state, executes transfer functions until the worklist drains, and
//! dedupes revisits with an equal-or-more-general coverage test per
//! instruction. Two resource bounds keep every run short-lived: a global
//! step counter checked once per pop, and a cap on distinct states
//! retained per instruction. Exceeding either is a reported outcome, not
//! an error.
//!
//! The loop is single-threaded and synchronous; a run owns its factory
//! and worklist, so concurrent runs need no coordination.

use crate::error::ProgramError;
use crate::fact::Fact;
use crate::inst::{InstIndex, InstKind, Program};
use crate::interp::step;
use crate::report::{Analysis, Finding, FindingKind, InstrSummary};
use crate::state::MemoryState;
use crate::value::{ValueFactory, ValueId};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Resource bounds for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Worklist pops before the run aborts as too complex.
    pub max_steps: usize,
    /// Distinct states retained per instruction before the run aborts.
    pub max_states_per_inst: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            max_steps: 30_000,
            max_states_per_inst: 64,
        }
    }
}

/// Terminal condition of a run.
#[derive(Debug, Serialize)]
pub enum RunOutcome {
    /// The worklist drained: every feasible path was explored.
    Converged(Analysis),
    /// A resource bound tripped; the program is too complex for the
    /// configured budget and no conclusions are drawn.
    TooComplex { steps: usize },
}

impl RunOutcome {
    pub fn analysis(&self) -> Option<&Analysis> {
        match self {
            RunOutcome::Converged(a) => Some(a),
            RunOutcome::TooComplex { .. } => None,
        }
    }
}

/// Per-branch aggregation of which polarities were ever feasible.
#[derive(Debug, Clone, Copy, Default)]
struct BranchAgg {
    true_any: bool,
    false_any: bool,
}

/// Drives one analysis run over one program.
pub struct Runner<'a> {
    program: &'a Program,
    factory: &'a mut ValueFactory,
    config: RunConfig,
}

impl<'a> Runner<'a> {
    pub fn new(program: &'a Program, factory: &'a mut ValueFactory, config: RunConfig) -> Self {
        Runner {
            program,
            factory,
            config,
        }
    }

    /// Run to a fixed point from `initial` at instruction 0.
    pub fn run(self, initial: MemoryState) -> Result<RunOutcome, ProgramError> {
        let len = self.program.len();
        // Position `len` is the designated exit.
        let mut visited: Vec<Vec<MemoryState>> = vec![Vec::new(); len + 1];
        let mut summaries: Vec<InstrSummary> = vec![InstrSummary::default(); len + 1];
        let mut branches: FnvHashMap<InstIndex, BranchAgg> = FnvHashMap::default();
        let mut worklist: VecDeque<(InstIndex, MemoryState)> = VecDeque::new();
        worklist.push_back((0, initial));

        let mut steps = 0usize;
        while let Some((index, state)) = worklist.pop_front() {
            if steps >= self.config.max_steps {
                debug!(steps, "step bound exceeded, aborting as too complex");
                return Ok(RunOutcome::TooComplex { steps });
            }
            steps += 1;

            if visited[index]
                .iter()
                .any(|seen| state.is_covered_by(self.factory, seen))
            {
                trace!(index, "state covered by an earlier visit, skipping");
                continue;
            }
            if visited[index].len() >= self.config.max_states_per_inst {
                debug!(
                    index,
                    states = visited[index].len(),
                    "per-instruction state cap exceeded, aborting as too complex"
                );
                return Ok(RunOutcome::TooComplex { steps });
            }

            Self::record_visit(self.factory, &mut summaries[index], &state);
            visited[index].push(state.clone());
            trace!(index, steps, "executing");

            if index == len {
                if state.stack_depth() != 0 {
                    return Err(ProgramError::StackResidue {
                        index,
                        depth: state.stack_depth(),
                    });
                }
                continue;
            }

            let outcome = step(self.program, self.factory, index, state)?;
            if let Some(obs) = outcome.branch {
                let agg = branches.entry(index).or_default();
                agg.true_any |= obs.true_feasible;
                agg.false_any |= obs.false_feasible;
            }
            for (succ, succ_state) in outcome.successors {
                worklist.push_back((succ, succ_state));
            }
        }

        let findings = self.collect_findings(&summaries, &branches);
        for summary in &mut summaries {
            summary.facts.sort_keys();
        }
        debug!(steps, findings = findings.len(), "analysis converged");
        Ok(RunOutcome::Converged(Analysis {
            findings,
            summaries,
            steps,
        }))
    }

    /// Join this state's knowledge into the position summary. An entry
    /// that joins back to the value's declaration default is dropped, so
    /// absent always means "nothing beyond the declaration".
    fn record_visit(factory: &ValueFactory, summary: &mut InstrSummary, state: &MemoryState) {
        summary.reachable = true;
        summary.visits += 1;
        summary.signatures.push(state.signature());

        let defaults = MemoryState::new();
        if summary.visits == 1 {
            let mut entries: Vec<(ValueId, &Fact)> = state.fact_entries().collect();
            entries.sort_by_key(|(id, _)| *id);
            for (id, fact) in entries {
                summary.facts.insert(id, fact.clone());
            }
            return;
        }
        // Values this state does not refine are at their defaults, which
        // widens any existing entry; values refined only here stay out of
        // the map because earlier visits were already at the default.
        let ids: Vec<ValueId> = summary.facts.keys().copied().collect();
        for id in ids {
            let joined = summary.facts[&id].join(&state.get_fact(factory, id));
            if joined == defaults.get_fact(factory, id) {
                summary.facts.swap_remove(&id);
            } else {
                summary.facts.insert(id, joined);
            }
        }
    }

    /// A finding requires agreement across every visiting state: a
    /// single-path proof that another feasible path refutes is noise,
    /// not a diagnostic.
    fn collect_findings(
        &self,
        summaries: &[InstrSummary],
        branches: &FnvHashMap<InstIndex, BranchAgg>,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (index, inst) in self.program.iter() {
            if !matches!(inst.kind, InstKind::Branch { .. }) {
                continue;
            }
            if summaries[index].visits == 0 {
                continue;
            }
            let agg = branches.get(&index).copied().unwrap_or_default();
            let kind = match (agg.true_any, agg.false_any) {
                (true, true) => continue,
                (true, false) => FindingKind::AlwaysTrue,
                (false, true) => FindingKind::AlwaysFalse,
                (false, false) => FindingKind::ContradictoryBranch,
            };
            findings.push(Finding {
                kind,
                index,
                source: inst.source,
            });
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::ProgramBuilder;
    use crate::value::{ArithOp, RelOp, Width};

    #[test]
    fn default_config_round_trips_through_serde() {
        let cfg = RunConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_steps, cfg.max_steps);
        assert_eq!(back.max_states_per_inst, cfg.max_states_per_inst);
        let partial: RunConfig = serde_json::from_str(r#"{"max_steps": 10}"#).unwrap();
        assert_eq!(partial.max_steps, 10);
        assert_eq!(partial.max_states_per_inst, 64);
    }

    #[test]
    fn straight_line_program_converges() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let five = f.int(5);
        let mut b = ProgramBuilder::new();
        b.emit(InstKind::Push(five));
        b.emit(InstKind::Assign(x));
        b.emit(InstKind::Pop);
        let p = b.build().unwrap();

        let outcome = Runner::new(&p, &mut f, RunConfig::default())
            .run(MemoryState::new())
            .unwrap();
        let analysis = outcome.analysis().expect("converged");
        assert!(analysis.exit().reachable);
        assert_eq!(
            analysis
                .range_at(p.len(), x)
                .and_then(|r| r.as_point()),
            Some(5)
        );
        assert!(analysis.findings.is_empty());
    }

    #[test]
    fn counting_loop_converges_without_the_step_bound() {
        // i = 0; while (i < 10) { i = i + 1; }
        let mut f = ValueFactory::new();
        let i = f.variable("i", Width::Int, false);
        let zero = f.int(0);
        let one = f.int(1);
        let ten = f.int(10);
        let mut b = ProgramBuilder::new();
        let body = b.fresh_label();
        let end = b.fresh_label();
        b.emit(InstKind::Push(zero));
        b.emit(InstKind::Assign(i));
        b.emit(InstKind::Pop);
        let head = b.here();
        b.emit(InstKind::Push(i));
        b.emit(InstKind::Push(ten));
        b.emit(InstKind::Cmp(RelOp::Lt));
        b.branch(body, None);
        b.goto(end);
        b.bind_label(body);
        b.emit(InstKind::Push(i));
        b.emit(InstKind::Push(one));
        b.emit(InstKind::BinOp(ArithOp::Add, Width::Int));
        b.emit(InstKind::Assign(i));
        b.emit(InstKind::Pop);
        b.emit(InstKind::Goto(head));
        b.bind_label(end);
        b.emit(InstKind::Nop);
        let p = b.build().unwrap();

        let outcome = Runner::new(&p, &mut f, RunConfig::default())
            .run(MemoryState::new())
            .unwrap();
        let analysis = outcome.analysis().expect("converged well under the bound");
        assert!(analysis.steps < 1000);
        // After the loop the guard is refuted: i == 10.
        assert_eq!(
            analysis
                .range_at(p.len(), i)
                .and_then(|r| r.as_point()),
            Some(10)
        );
    }

    #[test]
    fn step_bound_reports_too_complex() {
        let mut f = ValueFactory::new();
        let mut b = ProgramBuilder::new();
        b.emit(InstKind::Nop);
        b.emit(InstKind::Goto(0));
        let p = b.build().unwrap();
        // An infinite Nop loop cannot add knowledge, so coverage would
        // stop it; a tiny bound must trip first.
        let outcome = Runner::new(
            &p,
            &mut f,
            RunConfig {
                max_steps: 1,
                max_states_per_inst: 64,
            },
        )
        .run(MemoryState::new())
        .unwrap();
        assert!(matches!(outcome, RunOutcome::TooComplex { steps: 1 }));
    }

    #[test]
    fn revisits_with_covered_states_are_skipped() {
        let mut f = ValueFactory::new();
        let mut b = ProgramBuilder::new();
        b.emit(InstKind::Nop);
        b.emit(InstKind::Goto(0));
        let p = b.build().unwrap();
        let outcome = Runner::new(&p, &mut f, RunConfig::default())
            .run(MemoryState::new())
            .unwrap();
        // The second arrival at 0 carries the same state and is covered.
        let analysis = outcome.analysis().expect("converged");
        assert_eq!(analysis.summaries[0].visits, 1);
    }

    #[test]
    fn analysis_serializes_to_json() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let one = f.int(1);
        let mut b = ProgramBuilder::new();
        b.emit(InstKind::Push(one));
        b.emit(InstKind::Assign(x));
        b.emit(InstKind::Pop);
        let p = b.build().unwrap();
        let outcome = Runner::new(&p, &mut f, RunConfig::default())
            .run(MemoryState::new())
            .unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("Converged").is_some());
    }
}
