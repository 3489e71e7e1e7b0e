//! Randomized program generation and the properties checked over it.
//!
//! Generated functions stay small and shape-valid: every variable is a
//! bounded parameter or an assigned local, and loops always make
//! progress toward their guard so the concrete oracle terminates on its
//! own. The properties compare the abstract analysis against concrete
//! executions: the abstraction must cover everything that concretely
//! happens, and a finding must never be refuted by an observed path.

use crate::mini::{lower, Cond, Expr, Lowered, MiniFn, Param, Stmt};
use crate::oracle::{execute, Execution};
use anyhow::Result;
use flowfact_core::{Analysis, ArithOp, FindingKind, InstKind, RelOp, RunConfig, Width};
use quickcheck::{Arbitrary, Gen};
use std::collections::HashMap;

const PARAM_NAMES: [&str; 3] = ["a", "b", "c"];
const PARAM_BOUNDS: (i64, i64) = (-8, 8);
const ORACLE_FUEL: usize = 4_000;

fn choose<T: Copy>(g: &mut Gen, options: &[T], fallback: T) -> T {
    g.choose(options).copied().unwrap_or(fallback)
}

fn arb_var(g: &mut Gen) -> String {
    choose(g, &PARAM_NAMES, "a").to_string()
}

fn arb_expr(g: &mut Gen, depth: usize) -> Expr {
    let pick = if depth == 0 {
        choose(g, &[0u8, 1], 0)
    } else {
        choose(g, &[0u8, 1, 2, 2, 3, 4], 0)
    };
    match pick {
        0 => Expr::Var(arb_var(g)),
        1 => Expr::Lit(choose(g, &[-4i64, -2, -1, 0, 1, 2, 3, 5], 1)),
        2 => Expr::bin(ArithOp::Add, arb_expr(g, depth - 1), arb_expr(g, depth - 1)),
        3 => Expr::bin(ArithOp::Sub, arb_expr(g, depth - 1), Expr::Var(arb_var(g))),
        _ => {
            let op = choose(g, &[ArithOp::Mul, ArithOp::Div, ArithOp::Rem], ArithOp::Mul);
            Expr::bin(op, arb_expr(g, depth - 1), Expr::Lit(choose(g, &[-3i64, -2, 2, 3], 2)))
        }
    }
}

fn arb_cond(g: &mut Gen) -> Cond {
    Cond {
        op: choose(
            g,
            &[RelOp::Eq, RelOp::Ne, RelOp::Lt, RelOp::Le, RelOp::Gt, RelOp::Ge],
            RelOp::Lt,
        ),
        left: Expr::Var(arb_var(g)),
        right: match choose(g, &[0u8, 0, 1, 2], 0) {
            0 => Expr::Lit(choose(g, &[-6i64, -3, 0, 1, 4, 7], 0)),
            1 => Expr::Var(arb_var(g)),
            // A composite operand exercises facts and equalities held
            // on interned expression values, not just variables.
            _ => Expr::bin(
                ArithOp::Add,
                Expr::Var(arb_var(g)),
                Expr::Lit(choose(g, &[-2i64, 1, 3], 1)),
            ),
        },
    }
}

fn arb_block(g: &mut Gen, depth: usize, loops: bool) -> Vec<Stmt> {
    let count = choose(g, &[1usize, 2, 2, 3], 1);
    (0..count).map(|_| arb_stmt(g, depth, loops)).collect()
}

fn arb_stmt(g: &mut Gen, depth: usize, loops: bool) -> Stmt {
    let pick = if depth == 0 {
        0
    } else {
        choose(g, &[0u8, 0, 0, 1, 1, 2], 0)
    };
    match pick {
        1 => Stmt::If {
            cond: arb_cond(g),
            then_body: arb_block(g, depth - 1, loops),
            else_body: arb_block(g, depth - 1, loops),
        },
        2 if loops => {
            // A counting loop that always makes progress: the oracle
            // terminates without leaning on its fuel.
            let counter = arb_var(g);
            let limit = choose(g, &[2i64, 4, 6], 4);
            let mut body = arb_block(g, depth - 1, false);
            body.retain(|s| !matches!(s, Stmt::Assign(n, _) if *n == counter));
            body.push(Stmt::Assign(
                counter.clone(),
                Expr::bin(ArithOp::Add, Expr::Var(counter.clone()), Expr::Lit(1)),
            ));
            Stmt::While {
                cond: Cond {
                    op: RelOp::Lt,
                    left: Expr::Var(counter),
                    right: Expr::Lit(limit),
                },
                body,
            }
        }
        _ => Stmt::Assign(arb_var(g), arb_expr(g, depth.min(2))),
    }
}

fn arb_param(g: &mut Gen, name: &str) -> Param {
    Param {
        name: name.to_string(),
        width: match choose(g, &[0u8, 0, 1], 0) {
            1 => Width::Long,
            _ => Width::Int,
        },
        nullable: choose(g, &[0u8, 0, 0, 1], 0) == 1,
        bounds: Some(PARAM_BOUNDS),
    }
}

fn arb_fn(g: &mut Gen, loops: bool) -> MiniFn {
    MiniFn {
        params: PARAM_NAMES.iter().map(|n| arb_param(g, n)).collect(),
        body: arb_block(g, 2, loops),
    }
}

fn shrink_fn<W: From<MiniFn> + 'static>(func: &MiniFn) -> Box<dyn Iterator<Item = W>> {
    let shrunk: Vec<W> = (0..func.body.len())
        .map(|n| {
            let mut smaller = func.clone();
            smaller.body.truncate(n);
            W::from(smaller)
        })
        .collect();
    Box::new(shrunk.into_iter())
}

/// A generated function that may contain bounded loops.
#[derive(Debug, Clone)]
pub struct AnyFn(pub MiniFn);

impl From<MiniFn> for AnyFn {
    fn from(f: MiniFn) -> Self {
        AnyFn(f)
    }
}

impl Arbitrary for AnyFn {
    fn arbitrary(g: &mut Gen) -> Self {
        AnyFn(arb_fn(g, true))
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        shrink_fn(&self.0)
    }
}

/// A generated function with no loops: finitely many paths, so the
/// analysis must converge without leaning on any resource bound.
#[derive(Debug, Clone)]
pub struct LoopFreeFn(pub MiniFn);

impl From<MiniFn> for LoopFreeFn {
    fn from(f: MiniFn) -> Self {
        LoopFreeFn(f)
    }
}

impl Arbitrary for LoopFreeFn {
    fn arbitrary(g: &mut Gen) -> Self {
        LoopFreeFn(arb_fn(g, false))
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        shrink_fn(&self.0)
    }
}

/// Sample in-bounds parameter values from `rng`.
pub fn random_inputs<R: rand::Rng>(func: &MiniFn, rng: &mut R) -> HashMap<String, i64> {
    let (lo, hi) = PARAM_BOUNDS;
    func.params
        .iter()
        .map(|p| (p.name.clone(), rng.gen_range(lo..=hi)))
        .collect()
}

/// Map raw seeds onto in-bounds parameter values.
pub fn inputs_for(func: &MiniFn, seeds: &[i8]) -> HashMap<String, i64> {
    let (lo, hi) = PARAM_BOUNDS;
    func.params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let seed = i64::from(seeds.get(i).copied().unwrap_or(0));
            let span = hi - lo + 1;
            (p.name.clone(), lo + seed.rem_euclid(span))
        })
        .collect()
}

/// Every concretely executed instruction is abstractly reachable, and
/// every final concrete value lies within the joined exit range.
pub fn check_soundness(func: &MiniFn, seeds: &[i8]) -> Result<bool> {
    let mut lowered = lower(func)?;
    let outcome = lowered.analyze(RunConfig::default())?;
    let Some(analysis) = outcome.analysis() else {
        // Too complex is an honest give-up, not an unsoundness.
        return Ok(true);
    };
    let run = execute(&lowered, &inputs_for(func, seeds), ORACLE_FUEL)?;
    if !run.completed {
        return Ok(true);
    }
    for &index in &run.trace {
        if !analysis.is_reachable(index) {
            return Ok(false);
        }
    }
    for (name, &id) in &lowered.vars {
        if let Some(range) = analysis.range_at(lowered.program.len(), id) {
            if !range.contains(run.finals[name]) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Loop-free programs have finitely many feasible paths and must
/// converge under the default budget.
pub fn check_convergence(func: &MiniFn) -> Result<bool> {
    let mut lowered = lower(func)?;
    let outcome = lowered.analyze(RunConfig::default())?;
    Ok(outcome.analysis().is_some())
}

/// No concrete execution may take an edge the analysis proved dead.
pub fn check_findings_hold(func: &MiniFn, seeds: &[i8]) -> Result<bool> {
    let mut lowered = lower(func)?;
    let outcome = lowered.analyze(RunConfig::default())?;
    let Some(analysis) = outcome.analysis() else {
        return Ok(true);
    };
    if analysis.findings.is_empty() {
        return Ok(true);
    }
    let run = execute(&lowered, &inputs_for(func, seeds), ORACLE_FUEL)?;
    Ok(findings_hold_for(&lowered, analysis, &run))
}

fn findings_hold_for(lowered: &Lowered, analysis: &Analysis, run: &Execution) -> bool {
    if !run.completed {
        return true;
    }
    let exit = lowered.program.len();
    for finding in &analysis.findings {
        let on_true = match lowered.program.get(finding.index).map(|i| &i.kind) {
            Some(InstKind::Branch { on_true }) => *on_true,
            _ => continue,
        };
        for (i, &pos) in run.trace.iter().enumerate() {
            if pos != finding.index {
                continue;
            }
            // A branch with no later trace entry took an edge straight
            // to the program exit.
            let taken = run.trace.get(i + 1).copied().unwrap_or(exit);
            let refuted = match finding.kind {
                FindingKind::AlwaysTrue => taken != on_true,
                FindingKind::AlwaysFalse => taken != finding.index + 1,
                FindingKind::ContradictoryBranch => true,
            };
            if refuted {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn randomized_runs_never_refute_the_analysis() {
        let mut g = Gen::new(12);
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for _ in 0..25 {
            let func = AnyFn::arbitrary(&mut g).0;
            let seeds: Vec<i8> = (0..3).map(|_| rng.gen()).collect();
            assert!(check_soundness(&func, &seeds).unwrap());
            assert!(check_findings_hold(&func, &seeds).unwrap());
        }
    }

    #[test]
    fn sampled_inputs_stay_within_parameter_bounds() {
        let func = arb_fn(&mut Gen::new(10), false);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            for (_, v) in random_inputs(&func, &mut rng) {
                assert!((PARAM_BOUNDS.0..=PARAM_BOUNDS.1).contains(&v));
            }
        }
    }

    #[test]
    fn inputs_stay_within_parameter_bounds() {
        let func = arb_fn(&mut Gen::new(10), false);
        let inputs = inputs_for(&func, &[127, -128, 5]);
        for p in &func.params {
            let v = inputs[&p.name];
            assert!((PARAM_BOUNDS.0..=PARAM_BOUNDS.1).contains(&v));
        }
    }

    #[test]
    fn generated_functions_lower_cleanly() {
        let mut g = Gen::new(20);
        for _ in 0..50 {
            let func = AnyFn::arbitrary(&mut g).0;
            lower(&func).expect("generated functions are shape-valid");
        }
    }

    #[test]
    fn a_branch_taking_the_exit_edge_is_still_checked() {
        use flowfact_core::{Fact, MemoryState, ProgramBuilder, ValueFactory};

        // Both branch edges leave the program, so the branch can be the
        // last executed instruction of a trace.
        let mut factory = ValueFactory::new();
        let x = factory.variable("x", Width::Int, false);
        let zero = factory.int(0);
        let mut b = ProgramBuilder::new();
        b.emit(InstKind::Push(x));
        b.emit(InstKind::Push(zero));
        b.emit(InstKind::Cmp(RelOp::Gt));
        b.emit(InstKind::Branch { on_true: 5 });
        b.emit(InstKind::Nop);
        let program = b.build().unwrap();

        let mut initial = MemoryState::new();
        initial.set_fact(&factory, x, Fact::point(Width::Int, -5));
        let mut vars = HashMap::new();
        vars.insert("x".to_string(), x);
        let mut lowered = Lowered {
            program,
            factory,
            vars,
            initial,
        };
        let outcome = lowered.analyze(RunConfig::default()).unwrap();
        let analysis = outcome.analysis().expect("converged");
        assert!(analysis
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::AlwaysFalse));

        // An input outside the modeled entry state takes the exit edge
        // the analysis called dead; the check must notice.
        let mut inputs = HashMap::new();
        inputs.insert("x".to_string(), 7i64);
        let run = execute(&lowered, &inputs, 100).unwrap();
        assert!(run.completed);
        assert_eq!(run.trace.last(), Some(&3));
        assert!(!findings_hold_for(&lowered, analysis, &run));
    }

    #[test]
    fn soundness_holds_on_a_known_tricky_case() {
        // Reassignment inside one arm plus a merge used to be the easy
        // thing to get wrong in exit-summary joins.
        let func = MiniFn {
            params: vec![Param::int("a", Some(PARAM_BOUNDS))],
            body: vec![Stmt::If {
                cond: Cond {
                    op: RelOp::Gt,
                    left: Expr::var("a"),
                    right: Expr::Lit(0),
                },
                then_body: vec![Stmt::Assign("a".into(), Expr::Lit(1))],
                else_body: vec![Stmt::Assign(
                    "a".into(),
                    Expr::bin(ArithOp::Mul, Expr::var("a"), Expr::Lit(2)),
                )],
            }],
        };
        for seed in [-8i8, -1, 0, 1, 8] {
            assert!(check_soundness(&func, &[seed]).unwrap());
            assert!(check_findings_hold(&func, &[seed]).unwrap());
        }
        assert!(check_convergence(&func).unwrap());
    }
}
