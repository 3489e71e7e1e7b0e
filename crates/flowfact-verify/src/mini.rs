//! A miniature structured program form and its lowering.
//!
//! `MiniFn` plays the role of the external control-flow-graph builder the
//! engine expects: structured assignments, if/else, and while loops over
//! integer variables, linearized into the engine's flat instruction
//! sequence with explicit jump targets. It exists to exercise the engine,
//! not as a product surface.

use anyhow::{bail, Context, Result};
use flowfact_core::{
    ArithOp, InstKind, MemoryState, Program, ProgramBuilder, RelOp, RunConfig, RunOutcome,
    Runner, ValueFactory, ValueId, Width,
};
use std::collections::HashMap;

/// A function parameter with optional initial bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub width: Width,
    pub nullable: bool,
    /// Inclusive initial range, when the caller guarantees one.
    pub bounds: Option<(i64, i64)>,
}

impl Param {
    pub fn int(name: &str, bounds: Option<(i64, i64)>) -> Self {
        Param {
            name: name.to_string(),
            width: Width::Int,
            nullable: false,
            bounds,
        }
    }
}

/// An arithmetic expression over variables and integer literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Var(String),
    Lit(i64),
    Bin(ArithOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    pub fn bin(op: ArithOp, left: Expr, right: Expr) -> Expr {
        Expr::Bin(op, Box::new(left), Box::new(right))
    }
}

/// A relational condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cond {
    pub op: RelOp,
    pub left: Expr,
    pub right: Expr,
}

/// Structured statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Assign(String, Expr),
    If {
        cond: Cond,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        cond: Cond,
        body: Vec<Stmt>,
    },
}

/// A function body plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiniFn {
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

/// A lowered function: the program, the factory that owns its values,
/// the symbol table, and the entry state seeded from parameter bounds.
#[derive(Debug)]
pub struct Lowered {
    pub program: Program,
    pub factory: ValueFactory,
    pub vars: HashMap<String, ValueId>,
    pub initial: MemoryState,
}

impl Lowered {
    /// Run the analysis over this function.
    pub fn analyze(&mut self, config: RunConfig) -> Result<RunOutcome> {
        Runner::new(&self.program, &mut self.factory, config)
            .run(self.initial.clone())
            .context("analysis failed on a lowered program")
    }
}

struct LowerCtx<'a> {
    builder: ProgramBuilder,
    factory: &'a mut ValueFactory,
    vars: &'a HashMap<String, ValueId>,
}

impl LowerCtx<'_> {
    fn var(&self, name: &str) -> Result<ValueId> {
        self.vars
            .get(name)
            .copied()
            .with_context(|| format!("undeclared variable `{name}`"))
    }

    fn expr_width(&self, e: &Expr) -> Result<Width> {
        Ok(match e {
            Expr::Var(n) => self.factory.width_of(self.var(n)?),
            Expr::Lit(_) => Width::Int,
            Expr::Bin(_, l, r) => self.expr_width(l)?.join(self.expr_width(r)?),
        })
    }

    fn lower_expr(&mut self, e: &Expr) -> Result<()> {
        match e {
            Expr::Var(n) => {
                let id = self.var(n)?;
                self.builder.emit(InstKind::Push(id));
            }
            Expr::Lit(v) => {
                let id = self.factory.int(*v);
                self.builder.emit(InstKind::Push(id));
            }
            Expr::Bin(op, l, r) => {
                let width = self.expr_width(e)?;
                self.lower_expr(l)?;
                self.lower_expr(r)?;
                self.builder.emit(InstKind::BinOp(*op, width));
            }
        }
        Ok(())
    }

    fn lower_cond(&mut self, c: &Cond) -> Result<()> {
        self.lower_expr(&c.left)?;
        self.lower_expr(&c.right)?;
        self.builder.emit(InstKind::Cmp(c.op));
        Ok(())
    }

    fn lower_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Assign(name, e) => {
                let id = self.var(name)?;
                self.lower_expr(e)?;
                self.builder.emit(InstKind::Assign(id));
                self.builder.emit(InstKind::Pop);
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let then_label = self.builder.fresh_label();
                let end = self.builder.fresh_label();
                self.lower_cond(cond)?;
                self.builder.branch(then_label, None);
                self.lower_block(else_body)?;
                self.builder.goto(end);
                self.builder.bind_label(then_label);
                self.lower_block(then_body)?;
                self.builder.bind_label(end);
            }
            Stmt::While { cond, body } => {
                let body_label = self.builder.fresh_label();
                let end = self.builder.fresh_label();
                let head = self.builder.here();
                self.lower_cond(cond)?;
                self.builder.branch(body_label, None);
                self.builder.goto(end);
                self.builder.bind_label(body_label);
                self.lower_block(body)?;
                self.builder.emit(InstKind::Goto(head));
                self.builder.bind_label(end);
            }
        }
        Ok(())
    }
}

fn collect_locals(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Assign(name, _) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                collect_locals(then_body, out);
                collect_locals(else_body, out);
            }
            Stmt::While { body, .. } => collect_locals(body, out),
        }
    }
}

/// Lower a structured function into a flat program, an owning factory,
/// and the entry state seeded from parameter bounds.
pub fn lower(func: &MiniFn) -> Result<Lowered> {
    let mut factory = ValueFactory::new();
    let mut vars = HashMap::new();
    for p in &func.params {
        if vars.contains_key(&p.name) {
            bail!("duplicate parameter `{}`", p.name);
        }
        vars.insert(
            p.name.clone(),
            factory.variable(&p.name, p.width, p.nullable),
        );
    }
    let mut locals = Vec::new();
    collect_locals(&func.body, &mut locals);
    for name in locals {
        vars.entry(name.clone())
            .or_insert_with(|| factory.variable(&name, Width::Int, false));
    }

    let mut ctx = LowerCtx {
        builder: ProgramBuilder::new(),
        factory: &mut factory,
        vars: &vars,
    };
    if func.body.is_empty() {
        ctx.builder.emit(InstKind::Nop);
    }
    ctx.lower_block(&func.body)?;
    let program = ctx.builder.build().context("lowering produced a malformed program")?;

    let mut initial = MemoryState::new();
    for p in &func.params {
        if let Some((lo, hi)) = p.bounds {
            let id = vars[&p.name];
            let mut fact = initial.get_fact(&factory, id);
            fact.range = flowfact_core::IntRange::closed(p.width, lo, hi);
            initial.set_fact(&factory, id, fact);
        }
    }

    Ok(Lowered {
        program,
        factory,
        vars,
        initial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowfact_core::FindingKind;

    fn dead_else_fn() -> MiniFn {
        // x = 5; if (x > 0) { y = 1; } else { y = 2; }
        MiniFn {
            params: vec![],
            body: vec![
                Stmt::Assign("x".into(), Expr::Lit(5)),
                Stmt::If {
                    cond: Cond {
                        op: RelOp::Gt,
                        left: Expr::var("x"),
                        right: Expr::Lit(0),
                    },
                    then_body: vec![Stmt::Assign("y".into(), Expr::Lit(1))],
                    else_body: vec![Stmt::Assign("y".into(), Expr::Lit(2))],
                },
            ],
        }
    }

    #[test]
    fn lowering_builds_a_valid_program() {
        let lowered = lower(&dead_else_fn()).unwrap();
        assert!(lowered.program.len() > 5);
        assert!(lowered.vars.contains_key("x"));
        assert!(lowered.vars.contains_key("y"));
    }

    #[test]
    fn dead_else_is_proven_through_the_lowering() {
        let mut lowered = lower(&dead_else_fn()).unwrap();
        let y = lowered.vars["y"];
        let outcome = lowered.analyze(RunConfig::default()).unwrap();
        let analysis = outcome.analysis().expect("converged");
        assert_eq!(
            analysis
                .range_at(lowered.program.len(), y)
                .and_then(|r| r.as_point()),
            Some(1)
        );
        assert!(analysis
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::AlwaysTrue));
    }

    #[test]
    fn parameter_bounds_seed_the_entry_state() {
        let func = MiniFn {
            params: vec![Param::int("n", Some((0, 9)))],
            body: vec![Stmt::Assign(
                "m".into(),
                Expr::bin(ArithOp::Add, Expr::var("n"), Expr::Lit(1)),
            )],
        };
        let mut lowered = lower(&func).unwrap();
        let m = lowered.vars["m"];
        let outcome = lowered.analyze(RunConfig::default()).unwrap();
        let analysis = outcome.analysis().expect("converged");
        let range = analysis
            .range_at(lowered.program.len(), m)
            .expect("m is refined");
        assert_eq!(range.min(), Some(1));
        assert_eq!(range.max(), Some(10));
    }

    #[test]
    fn counting_loop_converges() {
        let func = MiniFn {
            params: vec![],
            body: vec![
                Stmt::Assign("i".into(), Expr::Lit(0)),
                Stmt::While {
                    cond: Cond {
                        op: RelOp::Lt,
                        left: Expr::var("i"),
                        right: Expr::Lit(8),
                    },
                    body: vec![Stmt::Assign(
                        "i".into(),
                        Expr::bin(ArithOp::Add, Expr::var("i"), Expr::Lit(1)),
                    )],
                },
            ],
        };
        let mut lowered = lower(&func).unwrap();
        let i = lowered.vars["i"];
        let outcome = lowered.analyze(RunConfig::default()).unwrap();
        let analysis = outcome.analysis().expect("converged");
        assert_eq!(
            analysis
                .range_at(lowered.program.len(), i)
                .and_then(|r| r.as_point()),
            Some(8)
        );
    }

    #[test]
    fn long_arithmetic_over_int_operands_crosses_the_int_boundary() {
        let max = i64::from(i32::MAX);
        let func = MiniFn {
            params: vec![
                Param::int("x", Some((max, max))),
                Param {
                    name: "y".into(),
                    width: Width::Long,
                    nullable: false,
                    bounds: Some((1, 1)),
                },
                Param {
                    name: "m".into(),
                    width: Width::Long,
                    nullable: false,
                    bounds: None,
                },
            ],
            body: vec![Stmt::Assign(
                "m".into(),
                Expr::bin(ArithOp::Add, Expr::var("x"), Expr::var("y")),
            )],
        };
        let mut lowered = lower(&func).unwrap();
        let m = lowered.vars["m"];
        let outcome = lowered.analyze(RunConfig::default()).unwrap();
        let analysis = outcome.analysis().expect("converged");
        // The sum is computed in Long width: past the Int domain, not
        // clamped to it.
        assert_eq!(
            analysis
                .range_at(lowered.program.len(), m)
                .and_then(|r| r.as_point()),
            Some(max + 1)
        );
    }

    #[test]
    fn reassignment_invalidates_equalities_over_the_old_value() {
        // m = a + 1; a = 0; if (m == a + 1) { t = 1; } else { t = 2; }
        // The equality proven at the first assignment dies with `a`;
        // both branch edges stay feasible afterwards.
        let func = MiniFn {
            params: vec![Param::int("a", None)],
            body: vec![
                Stmt::Assign(
                    "m".into(),
                    Expr::bin(ArithOp::Add, Expr::var("a"), Expr::Lit(1)),
                ),
                Stmt::Assign("a".into(), Expr::Lit(0)),
                Stmt::If {
                    cond: Cond {
                        op: RelOp::Eq,
                        left: Expr::var("m"),
                        right: Expr::bin(ArithOp::Add, Expr::var("a"), Expr::Lit(1)),
                    },
                    then_body: vec![Stmt::Assign("t".into(), Expr::Lit(1))],
                    else_body: vec![Stmt::Assign("t".into(), Expr::Lit(2))],
                },
            ],
        };
        let mut lowered = lower(&func).unwrap();
        let outcome = lowered.analyze(RunConfig::default()).unwrap();
        let analysis = outcome.analysis().expect("converged");
        assert!(analysis.findings.is_empty());
    }

    #[test]
    fn undeclared_variables_are_rejected() {
        let func = MiniFn {
            params: vec![],
            body: vec![Stmt::Assign("x".into(), Expr::var("ghost"))],
        };
        assert!(lower(&func).is_err());
    }
}
