//! flowfact-core: path-sensitive abstract interpretation over flattened
//! control-flow programs.
//!
//! The engine consumes a linear instruction sequence with explicit jump
//! targets (produced by an external lowering) and an initial
//! [`MemoryState`], and runs a worklist fixed-point analysis that tracks
//! per-path value facts: integral ranges, nullability, and equivalence
//! classes. It reports provably dead branch edges and per-position fact
//! summaries, or gives up explicitly when a resource bound trips.
//!
//! One [`ValueFactory`] per run owns every value the analysis reasons
//! about; interning makes id comparison semantic equality. Branches fork
//! states; contradictory forks are pruned, never fatal. The only errors
//! are malformed input programs.
//!
//! ```
//! use flowfact_core::{
//!     ArithOp, InstKind, MemoryState, ProgramBuilder, RelOp, RunConfig, Runner,
//!     ValueFactory, Width,
//! };
//!
//! // x = 5; if (x > 0) { y = 1; } else { y = 2; }
//! let mut factory = ValueFactory::new();
//! let x = factory.variable("x", Width::Int, false);
//! let y = factory.variable("y", Width::Int, false);
//! let zero = factory.int(0);
//! let five = factory.int(5);
//! let one = factory.int(1);
//! let two = factory.int(2);
//!
//! let mut b = ProgramBuilder::new();
//! let then = b.fresh_label();
//! let end = b.fresh_label();
//! b.emit(InstKind::Push(five));
//! b.emit(InstKind::Assign(x));
//! b.emit(InstKind::Pop);
//! b.emit(InstKind::Push(x));
//! b.emit(InstKind::Push(zero));
//! b.emit(InstKind::Cmp(RelOp::Gt));
//! b.branch(then, None);
//! b.emit(InstKind::Push(two));
//! b.emit(InstKind::Assign(y));
//! b.emit(InstKind::Pop);
//! b.goto(end);
//! b.bind_label(then);
//! b.emit(InstKind::Push(one));
//! b.emit(InstKind::Assign(y));
//! b.emit(InstKind::Pop);
//! b.bind_label(end);
//! let program = b.build().unwrap();
//!
//! let outcome = Runner::new(&program, &mut factory, RunConfig::default())
//!     .run(MemoryState::new())
//!     .unwrap();
//! let analysis = outcome.analysis().unwrap();
//! // The else branch is infeasible: y is exactly 1 at exit.
//! assert_eq!(
//!     analysis.range_at(program.len(), y).and_then(|r| r.as_point()),
//!     Some(1),
//! );
//! ```

pub mod error;
pub mod fact;
pub mod inst;
pub mod interp;
pub mod range;
pub mod report;
pub mod runner;
pub mod state;
pub mod value;

pub use error::ProgramError;
pub use fact::{Fact, Nullability};
pub use inst::{InstIndex, InstKind, Instruction, Label, Program, ProgramBuilder, SourceRef};
pub use interp::{step, BranchObs, StepOutcome};
pub use range::{narrow_relation, IntRange, Span};
pub use report::{Analysis, Finding, FindingKind, InstrSummary};
pub use runner::{RunConfig, RunOutcome, Runner};
pub use state::{Applied, MemoryState, StateSig};
pub use value::{ArithOp, ConstVal, RelOp, ValueFactory, ValueId, ValueKind, Width};
