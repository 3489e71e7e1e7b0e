//! flowfact-verify: property verification for the flowfact engine.
//!
//! This crate is the engine's external collaborator and adversary in
//! one: a miniature structured program form with a lowering to flat
//! instruction sequences ([`mini`]), a concrete reference interpreter
//! used as a soundness oracle ([`oracle`]), and randomized properties
//! comparing the two ([`props`]).

pub mod mini;
pub mod oracle;
pub mod props;

pub use mini::{lower, Cond, Expr, Lowered, MiniFn, Param, Stmt};
pub use oracle::{execute, Execution};
pub use props::{
    check_convergence, check_findings_hold, check_soundness, inputs_for, random_inputs, AnyFn,
    LoopFreeFn,
};
