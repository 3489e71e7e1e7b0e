//! Error taxonomy for the engine.
//!
//! Only malformed input programs produce errors. Everything else on the hot
//! path is total: infeasible paths are pruned, unsupported value shapes
//! degrade to `Unknown`, and resource exhaustion is a [`RunOutcome`] variant
//! rather than an error.
//!
//! [`RunOutcome`]: crate::runner::RunOutcome

use thiserror::Error;

/// A precondition violation in the supplied instruction sequence.
///
/// These are fatal for the run: the caller handed the engine a broken
/// program and must fix the lowering, not retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    /// A branch or goto points past the designated exit position.
    #[error("instruction {index} jumps to {target}, but the program has only {len} instructions")]
    DanglingTarget {
        index: usize,
        target: usize,
        len: usize,
    },

    /// A label was used as a jump target but never bound to a position.
    #[error("label {label} was branched to but never bound")]
    UnboundLabel { label: usize },

    /// The program contains no instructions.
    #[error("program is empty")]
    Empty,

    /// An instruction consumed more operands than the evaluation stack held.
    #[error("operand stack underflow at instruction {index}")]
    StackUnderflow { index: usize },

    /// A path reached the exit with operands still on the evaluation stack,
    /// which means the lowering failed to pop a statement boundary.
    #[error("{depth} operand(s) left on the stack at program exit (instruction {index})")]
    StackResidue { index: usize, depth: usize },
}
