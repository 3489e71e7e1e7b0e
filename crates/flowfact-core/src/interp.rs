//! Transfer functions: one instruction against one state.
//!
//! Each step consumes the incoming state and yields 0, 1, or 2 successor
//! states. A branch forks the state and narrows each fork under one
//! polarity; forks that contradict themselves are dropped here, and the
//! evidence of which polarities survived is handed to the runner for
//! diagnostics. Two dead polarities is not an engine error: the incoming
//! state itself was contradictory, and pruning it is the correct recovery.

use crate::error::ProgramError;
use crate::inst::{InstIndex, InstKind, Program};
use crate::range::IntRange;
use crate::state::{Applied, MemoryState};
use crate::value::{ArithOp, ValueFactory};
use crate::fact::{Fact, Nullability};
use smallvec::SmallVec;

/// Which branch polarities stayed feasible at a branch instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchObs {
    pub true_feasible: bool,
    pub false_feasible: bool,
}

/// Result of executing one instruction.
#[derive(Debug)]
pub struct StepOutcome {
    /// Successor positions and their states; at a branch the true edge
    /// comes first.
    pub successors: SmallVec<[(InstIndex, MemoryState); 2]>,
    /// Present exactly when the instruction was a branch.
    pub branch: Option<BranchObs>,
}

impl StepOutcome {
    fn single(index: InstIndex, state: MemoryState) -> Self {
        let mut successors = SmallVec::new();
        successors.push((index, state));
        StepOutcome {
            successors,
            branch: None,
        }
    }
}

/// Abstract range of a binary operation; both operands must already be
/// cast into the result width.
fn binop_range(op: ArithOp, l: &IntRange, r: &IntRange) -> IntRange {
    match op {
        ArithOp::Add => l.add(r),
        ArithOp::Sub => l.sub(r),
        ArithOp::Mul => match r.as_point() {
            Some(c) => l.mul_const(c),
            None => IntRange::full(l.width()),
        },
        ArithOp::Div => match r.as_point() {
            Some(c) => l.div_const(c),
            None => IntRange::full(l.width()),
        },
        ArithOp::Rem => match r.as_point() {
            Some(c) => l.rem_const(c),
            None => IntRange::full(l.width()),
        },
        ArithOp::Shl => match r.as_point() {
            Some(c) => l.shl_const(c),
            None => IntRange::full(l.width()),
        },
        ArithOp::Shr => match r.as_point() {
            Some(c) => l.shr_const(c),
            None => IntRange::full(l.width()),
        },
    }
}

/// Execute the instruction at `index` against `state`.
///
/// Stack underflow is a malformed-program error; everything else is
/// total. An empty successor list means the path ends here, either by a
/// doubly-infeasible branch or by a mid-expression contradiction.
pub fn step(
    program: &Program,
    factory: &mut ValueFactory,
    index: InstIndex,
    mut state: MemoryState,
) -> Result<StepOutcome, ProgramError> {
    let inst = program.get(index).ok_or(ProgramError::DanglingTarget {
        index,
        target: index,
        len: program.len(),
    })?;
    let next = index + 1;

    match &inst.kind {
        InstKind::Push(id) => {
            state.push(*id);
            Ok(StepOutcome::single(next, state))
        }
        InstKind::Pop => {
            state
                .pop()
                .ok_or(ProgramError::StackUnderflow { index })?;
            Ok(StepOutcome::single(next, state))
        }
        InstKind::BinOp(op, width) => {
            let right = state.pop().ok_or(ProgramError::StackUnderflow { index })?;
            let left = state.pop().ok_or(ProgramError::StackUnderflow { index })?;
            let result = factory.binop(*op, left, right, *width);
            if result != ValueFactory::UNKNOWN && !factory.is_constant(result) {
                // Compute in the instruction's width: a narrower operand
                // range casts up losslessly, and a Long result over Int
                // operands must be allowed past the Int domain.
                let lr = state.get_fact(factory, left).range.cast(*width);
                let rr = state.get_fact(factory, right).range.cast(*width);
                let computed = binop_range(*op, &lr, &rr);
                let prior = state.get_fact(factory, result).range;
                let range = prior.intersect(&computed);
                if range.is_empty() {
                    // The operands contradict what this state already
                    // knew about the composite: the path is infeasible.
                    return Ok(StepOutcome {
                        successors: SmallVec::new(),
                        branch: None,
                    });
                }
                state.set_fact(
                    factory,
                    result,
                    Fact {
                        range,
                        nullability: Nullability::NotNull,
                    },
                );
            }
            state.push(result);
            Ok(StepOutcome::single(next, state))
        }
        InstKind::Cmp(op) => {
            let right = state.pop().ok_or(ProgramError::StackUnderflow { index })?;
            let left = state.pop().ok_or(ProgramError::StackUnderflow { index })?;
            let cond = factory.cond(*op, left, right);
            state.push(cond);
            Ok(StepOutcome::single(next, state))
        }
        InstKind::Assign(var) => {
            let rhs = state.pop().ok_or(ProgramError::StackUnderflow { index })?;
            if factory.is_variable(*var) {
                state.assign(factory, *var, rhs);
                state.push(*var);
            } else {
                // Degenerate target: keep the stack shape, learn nothing.
                state.push(rhs);
            }
            Ok(StepOutcome::single(next, state))
        }
        InstKind::Branch { on_true } => {
            let cond = state.pop().ok_or(ProgramError::StackUnderflow { index })?;
            let mut true_state = state.clone();
            let t = true_state.apply_condition(factory, cond, true);
            let f = state.apply_condition(factory, cond, false);
            let mut successors: SmallVec<[(InstIndex, MemoryState); 2]> = SmallVec::new();
            // True edge first: deterministic exploration order.
            if t == Applied::Feasible {
                successors.push((*on_true, true_state));
            }
            if f == Applied::Feasible {
                successors.push((next, state));
            }
            Ok(StepOutcome {
                successors,
                branch: Some(BranchObs {
                    true_feasible: t == Applied::Feasible,
                    false_feasible: f == Applied::Feasible,
                }),
            })
        }
        InstKind::Goto(target) => Ok(StepOutcome::single(*target, state)),
        InstKind::Flush(vars) => {
            for &v in vars {
                state.flush(factory, v);
            }
            Ok(StepOutcome::single(next, state))
        }
        InstKind::Nop => Ok(StepOutcome::single(next, state)),
    }
}
