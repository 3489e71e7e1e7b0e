//! Concrete reference interpreter.
//!
//! Executes a lowered program over concrete `i64` inputs with the same
//! width-wrapping arithmetic the abstract engine models, recording the
//! trace of executed instruction positions and the final variable
//! values. Runs that exhaust their fuel or hit an undefined concrete
//! operation (division by zero, bad shift) are reported as incomplete
//! rather than failed; soundness properties simply skip them.

use crate::mini::Lowered;
use anyhow::{bail, Result};
use flowfact_core::{ConstVal, InstKind, ValueId, ValueKind};
use std::collections::HashMap;

/// One concrete run.
#[derive(Debug, Clone)]
pub struct Execution {
    /// Instruction positions in execution order.
    pub trace: Vec<usize>,
    /// Final value of every declared variable.
    pub finals: HashMap<String, i64>,
    /// False when fuel ran out or an undefined operation was hit.
    pub completed: bool,
}

/// Execute `lowered` with the given named inputs. Unnamed parameters
/// default to zero.
pub fn execute(
    lowered: &Lowered,
    inputs: &HashMap<String, i64>,
    fuel: usize,
) -> Result<Execution> {
    let program = &lowered.program;
    let factory = &lowered.factory;

    let mut env: HashMap<ValueId, i64> = HashMap::new();
    for (name, &id) in &lowered.vars {
        env.insert(id, inputs.get(name).copied().unwrap_or(0));
    }

    let finals = |env: &HashMap<ValueId, i64>| -> HashMap<String, i64> {
        lowered
            .vars
            .iter()
            .map(|(name, id)| (name.clone(), env.get(id).copied().unwrap_or(0)))
            .collect()
    };

    let mut stack: Vec<i64> = Vec::new();
    let mut trace = Vec::new();
    let mut remaining = fuel;
    let mut index = 0usize;

    while index < program.len() {
        if remaining == 0 {
            return Ok(Execution {
                finals: finals(&env),
                trace,
                completed: false,
            });
        }
        remaining -= 1;
        trace.push(index);

        let inst = match program.get(index) {
            Some(i) => i,
            None => bail!("trace escaped the program at {index}"),
        };
        match &inst.kind {
            InstKind::Push(id) => {
                let v = match factory.kind(*id) {
                    ValueKind::Variable { .. } => env.get(id).copied().unwrap_or(0),
                    ValueKind::Constant(ConstVal::Int(v)) => *v,
                    ValueKind::Constant(ConstVal::Bool(b)) => i64::from(*b),
                    other => bail!("oracle cannot evaluate a pushed {other:?}"),
                };
                stack.push(v);
            }
            InstKind::Pop => {
                pop(&mut stack, index)?;
            }
            InstKind::BinOp(op, width) => {
                let r = pop(&mut stack, index)?;
                let l = pop(&mut stack, index)?;
                match op.fold(l, r, *width) {
                    Some(v) => stack.push(v),
                    None => {
                        // Undefined concretely; the abstract engine gave
                        // this expression up as Unknown.
                        return Ok(Execution {
                            finals: finals(&env),
                            trace,
                            completed: false,
                        });
                    }
                }
            }
            InstKind::Cmp(op) => {
                let r = pop(&mut stack, index)?;
                let l = pop(&mut stack, index)?;
                stack.push(i64::from(op.eval(l, r)));
            }
            InstKind::Assign(var) => {
                let v = pop(&mut stack, index)?;
                // Storing wraps into the variable's declared width.
                let v = match factory.kind(*var) {
                    ValueKind::Variable { width, .. } => width.wrap(v),
                    _ => v,
                };
                env.insert(*var, v);
                stack.push(v);
            }
            InstKind::Branch { on_true } => {
                let c = pop(&mut stack, index)?;
                if c != 0 {
                    index = *on_true;
                    continue;
                }
            }
            InstKind::Goto(target) => {
                index = *target;
                continue;
            }
            // Concretely a no-op; only the abstract engine forgets.
            InstKind::Flush(_) | InstKind::Nop => {}
        }
        index += 1;
    }

    if !stack.is_empty() {
        bail!("operands left on the stack at exit");
    }
    Ok(Execution {
        finals: finals(&env),
        trace,
        completed: true,
    })
}

fn pop(stack: &mut Vec<i64>, index: usize) -> Result<i64> {
    match stack.pop() {
        Some(v) => Ok(v),
        None => bail!("concrete stack underflow at {index}"),
    }
}
