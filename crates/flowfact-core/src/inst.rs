//! Instruction set and program construction.
//!
//! A program is a flattened control-flow graph: a linear, indexed
//! instruction sequence with explicit jump targets. It is built once by a
//! [`ProgramBuilder`], validated, and read-only thereafter.
//!
//! The target equal to the program length is the designated exit; jumping
//! past it is a malformed program and rejected at build time, not at run
//! time.

use crate::error::ProgramError;
use crate::value::{ArithOp, RelOp, ValueId, Width};
use serde::Serialize;

/// Opaque handle into whatever source model the host keeps. Carried
/// through to findings, never interpreted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceRef(pub u32);

/// Position of an instruction in the flattened program.
pub type InstIndex = usize;

/// The closed set of instruction shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// Push a constant or variable onto the evaluation stack.
    Push(ValueId),
    /// Discard the top of stack (statement boundary).
    Pop,
    /// Pop right then left, push the factory-built composite.
    BinOp(ArithOp, Width),
    /// Pop right then left, push the interned relation.
    Cmp(RelOp),
    /// Pop the right-hand side, rebind the variable, push the variable.
    /// Assignment is an expression; a statement boundary pops it.
    Assign(ValueId),
    /// Pop a boolean-valued operand; jump on true, fall through on false.
    Branch { on_true: InstIndex },
    /// Unconditional jump.
    Goto(InstIndex),
    /// Scope end or unanalyzable side effect: forget these variables.
    Flush(Vec<ValueId>),
    /// No effect.
    Nop,
}

/// One instruction plus its optional source anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstKind,
    pub source: Option<SourceRef>,
}

/// An immutable, validated instruction sequence.
#[derive(Debug, Clone)]
pub struct Program {
    insts: Vec<Instruction>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn get(&self, index: InstIndex) -> Option<&Instruction> {
        self.insts.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstIndex, &Instruction)> {
        self.insts.iter().enumerate()
    }
}

/// A forward-referenceable position, bound by [`ProgramBuilder::bind_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Accumulates instructions and patches forward jumps at build time.
///
/// Lowerers emit branches to labels before the target instruction exists;
/// `build` resolves every label and validates every target, failing fast
/// on a malformed sequence.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    insts: Vec<Instruction>,
    labels: Vec<Option<InstIndex>>,
    fixups: Vec<(InstIndex, Label)>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next instruction position.
    pub fn here(&self) -> InstIndex {
        self.insts.len()
    }

    /// Append an instruction without a source anchor.
    pub fn emit(&mut self, kind: InstKind) -> InstIndex {
        self.emit_at(kind, None)
    }

    /// Append an instruction anchored to a source element.
    pub fn emit_at(&mut self, kind: InstKind, source: Option<SourceRef>) -> InstIndex {
        let index = self.insts.len();
        self.insts.push(Instruction { kind, source });
        index
    }

    /// Create a label to be bound later.
    pub fn fresh_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current position.
    pub fn bind_label(&mut self, label: Label) {
        self.labels[label.0] = Some(self.insts.len());
    }

    /// Emit a conditional branch to a label, patched at build time.
    pub fn branch(&mut self, target: Label, source: Option<SourceRef>) -> InstIndex {
        let index = self.emit_at(InstKind::Branch { on_true: usize::MAX }, source);
        self.fixups.push((index, target));
        index
    }

    /// Emit an unconditional jump to a label, patched at build time.
    pub fn goto(&mut self, target: Label) -> InstIndex {
        let index = self.emit(InstKind::Goto(usize::MAX));
        self.fixups.push((index, target));
        index
    }

    /// Resolve labels and validate the sequence.
    pub fn build(mut self) -> Result<Program, ProgramError> {
        if self.insts.is_empty() {
            return Err(ProgramError::Empty);
        }
        for (index, label) in self.fixups {
            let target = self.labels[label.0].ok_or(ProgramError::UnboundLabel { label: label.0 })?;
            match &mut self.insts[index].kind {
                InstKind::Branch { on_true } => *on_true = target,
                InstKind::Goto(t) => *t = target,
                _ => {}
            }
        }
        let len = self.insts.len();
        for (index, inst) in self.insts.iter().enumerate() {
            let target = match inst.kind {
                InstKind::Branch { on_true } => Some(on_true),
                InstKind::Goto(t) => Some(t),
                _ => None,
            };
            if let Some(target) = target {
                // `target == len` is the designated exit.
                if target > len {
                    return Err(ProgramError::DanglingTarget { index, target, len });
                }
            }
        }
        Ok(Program { insts: self.insts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueFactory;

    #[test]
    fn empty_programs_are_rejected() {
        assert_eq!(ProgramBuilder::new().build().unwrap_err(), ProgramError::Empty);
    }

    #[test]
    fn dangling_targets_are_rejected() {
        let mut b = ProgramBuilder::new();
        b.emit(InstKind::Goto(7));
        let err = b.build().unwrap_err();
        assert_eq!(
            err,
            ProgramError::DanglingTarget {
                index: 0,
                target: 7,
                len: 1
            }
        );
    }

    #[test]
    fn a_jump_to_the_exit_position_is_allowed() {
        let mut b = ProgramBuilder::new();
        b.emit(InstKind::Goto(1));
        assert!(b.build().is_ok());
    }

    #[test]
    fn unbound_labels_are_rejected() {
        let mut f = ValueFactory::new();
        let t = f.bool_const(true);
        let mut b = ProgramBuilder::new();
        let l = b.fresh_label();
        b.emit(InstKind::Push(t));
        b.branch(l, None);
        assert_eq!(
            b.build().unwrap_err(),
            ProgramError::UnboundLabel { label: 0 }
        );
    }

    #[test]
    fn forward_labels_are_patched() {
        let mut f = ValueFactory::new();
        let t = f.bool_const(true);
        let mut b = ProgramBuilder::new();
        let end = b.fresh_label();
        b.emit(InstKind::Push(t));
        b.branch(end, None);
        b.emit(InstKind::Nop);
        b.bind_label(end);
        b.emit(InstKind::Nop);
        let p = b.build().unwrap();
        assert_eq!(p.get(1).map(|i| &i.kind), Some(&InstKind::Branch { on_true: 3 }));
    }
}
