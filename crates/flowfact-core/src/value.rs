//! Value model and interning factory.
//!
//! Every value the engine reasons about is an immutable node owned by a
//! [`ValueFactory`] and addressed by a [`ValueId`]. The factory interns
//! structurally: two construction requests with equal arguments return the
//! identical id, so id comparison is semantic equality within one run.
//!
//! Construction is total. Operator/operand combinations the engine does not
//! model degrade to [`ValueKind::Unknown`] instead of failing, which keeps
//! one unsupported expression from aborting a whole analysis.
//!
//! Algebraic simplification here is purely structural: it fires on interned
//! identity of operands (`x - x`, `(a + b) - a`), never on facts held by a
//! memory state. State-dependent knowledge is exploited during condition
//! narrowing instead, so factory results stay cacheable.

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Interned handle for a value. Copy, and cheap to compare: within one
/// factory, equal ids mean structurally equal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Integral width of a numeric value: 32-bit or 64-bit semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Width {
    Int,
    Long,
}

impl Width {
    /// Smallest representable value in this width.
    pub fn min_value(self) -> i64 {
        match self {
            Width::Int => i64::from(i32::MIN),
            Width::Long => i64::MIN,
        }
    }

    /// Largest representable value in this width.
    pub fn max_value(self) -> i64 {
        match self {
            Width::Int => i64::from(i32::MAX),
            Width::Long => i64::MAX,
        }
    }

    /// Number of value bits, used to validate shift distances.
    pub fn bits(self) -> u32 {
        match self {
            Width::Int => 32,
            Width::Long => 64,
        }
    }

    /// True if `v` is representable without wrapping.
    pub fn contains(self, v: i64) -> bool {
        v >= self.min_value() && v <= self.max_value()
    }

    /// Wrap `v` into this width, with two's-complement semantics.
    pub fn wrap(self, v: i64) -> i64 {
        match self {
            Width::Int => i64::from(v as i32),
            Width::Long => v,
        }
    }

    /// The wider of two widths; mixed-width arithmetic is done in the
    /// wider domain.
    pub fn join(self, other: Width) -> Width {
        match (self, other) {
            (Width::Int, Width::Int) => Width::Int,
            _ => Width::Long,
        }
    }
}

/// A literal: any primitive integer, a boolean, or null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstVal {
    Int(i64),
    Bool(bool),
    Null,
}

/// Arithmetic operators the engine models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
}

impl ArithOp {
    /// Fold two concrete operands, wrapping into `width`. `None` where the
    /// concrete operation is undefined (division by zero, bad shift).
    pub fn fold(self, a: i64, b: i64, width: Width) -> Option<i64> {
        let raw = match self {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div => {
                if b == 0 {
                    return None;
                }
                a.wrapping_div(b)
            }
            ArithOp::Rem => {
                if b == 0 {
                    return None;
                }
                a.wrapping_rem(b)
            }
            ArithOp::Shl => {
                if b < 0 || b as u32 >= width.bits() {
                    return None;
                }
                a.wrapping_shl(b as u32)
            }
            ArithOp::Shr => {
                if b < 0 || b as u32 >= width.bits() {
                    return None;
                }
                a.wrapping_shr(b as u32)
            }
        };
        Some(width.wrap(raw))
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
            ArithOp::Shl => "<<",
            ArithOp::Shr => ">>",
        };
        f.write_str(s)
    }
}

/// Relational operators; a `Cond` value applies one of these to two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    /// The relation that holds exactly when this one does not.
    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Le => RelOp::Gt,
            RelOp::Gt => RelOp::Le,
            RelOp::Ge => RelOp::Lt,
        }
    }

    /// The relation with operands swapped (`a < b` iff `b > a`).
    pub fn flip(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Eq,
            RelOp::Ne => RelOp::Ne,
            RelOp::Lt => RelOp::Gt,
            RelOp::Le => RelOp::Ge,
            RelOp::Gt => RelOp::Lt,
            RelOp::Ge => RelOp::Le,
        }
    }

    /// Evaluate against two concrete integers.
    pub fn eval(self, a: i64, b: i64) -> bool {
        match self {
            RelOp::Eq => a == b,
            RelOp::Ne => a != b,
            RelOp::Lt => a < b,
            RelOp::Le => a <= b,
            RelOp::Gt => a > b,
            RelOp::Ge => a >= b,
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelOp::Eq => "==",
            RelOp::Ne => "!=",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// The closed set of value shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Top element: no information. A single interned instance per factory.
    Unknown,
    /// A source variable or slot. Identity is stable per (name, width).
    Variable {
        name: String,
        width: Width,
        nullable: bool,
    },
    /// A literal constant.
    Constant(ConstVal),
    /// An arithmetic composite. The left operand is always a variable or
    /// another composite; operand shape is enforced by the factory.
    BinOp {
        op: ArithOp,
        left: ValueId,
        right: ValueId,
        width: Width,
    },
    /// A boolean-valued relation between two operands; the stack operand
    /// that a branch instruction consumes.
    Cond {
        op: RelOp,
        left: ValueId,
        right: ValueId,
    },
}

/// Per-run interning arena for values.
///
/// One factory per analysis run; concurrent runs each own their own factory
/// so interning needs no synchronization.
#[derive(Debug, Default)]
pub struct ValueFactory {
    kinds: Vec<ValueKind>,
    interned: FnvHashMap<ValueKind, ValueId>,
}

impl ValueFactory {
    /// The id of the `Unknown` value, identical in every factory.
    pub const UNKNOWN: ValueId = ValueId(0);

    pub fn new() -> Self {
        let mut f = ValueFactory {
            kinds: Vec::new(),
            interned: FnvHashMap::default(),
        };
        let id = f.intern(ValueKind::Unknown);
        debug_assert_eq!(id, Self::UNKNOWN);
        f
    }

    fn intern(&mut self, kind: ValueKind) -> ValueId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = ValueId(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.interned.insert(kind, id);
        id
    }

    /// Top element: no information.
    pub fn unknown(&self) -> ValueId {
        Self::UNKNOWN
    }

    /// Intern a source variable. Repeated requests for the same name and
    /// width return the same id, giving each source slot a stable identity.
    pub fn variable(&mut self, name: &str, width: Width, nullable: bool) -> ValueId {
        self.intern(ValueKind::Variable {
            name: name.to_string(),
            width,
            nullable,
        })
    }

    /// Intern an integer literal.
    pub fn int(&mut self, v: i64) -> ValueId {
        self.intern(ValueKind::Constant(ConstVal::Int(v)))
    }

    /// Intern a boolean literal.
    pub fn bool_const(&mut self, v: bool) -> ValueId {
        self.intern(ValueKind::Constant(ConstVal::Bool(v)))
    }

    /// Intern the null literal.
    pub fn null(&mut self) -> ValueId {
        self.intern(ValueKind::Constant(ConstVal::Null))
    }

    /// Construct an arithmetic composite. Total: operand combinations the
    /// engine does not model yield `Unknown`.
    ///
    /// Shape rules: the left operand must be a variable or composite;
    /// `Mul`/`Div`/`Rem`/`Shl`/`Shr` take a constant right operand; `Sub`
    /// takes a variable right operand (`x - c` is rewritten to `x + (-c)`,
    /// so the constant-right form of subtraction never exists twice).
    pub fn binop(&mut self, op: ArithOp, left: ValueId, right: ValueId, width: Width) -> ValueId {
        // Both operands constant: fold outright.
        if let (Some(a), Some(b)) = (self.int_const(left), self.int_const(right)) {
            return match op.fold(a, b, width) {
                Some(v) => self.int(v),
                None => self.unknown(),
            };
        }

        // Commutative with a constant on the left: put the constant right.
        if op == ArithOp::Add || op == ArithOp::Mul {
            if self.is_int_const(left) && !self.is_int_const(right) {
                return self.binop(op, right, left, width);
            }
        }

        // Subtraction of a constant becomes addition of its negation.
        if op == ArithOp::Sub {
            if let Some(c) = self.int_const(right) {
                if let Some(neg) = c.checked_neg() {
                    let neg = self.int(width.wrap(neg));
                    return self.binop(ArithOp::Add, left, neg, width);
                }
                return self.unknown();
            }
        }

        if !self.is_composite_operand(left) {
            return self.unknown();
        }
        let right_ok = match op {
            ArithOp::Add => self.is_composite_operand(right) || self.is_int_const(right),
            ArithOp::Sub => self.is_variable(right),
            ArithOp::Mul | ArithOp::Div | ArithOp::Rem | ArithOp::Shl | ArithOp::Shr => {
                self.is_int_const(right)
            }
        };
        if !right_ok {
            return self.unknown();
        }

        if let Some(simplified) = self.simplify(op, left, right, width) {
            return simplified;
        }

        // Canonical operand order for commutative variable-variable pairs:
        // larger id first, so `a + b` and `b + a` intern once.
        let (left, right) = if op == ArithOp::Add && !self.is_int_const(right) && right > left {
            (right, left)
        } else {
            (left, right)
        };

        self.intern(ValueKind::BinOp {
            op,
            left,
            right,
            width,
        })
    }

    /// Structural identities; returns `None` when none applies.
    fn simplify(&mut self, op: ArithOp, left: ValueId, right: ValueId, width: Width) -> Option<ValueId> {
        let rc = self.int_const(right);
        match op {
            ArithOp::Add => {
                if rc == Some(0) {
                    return Some(left);
                }
            }
            ArithOp::Sub => {
                if left == right {
                    return Some(self.int(0));
                }
                // (a + b) - a => b, (a + b) - b => a
                if let ValueKind::BinOp {
                    op: ArithOp::Add,
                    left: a,
                    right: b,
                    ..
                } = *self.kind(left)
                {
                    if a == right {
                        return Some(b);
                    }
                    if b == right {
                        return Some(a);
                    }
                }
            }
            ArithOp::Mul => {
                if rc == Some(1) {
                    return Some(left);
                }
                if rc == Some(0) {
                    return Some(self.int(0));
                }
            }
            ArithOp::Div => {
                if rc == Some(1) {
                    return Some(left);
                }
                if rc == Some(0) {
                    return Some(self.unknown());
                }
            }
            ArithOp::Rem => {
                if rc == Some(1) {
                    return Some(self.int(0));
                }
                if rc == Some(0) {
                    return Some(self.unknown());
                }
            }
            ArithOp::Shl | ArithOp::Shr => {
                if rc == Some(0) {
                    return Some(left);
                }
                if let Some(c) = rc {
                    if c < 0 || c as u32 >= width.bits() {
                        return Some(self.unknown());
                    }
                }
            }
        }
        None
    }

    /// Construct a relation value. Constant relations fold to a boolean
    /// literal; a constant left operand is flipped to the right so each
    /// semantic relation interns once.
    pub fn cond(&mut self, op: RelOp, left: ValueId, right: ValueId) -> ValueId {
        if let (Some(a), Some(b)) = (self.int_const(left), self.int_const(right)) {
            return self.bool_const(op.eval(a, b));
        }
        if left == right {
            // Same interned value on both sides decides the relation.
            return self.bool_const(matches!(op, RelOp::Eq | RelOp::Le | RelOp::Ge));
        }
        if self.is_constant(left) && !self.is_constant(right) {
            return self.cond(op.flip(), right, left);
        }
        // Symmetric relations get a canonical operand order.
        let (left, right) = if matches!(op, RelOp::Eq | RelOp::Ne)
            && !self.is_constant(right)
            && right > left
        {
            (right, left)
        } else {
            (left, right)
        };
        self.intern(ValueKind::Cond { op, left, right })
    }

    /// Shape of an interned value.
    pub fn kind(&self, id: ValueId) -> &ValueKind {
        &self.kinds[id.0 as usize]
    }

    pub fn is_variable(&self, id: ValueId) -> bool {
        matches!(self.kind(id), ValueKind::Variable { .. })
    }

    pub fn is_constant(&self, id: ValueId) -> bool {
        matches!(self.kind(id), ValueKind::Constant(_))
    }

    fn is_composite_operand(&self, id: ValueId) -> bool {
        matches!(
            self.kind(id),
            ValueKind::Variable { .. } | ValueKind::BinOp { .. }
        )
    }

    fn is_int_const(&self, id: ValueId) -> bool {
        self.int_const(id).is_some()
    }

    /// The numeric value of an integer literal, if `id` is one.
    pub fn int_const(&self, id: ValueId) -> Option<i64> {
        match self.kind(id) {
            ValueKind::Constant(ConstVal::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// The value of a boolean literal, if `id` is one.
    pub fn bool_const_value(&self, id: ValueId) -> Option<bool> {
        match self.kind(id) {
            ValueKind::Constant(ConstVal::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Integral width the value is computed in. Literals live in the widest
    /// domain; relations are boolean-valued and report `Int`.
    pub fn width_of(&self, id: ValueId) -> Width {
        match self.kind(id) {
            ValueKind::Variable { width, .. } | ValueKind::BinOp { width, .. } => *width,
            ValueKind::Constant(ConstVal::Int(_)) => Width::Long,
            ValueKind::Constant(_) | ValueKind::Cond { .. } => Width::Int,
            ValueKind::Unknown => Width::Long,
        }
    }

    /// True if `id` is or contains the variable `var`.
    pub fn mentions(&self, id: ValueId, var: ValueId) -> bool {
        if id == var {
            return true;
        }
        match self.kind(id) {
            ValueKind::BinOp { left, right, .. } | ValueKind::Cond { left, right, .. } => {
                let (l, r) = (*left, *right);
                self.mentions(l, var) || self.mentions(r, var)
            }
            _ => false,
        }
    }

    /// All interned variables, in interning order.
    pub fn variables(&self) -> impl Iterator<Item = (ValueId, &str)> {
        self.kinds.iter().enumerate().filter_map(|(i, k)| match k {
            ValueKind::Variable { name, .. } => Some((ValueId(i as u32), name.as_str())),
            _ => None,
        })
    }

    /// Number of interned values.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Human-readable rendering for diagnostics.
    pub fn display(&self, id: ValueId) -> String {
        match self.kind(id) {
            ValueKind::Unknown => "?".to_string(),
            ValueKind::Variable { name, .. } => name.clone(),
            ValueKind::Constant(ConstVal::Int(v)) => v.to_string(),
            ValueKind::Constant(ConstVal::Bool(v)) => v.to_string(),
            ValueKind::Constant(ConstVal::Null) => "null".to_string(),
            ValueKind::BinOp {
                op, left, right, ..
            } => format!("({} {} {})", self.display(*left), op, self.display(*right)),
            ValueKind::Cond { op, left, right } => {
                format!("({} {} {})", self.display(*left), op, self.display(*right))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let y = f.variable("y", Width::Int, false);
        let a = f.binop(ArithOp::Add, x, y, Width::Int);
        let b = f.binop(ArithOp::Add, x, y, Width::Int);
        assert_eq!(a, b);
        assert_eq!(f.variable("x", Width::Int, false), x);
        assert_eq!(f.int(7), f.int(7));
    }

    #[test]
    fn commutative_operands_are_canonicalized() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let y = f.variable("y", Width::Int, false);
        let a = f.binop(ArithOp::Add, x, y, Width::Int);
        let b = f.binop(ArithOp::Add, y, x, Width::Int);
        assert_eq!(a, b);
    }

    #[test]
    fn identity_laws() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let zero = f.int(0);
        let one = f.int(1);
        assert_eq!(f.binop(ArithOp::Add, x, zero, Width::Int), x);
        assert_eq!(f.binop(ArithOp::Mul, x, one, Width::Int), x);
        assert_eq!(f.binop(ArithOp::Div, x, one, Width::Int), x);
        let mul0 = f.binop(ArithOp::Mul, x, zero, Width::Int);
        assert_eq!(f.int_const(mul0), Some(0));
        let xx = f.binop(ArithOp::Sub, x, x, Width::Int);
        assert_eq!(f.int_const(xx), Some(0));
    }

    #[test]
    fn addition_cancellation() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let y = f.variable("y", Width::Int, false);
        let sum = f.binop(ArithOp::Add, x, y, Width::Int);
        assert_eq!(f.binop(ArithOp::Sub, sum, y, Width::Int), x);
        assert_eq!(f.binop(ArithOp::Sub, sum, x, Width::Int), y);
    }

    #[test]
    fn constant_folding_wraps_in_width() {
        let mut f = ValueFactory::new();
        let a = f.int(i64::from(i32::MAX));
        let b = f.int(1);
        let sum = f.binop(ArithOp::Add, a, b, Width::Int);
        assert_eq!(f.int_const(sum), Some(i64::from(i32::MIN)));
        let sum64 = f.binop(ArithOp::Add, a, b, Width::Long);
        assert_eq!(f.int_const(sum64), Some(i64::from(i32::MAX) + 1));
    }

    #[test]
    fn unsupported_shapes_degrade_to_unknown() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let y = f.variable("y", Width::Int, false);
        // MOD requires a constant right operand.
        assert_eq!(f.binop(ArithOp::Rem, x, y, Width::Int), f.unknown());
        // Division by a constant zero is not modeled.
        let zero = f.int(0);
        assert_eq!(f.binop(ArithOp::Div, x, zero, Width::Int), f.unknown());
        // A constant left operand is not a valid composite base.
        let five = f.int(5);
        assert_eq!(f.binop(ArithOp::Rem, five, y, Width::Int), f.unknown());
    }

    #[test]
    fn subtraction_of_constant_becomes_addition() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let three = f.int(3);
        let sub = f.binop(ArithOp::Sub, x, three, Width::Int);
        let neg3 = f.int(-3);
        let add = f.binop(ArithOp::Add, x, neg3, Width::Int);
        assert_eq!(sub, add);
    }

    #[test]
    fn constant_relations_fold() {
        let mut f = ValueFactory::new();
        let five = f.int(5);
        let zero = f.int(0);
        let c = f.cond(RelOp::Gt, five, zero);
        assert_eq!(f.bool_const_value(c), Some(true));
        let x = f.variable("x", Width::Int, false);
        let refl = f.cond(RelOp::Le, x, x);
        assert_eq!(f.bool_const_value(refl), Some(true));
    }

    #[test]
    fn constant_left_relation_is_flipped() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let zero = f.int(0);
        let a = f.cond(RelOp::Lt, zero, x);
        let b = f.cond(RelOp::Gt, x, zero);
        assert_eq!(a, b);
    }

    #[test]
    fn mentions_walks_composites() {
        let mut f = ValueFactory::new();
        let x = f.variable("x", Width::Int, false);
        let y = f.variable("y", Width::Int, false);
        let z = f.variable("z", Width::Int, false);
        let sum = f.binop(ArithOp::Add, x, y, Width::Int);
        assert!(f.mentions(sum, x));
        assert!(f.mentions(sum, y));
        assert!(!f.mentions(sum, z));
    }
}
