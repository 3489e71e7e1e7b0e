//! Path-sensitive memory state.
//!
//! One `MemoryState` is one feasible path's knowledge: an operand stack,
//! a fact per value, and an equivalence-class partition for `are_equal`
//! queries. Branches fork a state with `clone()`; the fork and the
//! original never share mutable structure, so narrowing one path cannot
//! corrupt another.
//!
//! Every query is total. A value the state has never narrowed reports its
//! static default fact (full range, nullability from its declaration), so
//! callers never see an absent entry.

use crate::fact::{Fact, Nullability};
use crate::range::{narrow_relation, IntRange};
use crate::value::{ConstVal, ValueFactory, ValueId, ValueKind, Width};
use fnv::FnvHashMap;
use fnv::FnvHasher;
use smallvec::{smallvec, SmallVec};
use std::hash::{Hash, Hasher};

/// Canonical digest of a state, used by the visited set and surfaced in
/// per-instruction summaries.
pub type StateSig = u64;

/// Outcome of narrowing a state under a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The state was narrowed and remains satisfiable.
    Feasible,
    /// The narrowing emptied some fact: this path cannot happen. The
    /// caller must drop the state.
    Contradiction,
}

type Members = SmallVec<[ValueId; 4]>;

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    stack: Vec<ValueId>,
    facts: FnvHashMap<ValueId, Fact>,
    /// Member to class root. Entries always point directly at the root.
    rep: FnvHashMap<ValueId, ValueId>,
    /// Class root to sorted member list (root included).
    members: FnvHashMap<ValueId, Members>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- operand stack ----

    pub fn push(&mut self, id: ValueId) {
        self.stack.push(id);
    }

    pub fn pop(&mut self) -> Option<ValueId> {
        self.stack.pop()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    // ---- facts ----

    /// The fact a value carries before any narrowing: its declaration-time
    /// knowledge.
    fn default_fact(factory: &ValueFactory, id: ValueId) -> Fact {
        match factory.kind(id) {
            ValueKind::Constant(ConstVal::Int(v)) => Fact::point(Width::Long, *v),
            ValueKind::Constant(ConstVal::Bool(b)) => Fact::point(Width::Int, i64::from(*b)),
            ValueKind::Constant(ConstVal::Null) => Fact {
                range: IntRange::full(Width::Int),
                nullability: Nullability::Null,
            },
            ValueKind::Variable {
                width, nullable, ..
            } => Fact {
                range: IntRange::full(*width),
                nullability: if *nullable {
                    Nullability::Unknown
                } else {
                    Nullability::NotNull
                },
            },
            ValueKind::BinOp { width, .. } => Fact {
                range: IntRange::full(*width),
                nullability: Nullability::NotNull,
            },
            ValueKind::Cond { .. } => Fact {
                range: IntRange::closed(Width::Int, 0, 1),
                nullability: Nullability::NotNull,
            },
            ValueKind::Unknown => Fact::unknown(Width::Long),
        }
    }

    /// Total: never absent, never panics.
    pub fn get_fact(&self, factory: &ValueFactory, id: ValueId) -> Fact {
        self.facts
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Self::default_fact(factory, id))
    }

    /// Record a fact. Storing the default removes the entry instead, so
    /// two states with the same knowledge have the same signature.
    pub fn set_fact(&mut self, factory: &ValueFactory, id: ValueId, fact: Fact) {
        if fact == Self::default_fact(factory, id) {
            self.facts.remove(&id);
        } else {
            self.facts.insert(id, fact);
        }
    }

    // ---- equivalence classes ----

    fn find(&self, id: ValueId) -> ValueId {
        self.rep.get(&id).copied().unwrap_or(id)
    }

    /// True if the two values are provably the same: identical id, same
    /// equivalence class, or equal singleton ranges.
    pub fn are_equal(&self, factory: &ValueFactory, a: ValueId, b: ValueId) -> bool {
        if a == b {
            return true;
        }
        if self.find(a) == self.find(b) {
            return true;
        }
        match (
            self.get_fact(factory, a).range.as_point(),
            self.get_fact(factory, b).range.as_point(),
        ) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Merge the classes of `a` and `b`. The smallest member id becomes
    /// the root, which keeps the partition canonical across states.
    pub fn union_classes(&mut self, a: ValueId, b: ValueId) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let la = self.members.remove(&ra).unwrap_or_else(|| smallvec![ra]);
        let lb = self.members.remove(&rb).unwrap_or_else(|| smallvec![rb]);
        let mut merged: Members = SmallVec::with_capacity(la.len() + lb.len());
        merged.extend(la);
        merged.extend(lb);
        merged.sort_unstable();
        merged.dedup();
        let root = merged[0];
        for &m in &merged {
            self.rep.insert(m, root);
        }
        self.members.insert(root, merged);
    }

    fn detach(&mut self, id: ValueId) {
        let Some(root) = self.rep.remove(&id) else {
            return;
        };
        let mut list = self.members.remove(&root).unwrap_or_default();
        list.retain(|m| *m != id);
        if list.len() < 2 {
            for &m in &list {
                self.rep.remove(&m);
            }
            return;
        }
        let new_root = list[0];
        for &m in &list {
            self.rep.insert(m, new_root);
        }
        self.members.insert(new_root, list);
    }

    // ---- transfer-function entry points ----

    /// Forget everything about a variable: its fact, its class
    /// membership, and the facts and memberships of every composite
    /// built over it, whose meaning changed with it.
    pub fn flush(&mut self, factory: &ValueFactory, var: ValueId) {
        self.facts.remove(&var);
        // A stale composite may carry an explicit fact, sit in an
        // equivalence class, or both.
        let mut stale: Vec<ValueId> = self
            .facts
            .keys()
            .chain(self.rep.keys())
            .copied()
            .filter(|&id| id != var && factory.mentions(id, var))
            .collect();
        stale.sort_unstable();
        stale.dedup();
        for id in stale {
            self.facts.remove(&id);
            self.detach(id);
        }
        self.detach(var);
    }

    /// `var = rhs`: flush the old binding, copy the right-hand side's
    /// fact, and equate the two values when that stays meaningful.
    pub fn assign(&mut self, factory: &ValueFactory, var: ValueId, rhs: ValueId) {
        let mut fact = self.get_fact(factory, rhs);
        fact.range = fact.range.cast(factory.width_of(var));
        self.flush(factory, var);
        self.set_fact(factory, var, fact);
        // `x = x + 1` must not equate x with the stale composite.
        if !factory.is_constant(rhs)
            && rhs != ValueFactory::UNKNOWN
            && !factory.mentions(rhs, var)
        {
            self.union_classes(var, rhs);
        }
    }

    /// Narrow under `cond == truth`. `Contradiction` means the branch is
    /// infeasible from this state and the path must be dropped.
    pub fn apply_condition(
        &mut self,
        factory: &ValueFactory,
        cond: ValueId,
        truth: bool,
    ) -> Applied {
        match *factory.kind(cond) {
            ValueKind::Constant(ConstVal::Bool(b)) => {
                if b == truth {
                    Applied::Feasible
                } else {
                    Applied::Contradiction
                }
            }
            ValueKind::Constant(ConstVal::Int(n)) => {
                if (n != 0) == truth {
                    Applied::Feasible
                } else {
                    Applied::Contradiction
                }
            }
            ValueKind::Cond { op, left, right } => {
                let rel = if truth { op } else { op.negate() };
                self.apply_relation(factory, rel, left, right)
            }
            ValueKind::Variable { .. } | ValueKind::BinOp { .. } => {
                // Truthiness of a numeric operand: nonzero / zero.
                let fact = self.get_fact(factory, cond);
                let narrowed = if truth {
                    fact.range.without(0)
                } else {
                    fact.range.intersect(&IntRange::point(fact.range.width(), 0))
                };
                if narrowed.is_empty() {
                    return Applied::Contradiction;
                }
                self.set_fact(
                    factory,
                    cond,
                    Fact {
                        range: narrowed,
                        nullability: fact.nullability,
                    },
                );
                Applied::Feasible
            }
            // No information either way; both polarities stay open.
            _ => Applied::Feasible,
        }
    }

    fn apply_relation(
        &mut self,
        factory: &ValueFactory,
        op: crate::value::RelOp,
        left: ValueId,
        right: ValueId,
    ) -> Applied {
        use crate::value::RelOp;

        // Null comparisons narrow nullability, not ranges. The factory
        // canonicalizes a null operand to the right.
        if matches!(factory.kind(right), ValueKind::Constant(ConstVal::Null)) {
            let lf = self.get_fact(factory, left);
            let wanted = match op {
                RelOp::Eq => Nullability::Null,
                RelOp::Ne => Nullability::NotNull,
                _ => return Applied::Feasible,
            };
            let Some(met) = lf.nullability.meet(wanted) else {
                return Applied::Contradiction;
            };
            if !factory.is_constant(left) {
                self.set_fact(
                    factory,
                    left,
                    Fact {
                        range: lf.range,
                        nullability: met,
                    },
                );
            }
            return Applied::Feasible;
        }

        if op == RelOp::Ne && self.are_equal(factory, left, right) {
            return Applied::Contradiction;
        }

        let lf = self.get_fact(factory, left);
        let rf = self.get_fact(factory, right);
        let (nl, nr) = narrow_relation(op, &lf.range, &rf.range);
        if nl.is_empty() || nr.is_empty() {
            return Applied::Contradiction;
        }

        let mut l_null = lf.nullability;
        let mut r_null = rf.nullability;
        if op == RelOp::Eq {
            let Some(met) = l_null.meet(r_null) else {
                return Applied::Contradiction;
            };
            l_null = met;
            r_null = met;
        }

        if !factory.is_constant(left) {
            self.set_fact(
                factory,
                left,
                Fact {
                    range: nl,
                    nullability: l_null,
                },
            );
        }
        if !factory.is_constant(right) {
            self.set_fact(
                factory,
                right,
                Fact {
                    range: nr,
                    nullability: r_null,
                },
            );
        }
        if op == RelOp::Eq && !factory.is_constant(left) && !factory.is_constant(right) {
            self.union_classes(left, right);
        }
        Applied::Feasible
    }

    // ---- canonical form ----

    /// Digest over stack, sorted facts, and sorted class partitions. Two
    /// states with the same knowledge produce the same signature.
    pub fn signature(&self) -> StateSig {
        let mut h = FnvHasher::default();
        self.stack.hash(&mut h);
        let mut entries: Vec<(&ValueId, &Fact)> = self.facts.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        for (id, fact) in entries {
            id.hash(&mut h);
            fact.hash(&mut h);
        }
        let mut classes: Vec<&Members> = self.members.values().collect();
        classes.sort_by_key(|m| m[0]);
        for class in classes {
            class.hash(&mut h);
        }
        h.finish()
    }

    /// True if `other` is equal or more general: every constraint `other`
    /// states also holds here. A covered state explores nothing its
    /// covering state has not already explored.
    pub fn is_covered_by(&self, factory: &ValueFactory, other: &MemoryState) -> bool {
        if self.stack != other.stack {
            return false;
        }
        for (&id, fact) in &other.facts {
            if !self.get_fact(factory, id).is_subsumed_by(fact) {
                return false;
            }
        }
        for class in other.members.values() {
            for pair in class.windows(2) {
                if !self.are_equal(factory, pair[0], pair[1]) {
                    return false;
                }
            }
        }
        true
    }

    /// All values this state holds explicit facts for, unordered.
    pub fn fact_entries(&self) -> impl Iterator<Item = (ValueId, &Fact)> {
        self.facts.iter().map(|(&id, f)| (id, f))
    }
}
