//! Per-value facts: an integral range paired with a nullability.
//!
//! `Unknown` nullability is the top of its four-point lattice; joining
//! `Null` with `NotNull` gives `Nullable`, meeting them is the
//! contradiction the caller must prune.

use crate::range::IntRange;
use crate::value::Width;
use serde::Serialize;

/// What is known about whether a value can be null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Nullability {
    /// Proven non-null.
    NotNull,
    /// Proven null.
    Null,
    /// Either is possible and both have been observed as reachable.
    Nullable,
    /// No information.
    Unknown,
}

impl Nullability {
    /// Least upper bound.
    pub fn join(self, other: Nullability) -> Nullability {
        use Nullability::*;
        match (self, other) {
            (Unknown, _) | (_, Unknown) => Unknown,
            (a, b) if a == b => a,
            _ => Nullable,
        }
    }

    /// Greatest lower bound; `None` is the contradiction (a value proven
    /// both null and non-null).
    pub fn meet(self, other: Nullability) -> Option<Nullability> {
        use Nullability::*;
        match (self, other) {
            (Unknown, x) | (x, Unknown) => Some(x),
            (Nullable, x) | (x, Nullable) => Some(x),
            (NotNull, NotNull) => Some(NotNull),
            (Null, Null) => Some(Null),
            (Null, NotNull) | (NotNull, Null) => None,
        }
    }

    /// Lattice order: true if `self` is at least as specific as `other`.
    pub fn is_subsumed_by(self, other: Nullability) -> bool {
        use Nullability::*;
        match (self, other) {
            (_, Unknown) => true,
            (a, b) if a == b => true,
            (Null, Nullable) | (NotNull, Nullable) => true,
            _ => false,
        }
    }
}

/// Everything a memory state knows about one value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fact {
    pub range: IntRange,
    pub nullability: Nullability,
}

impl Fact {
    /// The implicit fact of any value a state has never narrowed.
    pub fn unknown(width: Width) -> Self {
        Fact {
            range: IntRange::full(width),
            nullability: Nullability::Unknown,
        }
    }

    /// A known integer.
    pub fn point(width: Width, v: i64) -> Self {
        Fact {
            range: IntRange::point(width, v),
            nullability: Nullability::NotNull,
        }
    }

    /// True if this fact adds no information over `Fact::unknown`.
    pub fn is_unknown(&self) -> bool {
        self.range.is_full() && self.nullability == Nullability::Unknown
    }

    /// True if the fact is unsatisfiable. An empty range alone is not a
    /// contradiction for a value proven null, since null carries no
    /// numeric value.
    pub fn is_contradiction(&self) -> bool {
        self.range.is_empty() && self.nullability != Nullability::Null
    }

    /// Least upper bound, used when summarizing across visiting states.
    pub fn join(&self, other: &Fact) -> Fact {
        Fact {
            range: self.range.union(&other.range),
            nullability: self.nullability.join(other.nullability),
        }
    }

    /// Greatest lower bound; `None` is the contradiction.
    pub fn meet(&self, other: &Fact) -> Option<Fact> {
        let nullability = self.nullability.meet(other.nullability)?;
        let range = self.range.intersect(&other.range);
        let fact = Fact { range, nullability };
        if fact.is_contradiction() {
            None
        } else {
            Some(fact)
        }
    }

    /// True if every state satisfying `self` also satisfies `other`.
    pub fn is_subsumed_by(&self, other: &Fact) -> bool {
        self.range.is_subset_of(&other.range) && self.nullability.is_subsumed_by(other.nullability)
    }
}
