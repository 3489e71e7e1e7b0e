//! Integral range facts: sorted disjoint inclusive intervals.
//!
//! A range is the set of integers a value may hold, clamped to its width's
//! domain. The empty range is the contradiction (bottom); the full domain
//! is "no information" (top). Arithmetic transfer functions are total and
//! widen to the full domain whenever a bound could overflow; being less
//! precise is always sound, being wrong never is.

use crate::value::{RelOp, Width};
use serde::Serialize;
use smallvec::{smallvec, SmallVec};
use std::fmt;

/// One inclusive interval, `lo <= hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub lo: i64,
    pub hi: i64,
}

impl Span {
    fn intersect(self, other: Span) -> Option<Span> {
        let lo = self.lo.max(other.lo);
        let hi = self.hi.min(other.hi);
        if lo <= hi {
            Some(Span { lo, hi })
        } else {
            None
        }
    }
}

/// A set of integers as sorted, disjoint, non-adjacent spans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IntRange {
    width: Width,
    spans: SmallVec<[Span; 2]>,
}

impl IntRange {
    /// The contradiction: no value is possible.
    pub fn empty(width: Width) -> Self {
        IntRange {
            width,
            spans: SmallVec::new(),
        }
    }

    /// The whole domain of `width`: no information.
    pub fn full(width: Width) -> Self {
        IntRange {
            width,
            spans: smallvec![Span {
                lo: width.min_value(),
                hi: width.max_value(),
            }],
        }
    }

    /// A singleton. Values outside the domain give up to `full` rather than
    /// assert a wrapped claim the caller did not make.
    pub fn point(width: Width, v: i64) -> Self {
        if width.contains(v) {
            IntRange {
                width,
                spans: smallvec![Span { lo: v, hi: v }],
            }
        } else {
            Self::full(width)
        }
    }

    /// `[lo, hi]` clamped to the domain; inverted bounds are empty.
    pub fn closed(width: Width, lo: i64, hi: i64) -> Self {
        let lo = lo.max(width.min_value());
        let hi = hi.min(width.max_value());
        if lo > hi {
            Self::empty(width)
        } else {
            IntRange {
                width,
                spans: smallvec![Span { lo, hi }],
            }
        }
    }

    /// `[lo, +domain-max]`.
    pub fn at_least(width: Width, lo: i64) -> Self {
        Self::closed(width, lo, width.max_value())
    }

    /// `[domain-min, hi]`.
    pub fn at_most(width: Width, hi: i64) -> Self {
        Self::closed(width, width.min_value(), hi)
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.spans.len() == 1
            && self.spans[0].lo == self.width.min_value()
            && self.spans[0].hi == self.width.max_value()
    }

    /// Smallest possible value, `None` when empty.
    pub fn min(&self) -> Option<i64> {
        self.spans.first().map(|s| s.lo)
    }

    /// Largest possible value, `None` when empty.
    pub fn max(&self) -> Option<i64> {
        self.spans.last().map(|s| s.hi)
    }

    /// The single value, if this is a singleton.
    pub fn as_point(&self) -> Option<i64> {
        match self.spans.as_slice() {
            [s] if s.lo == s.hi => Some(s.lo),
            _ => None,
        }
    }

    pub fn contains(&self, v: i64) -> bool {
        self.spans.iter().any(|s| s.lo <= v && v <= s.hi)
    }

    /// True if every value possible here is possible in `other`.
    pub fn is_subset_of(&self, other: &IntRange) -> bool {
        self.spans
            .iter()
            .all(|s| other.spans.iter().any(|o| o.lo <= s.lo && s.hi <= o.hi))
    }

    fn normalized(width: Width, mut spans: Vec<Span>) -> Self {
        spans.sort_by_key(|s| s.lo);
        let mut out: SmallVec<[Span; 2]> = SmallVec::new();
        for s in spans {
            match out.last_mut() {
                // Merge overlapping and adjacent spans.
                Some(last) if s.lo <= last.hi.saturating_add(1) => {
                    last.hi = last.hi.max(s.hi);
                }
                _ => out.push(s),
            }
        }
        IntRange { width, spans: out }
    }

    pub fn union(&self, other: &IntRange) -> IntRange {
        let mut spans: Vec<Span> = self.spans.to_vec();
        spans.extend(other.spans.iter().copied());
        Self::normalized(self.width, spans)
    }

    pub fn intersect(&self, other: &IntRange) -> IntRange {
        let mut spans = Vec::new();
        for a in &self.spans {
            for b in &other.spans {
                if let Some(s) = a.intersect(*b) {
                    spans.push(s);
                }
            }
        }
        Self::normalized(self.width, spans)
    }

    /// Remove a single value (the `!=` narrowing against a singleton).
    pub fn without(&self, v: i64) -> IntRange {
        let mut spans = Vec::new();
        for s in &self.spans {
            if v < s.lo || v > s.hi {
                spans.push(*s);
                continue;
            }
            if s.lo < v {
                spans.push(Span { lo: s.lo, hi: v - 1 });
            }
            if v < s.hi {
                spans.push(Span { lo: v + 1, hi: s.hi });
            }
        }
        Self::normalized(self.width, spans)
    }

    /// All domain values not in this range.
    pub fn complement(&self) -> IntRange {
        let mut spans = Vec::new();
        let mut next = self.width.min_value();
        for s in &self.spans {
            if s.lo > next {
                spans.push(Span {
                    lo: next,
                    hi: s.lo - 1,
                });
            }
            match s.hi.checked_add(1) {
                Some(n) => next = n,
                None => return Self::normalized(self.width, spans),
            }
        }
        if next <= self.width.max_value() {
            spans.push(Span {
                lo: next,
                hi: self.width.max_value(),
            });
        }
        Self::normalized(self.width, spans)
    }

    /// Reinterpret in another width. Sets that fit are kept exactly;
    /// anything that would wrap widens to the full target domain.
    pub fn cast(&self, width: Width) -> IntRange {
        if self.is_empty() {
            return Self::empty(width);
        }
        let fits = self.min().is_some_and(|lo| width.contains(lo))
            && self.max().is_some_and(|hi| width.contains(hi));
        if fits {
            IntRange {
                width,
                spans: self.spans.clone(),
            }
        } else {
            Self::full(width)
        }
    }

    fn envelope(&self) -> Option<Span> {
        Some(Span {
            lo: self.min()?,
            hi: self.max()?,
        })
    }

    fn from_envelope(&self, lo: Option<i64>, hi: Option<i64>) -> IntRange {
        match (lo, hi) {
            (Some(lo), Some(hi)) if self.width.contains(lo) && self.width.contains(hi) => {
                Self::closed(self.width, lo, hi)
            }
            _ => Self::full(self.width),
        }
    }

    /// `self + other`, envelope-based; overflow widens to full.
    pub fn add(&self, other: &IntRange) -> IntRange {
        let (Some(a), Some(b)) = (self.envelope(), other.envelope()) else {
            return Self::empty(self.width);
        };
        self.from_envelope(a.lo.checked_add(b.lo), a.hi.checked_add(b.hi))
    }

    /// Negation of every value.
    pub fn neg(&self) -> IntRange {
        let Some(e) = self.envelope() else {
            return Self::empty(self.width);
        };
        self.from_envelope(e.hi.checked_neg(), e.lo.checked_neg())
    }

    /// `self - other`.
    pub fn sub(&self, other: &IntRange) -> IntRange {
        if other.is_empty() {
            return Self::empty(self.width);
        }
        self.add(&other.neg())
    }

    /// Multiplication by a known constant.
    pub fn mul_const(&self, c: i64) -> IntRange {
        let Some(e) = self.envelope() else {
            return Self::empty(self.width);
        };
        if c == 0 {
            return Self::point(self.width, 0);
        }
        let (a, b) = (e.lo.checked_mul(c), e.hi.checked_mul(c));
        if c > 0 {
            self.from_envelope(a, b)
        } else {
            self.from_envelope(b, a)
        }
    }

    /// Truncating division by a known constant; division is monotone per
    /// sign of the divisor, so endpoint candidates bound the result.
    pub fn div_const(&self, c: i64) -> IntRange {
        let Some(e) = self.envelope() else {
            return Self::empty(self.width);
        };
        if c == 0 {
            return Self::full(self.width);
        }
        let (a, b) = (e.lo.checked_div(c), e.hi.checked_div(c));
        if c > 0 {
            self.from_envelope(a, b)
        } else {
            self.from_envelope(b, a)
        }
    }

    /// Remainder by a known constant; the result magnitude is below `|c|`
    /// and takes the sign of the dividend.
    pub fn rem_const(&self, c: i64) -> IntRange {
        if self.is_empty() {
            return Self::empty(self.width);
        }
        if c == 0 {
            return Self::full(self.width);
        }
        let Some(m) = c.checked_abs().and_then(|a| a.checked_sub(1)) else {
            return Self::full(self.width);
        };
        let lo = self.min().unwrap_or(0);
        let hi = self.max().unwrap_or(0);
        if lo >= 0 && hi <= m {
            return self.clone();
        }
        if lo >= 0 {
            Self::closed(self.width, 0, m)
        } else if hi <= 0 {
            Self::closed(self.width, -m, 0)
        } else {
            Self::closed(self.width, -m, m)
        }
    }

    /// Left shift by a known constant distance.
    pub fn shl_const(&self, c: i64) -> IntRange {
        if self.is_empty() {
            return Self::empty(self.width);
        }
        if c < 0 || c as u32 >= self.width.bits() || c >= 63 {
            return Self::full(self.width);
        }
        self.mul_const(1i64 << c)
    }

    /// Arithmetic right shift by a known constant distance; monotone, so
    /// shifting the endpoints bounds the result.
    pub fn shr_const(&self, c: i64) -> IntRange {
        let Some(e) = self.envelope() else {
            return Self::empty(self.width);
        };
        if c < 0 || c as u32 >= self.width.bits() {
            return Self::full(self.width);
        }
        self.from_envelope(Some(e.lo >> c), Some(e.hi >> c))
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("{}");
        }
        if self.is_full() {
            return f.write_str("*");
        }
        for (i, s) in self.spans.iter().enumerate() {
            if i > 0 {
                f.write_str(" u ")?;
            }
            if s.lo == s.hi {
                write!(f, "{{{}}}", s.lo)?;
            } else {
                write!(f, "[{}, {}]", s.lo, s.hi)?;
            }
        }
        Ok(())
    }
}

/// Narrow both sides of `l REL r` under the assumption the relation holds.
/// Either returned range may be empty, which the caller must treat as an
/// infeasible path.
pub fn narrow_relation(op: RelOp, l: &IntRange, r: &IntRange) -> (IntRange, IntRange) {
    if l.is_empty() || r.is_empty() {
        return (IntRange::empty(l.width()), IntRange::empty(r.width()));
    }
    match op {
        RelOp::Eq => (l.intersect(r), r.intersect(l)),
        RelOp::Ne => {
            let nl = match r.as_point() {
                Some(p) => l.without(p),
                None => l.clone(),
            };
            let nr = match l.as_point() {
                Some(p) => r.without(p),
                None => r.clone(),
            };
            (nl, nr)
        }
        RelOp::Lt => {
            let nl = match r.max().unwrap_or(0).checked_sub(1) {
                Some(hi) => l.intersect(&IntRange::at_most(l.width(), hi)),
                None => IntRange::empty(l.width()),
            };
            let nr = match l.min().unwrap_or(0).checked_add(1) {
                Some(lo) => r.intersect(&IntRange::at_least(r.width(), lo)),
                None => IntRange::empty(r.width()),
            };
            (nl, nr)
        }
        RelOp::Le => (
            l.intersect(&IntRange::at_most(l.width(), r.max().unwrap_or(0))),
            r.intersect(&IntRange::at_least(r.width(), l.min().unwrap_or(0))),
        ),
        RelOp::Gt => {
            let (nr, nl) = narrow_relation(RelOp::Lt, r, l);
            (nl, nr)
        }
        RelOp::Ge => {
            let (nr, nl) = narrow_relation(RelOp::Le, r, l);
            (nl, nr)
        }
    }
}
