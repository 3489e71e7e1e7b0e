//! Analysis output: findings and per-position fact summaries.
//!
//! Everything here derives `Serialize` so a host's diagnostics layer can
//! consume results without depending on engine internals. Findings are
//! emitted in instruction order, and summary fact maps are key-sorted, so
//! output is reproducible run to run.

use crate::fact::{Fact, Nullability};
use crate::inst::{InstIndex, SourceRef};
use crate::range::IntRange;
use crate::state::StateSig;
use crate::value::ValueId;
use indexmap::IndexMap;
use serde::Serialize;

/// A provable control-flow fact worth surfacing to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FindingKind {
    /// Every state reaching the branch satisfied the condition: the
    /// false edge is dead.
    AlwaysTrue,
    /// Every state reaching the branch refuted the condition: the true
    /// edge is dead.
    AlwaysFalse,
    /// Every state reaching the branch contradicted both polarities; the
    /// branch is never executed with a satisfiable state.
    ContradictoryBranch,
}

/// One finding, anchored to the branch instruction that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub index: InstIndex,
    pub source: Option<SourceRef>,
}

/// What the analysis learned about one program position.
///
/// `facts` holds, per value, the join over all visiting states of that
/// value's fact, omitting entries that joined back to the value's
/// declaration-time default. An absent entry means "nothing beyond the
/// declaration".
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstrSummary {
    pub reachable: bool,
    pub visits: usize,
    /// Signatures of the distinct states that executed here, in
    /// exploration order.
    pub signatures: Vec<StateSig>,
    pub facts: IndexMap<ValueId, Fact>,
}

/// The converged result of one analysis run.
///
/// `summaries` has one entry per instruction plus a final entry for the
/// designated exit position.
#[derive(Debug, Serialize)]
pub struct Analysis {
    pub findings: Vec<Finding>,
    pub summaries: Vec<InstrSummary>,
    pub steps: usize,
}

impl Analysis {
    /// Summary of the designated exit position.
    pub fn exit(&self) -> &InstrSummary {
        // summaries is never empty: the runner always allocates len + 1.
        &self.summaries[self.summaries.len() - 1]
    }

    pub fn is_reachable(&self, index: InstIndex) -> bool {
        self.summaries.get(index).is_some_and(|s| s.reachable)
    }

    /// Joined range of `value` over all states visiting `index`, if any
    /// visit refined it beyond the declaration.
    pub fn range_at(&self, index: InstIndex, value: ValueId) -> Option<&IntRange> {
        self.summaries
            .get(index)?
            .facts
            .get(&value)
            .map(|f| &f.range)
    }

    /// Joined nullability of `value` at `index`; drives renderer hints.
    pub fn nullability_at(&self, index: InstIndex, value: ValueId) -> Option<Nullability> {
        self.summaries
            .get(index)?
            .facts
            .get(&value)
            .map(|f| f.nullability)
    }
}
