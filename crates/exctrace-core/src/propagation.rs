//! Propagation-result records (spec §3 `PropagatedRaise`, `ResolutionEdge`,
//! `PropagationResult`). The fixpoint computation that produces these lives
//! in `exctrace-python::propagator`; this module only defines the shapes so
//! that both the propagator and the query engine (in separate crates, since
//! the query engine also lives in `exctrace-python`) and the CLI can share
//! them without a cyclic dependency on the language-specific crate.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::identity::FunctionKey;
use crate::model::{RaiseSite, ResolutionKind};
use crate::types::Confidence;

/// One hop of a propagated-raise call path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionEdge {
    pub caller: FunctionKey,
    pub callee: FunctionKey,
    pub resolution_kind: ResolutionKind,
    /// True when this hop required a heuristic (name-fallback, polymorphic
    /// expansion) rather than a structural resolution.
    pub heuristic: bool,
}

impl ResolutionEdge {
    pub fn is_heuristic_kind(kind: ResolutionKind) -> bool {
        matches!(kind, ResolutionKind::NameFallback | ResolutionKind::Polymorphic)
    }
}

/// Evidence for one exception type escaping one function: the originating
/// raise, the ordered call path from the queried function down to that raise
/// site, and a derived confidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropagatedRaise {
    pub exception_type: String,
    pub origin: RaiseOrigin,
    pub call_path: Vec<ResolutionEdge>,
    pub confidence: Confidence,
}

/// Where a propagated exception actually originates: either a concrete
/// [`RaiseSite`] or a stub-declared leaf contribution (spec §4.3, §4.7 step 1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RaiseOrigin {
    Site(RaiseSite),
    Stub { module: String, function: String },
}

impl PropagatedRaise {
    pub fn hop_count(&self) -> usize {
        self.call_path.len()
    }

    /// Confidence derivation (spec §4.7): low if any hop is name-fallback or
    /// polymorphic, else medium if any hop is return-type, else high.
    pub fn derive_confidence(call_path: &[ResolutionEdge]) -> Confidence {
        if call_path
            .iter()
            .any(|e| ResolutionEdge::is_heuristic_kind(e.resolution_kind))
        {
            Confidence::Low
        } else if call_path
            .iter()
            .any(|e| e.resolution_kind == ResolutionKind::ReturnType)
        {
            Confidence::Medium
        } else {
            Confidence::High
        }
    }
}

/// Per-function propagation outcome: the escape set plus, for each escaping
/// type, the evidence chosen for display (shortest / highest-confidence
/// path), plus the precomputed local catch set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionPropagation {
    pub escapes: HashSet<String>,
    pub evidence: HashMap<String, PropagatedRaise>,
    pub caught: HashSet<String>,
}

/// Whole-session propagation outcome: one [`FunctionPropagation`] per
/// function key, plus any convergence warnings (spec §7 `ConvergenceWarning`).
#[derive(Debug, Clone, Default)]
pub struct PropagationResult {
    pub per_function: HashMap<FunctionKey, FunctionPropagation>,
    pub iterations: usize,
    pub converged: bool,
}

impl PropagationResult {
    pub fn escapes_for(&self, key: &FunctionKey) -> HashSet<String> {
        self.per_function
            .get(key)
            .map(|p| p.escapes.clone())
            .unwrap_or_default()
    }

    pub fn evidence_for(&self, key: &FunctionKey, exc: &str) -> Option<&PropagatedRaise> {
        self.per_function.get(key).and_then(|p| p.evidence.get(exc))
    }
}
