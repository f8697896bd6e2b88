//! Call-graph construction and the fixpoint propagation of escaping
//! exception types (spec §4.7).
//!
//! A monotonic fixpoint over the call graph: repeated passes push each
//! function's direct raises (minus local catches) up to its callers until a
//! pass changes nothing, bounded by a max-iteration guard so a pathological
//! graph degrades to a logged non-convergence warning instead of hanging.

use std::collections::{HashMap, HashSet};

use exctrace_core::config::Config;
use exctrace_core::hierarchy::ExceptionHierarchy;
use exctrace_core::identity::FunctionKey;
use exctrace_core::model::{ProgramModel, ResolutionKind, CATCH_ALL_SENTINEL};
use exctrace_core::propagation::{
    FunctionPropagation, PropagatedRaise, PropagationResult, RaiseOrigin, ResolutionEdge,
};
use exctrace_core::stubs::StubLibrary;
use exctrace_core::types::ResolutionMode;

use crate::graph::{CallGraph, CalleeRef};

/// Large but finite: convergence is guaranteed by monotonicity over a finite
/// exception-name universe, this guard only protects against a modeling bug.
const MAX_ITERATIONS: usize = 100;

/// A function's locally caught exception names, or the "catches everything"
/// sentinel from a bare `except:`.
#[derive(Debug, Clone)]
enum LocalCatchSet {
    All,
    Named(HashSet<String>),
}

impl LocalCatchSet {
    fn catches(&self, exc: &str) -> bool {
        match self {
            LocalCatchSet::All => true,
            LocalCatchSet::Named(set) => set.contains(exc),
        }
    }

    fn materialize(&self, universe: &HashSet<String>) -> HashSet<String> {
        match self {
            LocalCatchSet::All => universe.clone(),
            LocalCatchSet::Named(set) => set.clone(),
        }
    }
}

/// Runs the fixpoint over one [`ProgramModel`] under one resolution mode.
///
/// `aggressive` is treated as `default` (see DESIGN.md Open Question #1):
/// the fuzzy same-stem expansion the spec allows for `aggressive` has no
/// safe, deterministic implementation without a source of truth for "same
/// stem", so both modes keep every edge strict mode would drop.
pub struct Propagator<'a> {
    model: &'a ProgramModel,
    mode: ResolutionMode,
    stubs: Option<&'a StubLibrary>,
    async_boundaries: &'a [String],
    graph: CallGraph,
}

impl<'a> Propagator<'a> {
    pub fn new(
        model: &'a ProgramModel,
        config: &'a Config,
        mode: ResolutionMode,
        stubs: Option<&'a StubLibrary>,
    ) -> Self {
        Propagator {
            model,
            mode,
            stubs,
            async_boundaries: &config.async_boundaries,
            graph: CallGraph::build(model),
        }
    }

    /// Full run with evidence-path construction, for `trace`/`find_escapes`.
    pub fn run(&self) -> PropagationResult {
        self.run_inner(true)
    }

    /// Escape sets only, skipping evidence construction (spec §4.7
    /// Performance notes), for pass/fail audits over large codebases.
    pub fn run_fast_audit(&self) -> PropagationResult {
        self.run_inner(false)
    }

    fn run_inner(&self, with_evidence: bool) -> PropagationResult {
        let hierarchy = &self.model.hierarchy;
        let local_catches = self.build_local_catches(hierarchy);
        let exception_universe = self.exception_universe();

        let mut escape: HashMap<FunctionKey, HashSet<String>> = HashMap::new();
        let mut evidence: HashMap<FunctionKey, HashMap<String, PropagatedRaise>> = HashMap::new();
        for key in &self.model.known_keys {
            escape.insert(key.clone(), HashSet::new());
            evidence.insert(key.clone(), HashMap::new());
        }

        for raise in self.model.raises() {
            if raise.is_reraise {
                continue;
            }
            if local_catches
                .get(&raise.function)
                .is_some_and(|c| c.catches(&raise.exception_type))
            {
                continue;
            }
            let set = escape.entry(raise.function.clone()).or_default();
            if set.insert(raise.exception_type.clone()) && with_evidence {
                evidence
                    .entry(raise.function.clone())
                    .or_default()
                    .insert(
                        raise.exception_type.clone(),
                        PropagatedRaise {
                            exception_type: raise.exception_type.clone(),
                            origin: RaiseOrigin::Site(raise.clone()),
                            call_path: Vec::new(),
                            confidence: PropagatedRaise::derive_confidence(&[]),
                        },
                    );
            }
        }

        let mut callers: Vec<FunctionKey> = self.model.known_keys.iter().cloned().collect();
        callers.sort();

        let mut iterations = 0;
        let mut converged = false;
        while iterations < MAX_ITERATIONS {
            iterations += 1;
            let mut changed = false;

            for caller in &callers {
                let local_catch = local_catches.get(caller);
                for (callee_ref, edge) in self.graph.forward_edges(caller) {
                    if self.severed_by_async_boundary(caller, &callee_ref) {
                        continue;
                    }

                    if let Some(stub_lib) = self.stubs {
                        apply_stub_contribution(
                            caller,
                            &callee_ref,
                            stub_lib,
                            local_catch,
                            with_evidence,
                            &mut escape,
                            &mut evidence,
                            &mut changed,
                        );
                    }

                    let (candidates, hop_kind) = self.expand_candidates(&callee_ref, edge.is_method_call, edge.resolution_kind);
                    if candidates.is_empty() {
                        continue;
                    }
                    if self.mode == ResolutionMode::Strict
                        && ResolutionEdge::is_heuristic_kind(hop_kind)
                    {
                        continue;
                    }

                    for candidate in &candidates {
                        if candidate == caller {
                            continue;
                        }
                        let callee_escapes = match escape.get(candidate) {
                            Some(set) => set.clone(),
                            None => continue,
                        };
                        for exc in callee_escapes {
                            if hierarchy_catches(hierarchy, local_catch, &exc) {
                                continue;
                            }
                            let inserted = escape.get_mut(caller).unwrap().insert(exc.clone());
                            if inserted {
                                changed = true;
                            }
                            if with_evidence {
                                let hop = ResolutionEdge {
                                    caller: caller.clone(),
                                    callee: candidate.clone(),
                                    resolution_kind: hop_kind,
                                    heuristic: ResolutionEdge::is_heuristic_kind(hop_kind),
                                };
                                let chosen = choose_evidence(
                                    &evidence,
                                    candidate,
                                    &exc,
                                    hop,
                                    &raise_for(self.model, candidate, &exc),
                                );
                                if let Some(candidate_pr) = chosen {
                                    let entry = evidence.entry(caller.clone()).or_default();
                                    let replace = match entry.get(&exc) {
                                        None => true,
                                        Some(existing) => {
                                            candidate_pr.hop_count() < existing.hop_count()
                                                || (candidate_pr.hop_count() == existing.hop_count()
                                                    && candidate_pr.confidence > existing.confidence)
                                        }
                                    };
                                    if replace {
                                        entry.insert(exc.clone(), candidate_pr);
                                        changed = true;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            if !changed {
                converged = true;
                break;
            }
        }

        let mut per_function = HashMap::new();
        for key in &self.model.known_keys {
            let caught = local_catches
                .get(key)
                .map(|c| c.materialize(&exception_universe))
                .unwrap_or_default();
            per_function.insert(
                key.clone(),
                FunctionPropagation {
                    escapes: escape.remove(key).unwrap_or_default(),
                    evidence: evidence.remove(key).unwrap_or_default(),
                    caught,
                },
            );
        }

        PropagationResult {
            per_function,
            iterations,
            converged,
        }
    }

    fn build_local_catches(&self, hierarchy: &ExceptionHierarchy) -> HashMap<FunctionKey, LocalCatchSet> {
        let mut local_catches: HashMap<FunctionKey, LocalCatchSet> = HashMap::new();
        for catch in self.model.catches() {
            let entry = local_catches
                .entry(catch.function.clone())
                .or_insert_with(|| LocalCatchSet::Named(HashSet::new()));
            if matches!(entry, LocalCatchSet::All) {
                continue;
            }
            if catch.caught_types.iter().any(|t| t == CATCH_ALL_SENTINEL) {
                *entry = LocalCatchSet::All;
                continue;
            }
            if let LocalCatchSet::Named(set) = entry {
                for caught_type in &catch.caught_types {
                    set.extend(hierarchy.expand_with_subclasses(caught_type));
                }
            }
        }
        local_catches
    }

    fn exception_universe(&self) -> HashSet<String> {
        let mut universe: HashSet<String> = self.model.raises().map(|r| r.exception_type.clone()).collect();
        if let Some(stub_lib) = self.stubs {
            for source in stub_lib.sources() {
                for excs in source.functions.values() {
                    universe.extend(excs.iter().cloned());
                }
            }
        }
        universe
    }

    fn severed_by_async_boundary(&self, caller: &FunctionKey, callee_ref: &CalleeRef) -> bool {
        if self.async_boundaries.is_empty() {
            return false;
        }
        let _ = caller;
        let (bare, qualified): (&str, Option<&str>) = match callee_ref {
            CalleeRef::Key(k) => (k.simple_name(), Some(k.qualified_name.as_str())),
            CalleeRef::Name(n) => (n.as_str(), None),
        };
        self.async_boundaries
            .iter()
            .any(|pattern| pattern == bare || Some(pattern.as_str()) == qualified)
    }

    fn expand_candidates(
        &self,
        callee_ref: &CalleeRef,
        is_method_call: bool,
        edge_kind: ResolutionKind,
    ) -> (Vec<FunctionKey>, ResolutionKind) {
        match callee_ref {
            CalleeRef::Key(key) => {
                if self.model.known_keys.contains(key) {
                    (vec![key.clone()], edge_kind)
                } else {
                    self.expand_unresolved_method_key(key, is_method_call, edge_kind)
                }
            }
            CalleeRef::Name(name) => {
                let matches = self.model.name_to_keys.get(name);
                match matches.len() {
                    0 => (Vec::new(), ResolutionKind::NameFallback),
                    1 => (vec![matches[0].clone()], ResolutionKind::NameFallback),
                    _ => {
                        let kind = if is_method_call {
                            ResolutionKind::Polymorphic
                        } else {
                            ResolutionKind::NameFallback
                        };
                        (matches.to_vec(), kind)
                    }
                }
            }
        }
    }

    /// A `self.`/constructor-resolved key that doesn't name a real function
    /// (e.g. `self._step()` inside a base class whose own body never
    /// defines `_step`, only its subclasses do). Two cases, tried in order:
    ///
    /// 1. Exactly one ancestor of the key's class defines the method
    ///    directly — ordinary inheritance, resolved unambiguously, kept at
    ///    the original resolution kind.
    /// 2. Otherwise, every subclass of the key's class that defines the
    ///    method is a possible dynamic-dispatch target (spec S6's
    ///    "polymorphic resolution"), each a separate low-confidence hop.
    fn expand_unresolved_method_key(
        &self,
        key: &FunctionKey,
        is_method_call: bool,
        edge_kind: ResolutionKind,
    ) -> (Vec<FunctionKey>, ResolutionKind) {
        if !is_method_call {
            return (Vec::new(), ResolutionKind::Unresolved);
        }
        let Some((owner_class, method)) = key.qualified_name.rsplit_once('.') else {
            return (Vec::new(), ResolutionKind::Unresolved);
        };
        let candidates = self.model.name_to_keys.get(method);

        let ancestors: Vec<FunctionKey> = candidates
            .iter()
            .filter(|c| {
                c.qualified_name.rsplit_once('.').is_some_and(|(owner, m)| {
                    m == method && owner != owner_class && self.model.hierarchy.is_subclass_of(owner_class, owner)
                })
            })
            .cloned()
            .collect();
        if ancestors.len() == 1 {
            return (ancestors, edge_kind);
        }

        let subclasses = self.model.hierarchy.get_subclasses(owner_class);
        let overrides: Vec<FunctionKey> = candidates
            .iter()
            .filter(|c| {
                c.qualified_name
                    .rsplit_once('.')
                    .is_some_and(|(owner, m)| m == method && subclasses.iter().any(|s| s == owner))
            })
            .cloned()
            .collect();
        if overrides.is_empty() {
            (Vec::new(), ResolutionKind::Unresolved)
        } else {
            (overrides, ResolutionKind::Polymorphic)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_stub_contribution(
    caller: &FunctionKey,
    callee_ref: &CalleeRef,
    stub_lib: &StubLibrary,
    local_catch: Option<&LocalCatchSet>,
    with_evidence: bool,
    escape: &mut HashMap<FunctionKey, HashSet<String>>,
    evidence: &mut HashMap<FunctionKey, HashMap<String, PropagatedRaise>>,
    changed: &mut bool,
) {
    let (bare, qualified): (&str, Option<&str>) = match callee_ref {
        CalleeRef::Key(k) => (k.simple_name(), Some(k.qualified_name.as_str())),
        CalleeRef::Name(n) => (n.as_str(), None),
    };
    let excs = stub_lib.get_exceptions(qualified, bare);
    if excs.is_empty() {
        return;
    }
    for exc in excs {
        if local_catch.is_some_and(|c| c.catches(&exc)) {
            continue;
        }
        let inserted = escape.entry(caller.clone()).or_default().insert(exc.clone());
        if inserted {
            *changed = true;
        }
        if with_evidence {
            let entry = evidence.entry(caller.clone()).or_default();
            if !entry.contains_key(&exc) {
                entry.insert(
                    exc.clone(),
                    PropagatedRaise {
                        exception_type: exc,
                        origin: RaiseOrigin::Stub {
                            module: qualified.unwrap_or_default().to_string(),
                            function: bare.to_string(),
                        },
                        call_path: Vec::new(),
                        confidence: PropagatedRaise::derive_confidence(&[]),
                    },
                );
                *changed = true;
            }
        }
    }
}

fn hierarchy_catches(
    hierarchy: &ExceptionHierarchy,
    local_catch: Option<&LocalCatchSet>,
    exc: &str,
) -> bool {
    match local_catch {
        None => false,
        Some(LocalCatchSet::All) => true,
        Some(LocalCatchSet::Named(set)) => {
            set.contains(exc) || set.iter().any(|caught| hierarchy.is_subclass_of(exc, caught))
        }
    }
}

/// Evidence already chosen for `exc` at `candidate`, if any, as the source
/// to extend with `hop` when building the caller's candidate path.
fn choose_evidence(
    evidence: &HashMap<FunctionKey, HashMap<String, PropagatedRaise>>,
    candidate: &FunctionKey,
    exc: &str,
    hop: ResolutionEdge,
    fallback_origin: &Option<RaiseOrigin>,
) -> Option<PropagatedRaise> {
    let existing = evidence.get(candidate).and_then(|m| m.get(exc));
    let (origin, mut path) = match existing {
        Some(pr) => (pr.origin.clone(), pr.call_path.clone()),
        None => (fallback_origin.clone()?, Vec::new()),
    };
    let heuristic_seen = hop.heuristic || path.iter().any(|e| e.heuristic);
    let return_type_seen =
        hop.resolution_kind == ResolutionKind::ReturnType || path.iter().any(|e| e.resolution_kind == ResolutionKind::ReturnType);
    let mut call_path = vec![hop];
    call_path.append(&mut path);
    let confidence = if heuristic_seen {
        exctrace_core::types::Confidence::Low
    } else if return_type_seen {
        exctrace_core::types::Confidence::Medium
    } else {
        exctrace_core::types::Confidence::High
    };
    Some(PropagatedRaise {
        exception_type: exc.to_string(),
        origin,
        call_path,
        confidence,
    })
}

/// Origin to fall back to when `candidate` has no recorded evidence yet
/// (can happen on the very first pass before its own evidence is filled in
/// within the same sweep); looks up a matching raise site directly.
fn raise_for(model: &ProgramModel, candidate: &FunctionKey, exc: &str) -> Option<RaiseOrigin> {
    model
        .raises()
        .find(|r| &r.function == candidate && r.exception_type == exc && !r.is_reraise)
        .map(|r| RaiseOrigin::Site(r.clone()))
}
