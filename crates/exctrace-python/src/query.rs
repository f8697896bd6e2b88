//! Read-only queries over a [`ProgramModel`] and [`PropagationResult`]
//! (spec §4.8). Nothing here mutates either input; a query result is a
//! derived value, never cached beyond the call that produced it (spec §3
//! "Lifecycle").

use std::collections::{HashMap, HashSet};

use exctrace_core::identity::FunctionKey;
use exctrace_core::model::{
    CatchSite, Entrypoint, GlobalHandler, ProgramModel, RaiseSite, ResolutionKind,
    CATCH_ALL_SENTINEL,
};
use exctrace_core::propagation::{PropagatedRaise, PropagationResult};
use exctrace_core::types::ResolutionMode;
use serde::{Deserialize, Serialize};

use crate::graph::{CalleeRef, CallGraph};

/// Direction in which an exception name matched a [`CatchSite`] (spec §4.8
/// `find_catches`: "Clarify in output which direction matched").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchDirection {
    /// The catch names `exc_name` exactly (or its sentinel-all marker).
    Exact,
    /// `exc_name` is a subclass of the caught type.
    Subclass,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatchMatch {
    pub site: CatchSite,
    pub matched_caught_type: String,
    pub direction: MatchDirection,
}

/// `find_raises`: every [`RaiseSite`] whose exception name equals `exc_name`,
/// or (when `include_subclasses`) transitively subclasses it.
pub fn find_raises<'m>(
    model: &'m ProgramModel,
    exc_name: &str,
    include_subclasses: bool,
) -> Vec<&'m RaiseSite> {
    model
        .raises()
        .filter(|r| {
            r.exception_type == exc_name
                || (include_subclasses && model.hierarchy.is_subclass_of(&r.exception_type, exc_name))
        })
        .collect()
}

/// `find_catches`: a catch matches if it names `exc_name` directly, or (for
/// `include_subclasses`) `exc_name` is a subclass of the caught type —
/// catching a base catches its subclasses, not the reverse (spec §4.8).
pub fn find_catches(model: &ProgramModel, exc_name: &str, include_subclasses: bool) -> Vec<CatchMatch> {
    let mut out = Vec::new();
    for site in model.catches() {
        for caught in &site.caught_types {
            if caught == CATCH_ALL_SENTINEL {
                out.push(CatchMatch {
                    site: site.clone(),
                    matched_caught_type: caught.clone(),
                    direction: MatchDirection::Exact,
                });
                continue;
            }
            if caught == exc_name {
                out.push(CatchMatch {
                    site: site.clone(),
                    matched_caught_type: caught.clone(),
                    direction: MatchDirection::Exact,
                });
            } else if include_subclasses && model.hierarchy.is_subclass_of(exc_name, caught) {
                out.push(CatchMatch {
                    site: site.clone(),
                    matched_caught_type: caught.clone(),
                    direction: MatchDirection::Subclass,
                });
            }
        }
    }
    out
}

/// `find_callers`: reverse graph first, then (unless `strict`) append
/// name-fallback hits against the function's simple name (spec §4.8).
pub fn find_callers(
    graph: &CallGraph,
    key: &FunctionKey,
    mode: ResolutionMode,
) -> Vec<(FunctionKey, ResolutionKind)> {
    let mut out: Vec<(FunctionKey, ResolutionKind)> = graph
        .callers_of_key(key)
        .into_iter()
        .map(|(caller, edge)| (caller, edge.resolution_kind))
        .collect();

    if mode != ResolutionMode::Strict {
        for (caller, _edge) in graph.callers_of_unresolved_name(key.simple_name()) {
            if !out.iter().any(|(c, _)| c == &caller) {
                out.push((caller, ResolutionKind::NameFallback));
            }
        }
    }

    out.sort_by(|a, b| a.0.cmp(&b.0));
    out.dedup_by(|a, b| a.0 == b.0);
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExceptionEvidence {
    pub exception_type: String,
    pub evidence: Option<PropagatedRaise>,
}

/// `find_escapes`: direct lookup into the [`PropagationResult`] computed
/// under the queried mode (the propagator is memoized per mode at the CLI
/// layer, spec §4.8).
pub fn find_escapes(result: &PropagationResult, key: &FunctionKey) -> Vec<ExceptionEvidence> {
    let mut escapes: Vec<ExceptionEvidence> = result
        .escapes_for(key)
        .into_iter()
        .map(|exc| {
            let evidence = result.evidence_for(key, &exc).cloned();
            ExceptionEvidence {
                exception_type: exc,
                evidence,
            }
        })
        .collect();
    escapes.sort_by(|a, b| a.exception_type.cmp(&b.exception_type));
    escapes
}

/// One node of a `trace_function` DFS tree (spec §4.8): the function, its
/// own direct raises, the exceptions escaping its subtree, and children.
/// The second visit to a function in a cycle yields `cyclic: true` with no
/// children, rendered as "…(see above)" by the CLI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceNode {
    pub function: FunctionKey,
    pub direct_raises: Vec<String>,
    pub escapes: Vec<String>,
    pub cyclic: bool,
    pub children: Vec<TraceNode>,
}

pub const DEFAULT_MAX_TRACE_DEPTH: usize = 64;

/// DFS from `key` over the forward call graph, annotating each node with
/// its direct raises and the propagation result's escape set, cutting
/// cycles at the second visit and bounding depth (spec §4.8 `trace_function`).
pub fn trace_function(
    model: &ProgramModel,
    graph: &CallGraph,
    result: &PropagationResult,
    key: &FunctionKey,
    max_depth: usize,
) -> TraceNode {
    let mut visiting = HashSet::new();
    build_trace_node(model, graph, result, key, max_depth, &mut visiting)
}

fn build_trace_node(
    model: &ProgramModel,
    graph: &CallGraph,
    result: &PropagationResult,
    key: &FunctionKey,
    depth_remaining: usize,
    visiting: &mut HashSet<FunctionKey>,
) -> TraceNode {
    let direct_raises: Vec<String> = model
        .raises()
        .filter(|r| &r.function == key && !r.is_reraise)
        .map(|r| r.exception_type.clone())
        .collect();
    let mut escapes: Vec<String> = result.escapes_for(key).into_iter().collect();
    escapes.sort();

    if !visiting.insert(key.clone()) || depth_remaining == 0 {
        return TraceNode {
            function: key.clone(),
            direct_raises,
            escapes,
            cyclic: true,
            children: Vec::new(),
        };
    }

    let mut seen_children = HashSet::new();
    let mut children = Vec::new();
    for (callee_ref, _edge) in graph.forward_edges(key) {
        if let CalleeRef::Key(callee_key) = callee_ref {
            if seen_children.insert(callee_key.clone()) {
                children.push(build_trace_node(
                    model,
                    graph,
                    result,
                    &callee_key,
                    depth_remaining - 1,
                    visiting,
                ));
            }
        }
    }
    children.sort_by(|a, b| a.function.cmp(&b.function));

    visiting.remove(key);

    TraceNode {
        function: key.clone(),
        direct_raises,
        escapes,
        cyclic: false,
        children,
    }
}

/// Classification bucket for one escaping exception at one entrypoint
/// (spec §4.8 `audit_integration`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditBucket {
    FrameworkHandled,
    GlobalHandler,
    LocalCatch,
    Uncaught,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditException {
    pub exception_type: String,
    pub bucket: AuditBucket,
    pub evidence: Option<PropagatedRaise>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntrypointAudit {
    pub entrypoint: Entrypoint,
    pub function: Option<FunctionKey>,
    pub exceptions: Vec<AuditException>,
    /// A resolution failure (e.g. the entrypoint's function no longer
    /// exists) is recorded here rather than aborting the whole audit.
    pub resolution_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuditResult {
    pub entrypoints: Vec<EntrypointAudit>,
}

impl AuditResult {
    /// True iff any entrypoint has at least one `Uncaught` exception — the
    /// CI-mode audit-failure condition (spec §6 exit code 3).
    pub fn has_uncaught(&self) -> bool {
        self.entrypoints.iter().any(|e| {
            e.exceptions
                .iter()
                .any(|exc| exc.bucket == AuditBucket::Uncaught)
        })
    }
}

/// Framework-specific response-mapping and handler configuration consulted
/// by `audit_integration` (spec §4.8: "a name-based lookup, tolerant of
/// qualified/bare names").
#[derive(Debug, Clone, Default)]
pub struct Integration {
    /// Exception names (bare or qualified) the framework itself converts to
    /// a response without any user-registered handler, e.g. `HTTPException`.
    pub exception_responses: HashSet<String>,
    /// Additional base classes (from config's `handled_base_classes`) whose
    /// subclasses count as framework-handled.
    pub handled_base_classes: Vec<String>,
}

impl Integration {
    fn framework_handles(&self, model: &ProgramModel, exc: &str) -> bool {
        if self.exception_responses.contains(exc) || self.exception_responses.contains(bare_name(exc)) {
            return true;
        }
        self.handled_base_classes
            .iter()
            .any(|base| model.hierarchy.is_subclass_of(exc, base))
    }
}

fn bare_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

fn global_handler_catches(model: &ProgramModel, handlers: &[&GlobalHandler], exc: &str) -> bool {
    handlers.iter().any(|h| {
        h.exception_type == exc
            || h.exception_type == CATCH_ALL_SENTINEL
            || model.hierarchy.is_subclass_of(exc, &h.exception_type)
    })
}

/// `audit_integration`: resolve each entrypoint and partition its escape
/// set into framework-handled / global-handler / local-catch / uncaught
/// (spec §4.8). Entrypoints whose function can't be resolved are still
/// reported, with `resolution_error` set and an empty exception list — a
/// missing route handler shouldn't abort the whole audit (spec §7 policy:
/// internal-entity failures degrade rather than abort).
pub fn audit_integration(
    model: &ProgramModel,
    result: &PropagationResult,
    entrypoints: &[Entrypoint],
    integration: &Integration,
) -> AuditResult {
    let handlers: Vec<&GlobalHandler> = model.handlers().collect();

    let mut out = Vec::new();
    for ep in entrypoints {
        match resolve_entrypoint_function(model, ep) {
            Ok(key) => {
                let mut escapes = find_escapes(result, &key);
                escapes.sort_by(|a, b| a.exception_type.cmp(&b.exception_type));
                let local_catch = result
                    .per_function
                    .get(&key)
                    .map(|p| p.caught.clone())
                    .unwrap_or_default();

                let exceptions = escapes
                    .into_iter()
                    .map(|e| {
                        let bucket = if integration.framework_handles(model, &e.exception_type) {
                            AuditBucket::FrameworkHandled
                        } else if global_handler_catches(model, &handlers, &e.exception_type) {
                            AuditBucket::GlobalHandler
                        } else if local_catch.contains(&e.exception_type) {
                            AuditBucket::LocalCatch
                        } else {
                            AuditBucket::Uncaught
                        };
                        AuditException {
                            exception_type: e.exception_type,
                            bucket,
                            evidence: e.evidence,
                        }
                    })
                    .collect();

                out.push(EntrypointAudit {
                    entrypoint: ep.clone(),
                    function: Some(key),
                    exceptions,
                    resolution_error: None,
                });
            }
            Err(message) => out.push(EntrypointAudit {
                entrypoint: ep.clone(),
                function: None,
                exceptions: Vec::new(),
                resolution_error: Some(message),
            }),
        }
    }

    AuditResult { entrypoints: out }
}

/// Resolve an [`Entrypoint`]'s bare-or-class-qualified `function_name` to a
/// [`FunctionKey`] *within its own file* (spec §3: "resolved to a
/// FunctionKey at consumption time, not at detection time").
fn resolve_entrypoint_function(model: &ProgramModel, ep: &Entrypoint) -> Result<FunctionKey, String> {
    let direct = FunctionKey::new(ep.file.clone(), ep.function_name.clone());
    if model.known_keys.contains(&direct) {
        return Ok(direct);
    }
    let candidates = model.name_to_keys.get(&ep.function_name);
    let same_file: Vec<&FunctionKey> = candidates.iter().filter(|k| k.file == ep.file).collect();
    match same_file.len() {
        1 => Ok(same_file[0].clone()),
        0 => Err(format!(
            "entrypoint function '{}' not found in {}",
            ep.function_name, ep.file
        )),
        _ => Err(format!(
            "entrypoint function '{}' ambiguous in {}",
            ep.function_name, ep.file
        )),
    }
}

/// `routes_to_exception`: entrypoints whose escape set contains `exc_name`
/// (or, when `include_subclasses`, any subclass of it).
pub fn routes_to_exception<'m>(
    model: &'m ProgramModel,
    result: &PropagationResult,
    entrypoints: &'m [Entrypoint],
    exc_name: &str,
    include_subclasses: bool,
) -> Vec<&'m Entrypoint> {
    entrypoints
        .iter()
        .filter(|ep| {
            let Ok(key) = resolve_entrypoint_function(model, ep) else {
                return false;
            };
            result.escapes_for(&key).iter().any(|exc| {
                exc == exc_name || (include_subclasses && model.hierarchy.is_subclass_of(exc, exc_name))
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StatsResult {
    pub file_count: usize,
    pub function_count: usize,
    pub class_count: usize,
    pub raise_site_count: usize,
    pub catch_site_count: usize,
    pub call_site_count: usize,
    pub entrypoint_count: usize,
    pub exception_type_count: usize,
    pub diagnostic_count: usize,
}

pub fn stats(model: &ProgramModel) -> StatsResult {
    StatsResult {
        file_count: model.files.len(),
        function_count: model.functions().count(),
        class_count: model.classes().count(),
        raise_site_count: model.raises().count(),
        catch_site_count: model.catches().count(),
        call_site_count: model.calls().count(),
        entrypoint_count: model.entrypoints().count(),
        exception_type_count: model.hierarchy.get_all_exception_types().len(),
        diagnostic_count: model.files.iter().map(|f| f.diagnostics.len()).sum(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HierarchyEntry {
    pub qualified_name: String,
    pub base_names: Vec<String>,
    pub is_exception: bool,
}

/// `exceptions`: every registered class known to be an exception, plus its
/// immediate bases as written (spec §6 `exceptions` command).
pub fn exception_hierarchy(model: &ProgramModel) -> Vec<HierarchyEntry> {
    let mut by_name: HashMap<&str, &exctrace_core::model::ClassDef> = HashMap::new();
    for class in model.classes() {
        by_name.insert(class.qualified_name.as_str(), class);
    }

    let mut names = model.hierarchy.get_all_exception_types();
    names.sort();
    names
        .into_iter()
        .map(|name| {
            let base_names = by_name
                .get(name.as_str())
                .map(|c| c.base_names.clone())
                .unwrap_or_default();
            HierarchyEntry {
                qualified_name: name,
                base_names,
                is_exception: true,
            }
        })
        .collect()
}

/// `subclasses`: every class transitively subclassing `class_name`.
pub fn subclasses(model: &ProgramModel, class_name: &str) -> Vec<String> {
    let mut subs = model.hierarchy.get_subclasses(class_name);
    subs.sort();
    subs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::build_model;
    use crate::propagator::Propagator;
    use exctrace_core::config::Config;
    use std::fs;
    use tempfile::TempDir;

    fn model_from(files: &[(&str, &str)]) -> ProgramModel {
        let dir = TempDir::new().unwrap();
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).unwrap();
        }
        build_model(dir.path(), &Config::default(), None, &[]).unwrap()
    }

    #[test]
    fn find_raises_matches_exact_and_subclass() {
        let model = model_from(&[(
            "a.py",
            "class MyErr(ValueError): pass\ndef f():\n    raise MyErr()\ndef g():\n    raise ValueError()\n",
        )]);
        let exact = find_raises(&model, "MyErr", false);
        assert_eq!(exact.len(), 1);
        let with_subs = find_raises(&model, "ValueError", true);
        assert_eq!(with_subs.len(), 2);
    }

    #[test]
    fn find_catches_reports_subclass_direction() {
        let model = model_from(&[(
            "a.py",
            "class MyErr(ValueError): pass\ndef f():\n    try:\n        pass\n    except ValueError:\n        pass\n",
        )]);
        let matches = find_catches(&model, "MyErr", true);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].direction, MatchDirection::Subclass);
    }

    #[test]
    fn find_catches_without_subclasses_misses_base_catch() {
        let model = model_from(&[(
            "a.py",
            "class MyErr(ValueError): pass\ndef f():\n    try:\n        pass\n    except ValueError:\n        pass\n",
        )]);
        let matches = find_catches(&model, "MyErr", false);
        assert!(matches.is_empty());
    }

    #[test]
    fn find_callers_includes_name_fallback_in_default_mode_only() {
        let model = model_from(&[("a.py", "def f():\n    pass\ndef g():\n    f()\n")]);
        let graph = CallGraph::build(&model);
        let f = FunctionKey::new("a.py", "f");
        let callers = find_callers(&graph, &f, ResolutionMode::Default);
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].0, FunctionKey::new("a.py", "g"));
    }

    #[test]
    fn trace_function_breaks_cycles() {
        let model = model_from(&[(
            "a.py",
            "def f():\n    raise ValueError('x')\n    g()\ndef g():\n    f()\n",
        )]);
        let config = Config::default();
        let result = Propagator::new(&model, &config, ResolutionMode::Default, None).run();
        let graph = CallGraph::build(&model);
        let tree = trace_function(&model, &graph, &result, &FunctionKey::new("a.py", "f"), 10);
        // f -> g -> f(cyclic)
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].children.len(), 1);
        assert!(tree.children[0].children[0].cyclic);
    }

    #[test]
    fn audit_framework_handled_is_not_uncaught() {
        let model = model_from(&[(
            "a.py",
            "@app.get(\"/x\")\ndef h():\n    raise HTTPException(404)\n",
        )]);
        let config = Config::default();
        let result = Propagator::new(&model, &config, ResolutionMode::Default, None).run();
        let entrypoints: Vec<Entrypoint> = model.entrypoints().cloned().collect();
        assert_eq!(entrypoints.len(), 0); // no framework configured -> no detected entrypoint
        // Exercise audit_integration directly against a synthetic entrypoint
        // instead, since this model has no framework detectors wired in.
        let ep = Entrypoint {
            file: "a.py".to_string(),
            line: 1,
            function_name: "h".to_string(),
            kind: exctrace_core::model::EntrypointKind::HttpRoute,
            metadata: HashMap::new(),
        };
        let mut integration = Integration::default();
        integration.exception_responses.insert("HTTPException".to_string());
        let audit = audit_integration(&model, &result, &[ep], &integration);
        assert_eq!(audit.entrypoints.len(), 1);
        assert!(!audit.has_uncaught());
        assert_eq!(
            audit.entrypoints[0].exceptions[0].bucket,
            AuditBucket::FrameworkHandled
        );
    }

    #[test]
    fn audit_uncaught_when_nothing_handles_it() {
        let model = model_from(&[("a.py", "def h():\n    raise ValueError('x')\n")]);
        let config = Config::default();
        let result = Propagator::new(&model, &config, ResolutionMode::Default, None).run();
        let ep = Entrypoint {
            file: "a.py".to_string(),
            line: 1,
            function_name: "h".to_string(),
            kind: exctrace_core::model::EntrypointKind::HttpRoute,
            metadata: HashMap::new(),
        };
        let audit = audit_integration(&model, &result, &[ep], &Integration::default());
        assert!(audit.has_uncaught());
    }

    #[test]
    fn routes_to_exception_finds_matching_entrypoint() {
        let model = model_from(&[("a.py", "def h():\n    raise ValueError('x')\n")]);
        let config = Config::default();
        let result = Propagator::new(&model, &config, ResolutionMode::Default, None).run();
        let ep = Entrypoint {
            file: "a.py".to_string(),
            line: 1,
            function_name: "h".to_string(),
            kind: exctrace_core::model::EntrypointKind::HttpRoute,
            metadata: HashMap::new(),
        };
        let entrypoints = vec![ep];
        let hits = routes_to_exception(&model, &result, &entrypoints, "ValueError", false);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn stats_counts_every_fact_kind() {
        let model = model_from(&[("a.py", "def f():\n    raise ValueError('x')\n")]);
        let s = stats(&model);
        assert_eq!(s.file_count, 1);
        assert_eq!(s.function_count, 1);
        assert_eq!(s.raise_site_count, 1);
    }

    #[test]
    fn subclasses_lists_transitive_children() {
        let model = model_from(&[(
            "a.py",
            "class MyErr(ValueError): pass\nclass Deeper(MyErr): pass\n",
        )]);
        let subs = subclasses(&model, "ValueError");
        assert!(subs.contains(&"MyErr".to_string()));
        assert!(subs.contains(&"Deeper".to_string()));
    }
}
