//! Single-pass CST walk producing a [`FileExtraction`] (spec §4.4).
//!
//! One scope-tracking walk over the parsed file collects every symbol fact
//! at once: a stack of enclosing class/function scopes plus a local
//! type-environment (name -> constructor or return-type annotation) threaded
//! through the walk so method calls and constructor calls can resolve
//! against what's in scope without a second pass.

use std::collections::HashMap;

use exctrace_core::identity::FunctionKey;
use exctrace_core::model::{
    CallSite, CatchSite, ClassDef, FileExtraction, FunctionDef, RaiseSite, ResolutionKind,
    CATCH_ALL_SENTINEL,
};
use tree_sitter::Node;

use crate::cst;
use crate::detectors::{self, FrameworkConfig};
use crate::imports;

/// Bare name of the synthetic function key used for code at module scope
/// (top-level statements, including the `if __name__ == "__main__":` body).
pub const MODULE_SCOPE_NAME: &str = "<module>";

/// A local name bound in the type environment, tagged with how it got there.
/// Both a literal `x = C()` call and a parameter annotation `def f(x: C)`
/// bind as `Constructor` — the name reflects intent, not mechanism (spec
/// §4.4) — while propagating a callee's declared return type binds as
/// `ReturnType`, which later drops resolution confidence a notch.
#[derive(Debug, Clone)]
enum Binding {
    Constructor(String),
    ReturnType(String),
}

impl Binding {
    fn class_qualified(&self) -> &str {
        match self {
            Binding::Constructor(c) | Binding::ReturnType(c) => c,
        }
    }

    fn resolution_kind(&self) -> ResolutionKind {
        match self {
            Binding::Constructor(_) => ResolutionKind::Constructor,
            Binding::ReturnType(_) => ResolutionKind::ReturnType,
        }
    }
}

pub fn extract_file(file: &str, source: &str, frameworks: &[FrameworkConfig]) -> FileExtraction {
    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&tree_sitter_python::LANGUAGE.into()).is_err() {
        return FileExtraction::empty_with_diagnostic(file, "failed to initialize parser");
    }
    let Some(tree) = parser.parse(source, None) else {
        return FileExtraction::empty_with_diagnostic(file, "parser produced no tree");
    };
    let bytes = source.as_bytes();
    let root = tree.root_node();

    let import_map = imports::build_import_map(root, bytes);
    let (entrypoints, handlers) = detectors::run(root, bytes, file, frameworks);

    let mut walker = Walker::new(file, bytes, import_map.clone());
    walker.walk(root);

    let mut extraction = FileExtraction {
        file: file.to_string(),
        functions: walker.functions,
        classes: walker.classes,
        raises: walker.raises,
        catches: walker.catches,
        calls: walker.calls,
        imports: import_map,
        entrypoints,
        handlers,
        diagnostics: walker.diagnostics,
    };
    extraction.sort_deterministically();
    extraction
}

struct Walker<'a> {
    file: String,
    source: &'a [u8],
    import_map: exctrace_core::model::ImportMap,

    /// Names pushed for every class/function scope entered, used to build
    /// dotted qualified names (spec §3 FunctionKey: "qualified_name is the
    /// dotted path of nested classes plus the function's own name").
    scope_names: Vec<String>,
    /// Qualified name of each enclosing class, for `self.` resolution.
    class_qualified_stack: Vec<String>,
    /// Key of the function currently being walked; module-level code uses
    /// the synthetic `<module>` key.
    function_stack: Vec<FunctionKey>,
    /// One local-name -> binding map per open function scope.
    type_envs: Vec<HashMap<String, Binding>>,
    /// Bound name of the innermost currently-open `except ... as name:`.
    reraise_stack: Vec<Option<String>>,
    /// Classes defined so far in this file, for resolving `x = C(...)`.
    local_classes: Vec<String>,
    /// bare function name -> return type annotation, for the return-type
    /// constructor-binding rule.
    return_types: HashMap<String, String>,

    functions: Vec<FunctionDef>,
    classes: Vec<ClassDef>,
    raises: Vec<RaiseSite>,
    catches: Vec<CatchSite>,
    calls: Vec<CallSite>,
    diagnostics: Vec<String>,
}

impl<'a> Walker<'a> {
    fn new(file: &str, source: &'a [u8], import_map: exctrace_core::model::ImportMap) -> Self {
        let module_key = FunctionKey::new(file.to_string(), MODULE_SCOPE_NAME.to_string());
        Walker {
            file: file.to_string(),
            source,
            import_map,
            scope_names: Vec::new(),
            class_qualified_stack: Vec::new(),
            function_stack: vec![module_key],
            type_envs: vec![HashMap::new()],
            reraise_stack: Vec::new(),
            local_classes: Vec::new(),
            return_types: HashMap::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            raises: Vec::new(),
            catches: Vec::new(),
            calls: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn text(&self, node: Node) -> &'a str {
        cst::text(node, self.source)
    }

    fn qualified_name(&self, name: &str) -> String {
        if self.scope_names.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.scope_names.join("."), name)
        }
    }

    fn current_function_key(&self) -> FunctionKey {
        self.function_stack
            .last()
            .cloned()
            .unwrap_or_else(|| FunctionKey::new(self.file.clone(), MODULE_SCOPE_NAME.to_string()))
    }

    fn current_type_env(&self) -> &HashMap<String, Binding> {
        self.type_envs.last().expect("module scope env always present")
    }

    fn walk(&mut self, node: Node<'a>) {
        match node.kind() {
            "class_definition" => self.visit_class(node),
            "function_definition" => self.visit_function(node),
            "decorated_definition" => self.visit_decorated(node),
            "assignment" => {
                self.visit_assignment(node);
                self.walk_children(node);
            }
            "raise_statement" => {
                self.visit_raise(node);
                self.walk_children(node);
            }
            "try_statement" => self.visit_try(node),
            "call" => {
                self.visit_call(node);
                self.walk_children(node);
            }
            _ => self.walk_children(node),
        }
    }

    fn walk_children(&mut self, node: Node<'a>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child);
        }
    }

    /// Decorators are calls but never emit a CallSite for the surrounding
    /// function (spec §4.4 edge case); only the wrapped definition is
    /// walked normally.
    fn visit_decorated(&mut self, node: Node<'a>) {
        if let Some(def) = node.child_by_field_name("definition") {
            self.walk(def);
        }
    }

    fn visit_class(&mut self, node: Node<'a>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let qualified_name = self.qualified_name(&name);
        let line = cst::line_of(node);

        let base_names = node
            .child_by_field_name("superclasses")
            .map(|args| {
                cst::positional_args(args, self.source)
                    .into_iter()
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        self.classes.push(ClassDef {
            file: self.file.clone(),
            line,
            name,
            qualified_name: qualified_name.clone(),
            base_names,
            is_exception: false,
        });
        self.local_classes.push(qualified_name.clone());

        self.scope_names.push(qualified_name.clone());
        self.class_qualified_stack.push(qualified_name);
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body);
        }
        self.class_qualified_stack.pop();
        self.scope_names.pop();
    }

    fn visit_function(&mut self, node: Node<'a>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let qualified_name = self.qualified_name(&name);
        let line = cst::line_of(node);
        let containing_class = self.class_qualified_stack.last().cloned();
        let return_type = node
            .child_by_field_name("return_type")
            .map(|n| self.text(n).to_string());

        if let Some(rt) = &return_type {
            self.return_types.insert(name.clone(), rt.clone());
        }

        self.functions.push(FunctionDef {
            file: self.file.clone(),
            line,
            name: name.clone(),
            qualified_name: qualified_name.clone(),
            containing_class,
            return_type,
        });

        let mut env = HashMap::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            self.collect_param_annotations(params, &mut env);
        }

        self.function_stack
            .push(FunctionKey::new(self.file.clone(), qualified_name.clone()));
        self.type_envs.push(env);
        self.scope_names.push(name);

        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body);
        }

        self.scope_names.pop();
        self.type_envs.pop();
        self.function_stack.pop();
    }

    fn collect_param_annotations(&self, params: Node<'a>, env: &mut HashMap<String, Binding>) {
        let mut cursor = params.walk();
        for param in params.children(&mut cursor) {
            match param.kind() {
                "typed_parameter" | "typed_default_parameter" => {
                    let Some(name_node) = param.child(0) else { continue };
                    let Some(type_node) = param.child_by_field_name("type") else { continue };
                    env.insert(
                        self.text(name_node).to_string(),
                        Binding::Constructor(self.text(type_node).to_string()),
                    );
                }
                _ => {}
            }
        }
    }

    /// `x = Expr`. Binds `x` in the local type environment when the RHS is
    /// a bare-call constructor of a known class, or a call whose resolved
    /// callee has a known return-type annotation (spec §4.4).
    fn visit_assignment(&mut self, node: Node<'a>) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        let Some(right) = node.child_by_field_name("right") else {
            return;
        };
        if left.kind() != "identifier" || right.kind() != "call" {
            return;
        }
        let target = self.text(left).to_string();
        let Some((object, name, _args)) = cst::decompose_call(right, self.source) else {
            return;
        };
        if object.is_some() {
            // Only bare-name constructor calls bind the local type env
            // directly; attribute calls are left to the return-type rule
            // below when the callee's return type is known.
            return;
        }

        if let Some(class_qualified) = self.resolve_class_name(name) {
            self.type_envs
                .last_mut()
                .expect("module scope env always present")
                .insert(target, Binding::Constructor(class_qualified));
            return;
        }

        if let Some(return_type) = self.return_types.get(name) {
            self.type_envs
                .last_mut()
                .expect("module scope env always present")
                .insert(target, Binding::ReturnType(return_type.clone()));
        }
    }

    fn resolve_class_name(&self, name: &str) -> Option<String> {
        let suffix = format!(".{name}");
        if self
            .local_classes
            .iter()
            .any(|c| c.as_str() == name || c.ends_with(suffix.as_str()))
        {
            return Some(name.to_string());
        }
        self.import_map.resolve(name).map(|s| s.to_string())
    }

    fn visit_raise(&mut self, node: Node<'a>) {
        let line = cst::line_of(node);
        let function = self.current_function_key();

        let mut cursor = node.walk();
        let target = node
            .children(&mut cursor)
            .find(|c| !matches!(c.kind(), "raise" | "from"));

        let Some(target) = target else {
            // Bare `raise` re-raising the innermost caught exception.
            if let Some(Some(bound)) = self.reraise_stack.last() {
                self.raises.push(RaiseSite {
                    file: self.file.clone(),
                    line,
                    function,
                    exception_type: bound.clone(),
                    is_reraise: true,
                });
            }
            return;
        };

        match target.kind() {
            "call" => {
                if let Some((_object, name, _args)) = cst::decompose_call(target, self.source) {
                    let exception_type = self.import_map.resolve(name).unwrap_or(name).to_string();
                    self.raises.push(RaiseSite {
                        file: self.file.clone(),
                        line,
                        function,
                        exception_type,
                        is_reraise: false,
                    });
                }
            }
            "identifier" => {
                let name = self.text(target);
                let is_reraise = self
                    .reraise_stack
                    .last()
                    .and_then(|b| b.as_deref())
                    .is_some_and(|bound| bound == name);
                self.raises.push(RaiseSite {
                    file: self.file.clone(),
                    line,
                    function,
                    exception_type: name.to_string(),
                    is_reraise,
                });
            }
            _ => {
                self.raises.push(RaiseSite {
                    file: self.file.clone(),
                    line,
                    function,
                    exception_type: self.text(target).to_string(),
                    is_reraise: false,
                });
            }
        }
    }

    fn visit_try(&mut self, node: Node<'a>) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "except_clause" => self.visit_except_clause(child),
                _ => self.walk(child),
            }
        }
    }

    fn visit_except_clause(&mut self, node: Node<'a>) {
        let line = cst::line_of(node);
        let function = self.current_function_key();

        let mut value_node = None;
        let mut alias_node = None;
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for (i, child) in children.iter().enumerate() {
            match child.kind() {
                "identifier" | "attribute" | "tuple" if value_node.is_none() => {
                    value_node = Some(*child);
                }
                "as" => {
                    if let Some(next) = children.get(i + 1) {
                        alias_node = Some(*next);
                    }
                }
                _ => {}
            }
        }

        let caught_types = match value_node {
            None => vec![CATCH_ALL_SENTINEL.to_string()],
            Some(n) if n.kind() == "tuple" => {
                let mut cur = n.walk();
                n.named_children(&mut cur)
                    .map(|c| self.text(c).to_string())
                    .collect()
            }
            Some(n) => vec![self.text(n).to_string()],
        };
        let bound_name = alias_node.map(|n| self.text(n).to_string());

        self.catches.push(CatchSite {
            file: self.file.clone(),
            line,
            function,
            caught_types,
            bound_name: bound_name.clone(),
        });

        self.reraise_stack.push(bound_name);
        if let Some(body) = node.child_by_field_name("body") {
            self.walk(body);
        }
        self.reraise_stack.pop();
    }

    fn visit_call(&mut self, node: Node<'a>) {
        let Some((object, name, _args)) = cst::decompose_call(node, self.source) else {
            return;
        };
        let line = cst::line_of(node);
        let caller = self.current_function_key();

        let (callee_bare_name, is_method_call, callee_key, resolution_kind, import_origin) = match object {
            None => {
                if let Some(origin) = self.import_map.resolve(name) {
                    // The origin is a dotted module path (e.g. "a.f"); which
                    // file defines it isn't known until every file in the
                    // project has been extracted, so resolution to a real
                    // `FunctionKey` is deferred to assembly (see
                    // `assembly::resolve_import_origin`).
                    (name.to_string(), false, None, ResolutionKind::Import, Some(origin.to_string()))
                } else {
                    (name.to_string(), false, None, ResolutionKind::Unresolved, None)
                }
            }
            Some(object_name) if object_name == "self" => {
                if let Some(class_qualified) = self.class_qualified_stack.last() {
                    let key = FunctionKey::new(
                        self.file.clone(),
                        format!("{class_qualified}.{name}"),
                    );
                    (name.to_string(), true, Some(key), ResolutionKind::SelfMethod, None)
                } else {
                    (name.to_string(), true, None, ResolutionKind::Unresolved, None)
                }
            }
            Some(object_name) => {
                if let Some(binding) = self.current_type_env().get(object_name) {
                    let class_qualified = binding.class_qualified();
                    if class_qualified.contains('.') {
                        // The binding's class came from `import_map`, so it's
                        // a dotted module path (e.g. "svc.SvcA") rather than
                        // a class defined in this file; which file defines it
                        // is resolved the same way an imported function call
                        // is, at assembly time (`assembly::resolve_import_origin`).
                        let origin = format!("{class_qualified}.{name}");
                        (name.to_string(), true, None, binding.resolution_kind(), Some(origin))
                    } else {
                        let key = FunctionKey::new(self.file.clone(), format!("{class_qualified}.{name}"));
                        (name.to_string(), true, Some(key), binding.resolution_kind(), None)
                    }
                } else {
                    (name.to_string(), true, None, ResolutionKind::Unresolved, None)
                }
            }
        };

        self.calls.push(CallSite {
            file: self.file.clone(),
            line,
            caller,
            callee_bare_name,
            callee_key,
            is_method_call,
            resolution_kind,
            import_origin,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(src: &str) -> FileExtraction {
        extract_file("a.py", src, &[])
    }

    #[test]
    fn records_function_and_class_defs() {
        let fe = extract("class Foo:\n    def bar(self):\n        pass\n");
        assert_eq!(fe.classes.len(), 1);
        assert_eq!(fe.classes[0].qualified_name, "Foo");
        assert_eq!(fe.functions.len(), 1);
        assert_eq!(fe.functions[0].qualified_name, "Foo.bar");
        assert_eq!(fe.functions[0].containing_class.as_deref(), Some("Foo"));
    }

    #[test]
    fn nested_function_qualified_name_chains_scopes() {
        let fe = extract("def outer():\n    def inner():\n        pass\n");
        let inner = fe.functions.iter().find(|f| f.name == "inner").unwrap();
        assert_eq!(inner.qualified_name, "outer.inner");
    }

    #[test]
    fn raise_of_call_records_exception_type() {
        let fe = extract("def f():\n    raise ValueError(\"x\")\n");
        assert_eq!(fe.raises.len(), 1);
        assert_eq!(fe.raises[0].exception_type, "ValueError");
        assert!(!fe.raises[0].is_reraise);
    }

    #[test]
    fn bare_raise_inside_except_is_reraise_of_bound_name() {
        let fe = extract(
            "def f():\n    try:\n        g()\n    except KeyError as e:\n        raise\n",
        );
        let reraise = fe.raises.iter().find(|r| r.is_reraise).unwrap();
        assert_eq!(reraise.exception_type, "e");
    }

    #[test]
    fn except_with_bare_colon_uses_catch_all_sentinel() {
        let fe = extract("def f():\n    try:\n        g()\n    except:\n        pass\n");
        assert_eq!(fe.catches[0].caught_types, vec![CATCH_ALL_SENTINEL.to_string()]);
    }

    #[test]
    fn except_tuple_yields_multiple_caught_types() {
        let fe = extract(
            "def f():\n    try:\n        g()\n    except (KeyError, ValueError):\n        pass\n",
        );
        assert_eq!(fe.catches[0].caught_types.len(), 2);
    }

    #[test]
    fn self_method_call_resolves_within_class() {
        let fe = extract(
            "class C:\n    def run(self):\n        self.step()\n    def step(self):\n        pass\n",
        );
        let call = fe.calls.iter().find(|c| c.callee_bare_name == "step").unwrap();
        assert_eq!(call.resolution_kind, ResolutionKind::SelfMethod);
        assert_eq!(call.callee_key.as_ref().unwrap().qualified_name, "C.step");
    }

    #[test]
    fn constructor_assignment_resolves_method_call() {
        let fe = extract(
            "class Svc:\n    def run(self):\n        pass\ndef use():\n    s = Svc()\n    s.run()\n",
        );
        let call = fe.calls.iter().find(|c| c.callee_bare_name == "run").unwrap();
        assert_eq!(call.resolution_kind, ResolutionKind::Constructor);
        assert_eq!(call.callee_key.as_ref().unwrap().qualified_name, "Svc.run");
    }

    #[test]
    fn import_records_origin_for_later_cross_file_resolution() {
        // Extraction sees only one file at a time, so it cannot yet know
        // which file defines `a.f`; it records the dotted origin and leaves
        // `callee_key` for assembly to fill in once every file is known
        // (see `assembly::resolve_import_origin`).
        let fe = extract_file(
            "b.py",
            "from a import f\ndef g():\n    f()\n",
            &[],
        );
        let call = fe.calls.iter().find(|c| c.callee_bare_name == "f").unwrap();
        assert_eq!(call.resolution_kind, ResolutionKind::Import);
        assert!(call.callee_key.is_none());
        assert_eq!(call.import_origin.as_deref(), Some("a.f"));
    }

    #[test]
    fn return_type_binding_resolves_method_call_as_return_type_kind() {
        let fe = extract(
            "class Svc:\n    def run(self):\n        pass\ndef make() -> Svc:\n    pass\ndef use():\n    s = make()\n    s.run()\n",
        );
        let call = fe.calls.iter().find(|c| c.callee_bare_name == "run").unwrap();
        assert_eq!(call.resolution_kind, ResolutionKind::ReturnType);
        assert_eq!(call.callee_key.as_ref().unwrap().qualified_name, "Svc.run");
    }

    #[test]
    fn constructor_of_imported_class_defers_to_assembly() {
        // `Svc` comes from `import_map`, not `local_classes`, so the class
        // portion of the binding is a dotted module path; which file
        // actually defines `Svc.run` isn't known until assembly.
        let fe = extract_file(
            "caller.py",
            "from svc import Svc\ndef use():\n    s = Svc()\n    s.run()\n",
            &[],
        );
        let call = fe.calls.iter().find(|c| c.callee_bare_name == "run").unwrap();
        assert_eq!(call.resolution_kind, ResolutionKind::Constructor);
        assert!(call.callee_key.is_none());
        assert_eq!(call.import_origin.as_deref(), Some("svc.Svc.run"));
    }

    #[test]
    fn unresolved_call_has_no_callee_key() {
        let fe = extract("def f():\n    mystery()\n");
        let call = &fe.calls[0];
        assert!(call.callee_key.is_none());
        assert_eq!(call.resolution_kind, ResolutionKind::Unresolved);
    }

    #[test]
    fn parse_failure_yields_diagnostic_not_panic() {
        // tree-sitter is error-tolerant; this merely documents that even
        // heavily malformed input still returns a FileExtraction.
        let fe = extract("def (((((");
        assert_eq!(fe.file, "a.py");
    }
}
