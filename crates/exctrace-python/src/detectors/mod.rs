//! Configurable pattern matchers that classify decorators, class bases, and
//! registration calls as entrypoints or global handlers.
//!
//! A small set of configured name patterns tested against CST shapes, with
//! no per-framework code path. A [`FrameworkConfig`] is pure data; adding a
//! framework means constructing one, never touching the walk in this
//! module.

pub mod fastapi;
pub mod flask;

use std::collections::HashMap;

use exctrace_core::model::{Entrypoint, EntrypointKind, GlobalHandler};
use tree_sitter::Node;

use crate::cst;

/// Where a [`DecoratorRoutePattern`] finds the HTTP method name.
#[derive(Debug, Clone)]
pub enum MethodSource {
    /// The decorator's attribute name itself, e.g. `@app.get(...)` -> `GET`.
    FromAttribute,
    /// A keyword argument, e.g. `@app.route(methods=["POST"])`.
    Keyword(&'static str),
}

#[derive(Debug, Clone)]
pub struct DecoratorRoutePattern {
    pub attribute_names: Vec<&'static str>,
    pub path_keyword: &'static str,
    pub method_source: MethodSource,
}

#[derive(Debug, Clone)]
pub struct ClassRoutePattern {
    pub base_names: Vec<&'static str>,
    pub http_methods: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct RegistrationCallPattern {
    pub call_attribute: &'static str,
    pub http_methods: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct HandlerPattern {
    pub decorator_attribute: Option<&'static str>,
    pub call_attribute: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct FrameworkConfig {
    pub name: &'static str,
    pub decorator_routes: Vec<DecoratorRoutePattern>,
    pub class_routes: Vec<ClassRoutePattern>,
    pub registration_calls: Vec<RegistrationCallPattern>,
    pub handlers: Vec<HandlerPattern>,
}

/// Run every configured framework's patterns plus the always-on CLI-script
/// detector over one file's tree, returning the entrypoints and global
/// handlers found (spec §4.5).
pub fn run(
    root: Node,
    source: &[u8],
    file: &str,
    frameworks: &[FrameworkConfig],
) -> (Vec<Entrypoint>, Vec<GlobalHandler>) {
    let mut entrypoints = Vec::new();
    let mut handlers = Vec::new();

    detect_cli_script(root, source, file, &mut entrypoints);

    let mut cursor = root.walk();
    walk(root, source, file, frameworks, &mut entrypoints, &mut handlers, &mut cursor);

    (entrypoints, handlers)
}

fn walk<'a>(
    node: Node<'a>,
    source: &[u8],
    file: &str,
    frameworks: &[FrameworkConfig],
    entrypoints: &mut Vec<Entrypoint>,
    handlers: &mut Vec<GlobalHandler>,
    cursor: &mut tree_sitter::TreeCursor<'a>,
) {
    match node.kind() {
        "decorated_definition" => {
            handle_decorated_definition(node, source, file, frameworks, entrypoints, handlers);
        }
        "class_definition" => {
            handle_class_definition(node, source, file, frameworks, entrypoints);
        }
        "call" => {
            handle_registration_or_handler_call(node, source, file, frameworks, entrypoints, handlers);
        }
        _ => {}
    }
    for child in node.children(cursor) {
        let mut child_cursor = child.walk();
        walk(child, source, file, frameworks, entrypoints, handlers, &mut child_cursor);
    }
}

fn method_upper(attr: &str) -> String {
    attr.to_uppercase()
}

fn handle_decorated_definition(
    node: Node,
    source: &[u8],
    file: &str,
    frameworks: &[FrameworkConfig],
    entrypoints: &mut Vec<Entrypoint>,
    handlers: &mut Vec<GlobalHandler>,
) {
    let Some(def) = node.child_by_field_name("definition") else {
        return;
    };
    if def.kind() != "function_definition" {
        return;
    }
    let Some(name_node) = def.child_by_field_name("name") else {
        return;
    };
    let function_name = cst::text(name_node, source).to_string();
    let line = cst::line_of(node);

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "decorator" {
            continue;
        }
        let Some(expr) = child.named_child(0) else {
            continue;
        };
        let call = if expr.kind() == "call" { Some(expr) } else { None };
        let Some(call) = call else { continue };
        let Some((Some(_object), attr, args)) = cst::decompose_call(call, source) else {
            continue;
        };

        for fw in frameworks {
            for pattern in &fw.decorator_routes {
                if !pattern.attribute_names.contains(&attr) {
                    continue;
                }
                let path = args
                    .and_then(|a| cst::keyword_arg(a, source, pattern.path_keyword))
                    .or_else(|| args.and_then(|a| cst::first_positional(a, source)))
                    .map(cst::unquote)
                    .unwrap_or_default();
                let method = match &pattern.method_source {
                    MethodSource::FromAttribute => method_upper(attr),
                    MethodSource::Keyword(kw) => args
                        .and_then(|a| cst::keyword_arg(a, source, kw))
                        .map(cst::unquote)
                        .unwrap_or_else(|| "GET".to_string()),
                };
                let mut metadata = HashMap::new();
                metadata.insert("framework".to_string(), fw.name.to_string());
                metadata.insert("method".to_string(), method);
                metadata.insert("path".to_string(), path);
                entrypoints.push(Entrypoint {
                    file: file.to_string(),
                    line,
                    function_name: function_name.clone(),
                    kind: EntrypointKind::HttpRoute,
                    metadata,
                });
            }

            for pattern in &fw.handlers {
                if pattern.decorator_attribute != Some(attr) {
                    continue;
                }
                let exc = args
                    .and_then(|a| cst::first_positional(a, source))
                    .unwrap_or("Exception")
                    .to_string();
                handlers.push(GlobalHandler {
                    file: file.to_string(),
                    line,
                    handler_function: function_name.clone(),
                    exception_type: exc,
                });
            }
        }
    }
}

fn handle_class_definition(
    node: Node,
    source: &[u8],
    file: &str,
    frameworks: &[FrameworkConfig],
    entrypoints: &mut Vec<Entrypoint>,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let class_name = cst::text(name_node, source).to_string();
    let base_names = super_class_names(node, source);

    for fw in frameworks {
        for pattern in &fw.class_routes {
            if !base_names.iter().any(|b| pattern.base_names.contains(&b.as_str())) {
                continue;
            }
            let Some(body) = node.child_by_field_name("body") else {
                continue;
            };
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                if child.kind() != "function_definition" {
                    continue;
                }
                let Some(method_name_node) = child.child_by_field_name("name") else {
                    continue;
                };
                let method_name = cst::text(method_name_node, source);
                if !pattern.http_methods.contains(&method_name) {
                    continue;
                }
                let mut metadata = HashMap::new();
                metadata.insert("framework".to_string(), fw.name.to_string());
                metadata.insert("method".to_string(), method_upper(method_name));
                entrypoints.push(Entrypoint {
                    file: file.to_string(),
                    line: cst::line_of(child),
                    function_name: format!("{class_name}.{method_name}"),
                    kind: EntrypointKind::HttpRoute,
                    metadata,
                });
            }
        }
    }
}

fn super_class_names(class_node: Node, source: &[u8]) -> Vec<String> {
    let Some(superclasses) = class_node.child_by_field_name("superclasses") else {
        return Vec::new();
    };
    cst::positional_args(superclasses, source)
        .into_iter()
        .map(|s| s.to_string())
        .collect()
}

fn handle_registration_or_handler_call(
    node: Node,
    source: &[u8],
    file: &str,
    frameworks: &[FrameworkConfig],
    entrypoints: &mut Vec<Entrypoint>,
    handlers: &mut Vec<GlobalHandler>,
) {
    let Some((_object, attr, args)) = cst::decompose_call(node, source) else {
        return;
    };
    let Some(args) = args else { return };
    let line = cst::line_of(node);

    for fw in frameworks {
        for pattern in &fw.registration_calls {
            if pattern.call_attribute != attr {
                continue;
            }
            let positional = cst::positional_args(args, source);
            let Some(class_ref) = positional.first() else {
                continue;
            };
            for method in &pattern.http_methods {
                let mut metadata = HashMap::new();
                metadata.insert("framework".to_string(), fw.name.to_string());
                metadata.insert("method".to_string(), method_upper(method));
                entrypoints.push(Entrypoint {
                    file: file.to_string(),
                    line,
                    function_name: format!("{class_ref}.{method}"),
                    kind: EntrypointKind::HttpRoute,
                    metadata,
                });
            }
        }

        for pattern in &fw.handlers {
            if pattern.call_attribute != Some(attr) {
                continue;
            }
            let positional = cst::positional_args(args, source);
            let (Some(exc), Some(handler_fn)) = (positional.first(), positional.get(1)) else {
                continue;
            };
            handlers.push(GlobalHandler {
                file: file.to_string(),
                line,
                handler_function: (*handler_fn).to_string(),
                exception_type: (*exc).to_string(),
            });
        }
    }
}

/// Every file containing `if __name__ == "__main__":` gets one synthetic
/// CLI-script entrypoint bound to that block (spec §4.4 edge case).
fn detect_cli_script(root: Node, source: &[u8], file: &str, entrypoints: &mut Vec<Entrypoint>) {
    let mut cursor = root.walk();
    find_main_guard(root, source, file, entrypoints, &mut cursor);
}

fn find_main_guard<'a>(
    node: Node<'a>,
    source: &[u8],
    file: &str,
    entrypoints: &mut Vec<Entrypoint>,
    cursor: &mut tree_sitter::TreeCursor<'a>,
) {
    if node.kind() == "if_statement" {
        if let Some(condition) = node.child_by_field_name("condition") {
            if is_name_main_guard(condition, source) {
                entrypoints.push(Entrypoint {
                    file: file.to_string(),
                    line: cst::line_of(node),
                    function_name: "<module>".to_string(),
                    kind: EntrypointKind::CliScript,
                    metadata: HashMap::new(),
                });
            }
        }
    }
    for child in node.children(cursor) {
        let mut child_cursor = child.walk();
        find_main_guard(child, source, file, entrypoints, &mut child_cursor);
    }
}

fn is_name_main_guard(condition: Node, source: &[u8]) -> bool {
    if condition.kind() != "comparison_operator" {
        return false;
    }
    let text = cst::text(condition, source);
    text.contains("__name__") && (text.contains("\"__main__\"") || text.contains("'__main__'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (tree_sitter::Tree, Vec<u8>) {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        let tree = parser.parse(src, None).unwrap();
        (tree, src.as_bytes().to_vec())
    }

    #[test]
    fn detects_cli_script_guard() {
        let (tree, src) = parse("if __name__ == \"__main__\":\n    pass\n");
        let (entrypoints, _) = run(tree.root_node(), &src, "a.py", &[]);
        assert_eq!(entrypoints.len(), 1);
        assert_eq!(entrypoints[0].kind, EntrypointKind::CliScript);
    }

    #[test]
    fn detects_flask_decorator_route() {
        let src = "@app.get(\"/x\")\ndef h():\n    pass\n";
        let (tree, src) = parse(src);
        let frameworks = vec![flask::config()];
        let (entrypoints, _) = run(tree.root_node(), &src, "a.py", &frameworks);
        assert_eq!(entrypoints.len(), 1);
        assert_eq!(entrypoints[0].function_name, "h");
        assert_eq!(entrypoints[0].metadata.get("method").unwrap(), "GET");
        assert_eq!(entrypoints[0].metadata.get("path").unwrap(), "/x");
    }

    #[test]
    fn detects_flask_errorhandler() {
        let src = "@app.errorhandler(ValueError)\ndef handle(e):\n    pass\n";
        let (tree, src) = parse(src);
        let frameworks = vec![flask::config()];
        let (_, handlers) = run(tree.root_node(), &src, "a.py", &frameworks);
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].exception_type, "ValueError");
    }

    #[test]
    fn detects_fastapi_route_method_from_attribute() {
        let src = "@router.post(\"/y\")\ndef create():\n    pass\n";
        let (tree, src) = parse(src);
        let frameworks = vec![fastapi::config()];
        let (entrypoints, _) = run(tree.root_node(), &src, "a.py", &frameworks);
        assert_eq!(entrypoints[0].metadata.get("method").unwrap(), "POST");
    }

    #[test]
    fn detects_class_based_route() {
        let src = "class MyView(APIView):\n    def get(self):\n        pass\n";
        let (tree, src) = parse(src);
        let frameworks = vec![flask::config()];
        let (entrypoints, _) = run(tree.root_node(), &src, "a.py", &frameworks);
        assert_eq!(entrypoints.len(), 1);
        assert_eq!(entrypoints[0].function_name, "MyView.get");
    }
}
