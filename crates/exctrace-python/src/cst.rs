//! Small tree-sitter node helpers shared by the extractor and the detector
//! framework. Nothing here is Python-specific beyond the grammar's node
//! kinds; it exists to avoid repeating the same field-lookup dance in both
//! places.

use tree_sitter::Node;

pub fn text<'a>(node: Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

pub fn line_of(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// Strip a Python string literal's quotes (and a leading string-prefix
/// letter like `f`/`r`/`b`) down to its raw text. Best-effort: used only to
/// read literal path/method arguments out of decorator calls.
pub fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.trim_start_matches(['f', 'F', 'r', 'R', 'b', 'B']);
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    trimmed.to_string()
}

/// Decompose a `call` node into `(object_text, callee_name, argument_list)`.
/// `object_text` is `None` for a bare name call (`foo()`), `Some(obj)` for
/// an attribute call (`obj.foo()`).
pub fn decompose_call<'a>(
    call: Node<'a>,
    source: &'a [u8],
) -> Option<(Option<&'a str>, &'a str, Option<Node<'a>>)> {
    let function = call.child_by_field_name("function")?;
    let arguments = call.child_by_field_name("arguments");
    match function.kind() {
        "identifier" => Some((None, text(function, source), arguments)),
        "attribute" => {
            let object = function.child_by_field_name("object")?;
            let attr = function.child_by_field_name("attribute")?;
            Some((Some(text(object, source)), text(attr, source), arguments))
        }
        _ => None,
    }
}

/// First positional argument of an `argument_list`, as raw source text.
pub fn first_positional<'a>(args: Node<'a>, source: &'a [u8]) -> Option<&'a str> {
    let mut cursor = args.walk();
    for child in args.children(&mut cursor) {
        match child.kind() {
            "(" | ")" | "," | "comment" => continue,
            "keyword_argument" => continue,
            _ => return Some(text(child, source)),
        }
    }
    None
}

/// Value text of a keyword argument named `name` inside an `argument_list`.
pub fn keyword_arg<'a>(args: Node<'a>, source: &'a [u8], name: &str) -> Option<&'a str> {
    let mut cursor = args.walk();
    for child in args.children(&mut cursor) {
        if child.kind() != "keyword_argument" {
            continue;
        }
        let key = child.child_by_field_name("name")?;
        if text(key, source) == name {
            let value = child.child_by_field_name("value")?;
            return Some(text(value, source));
        }
    }
    None
}

/// Every positional (non-keyword) argument's raw text, in order.
pub fn positional_args<'a>(args: Node<'a>, source: &'a [u8]) -> Vec<&'a str> {
    let mut cursor = args.walk();
    let mut out = Vec::new();
    for child in args.children(&mut cursor) {
        match child.kind() {
            "(" | ")" | "," | "comment" | "keyword_argument" => continue,
            _ => out.push(text(child, source)),
        }
    }
    out
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

    fn find_call<'a>(node: tree_sitter::Node<'a>, source: &'a [u8]) -> Option<tree_sitter::Node<'a>> {
        if node.kind() == "call" {
            return Some(node);
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if let Some(found) = find_call(child, source) {
                return Some(found);
            }
        }
        None
    }

    #[test]
    fn unquote_strips_simple_string() {
        assert_eq!(unquote("\"/path\""), "/path");
        assert_eq!(unquote("'/path'"), "/path");
    }

    #[test]
    fn decompose_attribute_call() {
        let (tree, src) = parse("app.get(\"/x\")\n");
        let call = find_call(tree.root_node(), &src).unwrap();
        let (object, name, args) = decompose_call(call, &src).unwrap();
        assert_eq!(object, Some("app"));
        assert_eq!(name, "get");
        assert!(args.is_some());
    }

    #[test]
    fn first_positional_skips_keywords() {
        let (tree, src) = parse("f(path=\"/x\", \"/y\")\n");
        let call = find_call(tree.root_node(), &src).unwrap();
        let (_, _, args) = decompose_call(call, &src).unwrap();
        assert_eq!(first_positional(args.unwrap(), &src), Some("\"/y\""));
    }

    #[test]
    fn keyword_arg_reads_named_value() {
        let (tree, src) = parse("f(path=\"/x\")\n");
        let call = find_call(tree.root_node(), &src).unwrap();
        let (_, _, args) = decompose_call(call, &src).unwrap();
        assert_eq!(keyword_arg(args.unwrap(), &src, "path"), Some("\"/x\""));
    }
}
