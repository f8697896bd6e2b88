//! Import-map construction: local name -> origin qualified name (spec §3
//! `ImportMap`). Feeds call-site resolution: a bare call to an imported name
//! resolves against the origin this map records for it.

use exctrace_core::model::ImportMap;
use tree_sitter::Node;

/// Walk the top-level `import_statement` / `import_from_statement` nodes of
/// a module and populate an [`ImportMap`].
///
/// - `import pkg.mod` binds both `pkg` (first segment, conservatively, only
///   when there's no more specific binding) and `pkg.mod` to `pkg.mod`.
/// - `import pkg.mod as m` binds `m` to `pkg.mod`.
/// - `from pkg.mod import foo` binds `foo` to `pkg.mod.foo`.
/// - `from pkg.mod import foo as f` binds `f` to `pkg.mod.foo`.
/// - `from pkg.mod import *` is recorded under the sentinel `*` key so
///   callers can note that any name might originate from `pkg.mod`.
pub fn build_import_map(root: Node, source: &[u8]) -> ImportMap {
    let mut map = ImportMap::default();
    let mut cursor = root.walk();
    visit(root, source, &mut map, &mut cursor);
    map
}

fn visit<'a>(
    node: Node<'a>,
    source: &[u8],
    map: &mut ImportMap,
    cursor: &mut tree_sitter::TreeCursor<'a>,
) {
    match node.kind() {
        "import_statement" => handle_import_statement(node, source, map),
        "import_from_statement" => handle_import_from_statement(node, source, map),
        _ => {}
    }
    for child in node.children(cursor) {
        let mut child_cursor = child.walk();
        visit(child, source, map, &mut child_cursor);
    }
}

fn text<'a>(node: Node<'a>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn handle_import_statement(node: Node, source: &[u8], map: &mut ImportMap) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "dotted_name" => {
                let dotted = text(child, source).to_string();
                bind_dotted_import(map, &dotted);
            }
            "aliased_import" => {
                if let (Some(name_node), Some(alias_node)) = (
                    child.child_by_field_name("name"),
                    child.child_by_field_name("alias"),
                ) {
                    let origin = text(name_node, source).to_string();
                    let alias = text(alias_node, source).to_string();
                    map.insert(alias, origin);
                }
            }
            _ => {}
        }
    }
}

/// `import pkg.mod` makes both `pkg.mod` (full) and `pkg` (first segment)
/// resolvable, mirroring spec §3's "dotted-path imports retain the trailing
/// segment and the full path under separate keys" (read in reverse: the
/// *local* names available are the leading segment and the full path).
fn bind_dotted_import(map: &mut ImportMap, dotted: &str) {
    map.insert(dotted.to_string(), dotted.to_string());
    if let Some(first) = dotted.split('.').next() {
        if first != dotted {
            map.insert(first.to_string(), first.to_string());
        }
    }
}

fn handle_import_from_statement(node: Node, source: &[u8], map: &mut ImportMap) {
    let module_node = node.child_by_field_name("module_name");
    let module = module_node
        .map(|n| text(n, source).to_string())
        .unwrap_or_default();

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "dotted_name" if Some(child) != module_node => {
                let local = text(child, source).to_string();
                map.insert(local.clone(), format!("{module}.{local}"));
            }
            "aliased_import" => {
                if let (Some(name_node), Some(alias_node)) = (
                    child.child_by_field_name("name"),
                    child.child_by_field_name("alias"),
                ) {
                    let bare = text(name_node, source).to_string();
                    let alias = text(alias_node, source).to_string();
                    map.insert(alias, format!("{module}.{bare}"));
                }
            }
            "wildcard_import" => {
                map.insert("*".to_string(), module.clone());
            }
            _ => {}
        }
    }
}
