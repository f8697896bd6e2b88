//! The fact records produced by per-file extraction (spec §3) and their
//! aggregation into a whole-program [`ProgramModel`] (spec §4.6).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::hierarchy::ExceptionHierarchy;
use crate::identity::{FunctionKey, NameIndex};

/// Sentinel used by [`CatchSite::caught_types`] for a bare `except:` or a
/// handler that names the base exception.
pub const CATCH_ALL_SENTINEL: &str = "*";

/// How a [`CallSite`]'s callee was (or wasn't) resolved during extraction.
/// The last three kinds are assigned during propagation, never extraction
/// (spec §3 `CallSite`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Import,
    SelfMethod,
    Constructor,
    ReturnType,
    NameFallback,
    Polymorphic,
    Stub,
    Unresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionDef {
    pub file: String,
    pub line: u32,
    pub name: String,
    pub qualified_name: String,
    pub containing_class: Option<String>,
    pub return_type: Option<String>,
}

impl FunctionDef {
    pub fn key(&self) -> FunctionKey {
        FunctionKey::new(self.file.clone(), self.qualified_name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassDef {
    pub file: String,
    pub line: u32,
    pub name: String,
    pub qualified_name: String,
    pub base_names: Vec<String>,
    pub is_exception: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaiseSite {
    pub file: String,
    pub line: u32,
    pub function: FunctionKey,
    pub exception_type: String,
    pub is_reraise: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatchSite {
    pub file: String,
    pub line: u32,
    pub function: FunctionKey,
    /// Caught type names; `CATCH_ALL_SENTINEL` for a bare `except:`.
    pub caught_types: Vec<String>,
    pub bound_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub caller: FunctionKey,
    pub callee_bare_name: String,
    pub callee_key: Option<FunctionKey>,
    pub is_method_call: bool,
    pub resolution_kind: ResolutionKind,
    /// Dotted module path an [`ResolutionKind::Import`] call resolved
    /// against at extraction time (e.g. `"a.f"`), carried until assembly can
    /// match it against the file that actually defines it and fill in
    /// `callee_key`. `None` for every other resolution kind.
    pub import_origin: Option<String>,
}

/// Per-file local-name -> origin-qualified-name import bindings (spec §3
/// `ImportMap`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportMap {
    pub bindings: HashMap<String, String>,
}

impl ImportMap {
    pub fn resolve(&self, local_name: &str) -> Option<&str> {
        self.bindings.get(local_name).map(|s| s.as_str())
    }

    pub fn insert(&mut self, local_name: impl Into<String>, origin: impl Into<String>) {
        self.bindings.insert(local_name.into(), origin.into());
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EntrypointKind {
    HttpRoute,
    CliScript,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entrypoint {
    pub file: String,
    pub line: u32,
    /// The function as it appears in source: bare name or class-qualified
    /// name. Resolved to a [`FunctionKey`] at consumption time (spec §3).
    pub function_name: String,
    pub kind: EntrypointKind,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalHandler {
    pub file: String,
    pub line: u32,
    pub handler_function: String,
    pub exception_type: String,
}

/// Everything the extractor produced for one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileExtraction {
    pub file: String,
    pub functions: Vec<FunctionDef>,
    pub classes: Vec<ClassDef>,
    pub raises: Vec<RaiseSite>,
    pub catches: Vec<CatchSite>,
    pub calls: Vec<CallSite>,
    pub imports: ImportMap,
    pub entrypoints: Vec<Entrypoint>,
    pub handlers: Vec<GlobalHandler>,
    /// Non-fatal diagnostics raised while extracting this file (e.g. a parse
    /// error that still yielded a partial or empty extraction, spec §4.4).
    pub diagnostics: Vec<String>,
}

impl FileExtraction {
    pub fn empty_with_diagnostic(file: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        FileExtraction {
            file: file.into(),
            diagnostics: vec![diagnostic.into()],
            ..Default::default()
        }
    }

    /// Sort every field by `(file, line, name)` so that downstream
    /// consumers and tests see deterministic order (spec §5 "Ordering").
    pub fn sort_deterministically(&mut self) {
        self.functions
            .sort_by(|a, b| (&a.file, a.line, &a.name).cmp(&(&b.file, b.line, &b.name)));
        self.classes
            .sort_by(|a, b| (&a.file, a.line, &a.name).cmp(&(&b.file, b.line, &b.name)));
        self.raises.sort_by(|a, b| {
            (&a.file, a.line, &a.exception_type).cmp(&(&b.file, b.line, &b.exception_type))
        });
        self.catches.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
        self.calls.sort_by(|a, b| {
            (&a.file, a.line, &a.callee_bare_name).cmp(&(&b.file, b.line, &b.callee_bare_name))
        });
        self.entrypoints.sort_by(|a, b| {
            (&a.file, a.line, &a.function_name).cmp(&(&b.file, b.line, &b.function_name))
        });
        self.handlers.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    }
}

/// The aggregated whole-program model (spec §3 `ProgramModel`). Immutable
/// once assembled; propagation and queries only read from it.
#[derive(Debug, Clone, Default)]
pub struct ProgramModel {
    pub files: Vec<FileExtraction>,
    pub hierarchy: ExceptionHierarchy,
    pub name_to_keys: NameIndex,
    /// All known [`FunctionKey`]s, for O(1) "is this a full key" checks.
    pub known_keys: HashSet<FunctionKey>,
}

impl ProgramModel {
    /// Every [`FunctionDef`] across every file, in deterministic order.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.files.iter().flat_map(|f| f.functions.iter())
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.files.iter().flat_map(|f| f.classes.iter())
    }

    pub fn raises(&self) -> impl Iterator<Item = &RaiseSite> {
        self.files.iter().flat_map(|f| f.raises.iter())
    }

    pub fn catches(&self) -> impl Iterator<Item = &CatchSite> {
        self.files.iter().flat_map(|f| f.catches.iter())
    }

    pub fn calls(&self) -> impl Iterator<Item = &CallSite> {
        self.files.iter().flat_map(|f| f.calls.iter())
    }

    pub fn entrypoints(&self) -> impl Iterator<Item = &Entrypoint> {
        self.files.iter().flat_map(|f| f.entrypoints.iter())
    }

    pub fn handlers(&self) -> impl Iterator<Item = &GlobalHandler> {
        self.files.iter().flat_map(|f| f.handlers.iter())
    }

    pub fn function_def(&self, key: &FunctionKey) -> Option<&FunctionDef> {
        self.functions().find(|f| &f.key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_def_key_joins_file_and_qualified_name() {
        let f = FunctionDef {
            file: "a.py".into(),
            line: 1,
            name: "bar".into(),
            qualified_name: "Foo.bar".into(),
            containing_class: Some("Foo".into()),
            return_type: None,
        };
        assert_eq!(f.key(), FunctionKey::new("a.py", "Foo.bar"));
    }

    #[test]
    fn import_map_round_trips() {
        let mut m = ImportMap::default();
        m.insert("foo", "pkg.mod.foo");
        assert_eq!(m.resolve("foo"), Some("pkg.mod.foo"));
        assert_eq!(m.resolve("missing"), None);
    }

    #[test]
    fn empty_with_diagnostic_carries_message() {
        let fe = FileExtraction::empty_with_diagnostic("bad.py", "parse error at line 3");
        assert_eq!(fe.file, "bad.py");
        assert_eq!(fe.diagnostics.len(), 1);
        assert!(fe.functions.is_empty());
    }

    #[test]
    fn sort_deterministically_orders_by_file_then_line() {
        let mut fe = FileExtraction {
            file: "a.py".into(),
            functions: vec![
                FunctionDef {
                    file: "a.py".into(),
                    line: 20,
                    name: "b".into(),
                    qualified_name: "b".into(),
                    containing_class: None,
                    return_type: None,
                },
                FunctionDef {
                    file: "a.py".into(),
                    line: 5,
                    name: "a".into(),
                    qualified_name: "a".into(),
                    containing_class: None,
                    return_type: None,
                },
            ],
            ..Default::default()
        };
        fe.sort_deterministically();
        assert_eq!(fe.functions[0].line, 5);
        assert_eq!(fe.functions[1].line, 20);
    }
}
