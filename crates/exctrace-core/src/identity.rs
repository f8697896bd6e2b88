//! Canonical function identity and boundary name resolution.
//!
//! Internal data structures key on full [`FunctionKey`] values only;
//! resolution from a user-supplied name happens at system boundaries (CLI
//! argument, entrypoint consumer) via [`resolve_function_key`], never
//! baked into storage. There is no `endswith`-based partial match, only the
//! bare/qualified-name index with an explicit ambiguity error when more
//! than one function answers to a name.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical identity of a function or method: `(relative_file_path,
/// qualified_name)`. Rendered as `"file::qualified"` — `::` cannot appear in
/// either component since file paths are normalized to `/`-separated and
/// qualified names are `.`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    pub file: String,
    pub qualified_name: String,
}

impl FunctionKey {
    pub fn new(file: impl Into<String>, qualified_name: impl Into<String>) -> Self {
        FunctionKey {
            file: file.into(),
            qualified_name: qualified_name.into(),
        }
    }

    /// Simple (bare) name: the last segment after both `.` and `::`.
    pub fn simple_name(&self) -> &str {
        self.qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.qualified_name)
    }

    /// Parse a rendered `"file::qualified"` key, if it is shaped like one.
    pub fn parse_full(s: &str) -> Option<Self> {
        let (file, qualified) = s.split_once("::")?;
        Some(FunctionKey::new(file, qualified))
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.file, self.qualified_name)
    }
}

#[derive(Debug, Error)]
#[error("no function matches '{name}'{}", format_suggestions(.suggestions))]
pub struct FunctionNotFoundError {
    pub name: String,
    /// Up to three close matches by normalized edit-distance similarity >= 0.5.
    pub suggestions: Vec<String>,
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

#[derive(Debug, Error)]
#[error("ambiguous function name '{name}', candidates: {}", .candidates.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", "))]
pub struct AmbiguousFunctionError {
    pub name: String,
    pub candidates: Vec<FunctionKey>,
}

/// Reverse index from bare/qualified name to the full keys that answer to it.
///
/// Built once during model assembly (spec §4.1): for every function, insert
/// under `function.name`, and additionally under `qualified_name` when it
/// differs from the bare name.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    entries: HashMap<String, Vec<FunctionKey>>,
}

impl NameIndex {
    pub fn new() -> Self {
        NameIndex::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, key: FunctionKey) {
        let name = name.into();
        let bucket = self.entries.entry(name).or_default();
        if !bucket.contains(&key) {
            bucket.push(key);
        }
    }

    pub fn get(&self, name: &str) -> &[FunctionKey] {
        self.entries.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }
}

/// Resolve a user- or edge-supplied name to a [`FunctionKey`].
///
/// Accepts three shapes, in order:
/// 1. a full `file::qualified` key present in `known_keys`;
/// 2. a bare or class-qualified name present in `name_index` with exactly one
///    entry;
/// 3. the same with several entries, which fails with [`AmbiguousFunctionError`].
///
/// Nothing matching fails with [`FunctionNotFoundError`], annotated with up
/// to three close-match suggestions (similarity >= 0.5) computed by
/// normalized edit distance over every known name.
pub fn resolve_function_key(
    name: &str,
    known_keys: &std::collections::HashSet<FunctionKey>,
    name_index: &NameIndex,
) -> Result<FunctionKey, IdentityError> {
    if let Some(full) = FunctionKey::parse_full(name) {
        if known_keys.contains(&full) {
            return Ok(full);
        }
    }

    let matches = name_index.get(name);
    match matches.len() {
        0 => Err(IdentityError::NotFound(FunctionNotFoundError {
            name: name.to_string(),
            suggestions: suggest_close_matches(name, name_index),
        })),
        1 => Ok(matches[0].clone()),
        _ => Err(IdentityError::Ambiguous(AmbiguousFunctionError {
            name: name.to_string(),
            candidates: matches.to_vec(),
        })),
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    NotFound(#[from] FunctionNotFoundError),
    #[error(transparent)]
    Ambiguous(#[from] AmbiguousFunctionError),
}

/// Top-3 close matches over every known bare/qualified name, by normalized
/// Jaro-Winkler similarity, filtered to similarity >= 0.5.
fn suggest_close_matches(name: &str, name_index: &NameIndex) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = name_index
        .all_names()
        .map(|candidate| (strsim::jaro_winkler(name, candidate), candidate))
        .filter(|(score, _)| *score >= 0.5)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(3)
        .map(|(_, name)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(file: &str, q: &str) -> FunctionKey {
        FunctionKey::new(file, q)
    }

    #[test]
    fn full_key_round_trips() {
        let k = key("a.py", "Foo.bar");
        let rendered = k.to_string();
        assert_eq!(rendered, "a.py::Foo.bar");
        assert_eq!(FunctionKey::parse_full(&rendered), Some(k));
    }

    #[test]
    fn simple_name_strips_class_qualification() {
        let k = key("a.py", "Foo.bar");
        assert_eq!(k.simple_name(), "bar");
    }

    #[test]
    fn resolve_unique_bare_name() {
        let mut idx = NameIndex::new();
        let k = key("a.py", "f");
        idx.insert("f", k.clone());
        let known: HashSet<_> = [k.clone()].into_iter().collect();
        assert_eq!(resolve_function_key("f", &known, &idx).unwrap(), k);
    }

    #[test]
    fn resolve_full_key_bypasses_index() {
        let idx = NameIndex::new();
        let k = key("a.py", "f");
        let known: HashSet<_> = [k.clone()].into_iter().collect();
        assert_eq!(resolve_function_key("a.py::f", &known, &idx).unwrap(), k);
    }

    #[test]
    fn resolve_ambiguous_name_lists_candidates() {
        let mut idx = NameIndex::new();
        let a = key("a.py", "f");
        let b = key("b.py", "f");
        idx.insert("f", a.clone());
        idx.insert("f", b.clone());
        let known: HashSet<_> = [a, b].into_iter().collect();
        let err = resolve_function_key("f", &known, &idx).unwrap_err();
        match err {
            IdentityError::Ambiguous(e) => assert_eq!(e.candidates.len(), 2),
            _ => panic!("expected ambiguous error"),
        }
    }

    #[test]
    fn resolve_missing_name_suggests_close_matches() {
        let mut idx = NameIndex::new();
        idx.insert("fetch_user", key("a.py", "fetch_user"));
        let known = HashSet::new();
        let err = resolve_function_key("fetch_usr", &known, &idx).unwrap_err();
        match err {
            IdentityError::NotFound(e) => {
                assert!(e.suggestions.contains(&"fetch_user".to_string()));
            }
            _ => panic!("expected not-found error"),
        }
    }

    #[test]
    fn name_index_inserts_dedup_per_name() {
        let mut idx = NameIndex::new();
        let k = key("a.py", "f");
        idx.insert("f", k.clone());
        idx.insert("f", k.clone());
        assert_eq!(idx.get("f").len(), 1);
    }
}
