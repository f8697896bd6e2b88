//! External-function exception stubs (spec §4.3).
//!
//! A stub source declares, for one external module, which exceptions each of
//! its functions may raise. Stubs are loaded from `.exctrace/stubs/*.yaml`
//! at session start; a malformed stub file degrades to a skipped stub with a
//! diagnostic rather than aborting the session (spec §7).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One parsed stub file: a module and its function -> exceptions map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StubSource {
    pub module: String,
    pub functions: HashMap<String, Vec<String>>,
}

#[derive(Debug, Error, Clone)]
pub enum StubError {
    #[error("failed to parse stub file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to read stub file {path}: {message}")]
    Io { path: PathBuf, message: String },
}

pub type StubResult<T> = Result<T, StubError>;

/// Aggregated stub knowledge for a session.
#[derive(Debug, Default)]
pub struct StubLibrary {
    sources: Vec<StubSource>,
    /// module_qualified_name -> index into `sources`, for fast full-name lookup.
    by_module: HashMap<String, usize>,
}

impl StubLibrary {
    pub fn new() -> Self {
        StubLibrary::default()
    }

    /// Parse and register one stub file's contents. Returns the parse error
    /// (without registering anything) on malformed YAML so the caller can
    /// emit a diagnostic and continue (spec §7 `StubError` policy).
    pub fn load_str(&mut self, path: &Path, contents: &str) -> StubResult<()> {
        let source: StubSource = serde_yaml::from_str(contents).map_err(|e| StubError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        self.register(source);
        Ok(())
    }

    pub fn register(&mut self, source: StubSource) {
        let idx = self.sources.len();
        self.by_module.insert(source.module.clone(), idx);
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[StubSource] {
        &self.sources
    }

    /// Look up exceptions for a call: prefer an exact match on
    /// `qualified_name` (module), fall back to a bare-name match across any
    /// registered stub, empty set if nothing applies.
    pub fn get_exceptions(&self, qualified_name: Option<&str>, bare_name: &str) -> HashSet<String> {
        if let Some(qname) = qualified_name {
            if let Some(idx) = self.by_module.get(qname) {
                if let Some(excs) = self.sources[*idx].functions.get(bare_name) {
                    return excs.iter().cloned().collect();
                }
            }
        }
        for source in &self.sources {
            if let Some(excs) = source.functions.get(bare_name) {
                return excs.iter().cloned().collect();
            }
        }
        HashSet::new()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(module: &str, func: &str, excs: &[&str]) -> StubSource {
        let mut functions = HashMap::new();
        functions.insert(
            func.to_string(),
            excs.iter().map(|s| s.to_string()).collect(),
        );
        StubSource {
            module: module.to_string(),
            functions,
        }
    }

    #[test]
    fn exact_module_match_preferred() {
        let mut lib = StubLibrary::new();
        lib.register(stub("http_client", "get", &["TimeoutError"]));
        let excs = lib.get_exceptions(Some("http_client"), "get");
        assert!(excs.contains("TimeoutError"));
    }

    #[test]
    fn bare_name_fallback_when_module_unknown() {
        let mut lib = StubLibrary::new();
        lib.register(stub("http_client", "get", &["TimeoutError"]));
        let excs = lib.get_exceptions(None, "get");
        assert!(excs.contains("TimeoutError"));
    }

    #[test]
    fn no_match_returns_empty_set() {
        let lib = StubLibrary::new();
        assert!(lib.get_exceptions(Some("nope"), "nope").is_empty());
    }

    #[test]
    fn malformed_yaml_is_reported_not_panicking() {
        let mut lib = StubLibrary::new();
        let err = lib.load_str(Path::new("bad.yaml"), "not: [valid: yaml: at all").unwrap_err();
        match err {
            StubError::Parse { path, .. } => assert_eq!(path, PathBuf::from("bad.yaml")),
            _ => panic!("expected parse error"),
        }
        assert!(lib.is_empty());
    }

    #[test]
    fn load_str_registers_on_success() {
        let mut lib = StubLibrary::new();
        lib.load_str(
            Path::new("http_client.yaml"),
            "module: http_client\nfunctions:\n  get: [TimeoutError]\n",
        )
        .unwrap();
        assert_eq!(lib.len(), 1);
        assert!(lib.get_exceptions(Some("http_client"), "get").contains("TimeoutError"));
    }
}
