//! Program model assembly: enumerate files, consult the cache, run the
//! extractor on misses, and merge everything into one [`ProgramModel`]
//! (spec §4.6).
//!
//! Extraction is embarrassingly parallel across files (each file's facts are
//! independent); assembly itself — merging per-file fact tables into one
//! whole-program store and building the name index and known-key set — is
//! sequential and cheap by comparison.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use exctrace_core::cache::{CacheError, ContentHash, FileCache};
use exctrace_core::config::Config;
use exctrace_core::hierarchy::ExceptionHierarchy;
use exctrace_core::identity::{FunctionKey, NameIndex};
use exctrace_core::model::{FileExtraction, ProgramModel};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::detectors::FrameworkConfig;
use crate::extractor;
use crate::files::{self, DiscoveryError};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type AssemblyResult<T> = Result<T, AssemblyError>;

/// Build the whole-program model for everything under `directory`.
///
/// `cache` is optional so callers can pass `None` for `--no-cache` runs
/// without threading a feature flag through every call site.
pub fn build_model(
    directory: &Path,
    config: &Config,
    cache: Option<&FileCache>,
    frameworks: &[FrameworkConfig],
) -> AssemblyResult<ProgramModel> {
    let discovered = files::discover_python_files(directory, &config.exclude)?;
    debug!(count = discovered.len(), "discovered python files");

    let mut file_extractions: Vec<FileExtraction> = discovered
        .into_par_iter()
        .map(|(path, source)| extract_one(&path, &source, cache, frameworks))
        .collect::<AssemblyResult<Vec<_>>>()?;

    file_extractions.sort_by(|a, b| a.file.cmp(&b.file));

    Ok(assemble(file_extractions))
}

fn extract_one(
    path: &str,
    source: &str,
    cache: Option<&FileCache>,
    frameworks: &[FrameworkConfig],
) -> AssemblyResult<FileExtraction> {
    let hash = ContentHash::compute(source.as_bytes());

    if let Some(cache) = cache {
        if let Some(cached) = cache.get::<FileExtraction>(path, &hash)? {
            return Ok(cached);
        }
    }

    let extraction = extractor::extract_file(path, source, frameworks);
    if !extraction.diagnostics.is_empty() {
        warn!(file = path, diagnostics = ?extraction.diagnostics, "extraction diagnostics");
    }

    if let Some(cache) = cache {
        cache.put(path, &hash, &extraction)?;
    }

    Ok(extraction)
}

/// Merge per-file extractions into one [`ProgramModel`]: register every
/// class in the hierarchy, compute each class's `is_exception` flag now
/// that the whole-program hierarchy is known, and build the bare/qualified
/// name index (spec §4.6 steps 3-4).
fn assemble(mut file_extractions: Vec<FileExtraction>) -> ProgramModel {
    let mut hierarchy = ExceptionHierarchy::new();
    for extraction in &file_extractions {
        for class in &extraction.classes {
            hierarchy.add_class(class.qualified_name.clone(), class.base_names.clone());
        }
    }

    for extraction in &mut file_extractions {
        for class in &mut extraction.classes {
            class.is_exception = hierarchy.is_subclass_of(&class.qualified_name, "Exception")
                || hierarchy.is_subclass_of(&class.qualified_name, "BaseException");
        }
    }

    let mut name_to_keys = NameIndex::new();
    let mut known_keys = HashSet::new();
    for extraction in &file_extractions {
        for function in &extraction.functions {
            let key = function.key();
            name_to_keys.insert(function.name.clone(), key.clone());
            if function.qualified_name != function.name {
                name_to_keys.insert(function.qualified_name.clone(), key.clone());
            }
            known_keys.insert(key);
        }
    }

    resolve_import_calls(&mut file_extractions, &known_keys);

    ProgramModel {
        files: file_extractions,
        hierarchy,
        name_to_keys,
        known_keys,
    }
}

/// Fill in `CallSite::callee_key` for import-resolved calls extraction left
/// unresolved: build a dotted-module-path -> file index from every file now
/// known, then match each call's recorded origin against it.
fn resolve_import_calls(file_extractions: &mut [FileExtraction], known_keys: &HashSet<FunctionKey>) {
    let module_to_file: HashMap<String, String> = file_extractions
        .iter()
        .map(|e| (module_path_of(&e.file), e.file.clone()))
        .collect();

    for extraction in file_extractions.iter_mut() {
        for call in &mut extraction.calls {
            if call.callee_key.is_some() {
                continue;
            }
            let Some(origin) = &call.import_origin else { continue };
            call.callee_key = resolve_import_origin(origin, &module_to_file, known_keys);
        }
    }
}

/// The dotted module path a `from <module> import ...` statement would name
/// for the file defining it: `"a.py"` -> `"a"`, `"pkg/mod.py"` -> `"pkg.mod"`,
/// `"pkg/__init__.py"` -> `"pkg"`.
fn module_path_of(file: &str) -> String {
    let stripped = file.strip_suffix(".py").unwrap_or(file);
    let stripped = stripped.strip_suffix("/__init__").unwrap_or(stripped);
    stripped.replace('/', ".")
}

/// Resolve an import origin to the real [`FunctionKey`] it names, if the
/// defining module is part of this program and actually defines that
/// function. The origin may be a plain `"module.func"` (imported function)
/// or carry an extra class segment, `"module.Class.method"` (a method
/// reached through an imported class binding, e.g. `x = SvcA(); x.run()`
/// where `SvcA` came from `from svc import SvcA`) — the module/qualified-name
/// boundary isn't known up front, so every dot is tried as the split point,
/// rightmost first, until one names both a known module and a known key.
fn resolve_import_origin(
    origin: &str,
    module_to_file: &HashMap<String, String>,
    known_keys: &HashSet<FunctionKey>,
) -> Option<FunctionKey> {
    for (dot_idx, _) in origin.match_indices('.').collect::<Vec<_>>().into_iter().rev() {
        let module_path = &origin[..dot_idx];
        let qualified = &origin[dot_idx + 1..];
        let Some(file) = module_to_file.get(module_path) else {
            continue;
        };
        let key = FunctionKey::new(file.clone(), qualified.to_string());
        if known_keys.contains(&key) {
            return Some(key);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn builds_model_from_two_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def f():\n    raise ValueError()\n").unwrap();
        fs::write(
            dir.path().join("b.py"),
            "from a import f\ndef g():\n    f()\n",
        )
        .unwrap();

        let config = Config::default();
        let model = build_model(dir.path(), &config, None, &[]).unwrap();

        assert_eq!(model.files.len(), 2);
        assert!(model.functions().any(|f| f.name == "f"));
        assert!(model.functions().any(|f| f.name == "g"));
    }

    #[test]
    fn caches_extraction_across_calls() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let cache_dir = TempDir::new().unwrap();
        let cache = FileCache::new(cache_dir.path());
        let config = Config::default();

        let first = build_model(dir.path(), &config, Some(&cache), &[]).unwrap();
        let second = build_model(dir.path(), &config, Some(&cache), &[]).unwrap();
        assert_eq!(first.files.len(), second.files.len());
    }

    #[test]
    fn import_call_resolves_to_real_function_key_across_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def f():\n    raise ValueError()\n").unwrap();
        fs::write(
            dir.path().join("b.py"),
            "from a import f\ndef g():\n    f()\n",
        )
        .unwrap();

        let config = Config::default();
        let model = build_model(dir.path(), &config, None, &[]).unwrap();

        let call = model.calls().find(|c| c.callee_bare_name == "f").unwrap();
        assert_eq!(
            call.callee_key,
            Some(exctrace_core::identity::FunctionKey::new("a.py", "f"))
        );
    }

    #[test]
    fn import_of_unknown_module_leaves_callee_key_unresolved() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("b.py"),
            "from requests import get\ndef g():\n    get('/x')\n",
        )
        .unwrap();

        let config = Config::default();
        let model = build_model(dir.path(), &config, None, &[]).unwrap();

        let call = model.calls().find(|c| c.callee_bare_name == "get").unwrap();
        assert!(call.callee_key.is_none());
    }

    #[test]
    fn constructor_call_through_imported_class_resolves_across_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("svc.py"),
            "class Svc:\n    def run(self):\n        raise ValueError()\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("caller.py"),
            "from svc import Svc\ndef use():\n    s = Svc()\n    s.run()\n",
        )
        .unwrap();

        let config = Config::default();
        let model = build_model(dir.path(), &config, None, &[]).unwrap();

        let call = model.calls().find(|c| c.callee_bare_name == "run").unwrap();
        assert_eq!(
            call.callee_key,
            Some(exctrace_core::identity::FunctionKey::new("svc.py", "Svc.run"))
        );
    }

    #[test]
    fn module_path_of_strips_extension_and_init() {
        assert_eq!(module_path_of("a.py"), "a");
        assert_eq!(module_path_of("pkg/mod.py"), "pkg.mod");
        assert_eq!(module_path_of("pkg/__init__.py"), "pkg");
    }

    #[test]
    fn class_is_exception_flag_set_after_merge() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.py"),
            "class MyErr(ValueError):\n    pass\n",
        )
        .unwrap();
        let config = Config::default();
        let model = build_model(dir.path(), &config, None, &[]).unwrap();
        let class = model.classes().find(|c| c.name == "MyErr").unwrap();
        assert!(class.is_exception);
    }
}
