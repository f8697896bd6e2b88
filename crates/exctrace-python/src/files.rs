//! Directory discovery: walk a project directory and collect `.py` files,
//! honoring the configured exclude globs.
//!
//! A `globset::GlobSet` built directly from `Config::exclude` filters the
//! walk; no gitignore-style include syntax is needed here, only excludes.

use std::fs;
use std::io;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid exclude pattern {pattern:?}: {message}")]
    BadPattern { pattern: String, message: String },
    #[error("io error reading {path}: {source}")]
    Io { path: String, source: io::Error },
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

fn build_exclude_set(patterns: &[String]) -> DiscoveryResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| DiscoveryError::BadPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| DiscoveryError::BadPattern {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}

/// Walk `root` and return `(relative_path, source)` pairs for every `.py`
/// file not matched by `exclude_patterns`, sorted by path for deterministic
/// downstream ordering.
pub fn discover_python_files(
    root: &Path,
    exclude_patterns: &[String],
) -> DiscoveryResult<Vec<(String, String)>> {
    let excludes = build_exclude_set(exclude_patterns)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let rel_path = match path.strip_prefix(root) {
            Ok(p) => p,
            Err(_) => continue,
        };

        if path.extension().is_none_or(|ext| ext != "py") {
            continue;
        }
        if excludes.is_match(rel_path) {
            continue;
        }

        let content = fs::read_to_string(path).map_err(|e| DiscoveryError::Io {
            path: rel_path.display().to_string(),
            source: e,
        })?;
        files.push((rel_path.to_string_lossy().to_string(), content));
    }

    files.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let full = dir.join(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        File::create(full).unwrap().write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn finds_python_files_sorted() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.py", "pass");
        write(dir.path(), "a.py", "pass");
        let files = discover_python_files(dir.path(), &[]).unwrap();
        let paths: Vec<&str> = files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.py"]);
    }

    #[test]
    fn ignores_non_python_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", "pass");
        write(dir.path(), "readme.md", "hi");
        let files = discover_python_files(dir.path(), &[]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn default_excludes_skip_pycache() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/main.py", "pass");
        write(dir.path(), "__pycache__/main.py", "pass");
        let files =
            discover_python_files(dir.path(), &["**/__pycache__/**".to_string()]).unwrap();
        let paths: Vec<&str> = files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["src/main.py"]);
    }

    #[test]
    fn bad_pattern_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = discover_python_files(dir.path(), &["[".to_string()]).unwrap_err();
        assert!(matches!(err, DiscoveryError::BadPattern { .. }));
    }
}
