//! Content-addressed per-file extraction cache (spec §4.9).
//!
//! One JSON blob per source file, named by a SHA-256 content hash (hex
//! encoded) under a hidden project directory. A single schema-version
//! integer is embedded in the key namespace; bumping it invalidates every
//! entry without any per-key migration code.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Schema version for cached [`crate::model::FileExtraction`] payloads.
/// Bump when the extraction schema changes in a way old cache entries can't
/// be safely reused for; this invalidates the whole cache namespace.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex::encode(hasher.finalize()))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache entry at {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// A single on-disk store under `<config_dir>/cache/`, one file per
/// `(relative_path, content_hash)` key. Supports concurrent reads; callers
/// serialize writes through a single coordinator (spec §5).
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileCache { root: root.into() }
    }

    fn key_path(&self, relative_path: &str, hash: &ContentHash) -> PathBuf {
        // Schema version is embedded in the namespace directory so bumping
        // CACHE_SCHEMA_VERSION invalidates every entry with no per-key
        // migration code (spec §4.9).
        let safe_name = relative_path.replace(['/', '\\'], "__");
        self.root
            .join(format!("v{CACHE_SCHEMA_VERSION}"))
            .join(format!("{safe_name}.{}.json", hash.0))
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        relative_path: &str,
        hash: &ContentHash,
    ) -> CacheResult<Option<T>> {
        let path = self.key_path(relative_path, hash);
        match fs::read(&path) {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }

    pub fn put<T: Serialize>(
        &self,
        relative_path: &str,
        hash: &ContentHash,
        value: &T,
    ) -> CacheResult<()> {
        let path = self.key_path(relative_path, hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, bytes).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Delete the whole cache store. Always safe (spec §4.9).
    pub fn clear(&self) -> CacheResult<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|e| CacheError::Io {
                path: self.root.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
