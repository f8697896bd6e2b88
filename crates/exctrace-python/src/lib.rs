//! Python-shaped language support for exctrace: a tree-sitter based
//! extractor, the detector framework for framework entrypoints/handlers,
//! whole-program model assembly, the call-graph propagator, and the query
//! engine.
//!
//! - `extractor`: single-pass CST walk producing a `FileExtraction`.
//! - `imports`: import-map construction (local name -> origin qualified name).
//! - `detectors`: configurable entrypoint/handler pattern matchers.
//! - `files`: directory discovery honoring configured excludes.
//! - `assembly`: merges per-file extractions into a `ProgramModel`.
//! - `graph`: forward/reverse call graph over stable integer ids.
//! - `propagator`: monotonic fixpoint escape-set computation.
//! - `query`: typed read-only queries over a `ProgramModel` + `PropagationResult`.

pub mod assembly;
mod cst;
pub mod detectors;
pub mod extractor;
pub mod files;
pub mod graph;
pub mod imports;
pub mod propagator;
pub mod query;
