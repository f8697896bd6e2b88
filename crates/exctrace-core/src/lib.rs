//! Core data model for exctrace: the whole-program facts that per-file
//! extraction produces and that propagation and queries consume.
//!
//! - [`identity`]: canonical function keys and boundary name resolution.
//! - [`hierarchy`]: class inheritance relation and subclass memoization.
//! - [`model`]: the fact records (functions, classes, raises, catches,
//!   calls, imports, entrypoints, handlers) and the aggregated program model.
//! - [`stubs`]: external-function exception stubs.
//! - [`propagation`]: escape-set records produced by the propagator.
//! - [`cache`]: content-addressed per-file extraction cache.
//! - [`config`]: project configuration (`.exctrace/config.yaml`).
//! - [`error`]: the unified error type bridging subsystem errors.

pub mod cache;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod identity;
pub mod model;
pub mod propagation;
pub mod stubs;
pub mod types;
