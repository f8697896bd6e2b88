//! Unified error type bridging subsystem errors into a common format for CLI
//! output.
//!
//! Exit codes follow spec §6:
//! - `1`: invocation error (unknown command, unparsable flag)
//! - `2`: resolution error (`FunctionNotFoundError` / `AmbiguousFunctionError`)
//! - `3`: audit failure (CI mode: uncaught exceptions at an entrypoint)

use thiserror::Error;

use crate::identity::{AmbiguousFunctionError, FunctionNotFoundError};
use crate::stubs::StubError;

/// Stable exit/error codes for CLI output (spec §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    InvocationError = 1,
    ResolutionError = 2,
    AuditFailure = 3,
}

impl OutputErrorCode {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Unified error type for the analysis core. The CLI crate bridges this
/// (plus its own invocation errors) into a process exit code.
#[derive(Debug, Error)]
pub enum ExcTraceError {
    #[error(transparent)]
    FunctionNotFound(#[from] FunctionNotFoundError),

    #[error(transparent)]
    AmbiguousFunction(#[from] AmbiguousFunctionError),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("stub error: {0}")]
    Stub(#[from] StubError),

    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ExcTraceError {
    pub fn config(message: impl Into<String>) -> Self {
        ExcTraceError::Config {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        ExcTraceError::Cache {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ExcTraceError::Internal {
            message: message.into(),
        }
    }

    /// Map to the spec §6 exit-code family. Config/Cache/Internal are all
    /// invocation-time failures from the CLI's point of view; resolution
    /// errors get their own code so callers can disambiguate "bad name" from
    /// "bad flag".
    pub fn error_code(&self) -> OutputErrorCode {
        match self {
            ExcTraceError::FunctionNotFound(_) | ExcTraceError::AmbiguousFunction(_) => {
                OutputErrorCode::ResolutionError
            }
            ExcTraceError::Config { .. }
            | ExcTraceError::Stub(_)
            | ExcTraceError::Cache { .. }
            | ExcTraceError::Internal { .. } => OutputErrorCode::InvocationError,
        }
    }
}

pub type ExcTraceResult<T> = Result<T, ExcTraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_maps_to_invocation_error() {
        let err = ExcTraceError::config("bad yaml");
        assert_eq!(err.error_code(), OutputErrorCode::InvocationError);
        assert_eq!(err.error_code().code(), 1);
    }

    #[test]
    fn display_values_match_spec() {
        assert_eq!(OutputErrorCode::InvocationError.code(), 1);
        assert_eq!(OutputErrorCode::ResolutionError.code(), 2);
        assert_eq!(OutputErrorCode::AuditFailure.code(), 3);
    }
}
