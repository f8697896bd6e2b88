//! CLI-level error type bridging every subsystem error into one exit code
//! (spec §6, §7).

use thiserror::Error;

use exctrace_core::error::{ExcTraceError, OutputErrorCode};
use exctrace_core::identity::IdentityError;

use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown function or class '{0}'")]
    Invocation(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Core(#[from] ExcTraceError),

    #[error("{0}")]
    Other(String),
}

impl CliError {
    pub fn error_code(&self) -> OutputErrorCode {
        match self {
            CliError::Invocation(_) | CliError::Session(_) | CliError::Other(_) => {
                OutputErrorCode::InvocationError
            }
            CliError::Identity(IdentityError::NotFound(_) | IdentityError::Ambiguous(_)) => {
                OutputErrorCode::ResolutionError
            }
            CliError::Core(e) => e.error_code(),
        }
    }
}
