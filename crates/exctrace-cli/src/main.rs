//! Binary entry point for the exctrace CLI (spec §6).

mod cli;
mod commands;
mod error;
mod output;
mod session;

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;

use cli::Cli;
use commands::Outcome;
use error::CliError;
use exctrace_core::error::OutputErrorCode;

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let mut stdout = io::stdout();

    match commands::dispatch(cli, &mut stdout) {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::AuditFoundUncaught) => ExitCode::from(OutputErrorCode::AuditFailure.code()),
        Err(err) => {
            let _ = stdout.flush();
            emit_error(&err);
            ExitCode::from(err.error_code().code())
        }
    }
}

fn emit_error(err: &CliError) {
    let envelope = serde_json::json!({
        "status": "error",
        "schema_version": output::SCHEMA_VERSION,
        "error": {
            "code": err.error_code().code(),
            "message": err.to_string(),
        },
    });
    eprintln!("{}", serde_json::to_string_pretty(&envelope).unwrap());
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}
