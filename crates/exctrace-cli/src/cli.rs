//! CLI argument parsing with clap derive (spec §6 command surface).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use exctrace_core::types::ResolutionMode;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// exctrace — whole-program static exception-flow analysis.
#[derive(Parser)]
#[command(name = "exctrace")]
#[command(version = VERSION)]
#[command(about = "Whole-program static exception-flow analysis")]
pub struct Cli {
    /// Project directory to analyze.
    #[arg(short = 'd', long = "directory", global = true, default_value = ".")]
    pub directory: PathBuf,

    /// Output format.
    #[arg(short = 'f', long = "format", global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Bypass cache reads and writes for this session.
    #[arg(long = "no-cache", global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Mode flags shared by commands that consult propagation (spec §6 `escapes`,
/// `callers`).
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct ModeArgs {
    #[arg(long)]
    pub strict: bool,
    #[arg(long)]
    pub aggressive: bool,
}

impl ModeArgs {
    pub fn resolve(&self, default: ResolutionMode) -> ResolutionMode {
        if self.strict {
            ResolutionMode::Strict
        } else if self.aggressive {
            ResolutionMode::Aggressive
        } else {
            default
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Find every site that raises an exception type.
    Raises {
        exception: String,
        /// Include raises of subclasses of `exception`.
        #[arg(short = 's', long)]
        subclasses: bool,
    },
    /// Find every site that catches an exception type.
    Catches {
        exception: String,
        #[arg(short = 's', long)]
        subclasses: bool,
    },
    /// Find every caller of a function.
    Callers {
        function: String,
        /// Omit name-fallback resolution hits.
        #[arg(long)]
        strict: bool,
    },
    /// Report the exceptions that can escape a function.
    Escapes {
        function: String,
        #[command(flatten)]
        mode: ModeArgs,
    },
    /// Trace a function's call tree with per-node direct raises and escapes.
    Trace { function: String },
    /// List every known exception type and its declared bases.
    Exceptions,
    /// List every known subclass of a class.
    Subclasses { class: String },
    /// Report summary counts over the scanned program.
    Stats,
    /// Framework-aware entrypoint subcommands.
    #[command(subcommand)]
    Flask(FrameworkCommands),
    #[command(subcommand)]
    Fastapi(FrameworkCommands),
    /// Stub library maintenance.
    #[command(subcommand)]
    Stubs(StubsCommands),
}

#[derive(Subcommand)]
pub enum FrameworkCommands {
    /// Audit every detected entrypoint for uncaught exceptions.
    Audit,
    /// List every detected entrypoint.
    Entrypoints,
    /// List entrypoints through which a given exception can propagate.
    RoutesTo {
        exception: String,
        #[arg(short = 's', long)]
        subclasses: bool,
    },
}

#[derive(Subcommand)]
pub enum StubsCommands {
    /// List loaded stub files and their function counts.
    List,
    /// Scaffold an empty stub file under `.exctrace/stubs/`.
    Init {
        /// Module the new stub file documents.
        module: String,
    },
    /// Parse every stub file and report malformed ones without aborting.
    Validate,
}
