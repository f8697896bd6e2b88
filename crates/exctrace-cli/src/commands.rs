//! One handler per [`Commands`] variant: resolve arguments against a
//! [`Session`], call into `exctrace_python::query`, and render through
//! `crate::output`. Each handler is thin: open a session, call one core
//! operation, emit one response.

use std::collections::HashSet;
use std::io::{self, Write};

use exctrace_core::identity::resolve_function_key;
use exctrace_core::model::Entrypoint;
use exctrace_core::types::ResolutionMode;
use exctrace_python::detectors::{fastapi, flask};
use exctrace_python::graph::CallGraph;
use exctrace_python::query::{self, Integration};

use crate::cli::{Cli, Commands, FrameworkCommands, ModeArgs, OutputFormat, StubsCommands};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

/// Outcome of a dispatched command, distinct from `Err`: a CI-mode audit
/// that finds an uncaught exception is a successful analysis run, just one
/// that should exit non-zero (spec §6 exit code 3).
pub enum Outcome {
    Success,
    AuditFoundUncaught,
}

fn io_err(e: io::Error) -> CliError {
    CliError::Other(e.to_string())
}

pub fn dispatch(cli: Cli, writer: &mut impl Write) -> Result<Outcome, CliError> {
    let session = Session::build(&cli.directory, cli.no_cache)?;
    let format = cli.format;

    match cli.command {
        Commands::Raises { exception, subclasses } => {
            raises(&session, &exception, subclasses, format, writer)
        }
        Commands::Catches { exception, subclasses } => {
            catches(&session, &exception, subclasses, format, writer)
        }
        Commands::Callers { function, strict } => callers(&session, &function, strict, format, writer),
        Commands::Escapes { function, mode } => escapes(&session, &function, mode, format, writer),
        Commands::Trace { function } => trace(&session, &function, format, writer),
        Commands::Exceptions => exceptions(&session, format, writer),
        Commands::Subclasses { class } => subclasses_cmd(&session, &class, format, writer),
        Commands::Stats => stats(&session, format, writer),
        Commands::Flask(sub) => framework_command(&session, "flask", flask::config(), sub, format, writer),
        Commands::Fastapi(sub) => {
            framework_command(&session, "fastapi", fastapi::config(), sub, format, writer)
        }
        Commands::Stubs(sub) => stubs_command(&session, sub, format, writer),
    }
}

fn raises(
    session: &Session,
    exception: &str,
    subclasses: bool,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<Outcome, CliError> {
    let sites = query::find_raises(&session.model, exception, subclasses);
    output::render_raises(&sites, format, writer).map_err(io_err)?;
    Ok(Outcome::Success)
}

fn catches(
    session: &Session,
    exception: &str,
    subclasses: bool,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<Outcome, CliError> {
    let matches = query::find_catches(&session.model, exception, subclasses);
    output::render_catches(&matches, format, writer).map_err(io_err)?;
    Ok(Outcome::Success)
}

fn callers(
    session: &Session,
    function: &str,
    strict: bool,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<Outcome, CliError> {
    let key = resolve_function_key(function, &session.model.known_keys, &session.model.name_to_keys)?;
    let graph = CallGraph::build(&session.model);
    let mode = if strict { ResolutionMode::Strict } else { ResolutionMode::Default };
    let callers = query::find_callers(&graph, &key, mode);
    output::render_callers(&callers, format, writer).map_err(io_err)?;
    Ok(Outcome::Success)
}

fn escapes(
    session: &Session,
    function: &str,
    mode_args: ModeArgs,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<Outcome, CliError> {
    let key = resolve_function_key(function, &session.model.known_keys, &session.model.name_to_keys)?;
    let mode = mode_args.resolve(session.config.resolution_mode);
    let result = session.propagation(mode);
    if let Some(note) = output::convergence_note(&result) {
        output::print_convergence_note(format, &note, writer).map_err(io_err)?;
    }
    let escapes = query::find_escapes(&result, &key);
    output::render_escapes(&escapes, format, writer).map_err(io_err)?;
    Ok(Outcome::Success)
}

fn trace(
    session: &Session,
    function: &str,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<Outcome, CliError> {
    let key = resolve_function_key(function, &session.model.known_keys, &session.model.name_to_keys)?;
    let graph = CallGraph::build(&session.model);
    let result = session.propagation(session.config.resolution_mode);
    if let Some(note) = output::convergence_note(&result) {
        output::print_convergence_note(format, &note, writer).map_err(io_err)?;
    }
    let tree = query::trace_function(&session.model, &graph, &result, &key, query::DEFAULT_MAX_TRACE_DEPTH);
    output::render_trace(&tree, format, writer).map_err(io_err)?;
    Ok(Outcome::Success)
}

fn exceptions(session: &Session, format: OutputFormat, writer: &mut impl Write) -> Result<Outcome, CliError> {
    let entries = query::exception_hierarchy(&session.model);
    output::render_exceptions(&entries, format, writer).map_err(io_err)?;
    Ok(Outcome::Success)
}

fn subclasses_cmd(
    session: &Session,
    class: &str,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<Outcome, CliError> {
    let names = query::subclasses(&session.model, class);
    output::render_subclasses(&names, format, writer).map_err(io_err)?;
    Ok(Outcome::Success)
}

fn stats(session: &Session, format: OutputFormat, writer: &mut impl Write) -> Result<Outcome, CliError> {
    let result = query::stats(&session.model);
    output::render_stats(&result, format, writer).map_err(io_err)?;
    Ok(Outcome::Success)
}

/// Every framework this CLI knows responds to `HTTPException` itself,
/// without a user-registered handler; `handled_base_classes` comes from
/// project config on top of that (spec §4.8 `Integration`).
fn integration_for(session: &Session) -> Integration {
    let mut exception_responses = HashSet::new();
    exception_responses.insert("HTTPException".to_string());
    Integration {
        exception_responses,
        handled_base_classes: session.config.handled_base_classes.clone(),
    }
}

fn framework_command(
    session: &Session,
    _name: &str,
    framework: exctrace_python::detectors::FrameworkConfig,
    sub: FrameworkCommands,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<Outcome, CliError> {
    // Entrypoints are detected per-file at assembly time against the full
    // default framework set; here we filter the already-assembled model's
    // entrypoints down to ones this framework's metadata tag produced.
    let entrypoints: Vec<Entrypoint> = session
        .model
        .entrypoints()
        .filter(|ep| ep.metadata.get("framework").map(String::as_str) == Some(framework.name))
        .cloned()
        .collect();

    match sub {
        FrameworkCommands::Entrypoints => {
            output::render_entrypoints(&entrypoints, format, writer).map_err(io_err)?;
            Ok(Outcome::Success)
        }
        FrameworkCommands::RoutesTo { exception, subclasses } => {
            let result = session.propagation(session.config.resolution_mode);
            if let Some(note) = output::convergence_note(&result) {
                output::print_convergence_note(format, &note, writer).map_err(io_err)?;
            }
            let hits = query::routes_to_exception(&session.model, &result, &entrypoints, &exception, subclasses);
            output::render_routes_to(&hits, format, writer).map_err(io_err)?;
            Ok(Outcome::Success)
        }
        FrameworkCommands::Audit => {
            let result = session.propagation(session.config.resolution_mode);
            if let Some(note) = output::convergence_note(&result) {
                output::print_convergence_note(format, &note, writer).map_err(io_err)?;
            }
            let integration = integration_for(session);
            let audit = query::audit_integration(&session.model, &result, &entrypoints, &integration);
            let failed = audit.has_uncaught();
            output::render_audit(&audit, format, writer).map_err(io_err)?;
            Ok(if failed { Outcome::AuditFoundUncaught } else { Outcome::Success })
        }
    }
}

fn stubs_command(
    session: &Session,
    sub: StubsCommands,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<Outcome, CliError> {
    match sub {
        StubsCommands::List => {
            output::render_stub_list(session.stubs.sources(), format, writer).map_err(io_err)?;
            Ok(Outcome::Success)
        }
        StubsCommands::Validate => {
            output::render_stub_diagnostics(&session.stub_diagnostics, format, writer).map_err(io_err)?;
            Ok(Outcome::Success)
        }
        StubsCommands::Init { module } => {
            scaffold_stub_file(session, &module)?;
            writeln!(writer, "wrote .exctrace/stubs/{module}.yaml").map_err(io_err)?;
            Ok(Outcome::Success)
        }
    }
}

/// Scaffold an empty, schema-correct stub file a user can fill in by hand
/// (supplemented feature: `StubSource` round-trips through the same YAML
/// shape `StubLibrary::load_str` parses).
fn scaffold_stub_file(session: &Session, module: &str) -> Result<(), CliError> {
    let dir = session.project_dir.join(crate::session::CONFIG_DIR).join("stubs");
    std::fs::create_dir_all(&dir).map_err(io_err)?;
    let path = dir.join(format!("{module}.yaml"));
    let template = format!("module: {module}\nfunctions: {{}}\n");
    std::fs::write(path, template).map_err(io_err)?;
    Ok(())
}
