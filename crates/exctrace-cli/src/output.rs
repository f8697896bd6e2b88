//! Text and JSON rendering for every query result (spec §6 "JSON shape
//! documented per-command is the external contract").
//!
//! JSON output puts `status` first, is always pretty-printed, and every
//! response type shares one writer-based emission path.

use std::collections::HashSet;
use std::io::{self, Write};

use serde::Serialize;

use exctrace_core::identity::FunctionKey;
use exctrace_core::model::{CatchSite, Entrypoint, RaiseSite, ResolutionKind};
use exctrace_core::propagation::PropagationResult;
use exctrace_core::stubs::{StubError, StubSource};
use exctrace_python::query::{
    AuditBucket, AuditResult, CatchMatch, ExceptionEvidence, HierarchyEntry, MatchDirection,
    StatsResult, TraceNode,
};

use crate::cli::OutputFormat;

pub const SCHEMA_VERSION: &str = "1";

#[derive(Serialize)]
struct JsonEnvelope<'a, T: Serialize + ?Sized> {
    status: &'static str,
    schema_version: &'static str,
    data: &'a T,
}

fn emit_json<T: Serialize + ?Sized>(data: &T, writer: &mut impl Write) -> io::Result<()> {
    let envelope = JsonEnvelope {
        status: "ok",
        schema_version: SCHEMA_VERSION,
        data,
    };
    let json = serde_json::to_string_pretty(&envelope)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{json}")
}

/// A convergence failure is surfaced the same way in both formats regardless
/// of which command triggered propagation (spec §7 `ConvergenceWarning`).
pub fn convergence_note(result: &PropagationResult) -> Option<String> {
    if result.converged {
        None
    } else {
        Some(format!(
            "propagation did not converge after {} iterations; results may be incomplete",
            result.iterations
        ))
    }
}

pub fn print_convergence_note(format: OutputFormat, note: &str, writer: &mut impl Write) -> io::Result<()> {
    match format {
        OutputFormat::Text => writeln!(writer, "warning: {note}"),
        OutputFormat::Json => {
            let envelope = serde_json::json!({
                "status": "warning",
                "schema_version": SCHEMA_VERSION,
                "message": note,
            });
            writeln!(writer, "{}", serde_json::to_string_pretty(&envelope).unwrap())
        }
    }
}

pub fn render_raises(sites: &[&RaiseSite], format: OutputFormat, writer: &mut impl Write) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(sites, writer),
        OutputFormat::Text => {
            if sites.is_empty() {
                return writeln!(writer, "no raise sites found");
            }
            for site in sites {
                let marker = if site.is_reraise { " (re-raise)" } else { "" };
                writeln!(
                    writer,
                    "{}:{} {} raises {}{}",
                    site.file, site.line, site.function, site.exception_type, marker
                )?;
            }
            Ok(())
        }
    }
}

pub fn render_catches(matches: &[CatchMatch], format: OutputFormat, writer: &mut impl Write) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(matches, writer),
        OutputFormat::Text => {
            if matches.is_empty() {
                return writeln!(writer, "no catch sites found");
            }
            for m in matches {
                let dir = match m.direction {
                    MatchDirection::Exact => "exact",
                    MatchDirection::Subclass => "subclass",
                };
                writeln!(
                    writer,
                    "{}:{} {} catches {} ({dir} match on {})",
                    m.site.file, m.site.line, m.site.function, m.matched_caught_type, m.matched_caught_type
                )?;
            }
            Ok(())
        }
    }
}

pub fn render_callers(
    callers: &[(FunctionKey, ResolutionKind)],
    format: OutputFormat,
    writer: &mut impl Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(callers, writer),
        OutputFormat::Text => {
            if callers.is_empty() {
                return writeln!(writer, "no callers found");
            }
            for (key, kind) in callers {
                writeln!(writer, "{key} ({})", resolution_kind_label(*kind))?;
            }
            Ok(())
        }
    }
}

pub fn render_escapes(
    escapes: &[ExceptionEvidence],
    format: OutputFormat,
    writer: &mut impl Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(escapes, writer),
        OutputFormat::Text => {
            if escapes.is_empty() {
                return writeln!(writer, "no exceptions escape this function");
            }
            for e in escapes {
                match &e.evidence {
                    Some(ev) => writeln!(
                        writer,
                        "{} (confidence: {}, {} hop(s))",
                        e.exception_type,
                        ev.confidence,
                        ev.hop_count()
                    )?,
                    None => writeln!(writer, "{}", e.exception_type)?,
                }
            }
            Ok(())
        }
    }
}

pub fn render_trace(tree: &TraceNode, format: OutputFormat, writer: &mut impl Write) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(tree, writer),
        OutputFormat::Text => {
            write_trace_node(tree, 0, writer)?;
            Ok(())
        }
    }
}

fn write_trace_node(node: &TraceNode, depth: usize, writer: &mut impl Write) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    if node.cyclic {
        writeln!(writer, "{indent}{} (see above)", node.function)?;
        return Ok(());
    }
    writeln!(writer, "{indent}{}", node.function)?;
    if !node.direct_raises.is_empty() {
        writeln!(writer, "{indent}  raises: {}", node.direct_raises.join(", "))?;
    }
    if !node.escapes.is_empty() {
        writeln!(writer, "{indent}  escapes: {}", node.escapes.join(", "))?;
    }
    for child in &node.children {
        write_trace_node(child, depth + 1, writer)?;
    }
    Ok(())
}

pub fn render_exceptions(
    entries: &[HierarchyEntry],
    format: OutputFormat,
    writer: &mut impl Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(entries, writer),
        OutputFormat::Text => {
            for e in entries {
                let bases = if e.base_names.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", e.base_names.join(", "))
                };
                writeln!(writer, "{}{}", e.qualified_name, bases)?;
            }
            Ok(())
        }
    }
}

pub fn render_subclasses(names: &[String], format: OutputFormat, writer: &mut impl Write) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(names, writer),
        OutputFormat::Text => {
            if names.is_empty() {
                return writeln!(writer, "no subclasses found");
            }
            for n in names {
                writeln!(writer, "{n}")?;
            }
            Ok(())
        }
    }
}

pub fn render_stats(stats: &StatsResult, format: OutputFormat, writer: &mut impl Write) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(stats, writer),
        OutputFormat::Text => {
            writeln!(writer, "files:           {}", stats.file_count)?;
            writeln!(writer, "functions:       {}", stats.function_count)?;
            writeln!(writer, "classes:         {}", stats.class_count)?;
            writeln!(writer, "raise sites:     {}", stats.raise_site_count)?;
            writeln!(writer, "catch sites:     {}", stats.catch_site_count)?;
            writeln!(writer, "call sites:      {}", stats.call_site_count)?;
            writeln!(writer, "entrypoints:     {}", stats.entrypoint_count)?;
            writeln!(writer, "exception types: {}", stats.exception_type_count)?;
            writeln!(writer, "diagnostics:     {}", stats.diagnostic_count)?;
            Ok(())
        }
    }
}

pub fn render_audit(audit: &AuditResult, format: OutputFormat, writer: &mut impl Write) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(audit, writer),
        OutputFormat::Text => {
            for ep in &audit.entrypoints {
                writeln!(writer, "{}:{} {}", ep.entrypoint.file, ep.entrypoint.line, ep.entrypoint.function_name)?;
                if let Some(err) = &ep.resolution_error {
                    writeln!(writer, "  ! {err}")?;
                    continue;
                }
                if ep.exceptions.is_empty() {
                    writeln!(writer, "  (no exceptions escape)")?;
                }
                for exc in &ep.exceptions {
                    writeln!(writer, "  {} [{}]", exc.exception_type, audit_bucket_label(&exc.bucket))?;
                }
            }
            Ok(())
        }
    }
}

pub fn render_entrypoints(
    entrypoints: &[Entrypoint],
    format: OutputFormat,
    writer: &mut impl Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(entrypoints, writer),
        OutputFormat::Text => {
            if entrypoints.is_empty() {
                return writeln!(writer, "no entrypoints found");
            }
            for ep in entrypoints {
                writeln!(writer, "{}:{} {} ({:?})", ep.file, ep.line, ep.function_name, ep.kind)?;
            }
            Ok(())
        }
    }
}

pub fn render_routes_to(
    entrypoints: &[&Entrypoint],
    format: OutputFormat,
    writer: &mut impl Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(entrypoints, writer),
        OutputFormat::Text => {
            if entrypoints.is_empty() {
                return writeln!(writer, "no entrypoints route to this exception");
            }
            for ep in entrypoints {
                writeln!(writer, "{}:{} {}", ep.file, ep.line, ep.function_name)?;
            }
            Ok(())
        }
    }
}

pub fn render_stub_list(sources: &[StubSource], format: OutputFormat, writer: &mut impl Write) -> io::Result<()> {
    match format {
        OutputFormat::Json => emit_json(sources, writer),
        OutputFormat::Text => {
            if sources.is_empty() {
                return writeln!(writer, "no stub files loaded");
            }
            for s in sources {
                writeln!(writer, "{} ({} functions)", s.module, s.functions.len())?;
            }
            Ok(())
        }
    }
}

pub fn render_stub_diagnostics(
    diagnostics: &[StubError],
    format: OutputFormat,
    writer: &mut impl Write,
) -> io::Result<()> {
    let messages: Vec<String> = diagnostics.iter().map(|e| e.to_string()).collect();
    match format {
        OutputFormat::Json => emit_json(&messages, writer),
        OutputFormat::Text => {
            if messages.is_empty() {
                return writeln!(writer, "every stub file parsed cleanly");
            }
            for m in &messages {
                writeln!(writer, "{m}")?;
            }
            Ok(())
        }
    }
}

fn resolution_kind_label(kind: ResolutionKind) -> &'static str {
    match kind {
        ResolutionKind::Import => "import",
        ResolutionKind::SelfMethod => "self-method",
        ResolutionKind::Constructor => "constructor",
        ResolutionKind::ReturnType => "return-type",
        ResolutionKind::NameFallback => "name-fallback",
        ResolutionKind::Polymorphic => "polymorphic",
        ResolutionKind::Stub => "stub",
        ResolutionKind::Unresolved => "unresolved",
    }
}

fn audit_bucket_label(bucket: &AuditBucket) -> &'static str {
    match bucket {
        AuditBucket::FrameworkHandled => "framework-handled",
        AuditBucket::GlobalHandler => "global-handler",
        AuditBucket::LocalCatch => "local-catch",
        AuditBucket::Uncaught => "uncaught",
    }
}

/// Deduplicated, sorted exception names seen across a set of catch sites —
/// used by `stubs validate`'s summary line.
pub fn distinct_exception_names(sites: &[&CatchSite]) -> Vec<String> {
    let mut names: HashSet<&str> = HashSet::new();
    for site in sites {
        for caught in &site.caught_types {
            names.insert(caught.as_str());
        }
    }
    let mut out: Vec<String> = names.into_iter().map(|s| s.to_string()).collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use exctrace_core::model::EntrypointKind;
    use std::collections::HashMap;

    #[test]
    fn render_raises_text_lists_each_site() {
        let site = RaiseSite {
            file: "a.py".into(),
            line: 3,
            function: FunctionKey::new("a.py", "f"),
            exception_type: "ValueError".into(),
            is_reraise: false,
        };
        let mut buf = Vec::new();
        render_raises(&[&site], OutputFormat::Text, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("a.py:3"));
        assert!(text.contains("ValueError"));
    }

    #[test]
    fn render_raises_json_wraps_in_envelope() {
        let site = RaiseSite {
            file: "a.py".into(),
            line: 3,
            function: FunctionKey::new("a.py", "f"),
            exception_type: "ValueError".into(),
            is_reraise: false,
        };
        let mut buf = Vec::new();
        render_raises(&[&site], OutputFormat::Json, &mut buf).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["data"][0]["exception_type"], "ValueError");
    }

    #[test]
    fn render_stats_text_has_every_line() {
        let stats = StatsResult {
            file_count: 1,
            function_count: 2,
            class_count: 0,
            raise_site_count: 1,
            catch_site_count: 0,
            call_site_count: 1,
            entrypoint_count: 0,
            exception_type_count: 3,
            diagnostic_count: 0,
        };
        let mut buf = Vec::new();
        render_stats(&stats, OutputFormat::Text, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("functions:       2"));
    }

    #[test]
    fn convergence_note_is_none_when_converged() {
        let result = PropagationResult {
            converged: true,
            ..Default::default()
        };
        assert!(convergence_note(&result).is_none());
    }

    #[test]
    fn convergence_note_reports_iteration_count() {
        let result = PropagationResult {
            converged: false,
            iterations: 100,
            ..Default::default()
        };
        let note = convergence_note(&result).unwrap();
        assert!(note.contains("100"));
    }

    #[test]
    fn render_entrypoints_text_shows_kind() {
        let ep = Entrypoint {
            file: "a.py".into(),
            line: 1,
            function_name: "h".into(),
            kind: EntrypointKind::HttpRoute,
            metadata: HashMap::new(),
        };
        let mut buf = Vec::new();
        render_entrypoints(&[ep], OutputFormat::Text, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("HttpRoute"));
    }
}
