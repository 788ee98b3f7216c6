#![forbid(unsafe_code)]

use std::path::Path;

use covenant_ast::LineMap;
use covenant_core::Compilation;
use miette::IntoDiagnostic;
use serde::Serialize;

/// Machine-readable diagnostics report, written by
/// `--emit-diagnostics-json`.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub schema: &'static str,
    pub input: String,
    pub ok: bool,
    pub error_count: usize,
    pub diagnostics: Vec<DiagnosticRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRecord {
    pub phase: &'static str,
    pub severity: &'static str,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub length: usize,
    pub message: String,
}

pub fn build_report(input: &str, source: &str, compilation: &Compilation) -> DiagnosticsReport {
    let map = LineMap::new(source);
    let diagnostics = compilation
        .diagnostics
        .iter()
        .map(|d| {
            let (line, column) = map.line_col_of(d.span);
            DiagnosticRecord {
                phase: d.phase.as_str(),
                severity: d.severity.as_str(),
                line,
                column,
                offset: d.span.offset(),
                length: d.span.len(),
                message: d.message.clone(),
            }
        })
        .collect();

    DiagnosticsReport {
        schema: "covenant.diagnostics/1",
        input: input.to_string(),
        ok: compilation.success(),
        error_count: compilation.error_count(),
        diagnostics,
    }
}

pub fn write_report(path: &Path, report: &DiagnosticsReport) -> miette::Result<()> {
    let json = serde_json::to_string_pretty(report).into_diagnostic()?;
    std::fs::write(path, json).into_diagnostic()?;
    Ok(())
}
