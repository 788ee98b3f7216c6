#![forbid(unsafe_code)]

use covenant_ast::{LineMap, Span};

/// Pipeline stage that produced a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Lexer,
    Parser,
    Analyzer,
    Codegen,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lexer => "lexer",
            Phase::Parser => "parser",
            Phase::Analyzer => "analyzer",
            Phase::Codegen => "codegen",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// One entry in the shared diagnostic sink. All four stages append to a
/// single vector in pipeline order; nothing is deduplicated or reordered.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub phase: Phase,
    pub severity: Severity,
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn error(phase: Phase, span: Span, message: impl Into<String>) -> Self {
        Self {
            phase,
            severity: Severity::Error,
            span,
            message: message.into(),
        }
    }

    pub fn warning(phase: Phase, span: Span, message: impl Into<String>) -> Self {
        Self {
            phase,
            severity: Severity::Warning,
            span,
            message: message.into(),
        }
    }

    pub fn info(phase: Phase, span: Span, message: impl Into<String>) -> Self {
        Self {
            phase,
            severity: Severity::Info,
            span,
            message: message.into(),
        }
    }

    /// `[phase] file:line:column: message`; non-error severities carry a
    /// prefix so tools can filter.
    pub fn render(&self, file: &str, map: &LineMap) -> String {
        let (line, col) = map.line_col_of(self.span);
        match self.severity {
            Severity::Error => format!(
                "[{}] {}:{}:{}: {}",
                self.phase.as_str(),
                file,
                line,
                col,
                self.message
            ),
            other => format!(
                "[{}] {}:{}:{}: {}: {}",
                self.phase.as_str(),
                file,
                line,
                col,
                other.as_str(),
                self.message
            ),
        }
    }
}

pub fn error_count(diags: &[Diagnostic]) -> usize {
    diags
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_ast::span_between;

    #[test]
    fn render_uses_line_and_column() {
        let src = "let x = 1;\nlet y = ;\n";
        let map = LineMap::new(src);
        let diag = Diagnostic::error(Phase::Parser, span_between(19, 20), "expected an expression");
        assert_eq!(
            diag.render("main.cov", &map),
            "[parser] main.cov:2:9: expected an expression"
        );
    }

    #[test]
    fn warnings_are_prefixed() {
        let map = LineMap::new("x");
        let diag = Diagnostic::warning(Phase::Analyzer, span_between(0, 1), "branches differ");
        assert!(diag.render("m.cov", &map).contains("warning: branches differ"));
    }
}
