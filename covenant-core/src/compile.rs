#![forbid(unsafe_code)]

use std::panic::{catch_unwind, AssertUnwindSafe};

use covenant_ast::{span_between, LineMap, Program};
use covenant_lex::Lexer;
use covenant_parse::Parser;

use crate::diagnostics::{error_count, Diagnostic, Phase};
use crate::lower::lower_program;
use crate::sema::Checker;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dialect {
    #[default]
    JavaScript,
    TypeScript,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModuleSystem {
    #[default]
    Esm,
    CommonJs,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerifyLevel {
    Full,
    #[default]
    Runtime,
    /// Suppresses runtime guard emission.
    Trusted,
}

/// Compilation options. Source maps and minification are accepted but
/// reserved; they do not change the output yet.
#[derive(Clone, Debug)]
pub struct Options {
    pub dialect: Dialect,
    pub module_system: ModuleSystem,
    pub runtime_contracts: bool,
    pub verify_level: VerifyLevel,
    pub source_map: bool,
    pub minify: bool,
    pub stop_on_first_error: bool,
    pub file_name: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            module_system: ModuleSystem::default(),
            runtime_contracts: true,
            verify_level: VerifyLevel::default(),
            source_map: false,
            minify: false,
            stop_on_first_error: false,
            file_name: "<input>".to_string(),
        }
    }
}

/// Result of one compilation: target text (when lowering ran and succeeded)
/// plus every diagnostic, in pipeline order.
#[derive(Debug)]
pub struct Compilation {
    pub output: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub program: Option<Program>,
}

impl Compilation {
    pub fn success(&self) -> bool {
        error_count(&self.diagnostics) == 0
    }

    pub fn error_count(&self) -> usize {
        error_count(&self.diagnostics)
    }

    pub fn render_diagnostics(&self, source: &str, file: &str) -> Vec<String> {
        let map = LineMap::new(source);
        self.diagnostics
            .iter()
            .map(|d| d.render(file, &map))
            .collect()
    }
}

/// Run the full pipeline: scan, build the tree, resolve and check, lower.
///
/// No stage aborts on the first error; later stages run best-effort so a
/// single invocation reports everything it can. `stop_on_first_error` opts
/// into early exit between stages instead.
pub fn compile(source: &str, options: &Options) -> Compilation {
    let mut diagnostics = Vec::new();

    // Stage 1 — scanner.
    let (tokens, lex_errors) = Lexer::new(source).lex();
    for e in lex_errors {
        diagnostics.push(Diagnostic::error(Phase::Lexer, e.span, e.message));
    }
    if options.stop_on_first_error && error_count(&diagnostics) > 0 {
        return Compilation {
            output: None,
            diagnostics,
            program: None,
        };
    }

    // Stage 2 — tree builder.
    let mut parser = Parser::new(&tokens);
    let (program, parse_errors) = parser.parse_program();
    for e in parse_errors {
        diagnostics.push(Diagnostic::error(Phase::Parser, e.span, e.message));
    }
    if options.stop_on_first_error && error_count(&diagnostics) > 0 {
        return Compilation {
            output: None,
            diagnostics,
            program: Some(program),
        };
    }

    // Stage 3 — resolver and checker.
    let mut checker = Checker::new();
    checker.check_program(&program);
    diagnostics.extend(checker.take_diagnostics());
    if options.stop_on_first_error && error_count(&diagnostics) > 0 {
        return Compilation {
            output: None,
            diagnostics,
            program: Some(program),
        };
    }

    // Stage 4 — lowerer. Internal panics become codegen diagnostics and the
    // partial output is discarded.
    let line_map = LineMap::new(source);
    let lowered = catch_unwind(AssertUnwindSafe(|| {
        lower_program(&program, &checker, options, &options.file_name, &line_map)
    }));
    let output = match lowered {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            diagnostics.push(Diagnostic::error(Phase::Codegen, e.span, e.message));
            None
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            diagnostics.push(Diagnostic::error(
                Phase::Codegen,
                span_between(0, 0),
                format!("internal error while lowering: {detail}"),
            ));
            None
        }
    };

    Compilation {
        output,
        diagnostics,
        program: Some(program),
    }
}

/// Scanner + tree builder + checker only; used by `check`-style callers.
pub fn check(source: &str, options: &Options) -> Compilation {
    let mut diagnostics = Vec::new();

    let (tokens, lex_errors) = Lexer::new(source).lex();
    for e in lex_errors {
        diagnostics.push(Diagnostic::error(Phase::Lexer, e.span, e.message));
    }
    if options.stop_on_first_error && error_count(&diagnostics) > 0 {
        return Compilation {
            output: None,
            diagnostics,
            program: None,
        };
    }

    let mut parser = Parser::new(&tokens);
    let (program, parse_errors) = parser.parse_program();
    for e in parse_errors {
        diagnostics.push(Diagnostic::error(Phase::Parser, e.span, e.message));
    }
    if options.stop_on_first_error && error_count(&diagnostics) > 0 {
        return Compilation {
            output: None,
            diagnostics,
            program: Some(program),
        };
    }

    let mut checker = Checker::new();
    checker.check_program(&program);
    diagnostics.extend(checker.take_diagnostics());

    Compilation {
        output: None,
        diagnostics,
        program: Some(program),
    }
}
