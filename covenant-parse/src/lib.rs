#![forbid(unsafe_code)]

mod error;
mod fmt;
mod parser;

use covenant_lex::Lexer;
use miette::IntoDiagnostic;

pub use error::ParseError;
pub use fmt::{format_expr, format_pattern, format_program, format_type};
pub use parser::Parser;

/// Parse a source file, failing on the first lexical or syntax error.
///
/// Convenience entry point for tests and tools; the compilation pipeline uses
/// [`Parser::parse_program`] directly to keep going after errors.
pub fn parse_source(src: &str) -> miette::Result<covenant_ast::Program> {
    let (tokens, lex_errors) = Lexer::new(src).lex();
    if let Some(err) = lex_errors.into_iter().next() {
        return Err(err).into_diagnostic();
    }
    let mut parser = Parser::new(&tokens);
    let (program, errors) = parser.parse_program();
    if let Some(err) = errors.into_iter().next() {
        return Err(err).into_diagnostic();
    }
    Ok(program)
}

/// Parse a source file while recovering from errors.
///
/// Returns a best-effort tree and every `ParseError` encountered.
pub fn parse_source_with_recovery(src: &str) -> (covenant_ast::Program, Vec<ParseError>) {
    let (tokens, _) = Lexer::new(src).lex();
    let mut parser = Parser::new(&tokens);
    parser.parse_program()
}

/// Parse a single expression followed by end of input.
pub fn parse_expr(src: &str) -> miette::Result<covenant_ast::Expr> {
    let (tokens, lex_errors) = Lexer::new(src).lex();
    if let Some(err) = lex_errors.into_iter().next() {
        return Err(err).into_diagnostic();
    }
    let mut parser = Parser::new(&tokens);
    parser.parse_expr_eof().into_diagnostic()
}
