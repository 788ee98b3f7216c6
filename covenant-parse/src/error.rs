#![forbid(unsafe_code)]

use covenant_ast::Span;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("parse error: {message}")]
#[diagnostic(code(covenant::parse))]
pub struct ParseError {
    pub message: String,
    #[label]
    pub span: Span,
}
