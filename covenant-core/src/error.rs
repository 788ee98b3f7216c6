#![forbid(unsafe_code)]

use covenant_ast::Span;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("semantic error: {message}")]
#[diagnostic(code(covenant::sema))]
pub struct SemanticError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Debug, Error, Diagnostic)]
#[error("codegen error: {message}")]
#[diagnostic(code(covenant::codegen))]
pub struct LowerError {
    pub message: String,
    #[label]
    pub span: Span,
}
