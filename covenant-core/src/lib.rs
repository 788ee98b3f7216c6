#![forbid(unsafe_code)]

mod compile;
pub mod diagnostics;
mod error;
mod lower;
mod scope;
mod sema;
pub mod types;

pub use compile::{check, compile, Compilation, Dialect, ModuleSystem, Options, VerifyLevel};
pub use diagnostics::{error_count, Diagnostic, Phase, Severity};
pub use error::{LowerError, SemanticError};
pub use lower::lower_program;
pub use scope::{ScopeKind, Symbol, SymbolTable};
pub use sema::{Checker, Ctx};
pub use types::{assignable, wider, Type};
