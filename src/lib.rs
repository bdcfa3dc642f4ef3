//! Front end for a free-form subset of Fortran: counted DO loops, logical
//! IF statements, list-directed PRINT, scalar and array assignment over
//! integer, real, logical, and character data.
//!
//! The pipeline has two stages. [`parser`] scans buffered source lines with
//! a backtracking recursive-descent grammar and builds an untyped concrete
//! syntax tree ([`cst`]). [`sema`] lowers that tree into a typed program
//! unit ([`ast`]) with interned variables, explicit widening conversions,
//! and linearized array offsets. Diagnostics from both stages render with
//! source carets via [`diag`].

pub mod ast;
pub mod cli;
pub mod cst;
pub mod diag;
pub mod errors;
pub mod line;
pub mod parser;
pub mod sema;

pub use errors::{CompileError, CompileErrorKind};

/// Parses a source file into its concrete syntax tree, reporting
/// diagnostics to stderr.
pub fn parse(source: &str, filename: &str) -> Result<cst::Program, Vec<CompileError>> {
    parser::parse(source, filename)
}

/// Runs the whole front end: parse, then lower to a typed program unit.
/// Diagnostics go to stderr; the error list comes back on failure.
pub fn analyze(source: &str, filename: &str) -> Result<ast::ProgramUnit, Vec<CompileError>> {
    let mut reporter = diag::Reporter::stderr(filename, source);
    match analyze_with(source, &mut reporter) {
        Some(unit) => Ok(unit),
        None => Err(reporter.take_errors()),
    }
}

/// Like [`analyze`], but reporting through a caller-supplied sink. Lowering
/// only runs on a clean parse; `None` means at least one diagnostic fired.
pub fn analyze_with(
    source: &str,
    reporter: &mut diag::Reporter<'_>,
) -> Option<ast::ProgramUnit> {
    let program = parser::parse_with(source, reporter)?;
    sema::lower_with(&program, reporter)
}
