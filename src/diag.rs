//! Diagnostics sink shared by the parser and the lowerer.
//!
//! Every report is rendered immediately with a caret under the offending
//! source range and recorded in an error list that decides whether the
//! compilation unit produces a tree at all. The writer is replaceable so
//! tests can run silently.

use std::io;
use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::termcolor::{ColorChoice, NoColor, StandardStream, WriteColor};
use codespan_reporting::term::{self, Config};

use crate::errors::{CompileError, CompileErrorKind};

pub struct Reporter<'a> {
    file: SimpleFile<&'a str, &'a str>,
    writer: Box<dyn WriteColor>,
    config: Config,
    errors: Vec<CompileError>,
}

impl<'a> Reporter<'a> {
    /// Reports to stderr, the default for the CLI driver.
    pub fn stderr(filename: &'a str, source: &'a str) -> Self {
        Self::with_writer(
            filename,
            source,
            Box::new(StandardStream::stderr(ColorChoice::Auto)),
        )
    }

    /// Records errors without rendering anything; used by tests.
    pub fn quiet(filename: &'a str, source: &'a str) -> Self {
        Self::with_writer(filename, source, Box::new(NoColor::new(io::sink())))
    }

    pub fn with_writer(filename: &'a str, source: &'a str, writer: Box<dyn WriteColor>) -> Self {
        Self {
            file: SimpleFile::new(filename, source),
            writer,
            config: Config::default(),
            errors: Vec::new(),
        }
    }

    pub fn error(&mut self, kind: CompileErrorKind, span: Range<usize>, message: impl Into<String>) {
        let message = message.into();
        let diag = Diagnostic::error()
            .with_message(&message)
            .with_labels(vec![Label::primary((), span.clone())]);
        let _ = term::emit(self.writer.as_mut(), &self.config, &self.file, &diag);
        self.errors.push(CompileError::new(kind, message, span));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<CompileError> {
        std::mem::take(&mut self.errors)
    }
}
