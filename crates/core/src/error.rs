//! Structured diagnostics and stage-level errors.
//!
//! Every stage of the pipeline reports problems as [`Diagnostic`] values
//! through a [`DiagnosticSink`] at the point of first observation, then
//! returns an [`Error`] so the enclosing stage can fail. Nothing is retried
//! and nothing is recovered.

use crate::token::Token;
use std::fmt;

/// How serious a diagnostic is. Warnings do not fail the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One diagnostic message tied to a source location.
///
/// When `source_line` is non-empty the rendering uses the caret format:
///
/// ```text
/// <full source line>
///      ^
/// <message> at <file>:<line>
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 0-based column of the offending token.
    pub column: u32,
    /// Full text of the source line, empty when unavailable.
    pub source_line: String,
    pub message: String,
}

impl Diagnostic {
    /// Diagnostic anchored at a token, carrying its source line for the
    /// caret rendering.
    pub fn at_token(severity: Severity, token: &Token, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            file: token.file_name().to_owned(),
            line: token.line_number(),
            column: token.column_number(),
            source_line: token.full_line().to_owned(),
            message: message.into(),
        }
    }

    /// The parser's "unexpected token" diagnostic.
    pub fn unexpected_token(token: &Token) -> Self {
        Diagnostic::at_token(
            Severity::Error,
            token,
            format!("Unexpected Token '{}'", token.text()),
        )
    }

    pub fn error(token: &Token, message: impl Into<String>) -> Self {
        Diagnostic::at_token(Severity::Error, token, message)
    }

    pub fn warning(token: &Token, message: impl Into<String>) -> Self {
        Diagnostic::at_token(Severity::Warning, token, message)
    }

    /// Diagnostic without a source line, for failures that are not tied to
    /// a particular token (missing files, unresolved imports).
    pub fn bare(severity: Severity, file: &str, line: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            file: file.to_owned(),
            line,
            column: 0,
            source_line: String::new(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.source_line.is_empty() {
            writeln!(f, "{}", self.source_line)?;
            for _ in 0..self.column {
                write!(f, " ")?;
            }
            writeln!(f, "^")?;
        }
        write!(f, "{} at {}:{}", self.message, self.file, self.line)
    }
}

/// Receiver for diagnostics. Passing the sink by reference lets tests
/// capture output instead of scraping stderr.
pub trait DiagnosticSink {
    fn report(&mut self, diag: Diagnostic);
}

/// Default sink: writes every diagnostic to standard error.
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn report(&mut self, diag: Diagnostic) {
        eprintln!("{}", diag);
    }
}

/// Buffering sink for tests.
#[derive(Default)]
pub struct BufferSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl BufferSink {
    pub fn new() -> Self {
        BufferSink::default()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }
}

impl DiagnosticSink for BufferSink {
    fn report(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }
}

/// Stage-level failure. The detailed diagnostic has already been reported
/// to the sink by the time one of these is returned; upstream stages
/// propagate without further annotation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("syntax error at {file}:{line}")]
    Syntax { file: String, line: u32 },

    #[error("lowering failed at {file}:{line}")]
    Lowering { file: String, line: u32 },

    #[error("cannot locate '{name}' on the include path")]
    FileNotFound { name: String },

    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("symbol '{symbol}' not defined in namespace '{namespace}'")]
    Resolution { symbol: String, namespace: String },

    #[error("dependency tracing failed: {message}")]
    Dependency { message: String },
}

impl Error {
    pub fn syntax(token: &Token) -> Self {
        Error::Syntax {
            file: token.file_name().to_owned(),
            line: token.line_number(),
        }
    }

    pub fn lowering(token: &Token) -> Self {
        Error::Lowering {
            file: token.file_name().to_owned(),
            line: token.line_number(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Lexeme;
    use std::rc::Rc;

    fn sample_token() -> Token {
        Token::new(
            "bogus".to_owned(),
            Rc::new("demo.nyx".to_owned()),
            Rc::new("rule bogus {".to_owned()),
            3,
            5,
            Lexeme::Identifier,
        )
    }

    #[test]
    fn caret_rendering_matches_column() {
        let diag = Diagnostic::unexpected_token(&sample_token());
        let rendered = diag.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "rule bogus {");
        assert_eq!(lines[1], "     ^");
        assert_eq!(lines[2], "Unexpected Token 'bogus' at demo.nyx:3");
    }

    #[test]
    fn bare_diagnostic_skips_caret() {
        let diag = Diagnostic::bare(Severity::Error, "missing.nyx", 0, "cannot open file");
        assert_eq!(diag.to_string(), "cannot open file at missing.nyx:0");
    }

    #[test]
    fn buffer_sink_collects() {
        let mut sink = BufferSink::new();
        sink.report(Diagnostic::warning(&sample_token(), "shadowed"));
        sink.report(Diagnostic::error(&sample_token(), "broken"));
        assert_eq!(sink.diagnostics.len(), 2);
        assert_eq!(sink.errors().count(), 1);
    }
}
