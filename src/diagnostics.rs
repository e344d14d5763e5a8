//! [Diagnostic] and its supporting types
//!
//! Every error and warning the pipeline produces — lexical, preprocessor,
//! syntactic, semantic, or resource (spec §7) — is reported through a single
//! [Diagnostic] value so the CLI can print them uniformly and the assembler
//! can track the worst severity seen so far.

use colored::Colorize;
use std::fmt;

/// A byte range into the source text that produced a token or statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// A span that points at nothing in particular (used for diagnostics
    /// that are not anchored to a specific source position).
    pub fn none() -> Span {
        Span { start: 0, end: 0 }
    }
}

/// Whether a [Diagnostic] is fatal to the current status or merely advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// Closed set of diagnostic categories, per spec §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    /// Unterminated literal/comment, invalid escape, stray byte.
    Lexical,
    /// Unbalanced conditional/macro, include not found, include cycle,
    /// bad macro arity, undefined macro on invoke.
    Preprocessor,
    /// Unexpected token, missing operand, missing comma.
    Syntactic,
    /// Duplicate symbol, undefined symbol in non-relocatable position,
    /// backward `.org`/`.advance`, misaligned `.text` target, out-of-range
    /// immediate, invalid register for instruction class, wrong-section
    /// directive use.
    Semantic,
    /// I/O failure on include resolution or object emission.
    Resource,
}

/// A single error or warning, with enough context to print the teacher's
/// `message` / `source line` / `^^^^ underline` rendering.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: Kind,
    pub message: String,
    pub file: String,
    pub line_number: usize,
    pub line: String,
    pub spans: Vec<Span>,
}

impl Diagnostic {
    pub fn error(kind: Kind, message: impl Into<String>, file: &str, line_number: usize, line: &str, spans: Vec<Span>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            kind,
            message: message.into(),
            file: file.to_string(),
            line_number,
            line: line.to_string(),
            spans,
        }
    }

    pub fn warning(kind: Kind, message: impl Into<String>, file: &str, line_number: usize, line: &str, spans: Vec<Span>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            file: file.to_string(),
            line_number,
            line: line.to_string(),
            spans,
        }
    }
}

/// Underline the given spans within `line` with `^` characters, the rest
/// filled with spaces, the way the teacher's assembler underlines bad tokens.
fn underline_spans(line: &str, spans: &[Span]) -> String {
    let mut underline = vec![' '; line.len()];
    for span in spans {
        for i in span.start()..span.end() {
            if i < underline.len() {
                underline[i] = '^';
            }
        }
    }
    underline.into_iter().collect()
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error:".red().bold(),
            Severity::Warning => "warning:".yellow().bold(),
        };
        writeln!(f, "{} {}", label, self.message)?;
        write!(f, "{}:{}\t{}", self.file, self.line_number, self.line)?;
        if !self.spans.is_empty() {
            writeln!(f)?;
            write!(f, "\t{}", underline_spans(&self.line, &self.spans).green())?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Overall status of an [crate::assembler::AssemblerState], per spec §3/§7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Ok,
    Warning,
    Error,
    Stopped,
}

impl Status {
    /// Fold in the severity of a new diagnostic, per the `OK < WARNING <
    /// ERROR` lattice from spec §7 (`.stop` is the only way to reach
    /// `Stopped`, handled separately by the directive handler).
    pub fn record(self, severity: Severity) -> Status {
        match (self, severity) {
            (Status::Stopped, _) => Status::Stopped,
            (Status::Error, _) => Status::Error,
            (_, Severity::Error) => Status::Error,
            (Status::Warning, Severity::Warning) => Status::Warning,
            (Status::Ok, Severity::Warning) => Status::Warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lattice_only_moves_up() {
        let s = Status::Ok.record(Severity::Warning);
        assert_eq!(s, Status::Warning);
        let s = s.record(Severity::Error);
        assert_eq!(s, Status::Error);
        let s = s.record(Severity::Warning);
        assert_eq!(s, Status::Error);
    }

    #[test]
    fn underline_marks_only_given_span() {
        let out = underline_spans("add x0, x1, #5", &[Span::new(0, 3)]);
        assert_eq!(out, "^^^           ");
    }

    #[test]
    fn display_includes_message_and_file_line() {
        let d = Diagnostic::error(
            Kind::Semantic,
            "duplicate symbol \"main\"",
            "main.s",
            4,
            "main: hlt",
            vec![Span::new(0, 4)],
        );
        let rendered = format!("{}", d);
        assert!(rendered.contains("duplicate symbol"));
        assert!(rendered.contains("main.s:4"));
    }
}
