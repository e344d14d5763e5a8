//! Pretty-printing diagnostics to the console

use crate::diagnostics::Diagnostic;
use colored::Colorize;

/// Print a [Diagnostic] (error or warning) to stderr.
pub fn report(diagnostic: &Diagnostic) {
    eprintln!("{}", diagnostic);
}

/// Pretty-print an informational note that does not affect assembler status
/// (e.g. include resolution tracing under `-Wall`).
pub fn note(message: impl AsRef<str>) {
    let note_title = "note:".cyan().bold();
    eprintln!("{} {}", note_title, message.as_ref());
}

/// Pretty-print a bare I/O or usage error that has no source span to anchor to.
pub fn error(message: impl AsRef<str>) {
    let error_title = "error:".red().bold();
    eprintln!("{} {}", error_title, message.as_ref());
}
