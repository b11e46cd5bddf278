//! Diagnostic collection.
//!
//! Warnings and the terminating error are appended to a [`MessageHandler`]
//! in call order. Formatting stays here; deciding *what* to report is the
//! parser's job.

use crate::error::CompileError;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One reported message, located by section name and line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub section: String,
    pub line: u32,
    pub message: String,
}

/// Collects diagnostics in the order they are produced.
#[derive(Debug, Default)]
pub struct MessageHandler {
    entries: Vec<Diagnostic>,
}

impl MessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, section: impl Into<String>, line: u32, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            section: section.into(),
            line,
            message: message.into(),
        });
    }

    pub fn add_error(&mut self, err: &CompileError) {
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            section: err.section.clone(),
            line: err.line,
            message: err.message.clone(),
        });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// The terminating error, if any. At most one error is ever recorded.
    pub fn error(&self) -> Option<&Diagnostic> {
        self.entries.iter().find(|e| e.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|e| e.severity == Severity::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_messages_keep_call_order() {
        let mut mh = MessageHandler::new();
        mh.add_warning("main", 3, "first");
        mh.add_warning("main", 9, "second");
        let lines: Vec<u32> = mh.entries().iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 9]);
    }

    #[test]
    fn test_error_lookup() {
        let mut mh = MessageHandler::new();
        mh.add_warning("main", 1, "w");
        assert!(mh.error().is_none());
        mh.add_error(&CompileError::new(ErrorKind::Syntax, "main", 2, "bad"));
        assert_eq!(mh.error().unwrap().line, 2);
    }
}
