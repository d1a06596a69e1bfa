//! Diagnostics collected by the front-end phases.

use crate::ast::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One user-facing problem, with its source span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl Diagnostic {
    pub fn at(span: &Span, message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            file: span.file.clone(),
            line: span.line,
            col: span.col,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}:{}:{}: {}", self.file, self.line, self.col, self.message)
        }
    }
}

/// Accumulator shared by sema's sub-visitors.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn error(&mut self, span: &Span, message: impl Into<String>) {
        self.items.push(Diagnostic::at(span, message));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Diagnostic> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_span() {
        let d = Diagnostic {
            message: "undefined name 'x'".to_string(),
            file: "main.py".to_string(),
            line: 3,
            col: 7,
        };
        assert_eq!(d.to_string(), "main.py:3:7: undefined name 'x'");
    }

    #[test]
    fn test_accumulation() {
        let mut diags = Diagnostics::new();
        assert!(diags.is_empty());
        diags.error(&Span::new("m.py", 1, 1), "bad");
        assert_eq!(diags.len(), 1);
    }
}
