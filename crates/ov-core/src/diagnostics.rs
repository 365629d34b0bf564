//! Non-fatal problems collected during a compile

use serde::{Deserialize, Serialize};
use std::fmt;

/// How bad a diagnostic is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single diagnostic, optionally tied to an instruction offset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Instruction index in the program the diagnostic refers to
    pub offset: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(offset: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            offset,
            message: message.into(),
        }
    }

    pub fn error(offset: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            offset,
            message: message.into(),
        }
    }

    pub fn info(offset: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            offset,
            message: message.into(),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{} at {}: {}", self.severity, offset, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Accumulates diagnostics and tracks whether output quality was compromised
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    degraded: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Info => tracing::debug!("{}", diagnostic),
            Severity::Warning => tracing::warn!("{}", diagnostic),
            Severity::Error => tracing::error!("{}", diagnostic),
        }
        self.entries.push(diagnostic);
    }

    /// Record a warning and mark the output degraded
    pub fn degrade(&mut self, offset: Option<usize>, message: impl Into<String>) {
        self.degraded = true;
        self.push(Diagnostic::warning(offset, message));
    }

    pub fn mark_degraded(&mut self) {
        self.degraded = true;
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.degraded |= other.degraded;
        self.entries.extend(other.entries);
    }

    pub fn into_parts(self) -> (Vec<Diagnostic>, bool) {
        (self.entries, self.degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::warning(Some(12), "Special regs unsupported");
        assert_eq!(format!("{}", diag), "warning at 12: Special regs unsupported");

        let diag = Diagnostic::error(None, "no program");
        assert_eq!(format!("{}", diag), "error: no program");
    }

    #[test]
    fn test_degrade_tracking() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::info(None, "start"));
        assert!(!diags.is_degraded());

        diags.degrade(Some(3), "fallback");
        assert!(diags.is_degraded());
        assert_eq!(diags.entries().len(), 2);

        let (entries, degraded) = diags.into_parts();
        assert!(degraded);
        assert_eq!(entries[1].severity, Severity::Warning);
    }
}
