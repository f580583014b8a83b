// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all analysis phases.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ir::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0203`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different semantic meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes for every failure the analyses can report.
pub mod codes {
    use super::DiagCode;

    /// Malformed program description (driver input).
    pub const E0001: DiagCode = DiagCode("E0001");

    /// Malformed storage attribute (shape, arity, or type violation).
    pub const E0100: DiagCode = DiagCode("E0100");

    /// Buffer element type differs from a previous declaration.
    pub const E0201: DiagCode = DiagCode("E0201");
    /// Buffer rank differs from a previous declaration.
    pub const E0202: DiagCode = DiagCode("E0202");
    /// Buffer layout cannot be unified with a previous declaration.
    pub const E0203: DiagCode = DiagCode("E0203");
    /// Buffer name declared by more than one memory import/export.
    pub const E0204: DiagCode = DiagCode("E0204");
    /// Buffer layout left partially unresolved after all declarations.
    pub const E0205: DiagCode = DiagCode("E0205");

    /// Conflicting memory spaces merged into one value.
    pub const E0301: DiagCode = DiagCode("E0301");
    /// Conflicting buffer names merged into one value.
    pub const E0302: DiagCode = DiagCode("E0302");
    /// Conflicting layouts merged into one value.
    pub const E0303: DiagCode = DiagCode("E0303");

    /// Buffer layout depends on loops it cannot be nested in.
    pub const E0401: DiagCode = DiagCode("E0401");
    /// Buffer written before the memory it aliases is defined.
    pub const E0402: DiagCode = DiagCode("E0402");
    /// Buffer depends on a dimension defined after its allocation point.
    pub const E0403: DiagCode = DiagCode("E0403");

    /// Value storage does not cover cross-iteration communication.
    pub const E0501: DiagCode = DiagCode("E0501");
    /// In-place buffer update with mismatched operand/result layouts.
    pub const E0502: DiagCode = DiagCode("E0502");

    /// Loops with the same name disagree on dimension or step.
    pub const E0601: DiagCode = DiagCode("E0601");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any analysis phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related spans.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    /// Shorthand for an error-level diagnostic with a code.
    pub fn error(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        for related in &self.related_spans {
            write!(f, "\n  note: {}", related.label)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
