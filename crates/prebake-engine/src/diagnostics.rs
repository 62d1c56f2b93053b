//! Diagnostic taxonomy and reporting channel.
//!
//! Four buckets of failure exist in the engine and they travel on two
//! channels:
//!
//! - **Model errors** in the interpreted program (reference errors, type
//!   errors) are `Throw` completions and never appear here; user `try`
//!   can catch them.
//! - **Introspection errors** (the engine cannot prove soundness) are
//!   reported through the [`DiagnosticHandler`] with a stable `PP` code
//!   and then raised as the fatal sentinel [`EngineError::Fatal`].
//! - **Invariant violations** (impossible state) are always fatal and
//!   name the offended invariant.
//! - **Deadline exceedance** is fatal with its own code so drivers can
//!   distinguish a timeout from an unsupported input.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::SourceSpan;

// ---------------------------------------------------------------------------
// Stable diagnostic codes
// ---------------------------------------------------------------------------

/// Unresolvable reference observed outside the completion channel.
pub const PP_UNRESOLVED_REFERENCE: &str = "PP0001";
/// Assignment target is not a reference.
pub const PP_ILLEGAL_ASSIGNMENT_TARGET: &str = "PP0002";
/// Coercion of an abstract value that cannot be represented soundly.
pub const PP_ABSTRACT_COERCION: &str = "PP0004";
/// Input source failed to parse.
pub const PP_PARSE_FAILED: &str = "PP0005";
/// Call through an abstract callee whose types domain excludes Function.
pub const PP_NOT_CALLABLE: &str = "PP0008";
/// `for-in` over an object the engine cannot enumerate soundly.
pub const PP_UNSUPPORTED_FOR_IN: &str = "PP0013";
/// Wall-clock deadline exceeded during interpretation.
pub const PP_DEADLINE_EXCEEDED: &str = "PP0017";
/// Control flow (loop guard, switch discriminant) the engine cannot fold
/// or residualize.
pub const PP_UNSUPPORTED_ABSTRACT_CONTROL: &str = "PP0019";
/// Join of two differently abrupt completions under an abstract condition.
pub const PP_UNJOINABLE_COMPLETIONS: &str = "PP0021";
/// Abstract property access on a base that is not simple.
pub const PP_NON_SIMPLE_BASE: &str = "PP0025";

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity of a reported diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    FatalError,
    RecoverableError,
    Warning,
    Information,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FatalError => "fatal-error",
            Self::RecoverableError => "recoverable-error",
            Self::Warning => "warning",
            Self::Information => "information",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Diagnostic envelope
// ---------------------------------------------------------------------------

/// A single reported diagnostic with a stable machine-readable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable `PP`-prefixed code.
    pub code: String,
    pub severity: Severity,
    pub message: String,
    /// Source location the diagnostic points at, if known.
    pub span: Option<SourceSpan>,
}

impl Diagnostic {
    pub fn new(
        code: &str,
        severity: Severity,
        message: impl Into<String>,
        span: Option<SourceSpan>,
    ) -> Self {
        Self {
            code: code.to_string(),
            severity,
            message: message.into(),
            span,
        }
    }

    pub fn fatal(code: &str, message: impl Into<String>, span: Option<SourceSpan>) -> Self {
        Self::new(code, Severity::FatalError, message, span)
    }

    pub fn recoverable(code: &str, message: impl Into<String>, span: Option<SourceSpan>) -> Self {
        Self::new(code, Severity::RecoverableError, message, span)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some(span) => write!(
                f,
                "{} {}: {} (line {}, column {})",
                self.code, self.severity, self.message, span.start_line, span.start_column
            ),
            None => write!(f, "{} {}: {}", self.code, self.severity, self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Receives every diagnostic the engine reports.
///
/// The handler decides presentation only; control flow is decided by the
/// engine (a fatal diagnostic always unwinds via [`EngineError::Fatal`]).
pub trait DiagnosticHandler {
    fn report(&mut self, diagnostic: &Diagnostic);
}

/// Default handler: collects diagnostics in order for later inspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectingHandler {
    pub reported: Vec<Diagnostic>,
}

impl DiagnosticHandler for CollectingHandler {
    fn report(&mut self, diagnostic: &Diagnostic) {
        self.reported.push(diagnostic.clone());
    }
}

// ---------------------------------------------------------------------------
// EngineError: the exceptional channel
// ---------------------------------------------------------------------------

/// Errors that travel on the exceptional channel (everything that is not a
/// model error of the interpreted program).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Fatal sentinel: a fatal diagnostic was reported and interpretation
    /// must unwind to the driver.
    #[error("fatal diagnostic: {0}")]
    Fatal(Diagnostic),
    /// An internal invariant does not hold. Always a bug in the engine.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    /// The diagnostic code, when one exists.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Fatal(d) => Some(d.code.as_str()),
            Self::Invariant(_) => None,
        }
    }

    /// Is this the deadline-exceeded failure?
    pub fn is_deadline(&self) -> bool {
        self.code() == Some(PP_DEADLINE_EXCEEDED)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> SourceSpan {
        SourceSpan::new(0, 5, 1, 1, 1, 6)
    }

    #[test]
    fn severity_display() {
        assert_eq!(Severity::FatalError.to_string(), "fatal-error");
        assert_eq!(Severity::Information.to_string(), "information");
    }

    #[test]
    fn diagnostic_display_includes_code_and_location() {
        let d = Diagnostic::fatal(PP_UNSUPPORTED_FOR_IN, "cannot enumerate", Some(span()));
        let text = d.to_string();
        assert!(text.contains("PP0013"));
        assert!(text.contains("line 1"));
    }

    #[test]
    fn collecting_handler_keeps_order() {
        let mut handler = CollectingHandler::default();
        handler.report(&Diagnostic::recoverable(PP_ABSTRACT_COERCION, "first", None));
        handler.report(&Diagnostic::fatal(PP_DEADLINE_EXCEEDED, "second", None));
        assert_eq!(handler.reported.len(), 2);
        assert_eq!(handler.reported[0].code, PP_ABSTRACT_COERCION);
        assert_eq!(handler.reported[1].severity, Severity::FatalError);
    }

    #[test]
    fn engine_error_code_and_deadline() {
        let err = EngineError::Fatal(Diagnostic::fatal(PP_DEADLINE_EXCEEDED, "timeout", None));
        assert!(err.is_deadline());
        assert_eq!(err.code(), Some(PP_DEADLINE_EXCEEDED));
        assert_eq!(EngineError::Invariant("x".to_string()).code(), None);
    }

    #[test]
    fn diagnostic_serde_roundtrip() {
        let d = Diagnostic::recoverable(PP_NON_SIMPLE_BASE, "base not simple", Some(span()));
        let json = serde_json::to_string(&d).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
