//! Completion records: the structured outcome of evaluating a node.
//!
//! The dispatcher propagates abrupt completions by early return rather
//! than stack unwinding; every evaluator returns `EngineResult<Completion>`
//! and helpers here implement the Standard's completion algebra.
//!
//! `Joined` and `PossiblyNormal` arise only at control-flow joins whose
//! condition is abstract: `Joined` when both branches are abrupt,
//! `PossiblyNormal` when exactly one side completed normally.

use serde::{Deserialize, Serialize};

use crate::ast::SourceSpan;
use crate::values::Value;

/// Outcome of evaluating an expression or statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Completion {
    Normal(Value),
    Throw {
        value: Value,
        span: SourceSpan,
    },
    Break {
        label: Option<String>,
        value: Value,
    },
    Continue {
        label: Option<String>,
        value: Value,
    },
    Return(Value),
    /// Both branches of an abstract-condition join were abrupt.
    Joined(Box<JoinedCompletion>),
    /// One branch of an abstract-condition join was normal.
    PossiblyNormal(Box<PossiblyNormalCompletion>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedCompletion {
    /// Abstract condition selecting between the branches.
    pub condition: Value,
    /// Completion when the condition holds.
    pub consequent: Completion,
    /// Completion when it does not.
    pub alternate: Completion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PossiblyNormalCompletion {
    /// Abstract condition selecting between the branches.
    pub condition: Value,
    /// Value of the normal branch.
    pub normal_value: Value,
    /// `true` when the condition being truthy selects the normal branch.
    pub condition_selects_normal: bool,
    /// The abrupt branch.
    pub abrupt: Completion,
}

impl Completion {
    pub fn normal(value: Value) -> Self {
        Self::Normal(value)
    }

    pub fn empty() -> Self {
        Self::Normal(Value::Undefined)
    }

    pub fn is_abrupt(&self) -> bool {
        !matches!(self, Self::Normal(_))
    }

    pub fn is_throw(&self) -> bool {
        matches!(self, Self::Throw { .. })
    }

    /// The carried value, for arms that have exactly one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Normal(v) | Self::Return(v) => Some(v),
            Self::Throw { value, .. }
            | Self::Break { value, .. }
            | Self::Continue { value, .. } => Some(value),
            Self::Joined(_) | Self::PossiblyNormal(_) => None,
        }
    }

    /// The Standard's `UpdateEmpty`: statement completions that carry no
    /// value (modeled as `Undefined`) adopt the accumulated value.
    pub fn update_empty(self, value: Value) -> Self {
        match self {
            Self::Normal(Value::Undefined) => Self::Normal(value),
            Self::Break { label, value: Value::Undefined } => Self::Break { label, value },
            Self::Continue { label, value: Value::Undefined } => Self::Continue { label, value },
            other => other,
        }
    }

    /// Does this completion terminate iteration of a loop labeled with any
    /// of `labels` (or unlabeled)?
    pub fn consumes_break(&self, labels: &[String]) -> bool {
        match self {
            Self::Break { label: None, .. } => true,
            Self::Break { label: Some(l), .. } => labels.iter().any(|x| x == l),
            _ => false,
        }
    }

    /// Does this completion restart iteration of a loop labeled with any
    /// of `labels` (or unlabeled)?
    pub fn consumes_continue(&self, labels: &[String]) -> bool {
        match self {
            Self::Continue { label: None, .. } => true,
            Self::Continue { label: Some(l), .. } => labels.iter().any(|x| x == l),
            _ => false,
        }
    }

    /// Two abrupt completions have the same shape when a runtime
    /// conditional can merge them into one statement form.
    pub fn same_abrupt_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Throw { .. }, Self::Throw { .. }) => true,
            (Self::Return(_), Self::Return(_)) => true,
            (Self::Break { label: a, .. }, Self::Break { label: b, .. }) => a == b,
            (Self::Continue { label: a, .. }, Self::Continue { label: b, .. }) => a == b,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

/// Error classes of the interpreted language. A `ModelError` is not an
/// engine failure: the evaluator materializes it as an error object and a
/// `Throw` completion, which user `try` can catch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelErrorKind {
    Reference,
    Type,
    Range,
    Syntax,
}

impl ModelErrorKind {
    pub fn constructor_name(self) -> &'static str {
        match self {
            Self::Reference => "ReferenceError",
            Self::Type => "TypeError",
            Self::Range => "RangeError",
            Self::Syntax => "SyntaxError",
        }
    }
}

/// A pending model-level error, produced by operations that do not have
/// access to the intrinsics needed to build the thrown error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
}

impl ModelError {
    pub fn reference(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Reference,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Type,
            message: message.into(),
        }
    }
}

/// Result of an operation that can fail with a model error.
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::ObjectHandle;

    fn throw() -> Completion {
        Completion::Throw {
            value: Value::string("boom"),
            span: SourceSpan::synthetic(),
        }
    }

    #[test]
    fn update_empty_replaces_undefined_only() {
        let c = Completion::empty().update_empty(Value::Number(3.0));
        assert_eq!(c, Completion::Normal(Value::Number(3.0)));

        let kept = Completion::Normal(Value::Number(1.0)).update_empty(Value::Number(9.0));
        assert_eq!(kept, Completion::Normal(Value::Number(1.0)));

        let brk = Completion::Break {
            label: None,
            value: Value::Undefined,
        }
        .update_empty(Value::Bool(true));
        assert_eq!(
            brk,
            Completion::Break {
                label: None,
                value: Value::Bool(true)
            }
        );
    }

    #[test]
    fn break_and_continue_label_matching() {
        let labels = vec!["outer".to_string()];
        let unlabeled = Completion::Break {
            label: None,
            value: Value::Undefined,
        };
        assert!(unlabeled.consumes_break(&labels));
        assert!(unlabeled.consumes_break(&[]));

        let labeled = Completion::Continue {
            label: Some("outer".to_string()),
            value: Value::Undefined,
        };
        assert!(labeled.consumes_continue(&labels));
        assert!(!labeled.consumes_continue(&[]));
        assert!(!throw().consumes_break(&labels));
    }

    #[test]
    fn abrupt_shape_matching() {
        assert!(throw().same_abrupt_shape(&throw()));
        assert!(Completion::Return(Value::Null)
            .same_abrupt_shape(&Completion::Return(Value::Number(1.0))));
        assert!(!throw().same_abrupt_shape(&Completion::Return(Value::Null)));
        let b1 = Completion::Break {
            label: Some("a".to_string()),
            value: Value::Undefined,
        };
        let b2 = Completion::Break {
            label: Some("b".to_string()),
            value: Value::Undefined,
        };
        assert!(!b1.same_abrupt_shape(&b2));
    }

    #[test]
    fn value_accessor() {
        assert_eq!(
            Completion::Return(Value::Object(ObjectHandle(1))).value(),
            Some(&Value::Object(ObjectHandle(1)))
        );
        let joined = Completion::Joined(Box::new(JoinedCompletion {
            condition: Value::Bool(true),
            consequent: throw(),
            alternate: throw(),
        }));
        assert_eq!(joined.value(), None);
    }

    #[test]
    fn completion_serde_roundtrip() {
        let c = Completion::PossiblyNormal(Box::new(PossiblyNormalCompletion {
            condition: Value::Bool(false),
            normal_value: Value::Number(1.0),
            condition_selects_normal: true,
            abrupt: throw(),
        }));
        let json = serde_json::to_string(&c).unwrap();
        let back: Completion = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
