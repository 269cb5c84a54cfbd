//! Error taxonomy shared by the compiler, evaluator, and decision layer.
//!
//! Every failure carries a `kind` that maps onto a stable [`ReasonCode`]. The
//! reason code is what audit logs and adapters see; free-form messages stay
//! internal.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Position in policy source text (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: usize,
    pub col: usize,
}

impl Location {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Why compilation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileErrorKind {
    SyntaxError,
    DuplicateRule,
    UnresolvedReference,
    UnsupportedConstruct,
    /// Two sources declared the same package.
    DuplicateNamespace,
}

impl CompileErrorKind {
    pub fn as_str(self) -> &'static str {
        ReasonCode::from(self).as_str()
    }
}

/// Compilation failure. Compilation is all-or-nothing: when this is returned no
/// module exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} at {location}: {message}", .kind.as_str())]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub location: Location,
    pub message: String,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, location: Location, message: impl Into<String>) -> Self {
        Self {
            kind,
            location,
            message: message.into(),
        }
    }

    pub fn syntax(location: Location, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::SyntaxError, location, message)
    }

    pub fn unsupported(location: Location, message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::UnsupportedConstruct, location, message)
    }

    pub fn reason_code(&self) -> ReasonCode {
        self.kind.into()
    }
}

/// Why evaluation could not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalErrorKind {
    MissingBinding,
    TypeMismatch,
    CyclicReference,
    DepthExceeded,
    DeadlineExceeded,
    SessionClosed,
    /// The requested namespace or rule does not exist in the module.
    UndefinedRule,
    /// The fact document failed binding validation.
    InvalidFacts,
}

impl EvalErrorKind {
    pub fn as_str(self) -> &'static str {
        ReasonCode::from(self).as_str()
    }
}

fn path_suffix(path: &Option<String>) -> String {
    path.as_ref().map(|p| format!(" ({p})")).unwrap_or_default()
}

/// Evaluation failure. Never escapes `decide`; it becomes `Indeterminate`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{}: {message}", .kind.as_str(), path_suffix(.path))]
pub struct EvalError {
    pub kind: EvalErrorKind,
    /// Fact path or rule chain the error refers to, when there is one.
    pub path: Option<String>,
    pub message: String,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            message: message.into(),
        }
    }

    pub fn at(kind: EvalErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
            message: message.into(),
        }
    }

    pub fn session_closed() -> Self {
        Self::new(EvalErrorKind::SessionClosed, "session already completed")
    }

    pub fn reason_code(&self) -> ReasonCode {
        self.kind.into()
    }
}

/// Stable, coarse reason codes for audit records (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    SyntaxError,
    DuplicateRule,
    UnresolvedReference,
    UnsupportedConstruct,
    DuplicateNamespace,
    MissingBinding,
    TypeMismatch,
    CyclicReference,
    DepthExceeded,
    DeadlineExceeded,
    SessionClosed,
    UndefinedRule,
    InvalidFacts,
    /// The rule evaluated to something other than a boolean.
    NonBooleanResult,
}

impl ReasonCode {
    /// String representation used in audit logs and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::SyntaxError => "SYNTAX_ERROR",
            ReasonCode::DuplicateRule => "DUPLICATE_RULE",
            ReasonCode::UnresolvedReference => "UNRESOLVED_REFERENCE",
            ReasonCode::UnsupportedConstruct => "UNSUPPORTED_CONSTRUCT",
            ReasonCode::DuplicateNamespace => "DUPLICATE_NAMESPACE",
            ReasonCode::MissingBinding => "MISSING_BINDING",
            ReasonCode::TypeMismatch => "TYPE_MISMATCH",
            ReasonCode::CyclicReference => "CYCLIC_REFERENCE",
            ReasonCode::DepthExceeded => "DEPTH_EXCEEDED",
            ReasonCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ReasonCode::SessionClosed => "SESSION_CLOSED",
            ReasonCode::UndefinedRule => "UNDEFINED_RULE",
            ReasonCode::InvalidFacts => "INVALID_FACTS",
            ReasonCode::NonBooleanResult => "NON_BOOLEAN_RESULT",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReasonCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl From<CompileErrorKind> for ReasonCode {
    fn from(kind: CompileErrorKind) -> Self {
        match kind {
            CompileErrorKind::SyntaxError => ReasonCode::SyntaxError,
            CompileErrorKind::DuplicateRule => ReasonCode::DuplicateRule,
            CompileErrorKind::UnresolvedReference => ReasonCode::UnresolvedReference,
            CompileErrorKind::UnsupportedConstruct => ReasonCode::UnsupportedConstruct,
            CompileErrorKind::DuplicateNamespace => ReasonCode::DuplicateNamespace,
        }
    }
}

impl From<EvalErrorKind> for ReasonCode {
    fn from(kind: EvalErrorKind) -> Self {
        match kind {
            EvalErrorKind::MissingBinding => ReasonCode::MissingBinding,
            EvalErrorKind::TypeMismatch => ReasonCode::TypeMismatch,
            EvalErrorKind::CyclicReference => ReasonCode::CyclicReference,
            EvalErrorKind::DepthExceeded => ReasonCode::DepthExceeded,
            EvalErrorKind::DeadlineExceeded => ReasonCode::DeadlineExceeded,
            EvalErrorKind::SessionClosed => ReasonCode::SessionClosed,
            EvalErrorKind::UndefinedRule => ReasonCode::UndefinedRule,
            EvalErrorKind::InvalidFacts => ReasonCode::InvalidFacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_error_display_includes_path() {
        let e = EvalError::at(EvalErrorKind::MissingBinding, "input.uid", "not bound");
        assert_eq!(e.to_string(), "MISSING_BINDING (input.uid): not bound");
    }

    #[test]
    fn compile_error_display_includes_location() {
        let e = CompileError::syntax(Location::new(3, 7), "expected expression");
        assert_eq!(e.to_string(), "SYNTAX_ERROR at 3:7: expected expression");
    }
}
