//! Decision extraction: the single fail-closed chokepoint.
//!
//! `Bool(true)` is the only value that yields `Allow`. Every error and every
//! non-boolean result becomes `Indeterminate`, which callers must treat as a
//! denial.

use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::error::{CompileError, EvalError, ReasonCode};
use crate::eval::evaluate;
use crate::module::PolicyModule;
use crate::session::Session;
use crate::value::{Document, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Deny,
    Indeterminate(ReasonCode),
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Deny => "deny",
            Outcome::Indeterminate(_) => "indeterminate",
        }
    }

    pub fn reason(self) -> Option<ReasonCode> {
        match self {
            Outcome::Indeterminate(r) => Some(r),
            _ => None,
        }
    }
}

/// Outcome bound to the rule it was computed for.
///
/// Serializes as `{"outcome": "...", "rule": "<ns>.<rule>", "reason"?: "CODE"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,
    pub rule: String,
}

impl Decision {
    pub fn new(namespace: &str, rule: &str, outcome: Outcome) -> Self {
        Self {
            outcome,
            rule: format!("{namespace}.{rule}"),
        }
    }

    /// Map an evaluation result. Only a strict `true` allows.
    pub fn from_result(namespace: &str, rule: &str, result: Result<Value, EvalError>) -> Self {
        let outcome = match result {
            Ok(Value::Bool(true)) => Outcome::Allow,
            Ok(Value::Bool(false)) => Outcome::Deny,
            Ok(_) => Outcome::Indeterminate(ReasonCode::NonBooleanResult),
            Err(e) => Outcome::Indeterminate(e.reason_code()),
        };
        Self::new(namespace, rule, outcome)
    }

    /// The policy never compiled, so nothing can be allowed.
    pub fn from_compile_error(namespace: &str, rule: &str, err: &CompileError) -> Self {
        Self::new(namespace, rule, Outcome::Indeterminate(err.reason_code()))
    }

    /// Fail-closed access predicate.
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    pub fn reason(&self) -> Option<ReasonCode> {
        self.outcome.reason()
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Record<'a> {
            outcome: &'static str,
            rule: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<ReasonCode>,
        }

        Record {
            outcome: self.outcome.as_str(),
            rule: &self.rule,
            reason: self.reason(),
        }
        .serialize(serializer)
    }
}

/// Evaluate `namespace.rule` and reduce the result to a [`Decision`].
pub fn decide(session: &Session, namespace: &str, rule: &str) -> Decision {
    let result = evaluate(session, namespace, rule);
    if let Err(e) = &result {
        tracing::warn!(namespace, rule, error = %e, "rule evaluation failed");
    }
    let decision = Decision::from_result(namespace, rule, result);
    tracing::debug!(
        rule = %decision.rule,
        outcome = decision.outcome.as_str(),
        reason = decision.reason().map(ReasonCode::as_str),
        "decision"
    );
    decision
}

/// One-shot decision straight from a compile result. A policy that failed to
/// compile yields `Indeterminate` with the compile kind preserved.
pub fn decide_compiled(
    compiled: &Result<Arc<PolicyModule>, CompileError>,
    facts: Document,
    namespace: &str,
    rule: &str,
) -> Decision {
    match compiled {
        Ok(module) => {
            let session = Session::new(Arc::clone(module), facts);
            let decision = decide(&session, namespace, rule);
            session.complete();
            decision
        }
        Err(e) => {
            tracing::warn!(namespace, rule, error = %e, "decision against uncompiled policy");
            Decision::from_compile_error(namespace, rule, e)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::compiler::compile;
    use crate::error::{CompileErrorKind, EvalErrorKind, Location};
    use crate::value::Document;

    #[test]
    fn only_strict_true_allows() {
        let d = Decision::from_result("p", "r", Ok(Value::Bool(true)));
        assert!(d.is_allowed());
        let d = Decision::from_result("p", "r", Ok(Value::Bool(false)));
        assert_eq!(d.outcome, Outcome::Deny);
        let d = Decision::from_result("p", "r", Ok(Value::Str("true".into())));
        assert_eq!(d.outcome, Outcome::Indeterminate(ReasonCode::NonBooleanResult));
        assert!(!d.is_allowed());
    }

    #[test]
    fn errors_keep_their_kind() {
        let err = EvalError::new(EvalErrorKind::CyclicReference, "loop");
        let d = Decision::from_result("p", "r", Err(err));
        assert_eq!(d.reason(), Some(ReasonCode::CyclicReference));

        let err = CompileError::new(CompileErrorKind::DuplicateRule, Location::new(1, 1), "dup");
        let d = Decision::from_compile_error("p", "r", &err);
        assert_eq!(d.outcome, Outcome::Indeterminate(ReasonCode::DuplicateRule));
    }

    #[test]
    fn audit_encoding() {
        let d = Decision::new("diaz.rego", "auth", Outcome::Allow);
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({"outcome": "allow", "rule": "diaz.rego.auth"})
        );
        let d = Decision::new("diaz.rego", "auth", Outcome::Indeterminate(ReasonCode::MissingBinding));
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({"outcome": "indeterminate", "rule": "diaz.rego.auth", "reason": "MISSING_BINDING"})
        );
    }

    #[test]
    fn decide_compiled_carries_compile_kind() {
        let broken = compile("package p\nr := true\nr := false\n").map(Arc::new);
        let d = decide_compiled(&broken, Document::new(), "p", "r");
        assert_eq!(d.outcome, Outcome::Indeterminate(ReasonCode::DuplicateRule));

        let ok = compile("package p\nr := input.x == 1\n").map(Arc::new);
        let d = decide_compiled(&ok, Document::new().with("x", 1i64), "p", "r");
        assert!(d.is_allowed());
    }

    #[test]
    fn closed_session_is_indeterminate() {
        let module = Arc::new(compile("package p\nr := true\n").unwrap());
        let s = Session::new(module, Document::new());
        assert!(decide(&s, "p", "r").is_allowed());
        s.complete();
        assert_eq!(
            decide(&s, "p", "r").outcome,
            Outcome::Indeterminate(ReasonCode::SessionClosed)
        );
    }
}
