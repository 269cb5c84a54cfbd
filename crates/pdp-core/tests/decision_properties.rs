//! End-to-end decision properties: determinism, fail-closed, short-circuit,
//! cycle safety, and the missing-binding distinction.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use proptest::prelude::*;
use serde_json::json;

use pdp_core::{
    compile, decide, evaluate, CancelSignal, Document, EvalLimits, Outcome, PolicyModule,
    ReasonCode, Session,
};

const AUTH: &str = r#"
package diaz.rego

auth := input.is_admin == true AND input.uid > 0
"#;

const MIXED: &str = r#"
package mixed

typed := input.uid > 0
loop_a := loop_b
loop_b := loop_a
guarded := exists(input.is_admin) and input.is_admin
number := input.uid
skip_and := false and input.never
skip_or := true or input.never
eval_and := true and input.never
hop := typed
"#;

fn module(src: &str) -> Arc<PolicyModule> {
    Arc::new(compile(src).expect("policy compiles"))
}

fn facts(v: serde_json::Value) -> Document {
    Document::from_json(v).expect("valid facts")
}

fn outcome(m: &Arc<PolicyModule>, ns: &str, rule: &str, f: serde_json::Value) -> Outcome {
    let session = Session::new(Arc::clone(m), facts(f));
    let d = decide(&session, ns, rule);
    session.complete();
    d.outcome
}

#[test]
fn auth_example() {
    let m = module(AUTH);
    assert_eq!(
        outcome(&m, "diaz.rego", "auth", json!({"is_admin": true, "uid": 12345})),
        Outcome::Allow
    );
    assert_eq!(
        outcome(&m, "diaz.rego", "auth", json!({"is_admin": false, "uid": 12345})),
        Outcome::Deny
    );
    assert_eq!(
        outcome(&m, "diaz.rego", "auth", json!({"uid": 12345})),
        Outcome::Indeterminate(ReasonCode::MissingBinding)
    );
}

#[test]
fn missing_binding_is_not_false() {
    let m = module("package p\nadmin := input.is_admin == true\n");
    assert_eq!(
        outcome(&m, "p", "admin", json!({})),
        Outcome::Indeterminate(ReasonCode::MissingBinding)
    );
    assert_eq!(outcome(&m, "p", "admin", json!({"is_admin": false})), Outcome::Deny);
}

#[test]
fn cycles_yield_indeterminate_not_hang() {
    let m = module(MIXED);
    assert_eq!(
        outcome(&m, "mixed", "loop_a", json!({})),
        Outcome::Indeterminate(ReasonCode::CyclicReference)
    );
}

#[test]
fn short_circuit() {
    let m = module(MIXED);
    assert_eq!(outcome(&m, "mixed", "skip_and", json!({})), Outcome::Deny);
    assert_eq!(outcome(&m, "mixed", "skip_or", json!({})), Outcome::Allow);
    assert_eq!(
        outcome(&m, "mixed", "eval_and", json!({})),
        Outcome::Indeterminate(ReasonCode::MissingBinding)
    );
}

#[test]
fn non_boolean_and_unknown_rules_fail_closed() {
    let m = module(MIXED);
    assert_eq!(
        outcome(&m, "mixed", "number", json!({"uid": 1})),
        Outcome::Indeterminate(ReasonCode::NonBooleanResult)
    );
    assert_eq!(
        outcome(&m, "mixed", "nope", json!({})),
        Outcome::Indeterminate(ReasonCode::UndefinedRule)
    );
    assert_eq!(
        outcome(&m, "mixed", "typed", json!({"uid": "1"})),
        Outcome::Indeterminate(ReasonCode::TypeMismatch)
    );
}

#[test]
fn concurrent_decides_share_one_session() {
    let m = module(MIXED);
    let session = Arc::new(Session::new(m, facts(json!({"uid": 3, "is_admin": true}))));

    let handles: Vec<_> = ["typed", "guarded", "typed", "guarded"]
        .into_iter()
        .map(|rule| {
            let s = Arc::clone(&session);
            thread::spawn(move || decide(&s, "mixed", rule).outcome)
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), Outcome::Allow);
    }
}

#[test]
fn sessions_pin_their_module() {
    let old = module("package p\nr := true\n");
    let session = Session::new(Arc::clone(&old), Document::new());

    // A replacement module is built while the session is alive.
    let new = module("package p\nr := false\n");
    let fresh = Session::new(new, Document::new());

    assert!(decide(&session, "p", "r").is_allowed());
    assert_eq!(decide(&fresh, "p", "r").outcome, Outcome::Deny);
}

fn arb_facts() -> impl Strategy<Value = serde_json::Value> {
    (
        proptest::option::of(any::<bool>()),
        proptest::option::of(any::<i64>()),
        proptest::option::of("[a-z]{0,6}"),
    )
        .prop_map(|(is_admin, uid, name)| {
            let mut obj = serde_json::Map::new();
            if let Some(b) = is_admin {
                obj.insert("is_admin".into(), json!(b));
            }
            match (uid, name) {
                (Some(u), _) => {
                    obj.insert("uid".into(), json!(u));
                }
                (None, Some(n)) => {
                    // wrong type on purpose
                    obj.insert("uid".into(), json!(n));
                }
                (None, None) => {}
            }
            serde_json::Value::Object(obj)
        })
}

proptest! {
    #[test]
    fn decisions_are_deterministic(f in arb_facts()) {
        let m = module(AUTH);
        let first = outcome(&m, "diaz.rego", "auth", f.clone());
        let second = outcome(&m, "diaz.rego", "auth", f.clone());
        prop_assert_eq!(first, second);

        // repeated decides on one session agree as well
        let session = Session::new(Arc::clone(&m), facts(f));
        let a = decide(&session, "diaz.rego", "auth");
        let b = decide(&session, "diaz.rego", "auth");
        prop_assert_eq!(a, b);
    }

    #[test]
    fn errors_never_allow(f in arb_facts()) {
        let m = module(MIXED);
        for rule in ["typed", "loop_a", "guarded", "number", "eval_and"] {
            let session = Session::new(Arc::clone(&m), facts(f.clone()));
            let result = evaluate(&session, "mixed", rule);
            let fresh = Session::new(Arc::clone(&m), facts(f.clone()));
            let d = decide(&fresh, "mixed", rule);
            if result.is_err() {
                prop_assert!(matches!(d.outcome, Outcome::Indeterminate(_)), "rule={}", rule);
            }
            if d.is_allowed() {
                prop_assert_eq!(result.unwrap(), pdp_core::Value::Bool(true));
            }
        }
    }

    #[test]
    fn exhausted_budgets_never_allow(f in arb_facts()) {
        let m = module(MIXED);
        for rule in ["typed", "hop", "guarded", "skip_or"] {
            let expired = Session::new(Arc::clone(&m), facts(f.clone()))
                .with_signal(CancelSignal::with_deadline(Instant::now()));
            prop_assert_eq!(
                decide(&expired, "mixed", rule).outcome,
                Outcome::Indeterminate(ReasonCode::DeadlineExceeded),
                "rule={}", rule
            );
        }

        let shallow = EvalLimits { max_depth: 1, ..EvalLimits::default() };
        let session = Session::new(Arc::clone(&m), facts(f.clone())).with_limits(shallow);
        // typed fits in one frame and lands in the memo; hop must still fail
        let _ = decide(&session, "mixed", "typed");
        prop_assert_eq!(
            decide(&session, "mixed", "hop").outcome,
            Outcome::Indeterminate(ReasonCode::DepthExceeded)
        );
        let fresh = Session::new(Arc::clone(&m), facts(f)).with_limits(shallow);
        prop_assert_eq!(
            decide(&fresh, "mixed", "hop").outcome,
            Outcome::Indeterminate(ReasonCode::DepthExceeded)
        );
    }
}
