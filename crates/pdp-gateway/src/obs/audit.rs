//! Decision audit trail.
//!
//! Every HTTP decision is recorded on the `pdp::audit` target with the real
//! outcome, including the reason code that the HTTP response hides.

use pdp_core::{Decision, Outcome};

use crate::policy::engine::Evaluated;

pub const AUDIT_TARGET: &str = "pdp::audit";

pub fn record(eval: &Evaluated) {
    let Evaluated {
        decision,
        revision,
        elapsed,
    } = eval;
    let encoded = audit_json(decision);
    let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

    match decision.outcome {
        Outcome::Indeterminate(_) => tracing::warn!(
            target: AUDIT_TARGET,
            revision,
            elapsed_us,
            decision = %encoded,
            "indeterminate decision denied"
        ),
        _ => tracing::info!(
            target: AUDIT_TARGET,
            revision,
            elapsed_us,
            decision = %encoded,
            "decision"
        ),
    }
}

fn audit_json(decision: &Decision) -> String {
    serde_json::to_string(decision).unwrap_or_else(|_| decision.rule.clone())
}
