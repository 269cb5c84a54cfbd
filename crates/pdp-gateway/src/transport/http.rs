//! HTTP handlers for decisions and policy reloads.
//!
//! - `POST /v1/decide/{namespace}/{rule}`: body is the fact document
//! - `POST /v1/policies/reload`: re-read and recompile configured sources
//!
//! Anything other than `Allow` is rendered as a plain 403 deny; the reason
//! code is only visible in the audit log.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use pdp_core::{Decision, Outcome, ReasonCode};

use crate::app_state::AppState;
use crate::error::GatewayError;
use crate::obs::audit;
use crate::policy::engine::Evaluated;

fn decision_response(allowed: bool) -> Response {
    if allowed {
        (StatusCode::OK, Json(json!({ "decision": "allow" }))).into_response()
    } else {
        (StatusCode::FORBIDDEN, Json(json!({ "decision": "deny" }))).into_response()
    }
}

pub async fn decide(
    State(app): State<AppState>,
    Path((namespace, rule)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    // Evaluation is CPU-bound; keep it off the async workers.
    let worker = app.clone();
    let (ns, r) = (namespace.clone(), rule.clone());
    let joined =
        tokio::task::spawn_blocking(move || worker.engine().decide_json(&ns, &r, &body)).await;

    let evaluated = match joined {
        Ok(ev) => ev,
        Err(e) => {
            tracing::error!(namespace = %namespace, rule = %rule, error = %e, "evaluation task failed");
            Evaluated {
                decision: Decision::new(
                    &namespace,
                    &rule,
                    Outcome::Indeterminate(ReasonCode::DeadlineExceeded),
                ),
                revision: app.engine().snapshot().revision,
                elapsed: Default::default(),
            }
        }
    };

    audit::record(&evaluated);
    app.metrics()
        .record_decision(evaluated.decision.outcome, evaluated.elapsed);

    decision_response(evaluated.decision.is_allowed())
}

pub async fn reload(State(app): State<AppState>) -> Response {
    match app.engine().reload().await {
        Ok(snap) => {
            app.metrics().record_reload("ok");
            (StatusCode::OK, Json(json!({ "revision": snap.revision }))).into_response()
        }
        Err(e) => {
            app.metrics().record_reload("error");
            let status = match &e {
                GatewayError::Compile(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "error": e.code() }))).into_response()
        }
    }
}
