#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::io::Write;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Bytes},
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use serde_json::Value as Json;

use pdp_gateway::app_state::AppState;
use pdp_gateway::config;
use pdp_gateway::policy::{FileSource, PolicySource};
use pdp_gateway::{ops, transport};

const AUTH: &str = "package diaz.rego\n\
                    auth := input.is_admin == true and input.uid > 0\n";

const CONFIG: &str = r#"
version: 1
evaluation:
  timeout_ms: 200
policies:
  - inline: |
      package diaz.rego
      auth := input.is_admin == true and input.uid > 0
"#;

async fn state() -> AppState {
    let cfg = config::load_from_str(CONFIG).unwrap();
    AppState::bootstrap(cfg).await.unwrap()
}

async fn body_json(resp: Response) -> Json {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn decide(app: &AppState, ns: &str, rule: &str, body: &str) -> Response {
    transport::http::decide(
        State(app.clone()),
        Path((ns.to_string(), rule.to_string())),
        Bytes::from(body.to_string()),
    )
    .await
}

#[tokio::test]
async fn allow_is_200() {
    let app = state().await;
    let resp = decide(&app, "diaz.rego", "auth", r#"{"is_admin":true,"uid":12345}"#).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!({"decision": "allow"}));
}

#[tokio::test]
async fn deny_and_indeterminate_look_the_same() {
    let app = state().await;

    let deny = decide(&app, "diaz.rego", "auth", r#"{"is_admin":false,"uid":12345}"#).await;
    assert_eq!(deny.status(), StatusCode::FORBIDDEN);
    let deny_body = body_json(deny).await;

    for body in [
        r#"{"uid":12345}"#,
        r#"{"is_admin":"yes","uid":1}"#,
        "{not json",
        r#"{"uid":null}"#,
    ] {
        let resp = decide(&app, "diaz.rego", "auth", body).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{body}");
        assert_eq!(body_json(resp).await, deny_body, "{body}");
    }

    let resp = decide(&app, "diaz.rego", "nope", "{}").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn metrics_count_real_outcomes() {
    let app = state().await;
    decide(&app, "diaz.rego", "auth", r#"{"is_admin":true,"uid":1}"#).await;
    decide(&app, "diaz.rego", "auth", r#"{"uid":1}"#).await;
    decide(&app, "diaz.rego", "auth", "[]").await;

    let m = app.metrics();
    assert_eq!(m.decisions.get(&[("outcome", "allow"), ("reason", "")]), 1);
    assert_eq!(
        m.decisions
            .get(&[("outcome", "indeterminate"), ("reason", "MISSING_BINDING")]),
        1
    );
    assert_eq!(
        m.decisions
            .get(&[("outcome", "indeterminate"), ("reason", "INVALID_FACTS")]),
        1
    );

    let resp = ops::metrics(State(app.clone())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let text = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("pdp_policy_revision 1"));
    assert!(text.contains("pdp_evaluation_duration_micros_count"));
}

#[tokio::test]
async fn reload_endpoint_reads_sources_again() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{AUTH}").unwrap();

    let cfg = config::load_from_str(CONFIG).unwrap();
    let sources: Vec<Arc<dyn PolicySource>> = vec![Arc::new(FileSource::new(
        file.path().to_string_lossy().into_owned(),
    ))];
    let app = AppState::with_sources(cfg, sources).await.unwrap();

    let admin_only = r#"{"is_admin":false,"uid":7}"#;
    assert_eq!(
        decide(&app, "diaz.rego", "auth", admin_only).await.status(),
        StatusCode::FORBIDDEN
    );

    // Broken edit: rejected, old policy stays.
    std::fs::write(file.path(), "package diaz.rego\nauth := input.uid >\n").unwrap();
    let resp = transport::http::reload(State(app.clone())).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body_json(resp).await,
        serde_json::json!({"error": "SYNTAX_ERROR"})
    );
    assert_eq!(
        decide(&app, "diaz.rego", "auth", r#"{"is_admin":true,"uid":7}"#)
            .await
            .status(),
        StatusCode::OK
    );

    // Good edit: swapped in as revision 2.
    std::fs::write(file.path(), "package diaz.rego\nauth := input.uid > 0\n").unwrap();
    let resp = transport::http::reload(State(app.clone())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!({"revision": 2}));
    assert_eq!(
        decide(&app, "diaz.rego", "auth", admin_only).await.status(),
        StatusCode::OK
    );

    // Source disappears.
    let path = file.path().to_path_buf();
    drop(file);
    assert!(!path.exists());
    let resp = transport::http::reload(State(app.clone())).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(resp).await,
        serde_json::json!({"error": "SOURCE_UNAVAILABLE"})
    );
    assert_eq!(app.metrics().reloads.get(&[("result", "error")]), 2);
    assert_eq!(app.metrics().reloads.get(&[("result", "ok")]), 1);
}

#[tokio::test]
async fn healthz_is_ok() {
    use axum::response::IntoResponse;
    let resp = ops::healthz().await.into_response();
    assert_eq!(resp.status(), StatusCode::OK);
}
