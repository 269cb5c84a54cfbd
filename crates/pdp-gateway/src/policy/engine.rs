use std::sync::Arc;
use std::time::{Duration, Instant};

use pdp_core::{
    decide, CancelSignal, Decision, Document, EvalLimits, FactError, Outcome, ReasonCode,
    Session,
};

use tokio::sync::Mutex;

use crate::config::EvaluationSection;
use crate::error::Result;

use super::source::{load_all, PolicySource};
use super::store::{PolicySnapshot, PolicyStore};

/// Result of one request: the decision, the policy revision it ran against,
/// and how long evaluation took.
#[derive(Debug, Clone)]
pub struct Evaluated {
    pub decision: Decision,
    pub revision: u64,
    pub elapsed: Duration,
}

/// Request-level policy runtime.
/// Construct once at startup, then share via Arc.
pub struct PolicyEngine {
    store: PolicyStore,
    sources: Vec<Arc<dyn PolicySource>>,
    /// Held across read + compile + swap so reloads land in call order.
    reload_lock: Mutex<()>,
    timeout: Duration,
    limits: EvalLimits,
}

impl PolicyEngine {
    /// Load and compile every source. Startup fails on any error; there is no
    /// previous policy to fall back to.
    pub async fn load(
        sources: Vec<Arc<dyn PolicySource>>,
        evaluation: &EvaluationSection,
    ) -> Result<Self> {
        let texts = load_all(&sources).await?;
        let store = PolicyStore::from_sources(&texts)?;
        let snap = store.snapshot();
        tracing::info!(
            revision = snap.revision,
            sources = sources.len(),
            rules = snap.module.rule_count(),
            "policy loaded"
        );
        Ok(Self {
            store,
            sources,
            reload_lock: Mutex::new(()),
            timeout: evaluation.timeout(),
            limits: evaluation.limits(),
        })
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    /// Re-read every source and swap in the result. The active policy is kept
    /// when reading or compiling fails.
    ///
    /// Concurrent reloads run one at a time, so the text read last is the
    /// text installed last.
    pub async fn reload(&self) -> Result<Arc<PolicySnapshot>> {
        let _serial = self.reload_lock.lock().await;
        let texts = load_all(&self.sources).await?;
        Ok(self.store.reload_all(&texts)?)
    }

    /// Decide `namespace.rule` for a JSON request body.
    ///
    /// Facts are bound against the snapshot current at entry; a concurrent
    /// reload does not affect this request.
    pub fn decide_json(&self, namespace: &str, rule: &str, body: &[u8]) -> Evaluated {
        let started = Instant::now();
        let snap = self.store.snapshot();

        let decision = match parse_facts(body) {
            Ok(facts) => {
                let session = Session::new(Arc::clone(&snap.module), facts)
                    .with_signal(CancelSignal::with_timeout(self.timeout))
                    .with_limits(self.limits);
                let d = decide(&session, namespace, rule);
                session.complete();
                d
            }
            Err(msg) => {
                tracing::warn!(namespace, rule, error = %msg, "rejecting malformed facts");
                Decision::new(
                    namespace,
                    rule,
                    Outcome::Indeterminate(ReasonCode::InvalidFacts),
                )
            }
        };

        Evaluated {
            decision,
            revision: snap.revision,
            elapsed: started.elapsed(),
        }
    }
}

fn parse_facts(body: &[u8]) -> std::result::Result<Document, String> {
    let json: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid json: {e}"))?;
    Document::from_json(json).map_err(|e: FactError| e.to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::policy::source::{FileSource, InlineSource};

    const AUTH: &str = "package diaz.rego\n\
                        auth := input.is_admin == true and input.uid > 0\n";

    async fn engine(src: &str) -> PolicyEngine {
        let sources: Vec<Arc<dyn PolicySource>> = vec![Arc::new(InlineSource::new(src))];
        PolicyEngine::load(sources, &EvaluationSection::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn json_body_flows_to_decision() {
        let e = engine(AUTH).await;
        let out = e.decide_json("diaz.rego", "auth", br#"{"is_admin":true,"uid":12345}"#);
        assert!(out.decision.is_allowed());
        assert_eq!(out.revision, 1);

        let out = e.decide_json("diaz.rego", "auth", br#"{"uid":12345}"#);
        assert_eq!(
            out.decision.outcome,
            Outcome::Indeterminate(ReasonCode::MissingBinding)
        );
    }

    #[tokio::test]
    async fn malformed_bodies_fail_closed() {
        let e = engine(AUTH).await;
        let bodies: [&[u8]; 4] = [b"not json", b"[1,2]", br#"{"uid":null}"#, br#"{"uid":1.5}"#];
        for body in bodies {
            let out = e.decide_json("diaz.rego", "auth", body);
            assert_eq!(
                out.decision.outcome,
                Outcome::Indeterminate(ReasonCode::InvalidFacts)
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reloads_pick_up_the_latest_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "package app\nv := 0 == 0\n").unwrap();
        let sources: Vec<Arc<dyn PolicySource>> = vec![Arc::new(FileSource::new(
            file.path().to_string_lossy().into_owned(),
        ))];
        let e = Arc::new(
            PolicyEngine::load(sources, &EvaluationSection::default())
                .await
                .unwrap(),
        );

        for round in 1..=20 {
            std::fs::write(
                file.path(),
                format!("package app\nv := input.n == {round}\n"),
            )
            .unwrap();
            let tasks: Vec<_> = (0..4)
                .map(|_| {
                    let e = Arc::clone(&e);
                    tokio::spawn(async move { e.reload().await.unwrap().revision })
                })
                .collect();
            let mut revisions = Vec::new();
            for t in tasks {
                revisions.push(t.await.unwrap());
            }
            revisions.sort_unstable();
            revisions.dedup();
            assert_eq!(revisions.len(), 4, "round {round}");

            let body = format!(r#"{{"n":{round}}}"#);
            let out = e.decide_json("app", "v", body.as_bytes());
            assert!(out.decision.is_allowed(), "round {round}");
            assert_eq!(out.revision, e.store().revision());
        }
        assert_eq!(e.store().revision(), 1 + 20 * 4);
    }

    #[tokio::test]
    async fn startup_rejects_bad_policy() {
        let sources: Vec<Arc<dyn PolicySource>> =
            vec![Arc::new(InlineSource::new("package p\ndefault r := false\n"))];
        let err = PolicyEngine::load(sources, &EvaluationSection::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "UNSUPPORTED_CONSTRUCT");
    }
}
