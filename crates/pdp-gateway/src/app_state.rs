//! Shared application state for the PDP gateway.
//!
//! Startup errors are explicit (`Result` instead of panic).

use std::sync::Arc;

use crate::config::PdpConfig;
use crate::error::Result;
use crate::obs::PdpMetrics;
use crate::policy::source::sources_from_config;
use crate::policy::{PolicyEngine, PolicySource};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: PdpConfig,
    engine: PolicyEngine,
    metrics: PdpMetrics,
}

impl AppState {
    /// Read and compile the configured policy sources.
    pub async fn bootstrap(cfg: PdpConfig) -> Result<Self> {
        let sources = sources_from_config(&cfg.policies);
        Self::with_sources(cfg, sources).await
    }

    /// Build state from explicit sources instead of the config's list.
    pub async fn with_sources(
        cfg: PdpConfig,
        sources: Vec<Arc<dyn PolicySource>>,
    ) -> Result<Self> {
        let engine = PolicyEngine::load(sources, &cfg.evaluation).await?;
        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                engine,
                metrics: PdpMetrics::default(),
            }),
        })
    }

    pub fn cfg(&self) -> &PdpConfig {
        &self.inner.cfg
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.inner.engine
    }

    pub fn metrics(&self) -> &PdpMetrics {
        &self.inner.metrics
    }

    /// Gauges computed at scrape time.
    pub fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        let snap = self.inner.engine.snapshot();
        vec![
            ("pdp_policy_revision", snap.revision),
            (
                "pdp_policy_rules",
                u64::try_from(snap.module.rule_count()).unwrap_or(u64::MAX),
            ),
        ]
    }
}
