//! Observability: Prometheus-text metrics and the decision audit log.

pub mod audit;
pub mod metrics;

pub use metrics::PdpMetrics;
