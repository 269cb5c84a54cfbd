//! Policy sources: where policy text comes from.
//!
//! The core only ever sees text; fetching it is this layer's job. Sources are
//! re-read on every reload so an edited file takes effect without a restart.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PolicySourceConfig;
use crate::error::{GatewayError, Result};

#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Human-readable origin for logs.
    fn describe(&self) -> String;
    async fn load(&self) -> Result<String>;
}

/// Policy text read from disk on each load.
pub struct FileSource {
    path: String,
}

impl FileSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PolicySource for FileSource {
    fn describe(&self) -> String {
        format!("file:{}", self.path)
    }

    async fn load(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| GatewayError::Source(format!("{}: {e}", self.path)))
    }
}

/// Policy text embedded in the config.
pub struct InlineSource {
    text: String,
}

impl InlineSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl PolicySource for InlineSource {
    fn describe(&self) -> String {
        "inline".into()
    }

    async fn load(&self) -> Result<String> {
        Ok(self.text.clone())
    }
}

pub fn sources_from_config(policies: &[PolicySourceConfig]) -> Vec<Arc<dyn PolicySource>> {
    policies
        .iter()
        .filter_map(|p| -> Option<Arc<dyn PolicySource>> {
            match (&p.path, &p.inline) {
                (Some(path), _) => Some(Arc::new(FileSource::new(path.clone()))),
                (None, Some(text)) => Some(Arc::new(InlineSource::new(text.clone()))),
                (None, None) => None,
            }
        })
        .collect()
}

/// Read every source; the first failure aborts the whole load.
pub async fn load_all(sources: &[Arc<dyn PolicySource>]) -> Result<Vec<String>> {
    let mut texts = Vec::with_capacity(sources.len());
    for src in sources {
        let text = src.load().await.map_err(|e| {
            tracing::error!(source = %src.describe(), error = %e, "policy source load failed");
            e
        })?;
        texts.push(text);
    }
    Ok(texts)
}
