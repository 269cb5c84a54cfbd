use std::time::Duration;

use pdp_core::EvalLimits;
use serde::Deserialize;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdpConfig {
    pub version: u32,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub evaluation: EvaluationSection,

    #[serde(default)]
    pub policies: Vec<PolicySourceConfig>,
}

impl PdpConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(GatewayError::UnsupportedVersion);
        }
        if self.policies.is_empty() {
            return Err(GatewayError::Config("policies must not be empty".into()));
        }

        self.evaluation.validate()?;
        for (i, p) in self.policies.iter().enumerate() {
            p.validate(i)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:3000".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationSection {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_max_fact_nodes")]
    pub max_fact_nodes: usize,

    #[serde(default = "default_max_fact_depth")]
    pub max_fact_depth: usize,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_depth: default_max_depth(),
            max_fact_nodes: default_max_fact_nodes(),
            max_fact_depth: default_max_fact_depth(),
        }
    }
}

impl EvaluationSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=10_000).contains(&self.timeout_ms) {
            return Err(GatewayError::Config(
                "evaluation.timeout_ms must be between 1 and 10000".into(),
            ));
        }
        if !(1..=1024).contains(&self.max_depth) {
            return Err(GatewayError::Config(
                "evaluation.max_depth must be between 1 and 1024".into(),
            ));
        }
        if self.max_fact_nodes == 0 || self.max_fact_depth == 0 {
            return Err(GatewayError::Config(
                "evaluation.max_fact_nodes and max_fact_depth must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn limits(&self) -> EvalLimits {
        EvalLimits {
            max_depth: self.max_depth,
            max_fact_nodes: self.max_fact_nodes,
            max_fact_depth: self.max_fact_depth,
        }
    }
}

fn default_timeout_ms() -> u64 {
    50
}
fn default_max_depth() -> usize {
    64
}
fn default_max_fact_nodes() -> usize {
    10_000
}
fn default_max_fact_depth() -> usize {
    32
}

/// One policy source: a file path or inline text (exactly one).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySourceConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub inline: Option<String>,
}

impl PolicySourceConfig {
    fn validate(&self, index: usize) -> Result<()> {
        match (&self.path, &self.inline) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(GatewayError::Config(format!(
                "policies[{index}] must set exactly one of `path` or `inline`"
            ))),
        }
    }
}
