//! PDP config loader (strict parsing).

pub mod schema;

use std::fs;

use crate::error::{GatewayError, Result};

pub use schema::{EvaluationSection, PdpConfig, PolicySourceConfig, ServerSection};

pub fn load_from_file(path: &str) -> Result<PdpConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<PdpConfig> {
    let cfg: PdpConfig = serde_yaml::from_str(s)
        .map_err(|e| GatewayError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
