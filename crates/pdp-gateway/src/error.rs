//! Gateway-level errors (startup, config, policy sources).

use pdp_core::CompileError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("policy source unavailable: {0}")]
    Source(String),
    #[error("policy compile failed: {0}")]
    Compile(#[from] CompileError),
    #[error("internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable code for logs and operator-facing responses.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "BAD_CONFIG",
            GatewayError::UnsupportedVersion => "UNSUPPORTED_VERSION",
            GatewayError::Source(_) => "SOURCE_UNAVAILABLE",
            GatewayError::Compile(e) => e.kind.as_str(),
            GatewayError::Internal(_) => "INTERNAL",
        }
    }
}
