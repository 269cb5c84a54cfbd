//! PDP gateway binary.
//!
//! Config path comes from `PDP_CONFIG` (default `pdp.yaml`); log filtering
//! from `RUST_LOG`.

use std::net::SocketAddr;

use tracing_subscriber::{fmt, EnvFilter};

use pdp_gateway::error::{GatewayError, Result};
use pdp_gateway::{app_state, config, router};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        tracing::error!(code = e.code(), error = %e, "pdp-gateway failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = std::env::var("PDP_CONFIG").unwrap_or_else(|_| "pdp.yaml".into());
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .server
        .listen
        .parse()
        .map_err(|e| GatewayError::Config(format!("server.listen must be a valid SocketAddr: {e}")))?;

    let state = app_state::AppState::bootstrap(cfg).await?;
    let app = router::build_router(state);

    tracing::info!(%listen, "pdp-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| GatewayError::Internal(format!("bind {listen}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| GatewayError::Internal(format!("server failed: {e}")))
}
