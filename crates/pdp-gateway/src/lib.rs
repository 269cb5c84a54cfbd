//! PDP gateway library entry.
//!
//! Wires config, policy sources, the reloadable policy store, observability,
//! and the HTTP adapter around `pdp-core`. Consumed by the binary (`main.rs`)
//! and by integration tests.

pub mod app_state;
pub mod config;
pub mod error;
pub mod obs;
pub mod ops;
pub mod policy;
pub mod router;
pub mod transport;
