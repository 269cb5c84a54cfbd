//! Top-level facade crate for the policy decision point.
//!
//! Re-exports the evaluation core and the gateway library so users can depend
//! on a single crate.

pub mod core {
    pub use pdp_core::*;
}

pub mod gateway {
    pub use pdp_gateway::*;
}

pub use pdp_core::{compile, decide, Decision, Document, Outcome, PolicyModule, Session};
