//! Policy layer: sources, the compiled-policy store, and per-request
//! evaluation against the current snapshot.

pub mod engine;
pub mod source;
pub mod store;

pub use engine::PolicyEngine;
pub use source::{FileSource, InlineSource, PolicySource};
pub use store::{PolicySnapshot, PolicyStore};
