//! PDP core: policy compilation and evaluation, with no transport or runtime
//! dependencies.
//!
//! Data flow: source text -> [`compile`] -> shared `Arc<PolicyModule>`;
//! per request: [`Session`] (facts + deadline + memo) -> [`decide`] ->
//! [`Decision`].
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Every failure is an
//! explicit `CompileError`/`EvalError`, and `decide` folds all of them into
//! `Indeterminate`, so an error can never surface as `Allow`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod ast;
pub mod compiler;
pub mod decision;
pub mod error;
pub mod eval;
pub mod module;
pub mod parser;
pub mod session;
pub mod value;

pub use compiler::{compile, compile_all};
pub use decision::{decide, decide_compiled, Decision, Outcome};
pub use error::{CompileError, CompileErrorKind, EvalError, EvalErrorKind, Location, ReasonCode};
pub use eval::{evaluate, MAX_NESTED_NODES};
pub use module::{PolicyModule, StackBound};
pub use session::{CancelSignal, EvalLimits, Session, SessionState};
pub use value::{Document, FactError, Value};
