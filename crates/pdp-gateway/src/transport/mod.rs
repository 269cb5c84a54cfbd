//! Transport layer (HTTP).
//!
//! Thin adapter: decode the request, hand it to the policy engine, and map the
//! decision to a status code.

pub mod http;
