//! Proxy Checker - concurrent proxy liveness verification
//!
//! Parses proxy lists, probes every endpoint with a layered TCP/HTTP(S)
//! check on a bounded worker pool, and reports results and progress
//! through a typed event channel.

pub mod proxy;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
