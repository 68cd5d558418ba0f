//! Proxy verification module
//!
//! This module provides functionality for:
//! - Parsing proxy lists (host:port and host:port:kind lines)
//! - Probing each proxy with a layered TCP/HTTP/HTTPS check
//! - Driving probes concurrently with pause/resume/cancel control
//! - Querying, summarizing and exporting the checked results

pub mod engine;
pub mod models;
pub mod parser;
pub mod probe;
pub mod store;

pub use engine::{EngineConfig, EngineEvent, VerificationEngine};
pub use models::{ProxyRecord, ProxyType};
pub use parser::ProxyParser;
pub use probe::{NetTransport, ProbeOptions, ProbeTransport};
pub use store::{ResultStore, Statistics};
