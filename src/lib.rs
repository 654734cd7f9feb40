//! RGB++ resolver
//!
//! Resolves RGB++ transactions across Bitcoin and CKB, batching upstream
//! lookups per operation and exposing the results over a JSON API.

pub mod api;
pub mod batch;
pub mod bitcoin;
pub mod ckb;
pub mod config;
pub mod error;
pub mod explorer;
pub mod format;
pub mod http;
pub mod metrics;
pub mod resolve;

pub use error::{ResolveError, ResolveResult};
pub use resolve::{RgbppResolutionService, Upstreams};
