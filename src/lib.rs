//! Proxy Sift - proxy list collector and validator
//!
//! Collects candidate proxies from public source lists, probes each one
//! through a real round-trip to a test endpoint with bounded concurrency,
//! and atomically publishes the working ones as a plain text list.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod proxy;
pub mod publish;

pub use config::SiftConfig;
pub use proxy::*;
pub use publish::{AtomicPublisher, PublishError, PublishReport};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
