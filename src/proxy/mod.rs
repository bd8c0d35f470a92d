//! Proxy module for collecting and checking proxies
//!
//! This module provides functionality for:
//! - Fetching source lists and extracting endpoints from them
//! - Normalizing and deduplicating candidates
//! - Probing candidates per protocol with a bounded worker pool
//! - Ordering the survivors and summarizing the run

pub mod aggregate;
pub mod candidates;
pub mod checker;
pub mod dialer;
pub mod models;
pub mod parser;
pub mod sources;

pub use aggregate::{aggregate, AliveEntry, RunResult, SortOrder};
pub use candidates::{CandidateSet, IntakeStats};
pub use checker::{CheckerConfig, Progress, ProxyChecker, ValidationRun};
pub use dialer::{Dialer, DialerTable, ProbeFailure, ProbeSettings, ProbeSuccess, ProbeTarget};
pub use models::{Candidate, ProbeStatus, ProxyType, ValidationOutcome};
pub use parser::ProxyParser;
pub use sources::{SourceError, SourceFetcher, SourceMap};
