//! Run configuration consumed by the pipeline

use crate::proxy::aggregate::SortOrder;
use crate::proxy::checker::CheckerConfig;
use crate::proxy::models::ProxyType;
use crate::Result;
use anyhow::anyhow;
use std::path::PathBuf;
use std::time::Duration;

/// Default output file for alive proxies
pub const DEFAULT_OUTPUT: &str = "proxies_alive.txt";

#[derive(Debug, Clone)]
pub struct SiftConfig {
    /// Protocols to collect and test
    pub protocols: Vec<ProxyType>,
    /// Max sources fetched per protocol, `0` for all
    pub max_sources: usize,
    /// Source map JSON, `None` for `./sources.json` or the built-in list
    pub sources: Option<PathBuf>,
    pub checker: CheckerConfig,
    pub order: SortOrder,
    pub output: PathBuf,
    /// Keep `<output>.prev`
    pub preview: bool,
    pub metrics: Option<PathBuf>,
    /// Publish what finished when a run is interrupted
    pub partial_publish: bool,
    /// Leave the previous artifact in place when nothing is alive
    pub skip_empty: bool,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            protocols: ProxyType::ALL.to_vec(),
            max_sources: 0,
            sources: None,
            checker: CheckerConfig::default(),
            order: SortOrder::Desc,
            output: PathBuf::from(DEFAULT_OUTPUT),
            preview: true,
            metrics: None,
            partial_publish: false,
            skip_empty: false,
        }
    }
}

impl SiftConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocols(mut self, protocols: Vec<ProxyType>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn with_max_sources(mut self, max_sources: usize) -> Self {
        self.max_sources = max_sources;
        self
    }

    pub fn with_sources(mut self, path: Option<PathBuf>) -> Self {
        self.sources = path;
        self
    }

    pub fn with_checker(mut self, checker: CheckerConfig) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.checker.timeout = timeout;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_output(mut self, output: PathBuf) -> Self {
        self.output = output;
        self
    }

    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<PathBuf>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_partial_publish(mut self, partial: bool) -> Self {
        self.partial_publish = partial;
        self
    }

    pub fn with_skip_empty(mut self, skip_empty: bool) -> Self {
        self.skip_empty = skip_empty;
        self
    }
}

/// Parse a comma-separated protocol list, keeping first-seen order
pub fn parse_protocols(s: &str) -> Result<Vec<ProxyType>> {
    let mut protocols = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let protocol: ProxyType = part.parse()?;
        if !protocols.contains(&protocol) {
            protocols.push(protocol);
        }
    }
    if protocols.is_empty() {
        return Err(anyhow!("no protocols selected"));
    }
    Ok(protocols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SiftConfig::default();
        assert_eq!(config.protocols, ProxyType::ALL.to_vec());
        assert_eq!(config.checker.concurrency, 128);
        assert_eq!(config.checker.timeout, Duration::from_secs(5));
        assert!(config.checker.verify_tls);
        assert!(config.preview);
        assert_eq!(config.order, SortOrder::Desc);
        assert_eq!(config.output, PathBuf::from("proxies_alive.txt"));
        assert!(!config.partial_publish);
    }

    #[test]
    fn test_builder() {
        let config = SiftConfig::new()
            .with_protocols(vec![ProxyType::Socks5])
            .with_timeout(Duration::from_secs(2))
            .with_order(SortOrder::Asc)
            .with_preview(false)
            .with_max_sources(3);
        assert_eq!(config.protocols, vec![ProxyType::Socks5]);
        assert_eq!(config.checker.timeout, Duration::from_secs(2));
        assert_eq!(config.order, SortOrder::Asc);
        assert!(!config.preview);
        assert_eq!(config.max_sources, 3);
    }

    #[test]
    fn test_parse_protocols() {
        assert_eq!(
            parse_protocols("http, SOCKS5,http").unwrap(),
            vec![ProxyType::Http, ProxyType::Socks5]
        );
        assert!(parse_protocols("http,gopher").is_err());
        assert!(parse_protocols(" , ").is_err());
    }
}
