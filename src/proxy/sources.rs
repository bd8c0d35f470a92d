//! Proxy source lists: which URLs to fetch per protocol, and fetching them
//!
//! This module provides functionality for:
//! - Loading the protocol -> URL map from JSON, with built-in defaults
//! - Capping the number of sources per protocol before anything is fetched
//! - Downloading sources concurrently and extracting endpoint strings

use crate::proxy::models::ProxyType;
use crate::proxy::parser::ProxyParser;
use crate::Result;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default timeout for source downloads in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Max concurrent downloads per protocol
const MAX_PARALLEL_FETCHES: usize = 16;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read source map {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse source map {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Protocol -> ordered list of source URLs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    sources: BTreeMap<ProxyType, Vec<String>>,
}

impl SourceMap {
    /// Built-in public lists
    pub fn defaults() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(
            ProxyType::Http,
            vec![
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
                "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/http.txt",
                "https://raw.githubusercontent.com/prxchk/proxy-list/main/http.txt",
                "https://raw.githubusercontent.com/mmpx12/proxy-list/master/http.txt",
                "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
                "https://raw.githubusercontent.com/proxylist-to/proxy-list/main/http.txt",
            ],
        );
        sources.insert(
            ProxyType::Https,
            vec![
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
                "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/https.txt",
                "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies_anonymous/https.txt",
            ],
        );
        sources.insert(
            ProxyType::Socks4,
            vec![
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks4.txt",
                "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/socks4.txt",
                "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/socks4.txt",
            ],
        );
        sources.insert(
            ProxyType::Socks5,
            vec![
                "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
                "https://raw.githubusercontent.com/ALIILAPRO/Proxy/main/socks5.txt",
                "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/socks5.txt",
            ],
        );
        Self {
            sources: sources
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().map(String::from).collect()))
                .collect(),
        }
    }

    /// Parse a JSON object `{"http": ["url", ...], ...}`. Unknown protocol
    /// keys are skipped with a warning.
    pub fn from_json(content: &str) -> std::result::Result<Self, serde_json::Error> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(content)?;
        let mut sources = BTreeMap::new();
        for (key, urls) in raw {
            match key.parse::<ProxyType>() {
                Ok(protocol) => {
                    sources.insert(protocol, urls);
                }
                Err(_) => warn!(protocol = %key, "ignoring sources for unsupported protocol"),
            }
        }
        Ok(Self { sources })
    }

    pub fn load(path: &Path) -> std::result::Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| SourceError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, else `./sources.json` if present, else defaults
    pub fn resolve(path: Option<&Path>) -> std::result::Result<Self, SourceError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new("sources.json");
                if local.exists() {
                    Self::load(local)
                } else {
                    warn!("sources.json not found, using default sources");
                    Ok(Self::defaults())
                }
            }
        }
    }

    pub fn urls(&self, protocol: ProxyType) -> &[String] {
        self.sources.get(&protocol).map(Vec::as_slice).unwrap_or(&[])
    }

    /// URLs to fetch for each requested protocol, at most `max_sources` per
    /// protocol (`0` means all). Protocols without sources are left out.
    pub fn plan(
        &self,
        protocols: &[ProxyType],
        max_sources: usize,
    ) -> Vec<(ProxyType, Vec<String>)> {
        let mut plan = Vec::new();
        for &protocol in protocols {
            let mut urls = self.urls(protocol).to_vec();
            if max_sources > 0 {
                urls.truncate(max_sources);
            }
            if urls.is_empty() {
                warn!(%protocol, "no source for protocol");
                continue;
            }
            plan.push((protocol, urls));
        }
        plan
    }
}

/// Downloads source lists
pub struct SourceFetcher {
    client: Client,
}

impl SourceFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(crate::proxy::dialer::DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// Fetch one URL. Failures are logged and yield `None`.
    pub async fn fetch(&self, url: &str) -> Option<String> {
        let result: std::result::Result<String, reqwest::Error> = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            response.text().await
        }
        .await;
        match result {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(%url, error = %e, "source failed to download");
                None
            }
        }
    }

    /// Fetch every planned source and return raw `(protocol, "host:port")`
    /// pairs in source order.
    pub async fn collect(&self, plan: &[(ProxyType, Vec<String>)]) -> Vec<(ProxyType, String)> {
        let mut raw = Vec::new();
        for (protocol, urls) in plan {
            info!(%protocol, sources = urls.len(), "downloading sources");
            let texts: Vec<Option<String>> = stream::iter(urls.iter())
                .map(|url| self.fetch(url))
                .buffered(MAX_PARALLEL_FETCHES)
                .collect()
                .await;
            for text in texts.into_iter().flatten() {
                raw.extend(
                    ProxyParser::extract_endpoints(&text)
                        .into_iter()
                        .map(|endpoint| (*protocol, endpoint)),
                );
            }
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_protocol() {
        let map = SourceMap::defaults();
        for protocol in ProxyType::ALL {
            assert!(!map.urls(protocol).is_empty());
            for url in map.urls(protocol) {
                assert!(url.starts_with("https://"));
            }
        }
    }

    #[test]
    fn test_from_json_skips_unknown_protocols() {
        let map = SourceMap::from_json(
            r#"{"http": ["https://a/http.txt"], "SOCKS5": ["https://a/s5.txt"], "ftp": ["x"]}"#,
        )
        .unwrap();
        assert_eq!(map.urls(ProxyType::Http), ["https://a/http.txt"]);
        assert_eq!(map.urls(ProxyType::Socks5), ["https://a/s5.txt"]);
        assert!(map.urls(ProxyType::Socks4).is_empty());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(SourceMap::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_plan_caps_before_fetching() {
        let map = SourceMap::defaults();
        let plan = map.plan(&[ProxyType::Http, ProxyType::Socks4], 2);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].0, ProxyType::Http);
        assert_eq!(plan[0].1, map.urls(ProxyType::Http)[..2].to_vec());
        assert_eq!(plan[1].1.len(), 2);

        let all = map.plan(&[ProxyType::Http], 0);
        assert_eq!(all[0].1.len(), map.urls(ProxyType::Http).len());
    }

    #[test]
    fn test_plan_skips_protocols_without_sources() {
        let map = SourceMap::from_json(r#"{"http": ["https://a/http.txt"]}"#).unwrap();
        let plan = map.plan(&ProxyType::ALL, 0);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let err = SourceMap::load(Path::new("/nonexistent/sources.json")).unwrap_err();
        assert!(matches!(err, SourceError::Read { .. }));
    }
}
