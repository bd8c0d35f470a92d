//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// Proxy type enumeration
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Every supported protocol, in the order they are tested and reported.
    pub const ALL: [ProxyType; 4] = [
        ProxyType::Http,
        ProxyType::Https,
        ProxyType::Socks4,
        ProxyType::Socks5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks4" => Ok(ProxyType::Socks4),
            "socks5" => Ok(ProxyType::Socks5),
            other => Err(anyhow::anyhow!(
                "Invalid proxy type: {}. Use: http, https, socks4, socks5",
                other
            )),
        }
    }
}

/// A single proxy endpoint to be probed.
///
/// Hosts are stored normalized (lowercase, canonical IP text), so two
/// candidates compare equal exactly when protocol, host and port match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    protocol: ProxyType,
    host: String,
    port: u16,
}

impl Candidate {
    /// Build a candidate, normalizing the host. Returns `None` for an empty
    /// host or a zero port.
    pub fn new(protocol: ProxyType, host: &str, port: u16) -> Option<Self> {
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() || port == 0 {
            return None;
        }
        let host = match host.parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => host.to_ascii_lowercase(),
        };
        Some(Self {
            protocol,
            host,
            port,
        })
    }

    pub fn protocol(&self) -> ProxyType {
        self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, with IPv6 hosts bracketed
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Get the proxy URL string, e.g. `socks5://1.2.3.4:1080`
    pub fn url(&self) -> String {
        format!("{}://{}", self.protocol, self.authority())
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Classified result of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    Timeout,
    ConnectError,
    ProtocolError,
    HttpError,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Success => "success",
            ProbeStatus::Timeout => "timeout",
            ProbeStatus::ConnectError => "connect_error",
            ProbeStatus::ProtocolError => "protocol_error",
            ProbeStatus::HttpError => "http_error",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of probing one candidate. Produced exactly once per candidate.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub candidate: Candidate,
    pub status: ProbeStatus,
    pub latency: Option<Duration>,
    /// Status code returned by the test target, set on success
    pub http_status: Option<u16>,
    pub detail: String,
}

impl ValidationOutcome {
    pub fn success(candidate: Candidate, latency: Duration, http_status: u16) -> Self {
        Self {
            candidate,
            status: ProbeStatus::Success,
            latency: Some(latency),
            http_status: Some(http_status),
            detail: format!("HTTP {}", http_status),
        }
    }

    pub fn failed(candidate: Candidate, status: ProbeStatus, detail: impl Into<String>) -> Self {
        Self {
            candidate,
            status,
            latency: None,
            http_status: None,
            detail: detail.into(),
        }
    }

    pub fn timeout(candidate: Candidate, deadline: Duration) -> Self {
        Self::failed(
            candidate,
            ProbeStatus::Timeout,
            format!("no response within {}ms", deadline.as_millis()),
        )
    }

    pub fn is_alive(&self) -> bool {
        self.status == ProbeStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_creation() {
        let candidate = Candidate::new(ProxyType::Http, "127.0.0.1", 8080).unwrap();
        assert_eq!(candidate.host(), "127.0.0.1");
        assert_eq!(candidate.port(), 8080);
        assert_eq!(candidate.protocol(), ProxyType::Http);
    }

    #[test]
    fn test_candidate_normalizes_host() {
        let a = Candidate::new(ProxyType::Socks5, "Proxy.Example.COM", 1080).unwrap();
        let b = Candidate::new(ProxyType::Socks5, "proxy.example.com", 1080).unwrap();
        assert_eq!(a, b);

        let v6 = Candidate::new(ProxyType::Http, "[2001:DB8:0::1]", 3128).unwrap();
        assert_eq!(v6.host(), "2001:db8::1");
        assert_eq!(v6.url(), "http://[2001:db8::1]:3128");
    }

    #[test]
    fn test_candidate_rejects_empty_host_and_zero_port() {
        assert!(Candidate::new(ProxyType::Http, "", 8080).is_none());
        assert!(Candidate::new(ProxyType::Http, "1.2.3.4", 0).is_none());
    }

    #[test]
    fn test_candidate_url() {
        let candidate = Candidate::new(ProxyType::Socks4, "192.168.1.1", 1080).unwrap();
        assert_eq!(candidate.url(), "socks4://192.168.1.1:1080");
        assert_eq!(candidate.to_string(), "socks4://192.168.1.1:1080");
    }

    #[test]
    fn test_proxy_type_from_str() {
        assert_eq!("HTTP".parse::<ProxyType>().unwrap(), ProxyType::Http);
        assert_eq!(" socks5 ".parse::<ProxyType>().unwrap(), ProxyType::Socks5);
        assert!("ftp".parse::<ProxyType>().is_err());
    }

    #[test]
    fn test_validation_outcome() {
        let candidate = Candidate::new(ProxyType::Http, "127.0.0.1", 8080).unwrap();

        let outcome =
            ValidationOutcome::success(candidate.clone(), Duration::from_millis(100), 200);
        assert!(outcome.is_alive());
        assert_eq!(outcome.latency, Some(Duration::from_millis(100)));
        assert_eq!(outcome.http_status, Some(200));
        assert_eq!(outcome.detail, "HTTP 200");

        let outcome = ValidationOutcome::failed(
            candidate.clone(),
            ProbeStatus::ConnectError,
            "Connection refused",
        );
        assert!(!outcome.is_alive());
        assert!(outcome.latency.is_none());

        let outcome = ValidationOutcome::timeout(candidate, Duration::from_secs(5));
        assert_eq!(outcome.status, ProbeStatus::Timeout);
        assert_eq!(outcome.detail, "no response within 5000ms");
    }
}
