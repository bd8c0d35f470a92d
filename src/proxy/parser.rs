//! Proxy parser module for turning raw source text into endpoint strings

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};

/// Regex pattern to match IP:PORT patterns in free text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3}):(\d{2,5})\b").expect("Invalid IP:PORT regex")
});

/// Optional scheme prefix on a line, e.g. `socks5://`
static SCHEME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(https?|socks[45]h?)://").expect("Invalid scheme regex"));

static HOSTNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("Invalid hostname regex")
});

/// Proxy parser for endpoint strings and downloaded proxy lists
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single endpoint into a normalized `(host, port)`.
    ///
    /// Supports formats:
    /// - HOST:PORT
    /// - [IPV6]:PORT
    /// - scheme://HOST:PORT (trailing slash allowed)
    ///
    /// The host must be an IP address or a DNS name; the port must be in
    /// 1..=65535.
    pub fn parse_endpoint(line: &str) -> Option<(String, u16)> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let rest = match SCHEME_REGEX.find(line) {
            Some(m) => &line[m.end()..],
            None => line,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, port) = bracketed.split_once("]:")?;
            (host, port)
        } else {
            let (host, port) = rest.rsplit_once(':')?;
            if host.contains(':') {
                return None;
            }
            (host, port)
        };

        let port = Self::parse_port(port)?;
        let host = Self::normalize_host(host)?;
        Some((host, port))
    }

    fn parse_port(port: &str) -> Option<u16> {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let port: u32 = port.parse().ok()?;
        if (1..=65535).contains(&port) {
            Some(port as u16)
        } else {
            None
        }
    }

    fn normalize_host(host: &str) -> Option<String> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip.to_string());
        }
        let host = host.to_ascii_lowercase();
        // all-numeric labels must form a real IPv4 address
        if host.split('.').all(|label| label.bytes().all(|b| b.is_ascii_digit())) {
            return host.parse::<Ipv4Addr>().ok().map(|ip| ip.to_string());
        }
        if host.len() <= 253 && HOSTNAME_REGEX.is_match(&host) {
            Some(host)
        } else {
            None
        }
    }

    /// Extract every endpoint from downloaded text as `host:port` strings.
    ///
    /// Each line is first tried as a whole endpoint; lines that are not
    /// (HTML, CSV, prose) are scanned for embedded `ip:port` tokens.
    pub fn extract_endpoints(content: &str) -> Vec<String> {
        let mut endpoints = Vec::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some((host, port)) = Self::parse_endpoint(trimmed) {
                if host.contains(':') {
                    endpoints.push(format!("[{}]:{}", host, port));
                } else {
                    endpoints.push(format!("{}:{}", host, port));
                }
                continue;
            }
            for cap in IP_PORT_REGEX.captures_iter(trimmed) {
                let token = format!("{}:{}", &cap[1], &cap[2]);
                if Self::parse_endpoint(&token).is_some() {
                    endpoints.push(token);
                }
            }
        }
        endpoints
    }
}
