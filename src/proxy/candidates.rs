//! Deduplicated set of candidates handed to the checker

use crate::proxy::models::{Candidate, ProxyType};
use crate::proxy::parser::ProxyParser;
use serde::Serialize;
use std::collections::HashSet;

/// Counters describing what happened to the raw input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntakeStats {
    /// Raw `(protocol, endpoint)` pairs offered
    pub raw: usize,
    /// Malformed endpoints or unsupported protocol tags
    pub discarded: usize,
    /// Valid entries whose protocol is not in the filter
    pub filtered: usize,
    /// Valid entries already present
    pub duplicates: usize,
}

/// Candidates in discovery order, each `(protocol, host, port)` exactly once.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
    seen: HashSet<Candidate>,
    protocols: Option<HashSet<ProxyType>>,
    stats: IntakeStats,
}

impl CandidateSet {
    /// Empty set accepting every protocol
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty set accepting only the given protocols
    pub fn with_protocols(protocols: &[ProxyType]) -> Self {
        Self {
            protocols: Some(protocols.iter().copied().collect()),
            ..Self::default()
        }
    }

    /// Build a set from raw `(protocol-tag, endpoint)` pairs.
    pub fn build<I, P, E>(raw: I, protocols: &[ProxyType]) -> Self
    where
        I: IntoIterator<Item = (P, E)>,
        P: AsRef<str>,
        E: AsRef<str>,
    {
        let mut set = Self::with_protocols(protocols);
        set.extend_raw(raw);
        set
    }

    pub fn extend_raw<I, P, E>(&mut self, raw: I)
    where
        I: IntoIterator<Item = (P, E)>,
        P: AsRef<str>,
        E: AsRef<str>,
    {
        for (tag, endpoint) in raw {
            self.push_raw(tag.as_ref(), endpoint.as_ref());
        }
    }

    /// Offer one raw pair. Returns `true` if it was added.
    pub fn push_raw(&mut self, tag: &str, endpoint: &str) -> bool {
        self.stats.raw += 1;
        let Ok(protocol) = tag.parse::<ProxyType>() else {
            self.stats.discarded += 1;
            return false;
        };
        let Some(candidate) = ProxyParser::parse_endpoint(endpoint)
            .and_then(|(host, port)| Candidate::new(protocol, &host, port))
        else {
            self.stats.discarded += 1;
            return false;
        };
        self.insert(candidate)
    }

    /// Add an already-built candidate. Returns `true` if it was added.
    pub fn insert(&mut self, candidate: Candidate) -> bool {
        if let Some(allowed) = &self.protocols {
            if !allowed.contains(&candidate.protocol()) {
                self.stats.filtered += 1;
                return false;
            }
        }
        if !self.seen.insert(candidate.clone()) {
            self.stats.duplicates += 1;
            return false;
        }
        self.candidates.push(candidate);
        true
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn stats(&self) -> IntakeStats {
        self.stats
    }

    pub fn into_vec(self) -> Vec<Candidate> {
        self.candidates
    }
}

impl FromIterator<Candidate> for CandidateSet {
    fn from_iter<T: IntoIterator<Item = Candidate>>(iter: T) -> Self {
        let mut set = Self::new();
        for candidate in iter {
            set.insert(candidate);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedups_case_and_format_variants() {
        let raw = vec![
            ("http", "1.2.3.4:8080"),
            ("HTTP", "http://1.2.3.4:8080/"),
            ("http", " 1.2.3.4:8080 "),
            ("http", "Proxy.Example.com:3128"),
            ("http", "proxy.example.COM:3128"),
            ("socks5", "1.2.3.4:8080"),
        ];
        let set = CandidateSet::build(raw, &ProxyType::ALL);
        let urls: Vec<_> = set.iter().map(|c| c.url()).collect();
        assert_eq!(
            urls,
            vec![
                "http://1.2.3.4:8080",
                "http://proxy.example.com:3128",
                "socks5://1.2.3.4:8080",
            ]
        );
        assert_eq!(set.stats().duplicates, 3);
        assert_eq!(set.stats().raw, 6);
    }

    #[test]
    fn test_discards_invalid_entries_with_count() {
        let raw = vec![
            ("http", "1.2.3.4:0"),
            ("http", "1.2.3.4:70000"),
            ("http", "not an endpoint"),
            ("ftp", "1.2.3.4:21"),
            ("socks4", "5.6.7.8:1080"),
        ];
        let set = CandidateSet::build(raw, &ProxyType::ALL);
        assert_eq!(set.len(), 1);
        assert_eq!(set.stats().discarded, 4);
    }

    #[test]
    fn test_protocol_filter_is_applied() {
        let raw = vec![("http", "1.2.3.4:8080"), ("socks5", "1.2.3.4:1080")];
        let set = CandidateSet::build(raw, &[ProxyType::Socks5]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.stats().filtered, 1);
        assert_eq!(set.stats().discarded, 0);
    }

    #[test]
    fn test_empty_input_is_fine() {
        let set = CandidateSet::build(Vec::<(&str, &str)>::new(), &ProxyType::ALL);
        assert!(set.is_empty());
        assert_eq!(set.stats(), IntakeStats::default());
    }
}
