//! Pure aggregation of probe outcomes into the published ordering and
//! run statistics.

use crate::proxy::models::{Candidate, ProbeStatus, ProxyType, ValidationOutcome};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Presentation order of the published list.
///
/// `Desc` lists the fastest proxy first (ascending latency), `Asc` the
/// slowest first (descending latency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Desc,
    Asc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Desc => f.write_str("desc"),
            SortOrder::Asc => f.write_str("asc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliveEntry {
    pub candidate: Candidate,
    pub latency: Duration,
    pub http_status: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolCounts {
    pub tested: usize,
    pub alive: usize,
}

/// Latency distribution of alive proxies, nearest-rank percentiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub min: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl LatencySummary {
    fn from_sorted(sorted: &[Duration]) -> Option<Self> {
        let (&min, &max) = (sorted.first()?, sorted.last()?);
        let rank = |p: usize| {
            let idx = (p * sorted.len()).div_ceil(100).max(1) - 1;
            sorted[idx.min(sorted.len() - 1)]
        };
        Some(Self {
            min,
            p50: rank(50),
            p90: rank(90),
            p99: rank(99),
            max,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    /// Alive proxies in published order
    pub alive: Vec<AliveEntry>,
    /// Candidates handed to the run, probed or not
    pub total_candidates: usize,
    pub alive_count: usize,
    pub elapsed: Duration,
    pub per_protocol: BTreeMap<ProxyType, ProtocolCounts>,
    /// Count of every non-success status seen
    pub failures: BTreeMap<ProbeStatus, usize>,
    pub latency: Option<LatencySummary>,
}

impl RunResult {
    /// Alive count per protocol
    pub fn per_protocol_counts(&self) -> BTreeMap<ProxyType, usize> {
        self.per_protocol
            .iter()
            .map(|(protocol, counts)| (*protocol, counts.alive))
            .collect()
    }

    /// Output artifact body: one `protocol://host:port` per line, each
    /// newline-terminated. Empty when nothing is alive.
    pub fn render(&self) -> String {
        let mut body = String::with_capacity(self.alive.len() * 28);
        for entry in &self.alive {
            body.push_str(&entry.candidate.url());
            body.push('\n');
        }
        body
    }

    /// The `n` lowest-latency entries regardless of published order
    pub fn fastest(&self, n: usize) -> Vec<&AliveEntry> {
        let mut entries: Vec<&AliveEntry> = self.alive.iter().collect();
        entries.sort_by_key(|e| e.latency);
        entries.truncate(n);
        entries
    }
}

/// Partition outcomes, order the alive ones and compute statistics.
///
/// `outcomes` must be in discovery order; equal latencies keep that order.
/// `total` is the size of the candidate set, which exceeds
/// `outcomes.len()` when the run was cut short.
pub fn aggregate(
    outcomes: &[ValidationOutcome],
    total: usize,
    order: SortOrder,
    elapsed: Duration,
) -> RunResult {
    let mut per_protocol: BTreeMap<ProxyType, ProtocolCounts> = BTreeMap::new();
    let mut failures: BTreeMap<ProbeStatus, usize> = BTreeMap::new();
    let mut alive = Vec::new();

    for outcome in outcomes {
        let counts = per_protocol.entry(outcome.candidate.protocol()).or_default();
        counts.tested += 1;
        if outcome.is_alive() {
            counts.alive += 1;
            alive.push(AliveEntry {
                candidate: outcome.candidate.clone(),
                latency: outcome.latency.unwrap_or(Duration::MAX),
                http_status: outcome.http_status.unwrap_or_default(),
            });
        } else {
            *failures.entry(outcome.status).or_default() += 1;
        }
    }

    // stable sorts: ties stay in discovery order
    match order {
        SortOrder::Desc => alive.sort_by_key(|e| e.latency),
        SortOrder::Asc => alive.sort_by_key(|e| Reverse(e.latency)),
    }

    let mut latencies: Vec<Duration> = alive.iter().map(|e| e.latency).collect();
    latencies.sort_unstable();

    RunResult {
        alive_count: alive.len(),
        alive,
        total_candidates: total.max(outcomes.len()),
        elapsed,
        per_protocol,
        failures,
        latency: LatencySummary::from_sorted(&latencies),
    }
}
