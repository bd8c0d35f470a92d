//! JSON metrics artifact for a finished run

use crate::proxy::aggregate::{LatencySummary, ProtocolCounts, RunResult};
use crate::proxy::candidates::IntakeStats;
use crate::publish::{AtomicPublisher, PublishReport};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn millis(d: Duration) -> f64 {
    (d.as_secs_f64() * 10_000.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyMetrics {
    pub min_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl From<LatencySummary> for LatencyMetrics {
    fn from(s: LatencySummary) -> Self {
        Self {
            min_ms: millis(s.min),
            p50_ms: millis(s.p50),
            p90_ms: millis(s.p90),
            p99_ms: millis(s.p99),
            max_ms: millis(s.max),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsItem {
    pub proto: String,
    pub proxy: String,
    pub latency_ms: f64,
    pub status: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub generated_at: DateTime<Utc>,
    pub complete: bool,
    pub total_candidates: usize,
    pub alive_count: usize,
    pub elapsed_ms: f64,
    pub intake: IntakeStats,
    pub per_protocol: BTreeMap<String, ProtocolCounts>,
    pub failures: BTreeMap<String, usize>,
    pub latency: Option<LatencyMetrics>,
    pub items: Vec<MetricsItem>,
}

impl MetricsReport {
    pub fn new(result: &RunResult, intake: IntakeStats, complete: bool) -> Self {
        Self {
            generated_at: Utc::now(),
            complete,
            total_candidates: result.total_candidates,
            alive_count: result.alive_count,
            elapsed_ms: millis(result.elapsed),
            intake,
            per_protocol: result
                .per_protocol
                .iter()
                .map(|(p, c)| (p.to_string(), *c))
                .collect(),
            failures: result
                .failures
                .iter()
                .map(|(s, n)| (s.to_string(), *n))
                .collect(),
            latency: result.latency.map(LatencyMetrics::from),
            items: result
                .alive
                .iter()
                .map(|e| MetricsItem {
                    proto: e.candidate.protocol().to_string(),
                    proxy: e.candidate.authority(),
                    latency_ms: millis(e.latency),
                    status: e.http_status,
                })
                .collect(),
        }
    }

    /// Write as pretty JSON via temp file + rename, without a `.prev` copy
    pub fn write(&self, path: &Path) -> Result<PublishReport> {
        let mut json = serde_json::to_vec_pretty(self).context("failed to encode metrics")?;
        json.push(b'\n');
        let report = AtomicPublisher::new()
            .with_preview(false)
            .publish(path, &json)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
        Ok(report)
    }
}
