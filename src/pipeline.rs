//! Run coordinator: probe, aggregate, then publish

use crate::config::SiftConfig;
use crate::metrics::MetricsReport;
use crate::proxy::aggregate::{aggregate, RunResult};
use crate::proxy::candidates::CandidateSet;
use crate::proxy::checker::ProxyChecker;
use crate::publish::{AtomicPublisher, PublishError, PublishReport};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Published(PublishReport),
    /// Interrupted, and the partial result was published on request
    PartialPublished(PublishReport),
    /// Nothing alive and empty publishing is disabled; old artifact kept
    SkippedEmpty,
    /// Interrupted; nothing was published
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: RunResult,
    pub status: RunStatus,
    /// `false` when probing was cut short
    pub complete: bool,
}

/// Probe every candidate, order the survivors and publish them.
///
/// Publishing starts only after every probe finished. An interrupted run
/// publishes nothing unless `partial_publish` is set. Only publish failures
/// are errors.
pub async fn run(
    candidates: CandidateSet,
    config: &SiftConfig,
    checker: &ProxyChecker,
    cancel: CancellationToken,
) -> Result<RunReport, PublishError> {
    let intake = candidates.stats();
    let checker_config = checker.config();
    info!(
        candidates = candidates.len(),
        test_url = %checker_config.test_url,
        timeout_s = checker_config.timeout.as_secs_f64(),
        concurrency = checker_config.concurrency,
        "validating proxies"
    );

    let run = checker
        .check_all(candidates.into_vec(), cancel, |p| {
            info!(
                done = p.done,
                total = p.total,
                alive = p.alive,
                "progress {:.1}%",
                p.percent()
            );
        })
        .await;

    let result = aggregate(&run.outcomes, run.total, config.order, run.elapsed);
    let complete = run.complete;

    let status = if !complete && !config.partial_publish {
        warn!(
            probed = run.outcomes.len(),
            total = run.total,
            "run interrupted, nothing published"
        );
        RunStatus::Interrupted
    } else if result.alive_count == 0 && config.skip_empty {
        info!(path = %config.output.display(), "no working proxies, keeping previous list");
        RunStatus::SkippedEmpty
    } else {
        let report = AtomicPublisher::new()
            .with_preview(config.preview)
            .publish(&config.output, result.render().as_bytes())?;
        info!(
            alive = result.alive_count,
            path = %report.target.display(),
            partial = !complete,
            "published working proxies"
        );
        if complete {
            RunStatus::Published(report)
        } else {
            RunStatus::PartialPublished(report)
        }
    };

    if let Some(path) = &config.metrics {
        if status != RunStatus::Interrupted {
            match MetricsReport::new(&result, intake, complete).write(path) {
                Ok(_) => info!(path = %path.display(), "metrics written"),
                Err(e) => warn!(error = %format!("{:#}", e), "metrics not written"),
            }
        }
    }

    Ok(RunReport {
        result,
        status,
        complete,
    })
}
