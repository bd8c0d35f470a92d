//! Proxy checker: bounded worker pool probing every candidate once

use crate::proxy::dialer::{DialerTable, ProbeSettings, ProbeTarget};
use crate::proxy::models::{Candidate, ProbeStatus, ValidationOutcome};
use crate::Result;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default timeout for proxy checks in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 128;

/// Default URL to test proxies against
const DEFAULT_TEST_URL: &str = "https://httpbin.org/ip";

/// Default number of outcomes between progress reports
const DEFAULT_PROGRESS_EVERY: usize = 100;

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Deadline covering one whole probe
    pub timeout: Duration,
    /// Number of concurrent probes
    pub concurrency: usize,
    /// URL to test proxies against
    pub test_url: String,
    /// Verify the test target's certificate chain
    pub verify_tls: bool,
    /// Report progress after this many outcomes (and always at the end)
    pub progress_every: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            test_url: DEFAULT_TEST_URL.to_string(),
            verify_tls: true,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }
}

/// Snapshot of how far a run has come
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub alive: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.done as f64 * 100.0 / self.total as f64
        }
    }
}

/// Everything a pool run produced
#[derive(Debug, Clone)]
pub struct ValidationRun {
    /// One outcome per probed candidate, in candidate order
    pub outcomes: Vec<ValidationOutcome>,
    /// Number of candidates handed to the pool
    pub total: usize,
    /// `false` when the run was cancelled before every candidate finished
    pub complete: bool,
    pub elapsed: Duration,
}

/// Proxy checker for validating proxies
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    settings: Arc<ProbeSettings>,
    dialers: Arc<DialerTable>,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Result<Self> {
        let target = ProbeTarget::parse(&config.test_url)?;
        let settings = ProbeSettings::new(target, config.verify_tls)?;
        Ok(Self {
            config,
            settings: Arc::new(settings),
            dialers: Arc::new(DialerTable::standard()),
        })
    }

    /// Replace the protocol dialers
    pub fn with_dialers(mut self, dialers: DialerTable) -> Self {
        self.dialers = Arc::new(dialers);
        self
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check a single proxy under one deadline covering the whole exchange
    pub async fn check_proxy(&self, candidate: &Candidate) -> ValidationOutcome {
        let dialer = self.dialers.get(candidate.protocol());
        let outcome =
            match time::timeout(self.config.timeout, dialer.probe(candidate, &self.settings)).await
            {
                Ok(Ok(success)) => {
                    ValidationOutcome::success(candidate.clone(), success.latency, success.status)
                }
                Ok(Err(failure)) => {
                    ValidationOutcome::failed(candidate.clone(), failure.status, failure.detail)
                }
                Err(_) => ValidationOutcome::timeout(candidate.clone(), self.config.timeout),
            };
        debug!(
            proxy = %candidate,
            status = %outcome.status,
            latency_ms = outcome.latency.map(|l| l.as_millis() as u64),
            detail = %outcome.detail,
            "probe finished"
        );
        outcome
    }

    /// `check_proxy` with a panicking dialer reported as a protocol error
    async fn check_proxy_caught(&self, candidate: &Candidate) -> ValidationOutcome {
        match AssertUnwindSafe(self.check_proxy(candidate)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let detail = format!("dialer panicked: {}", panic_message(payload.as_ref()));
                warn!(proxy = %candidate, %detail, "probe failed");
                ValidationOutcome::failed(candidate.clone(), ProbeStatus::ProtocolError, detail)
            }
        }
    }

    /// Probe every candidate exactly once with at most `concurrency` probes
    /// in flight.
    ///
    /// A fixed pool of workers pulls indices from a shared counter, so no
    /// candidate is handed out twice. Outcomes are slotted back by index and
    /// returned in candidate order. Cancelling `cancel` abandons in-flight
    /// probes and returns what finished so far with `complete == false`.
    pub async fn check_all<F>(
        &self,
        candidates: Vec<Candidate>,
        cancel: CancellationToken,
        mut on_progress: F,
    ) -> ValidationRun
    where
        F: FnMut(Progress),
    {
        let start = Instant::now();
        let total = candidates.len();
        let candidates: Arc<[Candidate]> = candidates.into();
        let next = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, ValidationOutcome)>();

        let workers = self.config.concurrency.max(1).min(total.max(1));
        let mut set = JoinSet::new();
        for _ in 0..workers {
            let checker = self.clone();
            let candidates = Arc::clone(&candidates);
            let next = Arc::clone(&next);
            let tx = tx.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(candidate) = candidates.get(index) else {
                        break;
                    };
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        outcome = checker.check_proxy_caught(candidate) => outcome,
                    };
                    if tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<ValidationOutcome>> = (0..total).map(|_| None).collect();
        let every = self.config.progress_every.max(1);
        let mut progress = Progress {
            done: 0,
            total,
            alive: 0,
        };
        let mut interrupted = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                received = rx.recv() => {
                    let Some((index, outcome)) = received else {
                        break;
                    };
                    if outcome.is_alive() {
                        progress.alive += 1;
                    }
                    slots[index] = Some(outcome);
                    progress.done += 1;
                    if progress.done % every == 0 || progress.done == total {
                        on_progress(progress);
                    }
                }
            }
        }

        if interrupted {
            set.abort_all();
            // outcomes already queued still count
            while let Ok((index, outcome)) = rx.try_recv() {
                slots[index] = Some(outcome);
            }
        } else {
            while let Some(joined) = set.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "probe worker exited abnormally");
                }
            }
            // every handed-out candidate still gets an outcome
            for (slot, candidate) in slots.iter_mut().zip(candidates.iter()) {
                if slot.is_none() {
                    *slot = Some(ValidationOutcome::failed(
                        candidate.clone(),
                        ProbeStatus::ProtocolError,
                        "probe produced no outcome",
                    ));
                }
            }
        }

        let outcomes: Vec<ValidationOutcome> = slots.into_iter().flatten().collect();
        let complete = !interrupted && outcomes.len() == total;
        ValidationRun {
            outcomes,
            total,
            complete,
            elapsed: start.elapsed(),
        }
    }

    /// Probe everything and separate into alive and excluded outcomes
    pub async fn check_and_separate(
        &self,
        candidates: Vec<Candidate>,
    ) -> (Vec<ValidationOutcome>, Vec<ValidationOutcome>) {
        let run = self
            .check_all(candidates, CancellationToken::new(), |_| {})
            .await;
        run.outcomes.into_iter().partition(|o| o.is_alive())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
