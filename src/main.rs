use clap::Parser;
use proxy_sift::{
    config::{parse_protocols, SiftConfig, DEFAULT_OUTPUT},
    logging,
    pipeline::{self, RunStatus},
    proxy::{CandidateSet, CheckerConfig, ProxyChecker, SortOrder, SourceFetcher, SourceMap},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code for configuration and source map errors
const EXIT_CONFIG: u8 = 1;
/// Exit code when the output could not be published
const EXIT_PUBLISH: u8 = 2;
/// Exit code for an interrupted run
const EXIT_INTERRUPTED: u8 = 130;

/// Collects free proxy lists, validates them and atomically publishes the working ones
#[derive(Parser)]
#[command(name = "proxy-sift", version)]
#[command(
    about = "Collects free proxy lists, validates them and atomically publishes the working ones as .txt"
)]
struct Cli {
    /// Target protocols (comma-separated)
    #[arg(long, default_value = "http,https,socks4,socks5")]
    protocols: String,

    /// Validation timeout in seconds, covering the whole probe
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Number of concurrent probes
    #[arg(long, default_value_t = 128)]
    concurrency: usize,

    /// URL to fetch through each proxy
    #[arg(long, default_value = "https://httpbin.org/ip")]
    test_url: String,

    /// Disable TLS certificate verification of the test URL (not recommended)
    #[arg(long)]
    no_tls_verify: bool,

    /// Output file for working proxies
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    out: PathBuf,

    /// Optional JSON metrics output
    #[arg(long)]
    metrics: Option<PathBuf>,

    /// Source map JSON (protocol -> list of URLs)
    #[arg(long)]
    sources: Option<PathBuf>,

    /// Max sources fetched per protocol (0 = all)
    #[arg(long, default_value_t = 0)]
    max_sources: usize,

    /// Do not keep a .prev copy of the previous output
    #[arg(long)]
    no_preview: bool,

    /// Sort order: desc (fastest to slowest) or asc (slowest to fastest)
    #[arg(long, value_enum, default_value_t = SortOrder::Desc)]
    order: SortOrder,

    /// Log a progress line after this many probes
    #[arg(long, default_value_t = 100)]
    progress_every: usize,

    /// On interrupt, publish the proxies verified so far (partial list)
    #[arg(long)]
    partial_publish: bool,

    /// Keep the previous output when no proxy works
    #[arg(long)]
    skip_empty: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> proxy_sift::Result<SiftConfig> {
        let checker = CheckerConfig::new()
            .with_timeout(Duration::from_secs(self.timeout.max(1)))
            .with_concurrency(self.concurrency.max(1))
            .with_test_url(self.test_url)
            .with_verify_tls(!self.no_tls_verify)
            .with_progress_every(self.progress_every.max(1));
        Ok(SiftConfig::new()
            .with_protocols(parse_protocols(&self.protocols)?)
            .with_max_sources(self.max_sources)
            .with_sources(self.sources)
            .with_checker(checker)
            .with_order(self.order)
            .with_output(self.out)
            .with_preview(!self.no_preview)
            .with_metrics(self.metrics)
            .with_partial_publish(self.partial_publish)
            .with_skip_empty(self.skip_empty))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if !config.checker.verify_tls {
        warn!("TLS verification of the test URL is disabled");
    }

    let checker = match ProxyChecker::with_config(config.checker.clone()) {
        Ok(checker) => checker,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let sources = match SourceMap::resolve(config.sources.as_deref()) {
        Ok(sources) => sources,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancelled");
            cancel_ctrlc.cancel();
        }
    });

    let fetcher = match SourceFetcher::with_timeout(config.checker.timeout) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let plan = sources.plan(&config.protocols, config.max_sources);
    let raw = tokio::select! {
        raw = fetcher.collect(&plan) => raw,
        _ = cancel.cancelled() => return ExitCode::from(EXIT_INTERRUPTED),
    };
    info!(count = raw.len(), "total downloaded candidate proxies");

    let candidates = CandidateSet::build(
        raw.iter().map(|(protocol, endpoint)| (protocol.as_str(), endpoint.as_str())),
        &config.protocols,
    );
    let intake = candidates.stats();
    info!(
        unique = candidates.len(),
        duplicates = intake.duplicates,
        discarded = intake.discarded,
        "after deduplication"
    );

    let report = match pipeline::run(candidates, &config, &checker, cancel).await {
        Ok(report) => report,
        Err(e) => {
            error!("publish failed: {}", e);
            return ExitCode::from(EXIT_PUBLISH);
        }
    };

    let fastest = report.result.fastest(10);
    if !fastest.is_empty() {
        let lines: Vec<String> = fastest
            .iter()
            .enumerate()
            .map(|(i, e)| {
                format!(
                    "[{:02}] {} ~ {:.1}ms",
                    i + 1,
                    e.candidate,
                    e.latency.as_secs_f64() * 1000.0
                )
            })
            .collect();
        info!("fastest {}:\n{}", fastest.len(), lines.join("\n"));
    }

    match report.status {
        RunStatus::Published(_) | RunStatus::SkippedEmpty => ExitCode::SUCCESS,
        RunStatus::PartialPublished(_) | RunStatus::Interrupted => {
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}
