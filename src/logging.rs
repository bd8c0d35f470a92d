use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING: OnceLock<()> = OnceLock::new();

/// Initialize the fmt subscriber once. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.to_ascii_lowercase()))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init();
        tracing::debug!(filter = level, "tracing initialized");
    });
}
