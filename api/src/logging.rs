use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

const DEFAULT_FILTER: &str = "info,tower_http=info";

/// Install the global subscriber. Verbosity comes from `RUST_LOG`.
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        if let Err(e) = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
        {
            eprintln!("failed to initialize logging: {}", e);
        }
    });
}
