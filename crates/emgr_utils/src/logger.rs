use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "emgr=info";

/// Initialise tracing subscriber once per process.
pub fn init_logging() {
    init_logging_with(DEFAULT_FILTER);
}

/// Same as [`init_logging`] but with a caller-chosen fallback directive,
/// e.g. `emgr=debug` from a `--verbose` flag. `RUST_LOG` still wins.
pub fn init_logging_with(fallback: &str) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    });
}
