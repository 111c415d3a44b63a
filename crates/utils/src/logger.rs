use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

const DEFAULT_FILTER: &str = "ottercache=info,otterc_runtime=info";

/// Initialise tracing subscriber once per process.
///
/// `RUST_LOG` takes precedence over the default filter. If another subscriber
/// is already installed (e.g. by a test harness) it is left in place.
pub fn init_logging() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let _ = fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init();
    });
}
