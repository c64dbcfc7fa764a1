//! Logging setup for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Install a `tracing` fmt subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise `default_directive`
/// (e.g. `"conveyor=info"`). Returns `false` if a global subscriber was
/// already installed, which makes repeated calls harmless.
pub fn init_logging(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
