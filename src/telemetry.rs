use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogLevel;

/// Installs a global fmt subscriber. `RUST_LOG` wins over `level` when set.
///
/// Returns false if a subscriber was already installed (by the host or an
/// earlier call); that is not an error.
pub fn init_tracing(level: LogLevel) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(false).try_init().is_ok()
}
