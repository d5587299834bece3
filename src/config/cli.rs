use std::{path::PathBuf, time::Duration};

use super::types::LogLevel;

// -----------------------------------------------------------------------------
// ----- PoolArgs --------------------------------------------------------------

/// Pool flags a host binary flattens into its own parser with
/// `#[command(flatten)]`. Every flag is optional; unset flags fall back to the
/// config file, then to the built-in defaults.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct PoolArgs {
    // TOML file with a [pool] table.
    #[arg(long = "pool-config", env = "SBXPOOL_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    // Humantime, e.g. "10s" or "1m 30s".
    #[arg(
        long = "pool-grace-period",
        env = "SBXPOOL_GRACE_PERIOD",
        value_parser = humantime::parse_duration
    )]
    pub grace_period: Option<Duration>,

    #[arg(
        long = "pool-connect-timeout",
        env = "SBXPOOL_CONNECT_TIMEOUT",
        value_parser = humantime::parse_duration
    )]
    pub connect_timeout: Option<Duration>,

    #[arg(long = "pool-log", env = "SBXPOOL_LOG")]
    pub log_level: Option<LogLevel>,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
