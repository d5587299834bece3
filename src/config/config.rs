use serde::Deserialize;
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::fs;

use super::{cli::PoolArgs, types::LogLevel};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Long enough to absorb reconnect/retry bursts from one client, short enough
/// that idle sandboxes are not held open for long.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

// -----------------------------------------------------------------------------
// ----- PoolConfig ------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub grace_period: Duration,
    pub connect_timeout: Option<Duration>,
    pub log_level: LogLevel,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            connect_timeout: None,
            log_level: LogLevel::Info,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- PoolConfig: Static ----------------------------------------------------

impl PoolConfig {
    /// Defaults, then the config file (if any), then CLI/ENV overrides.
    pub async fn load(args: &PoolArgs) -> Result<PoolConfig, ConfigError> {
        let mut cfg = match args.config_file.as_deref() {
            Some(path) => Self::from_file_async(path).await?,
            None => PoolConfig::default(),
        };

        cfg.apply_args(args);
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn from_file_async(path: &Path) -> Result<PoolConfig, ConfigError> {
        let raw = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<PoolConfig, ConfigError> {
        let doc: ConfigFile = toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })?;
        let section = doc.pool.unwrap_or_default();
        let defaults = PoolConfig::default();

        let cfg = PoolConfig {
            grace_period: section.grace_period.unwrap_or(defaults.grace_period),
            connect_timeout: section.connect_timeout.or(defaults.connect_timeout),
            log_level: section.log_level.unwrap_or(defaults.log_level),
        };

        cfg.validate()?;
        Ok(cfg)
    }
}

// -----------------------------------------------------------------------------
// ----- PoolConfig: Private ---------------------------------------------------

impl PoolConfig {
    fn apply_args(&mut self, args: &PoolArgs) {
        if let Some(grace_period) = args.grace_period {
            self.grace_period = grace_period;
        }
        if let Some(connect_timeout) = args.connect_timeout {
            self.connect_timeout = Some(connect_timeout);
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidField("connect_timeout".into()));
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    pool: Option<PoolSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolSection {
    #[serde(default, deserialize_with = "de_humantime")]
    grace_period: Option<Duration>,

    #[serde(default, deserialize_with = "de_humantime")]
    connect_timeout: Option<Duration>,

    #[serde(default)]
    log_level: Option<LogLevel>,
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn de_humantime<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Unexpected, Visitor};
    use std::fmt;

    struct HumantimeVisitor;

    impl<'de> Visitor<'de> for HumantimeVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration string (e.g., \"10s\") or integer milliseconds")
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::invalid_value(Unexpected::Signed(v), &self));
            }
            Ok(Some(Duration::from_millis(v as u64)))
        }
    }

    d.deserialize_any(HumantimeVisitor)
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid or missing field '{0}'")]
    InvalidField(String),

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
