pub mod cli;
pub mod config;
pub mod types;

pub use cli::PoolArgs;
pub use config::{ConfigError, DEFAULT_GRACE_PERIOD, PoolConfig};
pub use types::LogLevel;
