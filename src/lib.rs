//! Shared sandbox session and directory-watch pooling.
//!
//! [`ConnectionPool`] multiplexes many consumers onto one remote session per
//! sandbox. [`WatchRegistry`] shares one upstream directory watch per
//! (sandbox, path) between any number of listeners, holding a single claim on
//! the pooled session while it runs. Both keep unreferenced entries alive for
//! a grace period so reconnect bursts do not churn the remote side.

pub mod config;
pub mod errors;
pub mod pool;
pub mod remote;
pub mod telemetry;

pub use config::{LogLevel, PoolArgs, PoolConfig};
pub use errors::{PoolError, RemoteError};
pub use pool::{
    ConnectionPool, Listener, Pools, SessionLease, WatchKey, WatchLease, WatchRegistry,
};
pub use remote::{
    Closable, ConnectOptions, Connector, SandboxSession, Subscription, WatchEvent, WatchEventKind,
};
