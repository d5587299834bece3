pub mod connection_pool;
mod eviction;
mod guard;
pub mod lease;
pub mod listeners;
pub mod stats;
pub mod watch_registry;

pub use connection_pool::ConnectionPool;
pub use lease::{SessionLease, WatchLease};
pub use listeners::{Listener, ListenerId};
pub use stats::{CounterSnapshot, EntryState, EntryStats, PoolStats};
pub use watch_registry::{SubscriptionOf, WatchKey, WatchRegistry};

use crate::config::PoolConfig;
use crate::remote::{Connector, SandboxSession};

// -----------------------------------------------------------------------------
// ----- Pools -----------------------------------------------------------------

/// A connection pool and the watch registry layered on it, built from one
/// config. Meant to be constructed once by whatever owns request handling
/// and handed down from there.
pub struct Pools<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    pub connections: ConnectionPool<C>,
    pub watches: WatchRegistry<C>,
}

impl<C> Pools<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    pub fn new(connector: C, config: &PoolConfig) -> Self {
        let connections = ConnectionPool::new(connector, config);
        let watches = WatchRegistry::new(connections.clone(), config);
        Self {
            connections,
            watches,
        }
    }

    /// Watches go first so their session claims are returned before the
    /// sessions are closed.
    pub async fn shutdown(&self) {
        self.watches.shutdown().await;
        self.connections.shutdown().await;
    }

    pub fn stats(&self) -> [PoolStats; 2] {
        [self.connections.stats(), self.watches.stats()]
    }
}

impl<C> Clone for Pools<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    fn clone(&self) -> Self {
        Self {
            connections: self.connections.clone(),
            watches: self.watches.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Pools<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pools")
            .field("connections", &self.connections)
            .field("watches", &self.watches)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
