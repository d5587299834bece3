use std::{fmt, ops::Deref, sync::Arc};

use crate::remote::{Connector, SandboxSession};

use super::{
    connection_pool::ConnectionPool,
    listeners::Listener,
    watch_registry::{SubscriptionOf, WatchKey, WatchRegistry},
};

// -----------------------------------------------------------------------------
// ----- SessionLease ----------------------------------------------------------

/// A pooled session that gives its claim back when dropped.
///
/// Dropping may schedule the pool's eviction timer, so leases must be
/// dropped inside a Tokio runtime.
pub struct SessionLease<C: Connector> {
    session: Arc<C::Session>,
    claim: SessionClaim<C>,
}

impl<C: Connector> SessionLease<C> {
    pub(crate) fn new(session: Arc<C::Session>, claim: SessionClaim<C>) -> Self {
        Self { session, claim }
    }

    pub fn key(&self) -> &str {
        &self.claim.key
    }

    pub fn session(&self) -> &Arc<C::Session> {
        &self.session
    }
}

impl<C: Connector> Deref for SessionLease<C> {
    type Target = C::Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl<C: Connector> fmt::Debug for SessionLease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLease")
            .field("key", &self.claim.key)
            .field("epoch", &self.claim.epoch)
            .finish()
    }
}

/// One claim on a pool entry, given back on drop unless kept.
pub(crate) struct SessionClaim<C: Connector> {
    pool: ConnectionPool<C>,
    key: String,
    epoch: u64,
    armed: bool,
}

impl<C: Connector> SessionClaim<C> {
    pub(crate) fn new(pool: ConnectionPool<C>, key: &str, epoch: u64) -> Self {
        Self {
            pool,
            key: key.to_string(),
            epoch,
            armed: true,
        }
    }

    /// Hands the claim over to the caller, who now owes one `release`.
    pub(crate) fn keep(mut self) {
        self.armed = false;
    }
}

impl<C: Connector> Drop for SessionClaim<C> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_claim(&self.key, self.epoch);
        }
    }
}

// -----------------------------------------------------------------------------
// ----- WatchLease ------------------------------------------------------------

/// A shared watch subscription that unregisters its listener and gives its
/// claim back when dropped.
pub struct WatchLease<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    subscription: Arc<SubscriptionOf<C>>,
    claim: WatchClaim<C>,
}

impl<C> WatchLease<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    pub(crate) fn new(subscription: Arc<SubscriptionOf<C>>, claim: WatchClaim<C>) -> Self {
        Self {
            subscription,
            claim,
        }
    }

    pub fn key(&self) -> &WatchKey {
        &self.claim.key
    }

    pub fn listener(&self) -> &Listener {
        &self.claim.listener
    }

    pub fn subscription(&self) -> &Arc<SubscriptionOf<C>> {
        &self.subscription
    }
}

impl<C> fmt::Debug for WatchLease<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchLease")
            .field("key", &self.claim.key)
            .field("listener", &self.claim.listener)
            .field("epoch", &self.claim.epoch)
            .finish()
    }
}

pub(crate) struct WatchClaim<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    registry: WatchRegistry<C>,
    key: WatchKey,
    epoch: u64,
    listener: Listener,
    armed: bool,
}

impl<C> WatchClaim<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    pub(crate) fn new(
        registry: WatchRegistry<C>,
        key: WatchKey,
        epoch: u64,
        listener: Listener,
    ) -> Self {
        Self {
            registry,
            key,
            epoch,
            listener,
            armed: true,
        }
    }

    /// Hands the claim and the listener registration over to the caller.
    pub(crate) fn keep(mut self) {
        self.armed = false;
    }
}

impl<C> Drop for WatchClaim<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    fn drop(&mut self) {
        if self.armed {
            self.registry
                .release_claim(&self.key, &self.listener, self.epoch);
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
