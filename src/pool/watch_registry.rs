use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::errors::PoolError;
use crate::remote::{ConnectOptions, Connector, SandboxSession, Subscription, WatchOptions};

use super::{
    connection_pool::ConnectionPool,
    eviction::{Claims, PendingEviction, Released},
    guard::Cleanup,
    lease::{WatchClaim, WatchLease},
    listeners::{Listener, ListenerSet},
    stats::{Counters, EntryState, EntryStats, PoolStats},
};

// -----------------------------------------------------------------------------
// ----- Types -----------------------------------------------------------------

pub type SubscriptionOf<C> = <<C as Connector>::Session as SandboxSession>::Subscription;

type SubscribeResult<W> = Result<Arc<W>, PoolError>;
type SharedSubscribe<W> = Shared<BoxFuture<'static, SubscribeResult<W>>>;

// -----------------------------------------------------------------------------
// ----- WatchKey --------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey {
    pub sandbox_id: String,
    pub path: String,
}

impl WatchKey {
    pub fn new(sandbox_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sandbox_id, self.path)
    }
}

// -----------------------------------------------------------------------------
// ----- WatchRegistry ---------------------------------------------------------

/// Shares one upstream directory watch per (sandbox, path) between any number
/// of listeners.
///
/// A live entry holds exactly one claim on the sandbox's pooled session and
/// gives it back only when the entry itself is evicted. Eviction follows the
/// same grace-period rules as `ConnectionPool`.
pub struct WatchRegistry<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    inner: Arc<RegistryInner<C>>,
}

struct RegistryInner<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    pool: ConnectionPool<C>,
    grace_period: Duration,
    entries: Mutex<HashMap<WatchKey, WatchEntry<SubscriptionOf<C>>>>,
    epochs: AtomicU64,
    counters: Counters,
}

struct WatchEntry<W> {
    epoch: u64,
    subscribe: SharedSubscribe<W>,
    upstream: Option<Upstream<W>>,
    listeners: Arc<ListenerSet>,
    claims: Claims,
}

/// A running upstream watch plus the pool claim that keeps its session alive.
struct Upstream<W> {
    subscription: Arc<W>,
    pool_epoch: u64,
}

impl<W> WatchEntry<W> {
    fn state(&self) -> EntryState {
        match (&self.upstream, self.claims.ref_count()) {
            (None, _) => EntryState::SettingUp,
            (Some(_), 0) => EntryState::Idle,
            (Some(_), _) => EntryState::Active,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- WatchRegistry: Static -------------------------------------------------

impl<C> WatchRegistry<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    pub fn new(pool: ConnectionPool<C>, config: &PoolConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                pool,
                grace_period: config.grace_period,
                entries: Mutex::new(HashMap::new()),
                epochs: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- WatchRegistry: Public -------------------------------------------------

impl<C> WatchRegistry<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    /// Registers `listener` on the shared watch of `path` in `sandbox_id`,
    /// starting the upstream watch if this is the first consumer.
    ///
    /// All consumers of the same (sandbox, path) get the same subscription.
    /// Only a successful call registers the listener for good; on failure, or
    /// if the future is dropped first, there is nothing to release.
    pub async fn acquire(
        &self,
        sandbox_id: &str,
        path: &str,
        listener: &Listener,
        opts: &ConnectOptions,
    ) -> Result<Arc<SubscriptionOf<C>>, PoolError> {
        let key = WatchKey::new(sandbox_id, path);
        let (epoch, subscribe) = self.claim(&key, listener, opts);
        let claim = WatchClaim::new(self.clone(), key, epoch, listener.clone());
        let subscription = subscribe.await?;
        claim.keep();
        Ok(subscription)
    }

    /// Like `acquire`, but the listener is removed and the claim released
    /// when the lease is dropped.
    pub async fn lease(
        &self,
        sandbox_id: &str,
        path: &str,
        listener: &Listener,
        opts: &ConnectOptions,
    ) -> Result<WatchLease<C>, PoolError> {
        let key = WatchKey::new(sandbox_id, path);
        let (epoch, subscribe) = self.claim(&key, listener, opts);
        let claim = WatchClaim::new(self.clone(), key, epoch, listener.clone());
        let subscription = subscribe.await?;
        Ok(WatchLease::new(subscription, claim))
    }

    /// Unregisters `listener` and gives back one claim. Unknown listeners and
    /// extra releases are ignored.
    pub fn release(&self, sandbox_id: &str, path: &str, listener: &Listener) {
        let key = WatchKey::new(sandbox_id, path);
        self.release_matching(&key, listener, None);
    }

    /// Stops every upstream watch and releases every pool claim right away.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.inner.entries.lock().drain().collect();
        if drained.is_empty() {
            return;
        }

        info!("shutting down watch registry: stopping {} watches", drained.len());

        let stops = drained.into_iter().map(|(key, mut entry)| async move {
            entry.claims.disarm();
            if let Some(upstream) = entry.upstream.take() {
                self.inner.teardown(&key, &upstream).await;
            }
        });
        join_all(stops).await;
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.inner.pool
    }

    pub fn contains(&self, sandbox_id: &str, path: &str) -> bool {
        self.inner
            .entries
            .lock()
            .contains_key(&WatchKey::new(sandbox_id, path))
    }

    pub fn ref_count(&self, sandbox_id: &str, path: &str) -> Option<usize> {
        self.inner
            .entries
            .lock()
            .get(&WatchKey::new(sandbox_id, path))
            .map(|entry| entry.claims.ref_count())
    }

    pub fn listener_count(&self, sandbox_id: &str, path: &str) -> Option<usize> {
        self.inner
            .entries
            .lock()
            .get(&WatchKey::new(sandbox_id, path))
            .map(|entry| entry.listeners.len())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One row per watched (sandbox, path), sorted by key.
    pub fn snapshot(&self) -> Vec<EntryStats> {
        let mut rows: Vec<(WatchKey, EntryStats)> = {
            let entries = self.inner.entries.lock();
            entries
                .iter()
                .map(|(key, entry)| {
                    let row = EntryStats {
                        key: key.to_string(),
                        state: entry.state(),
                        ref_count: entry.claims.ref_count(),
                        listeners: entry.listeners.len(),
                    };
                    (key.clone(), row)
                })
                .collect()
        };
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(_, row)| row).collect()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::from_rows("watches", &self.snapshot(), self.inner.counters.snapshot())
    }
}

// -----------------------------------------------------------------------------
// ----- WatchRegistry: Crate --------------------------------------------------

impl<C> WatchRegistry<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    pub(crate) fn release_claim(&self, key: &WatchKey, listener: &Listener, epoch: u64) {
        self.release_matching(key, listener, Some(epoch));
    }
}

// -----------------------------------------------------------------------------
// ----- WatchRegistry: Private ------------------------------------------------

impl<C> WatchRegistry<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    fn claim(
        &self,
        key: &WatchKey,
        listener: &Listener,
        opts: &ConnectOptions,
    ) -> (u64, SharedSubscribe<SubscriptionOf<C>>) {
        let mut entries = self.inner.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            entry.listeners.insert(listener);
            entry.claims.claim();
            self.inner.counters.inc_reused();
            debug!(
                "sharing watch on {key} (refs={}, listeners={})",
                entry.claims.ref_count(),
                entry.listeners.len()
            );
            return (entry.epoch, entry.subscribe.clone());
        }

        let epoch = self.inner.epochs.fetch_add(1, Ordering::Relaxed);
        let listeners = Arc::new(ListenerSet::with(listener));
        let subscribe = self.inner.start_subscribe(
            key.clone(),
            opts.clone(),
            Arc::clone(&listeners),
            epoch,
        );

        entries.insert(
            key.clone(),
            WatchEntry {
                epoch,
                subscribe: subscribe.clone(),
                upstream: None,
                listeners,
                claims: Claims::first(),
            },
        );

        (epoch, subscribe)
    }

    fn release_matching(&self, key: &WatchKey, listener: &Listener, epoch: Option<u64>) {
        let mut entries = self.inner.entries.lock();

        let Some(entry) = entries.get_mut(key) else {
            debug!("release for {key} with no shared watch; ignoring");
            return;
        };

        if epoch.is_some_and(|epoch| epoch != entry.epoch) {
            debug!("release for a previous watch on {key}; ignoring");
            return;
        }

        if !entry.listeners.remove(listener.id()) {
            debug!("listener {listener:?} was not registered on {key}");
        }

        match entry.claims.release() {
            Released::StillHeld => {
                debug!(
                    "released watch on {key} (refs={})",
                    entry.claims.ref_count()
                );
            }
            Released::OverReleased => {
                debug!("over-release for watch on {key}; refs already 0");
            }
            Released::NowIdle => {
                debug!(
                    "watch on {key} idle; stopping in {:?} unless reacquired",
                    self.inner.grace_period
                );
                entry
                    .claims
                    .arm(self.inner.schedule_eviction(key.clone()));
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RegistryInner ---------------------------------------------------------

impl<C> RegistryInner<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    fn start_subscribe(
        self: &Arc<Self>,
        key: WatchKey,
        opts: ConnectOptions,
        listeners: Arc<ListenerSet>,
        epoch: u64,
    ) -> SharedSubscribe<SubscriptionOf<C>> {
        self.counters.inc_started();

        let inner = Arc::clone(self);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let abandoned = Cleanup::new({
                let inner = Arc::clone(&inner);
                let key = task_key.clone();
                move || {
                    warn!("watch task for {key} did not finish; dropping its entry");
                    inner.forget(&key, epoch);
                }
            });
            let result = inner
                .subscribe_and_settle(task_key, opts, listeners, epoch)
                .await;
            abandoned.disarm();
            result
        });

        async move {
            task.await.unwrap_or_else(|err| {
                Err(PoolError::Aborted {
                    key: key.to_string(),
                    reason: err.to_string(),
                })
            })
        }
        .boxed()
        .shared()
    }

    async fn subscribe_and_settle(
        self: Arc<Self>,
        key: WatchKey,
        opts: ConnectOptions,
        listeners: Arc<ListenerSet>,
        epoch: u64,
    ) -> SubscribeResult<SubscriptionOf<C>> {
        let (pool_epoch, connect) = self.pool.claim(&key.sandbox_id, &opts);

        // Gives the session claim back on every exit until an upstream owns it.
        let pool_claim = Cleanup::new({
            let pool = self.pool.clone();
            let sandbox_id = key.sandbox_id.clone();
            move || pool.release_claim(&sandbox_id, pool_epoch)
        });

        let session = match connect.await {
            Ok(session) => session,
            Err(err) => {
                self.forget(&key, epoch);
                self.counters.inc_failed();
                warn!("watch on {key} has no session: {err}");
                return Err(err);
            }
        };

        if !self.is_current(&key, epoch) {
            debug!("watch on {key} was evicted while connecting; not starting it");
            return Err(PoolError::Evicted {
                key: key.to_string(),
            });
        }

        info!("starting upstream watch on {key}");
        let watch = session
            .watch_dir(&key.path, listeners.sink(), WatchOptions { recursive: true })
            .await;

        let subscription = match watch {
            Ok(subscription) => Arc::new(subscription),
            Err(source) => {
                self.forget(&key, epoch);
                self.counters.inc_failed();
                warn!("upstream watch on {key} failed: {source}");
                return Err(PoolError::Watch {
                    key: key.to_string(),
                    source,
                });
            }
        };

        let upstream = Upstream {
            subscription: Arc::clone(&subscription),
            pool_epoch,
        };
        pool_claim.disarm();

        let orphaned = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&key) {
                Some(entry) if entry.epoch == epoch => {
                    entry.upstream = Some(upstream);
                    None
                }
                _ => Some(upstream),
            }
        };

        if let Some(upstream) = orphaned {
            warn!("watch on {key} was evicted while starting; stopping it");
            self.teardown(&key, &upstream).await;
            return Err(PoolError::Evicted {
                key: key.to_string(),
            });
        }

        debug!("upstream watch on {key} running");
        Ok(subscription)
    }

    fn schedule_eviction(self: &Arc<Self>, key: WatchKey) -> PendingEviction {
        let inner = Arc::clone(self);
        PendingEviction::schedule(self.grace_period, move |token| async move {
            inner.evict_if_expired(&key, token).await;
        })
    }

    async fn evict_if_expired(&self, key: &WatchKey, token: u64) {
        let evicted = {
            let mut entries = self.entries.lock();
            let expired = entries
                .get(key)
                .is_some_and(|entry| entry.claims.expired(token));
            if expired { entries.remove(key) } else { None }
        };

        let Some(entry) = evicted else {
            return;
        };

        self.counters.inc_evicted();
        match entry.upstream {
            Some(upstream) => {
                info!("evicting idle watch on {key}");
                self.teardown(key, &upstream).await;
            }
            None => {
                // The setup task sees the entry gone and cleans up itself.
                info!("evicting watch on {key} before it started");
            }
        }
    }

    /// Stop first, then always hand the session claim back.
    async fn teardown(&self, key: &WatchKey, upstream: &Upstream<SubscriptionOf<C>>) {
        if let Err(err) = upstream.subscription.stop().await {
            self.counters.inc_teardown_failed();
            warn!("stopping watch on {key} failed: {err}");
        }
        self.pool.release_claim(&key.sandbox_id, upstream.pool_epoch);
    }

    fn is_current(&self, key: &WatchKey, epoch: u64) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.epoch == epoch)
    }

    fn forget(&self, key: &WatchKey, epoch: u64) {
        let mut entries = self.entries.lock();
        let current = entries.get(key).is_some_and(|entry| entry.epoch == epoch);
        if current {
            if let Some(mut entry) = entries.remove(key) {
                entry.claims.disarm();
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Trait impls -----------------------------------------------------------

impl<C> Clone for WatchRegistry<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for WatchRegistry<C>
where
    C: Connector,
    C::Session: SandboxSession,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("grace_period", &self.inner.grace_period)
            .field("entries", &self.len())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
