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
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::errors::{PoolError, RemoteError};
use crate::remote::{Closable, ConnectOptions, Connector};

use super::{
    eviction::{Claims, PendingEviction, Released},
    guard::Cleanup,
    lease::{SessionClaim, SessionLease},
    stats::{Counters, EntryState, EntryStats, PoolStats},
};

// -----------------------------------------------------------------------------
// ----- Types -----------------------------------------------------------------

type ConnectResult<S> = Result<Arc<S>, PoolError>;
pub(crate) type SharedConnect<S> = Shared<BoxFuture<'static, ConnectResult<S>>>;

// -----------------------------------------------------------------------------
// ----- ConnectionPool --------------------------------------------------------

/// Keyed, reference-counted cache of remote sandbox sessions.
///
/// Every concurrent `acquire` for the same key awaits the same connect. Once
/// the last holder releases, the session stays pooled for the grace period
/// and is closed only if nobody reacquires it in that window.
///
/// Cloning is cheap and every clone shares the same pool.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

struct PoolInner<C: Connector> {
    connector: C,
    grace_period: Duration,
    connect_timeout: Option<Duration>,
    entries: Mutex<HashMap<String, PoolEntry<C::Session>>>,
    epochs: AtomicU64,
    counters: Counters,
}

struct PoolEntry<S> {
    // Distinguishes this entry from any later one created under the same key.
    epoch: u64,
    connect: SharedConnect<S>,
    handle: Option<Arc<S>>,
    claims: Claims,
}

impl<S> PoolEntry<S> {
    fn state(&self) -> EntryState {
        match (&self.handle, self.claims.ref_count()) {
            (None, _) => EntryState::SettingUp,
            (Some(_), 0) => EntryState::Idle,
            (Some(_), _) => EntryState::Active,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Static ------------------------------------------------

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, config: &PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                grace_period: config.grace_period,
                connect_timeout: config.connect_timeout,
                entries: Mutex::new(HashMap::new()),
                epochs: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Public ------------------------------------------------

impl<C: Connector> ConnectionPool<C> {
    /// Returns the shared session for `key`, connecting if nothing is pooled.
    ///
    /// Every successful call must be paired with one `release`. A failed call
    /// holds nothing and must not be released, and neither does a call whose
    /// future was dropped before it resolved.
    pub async fn acquire(
        &self,
        key: &str,
        opts: &ConnectOptions,
    ) -> Result<Arc<C::Session>, PoolError> {
        let (epoch, connect) = self.claim(key, opts);
        let claim = SessionClaim::new(self.clone(), key, epoch);
        let session = connect.await?;
        claim.keep();
        Ok(session)
    }

    /// Like `acquire`, but the claim is released when the lease is dropped,
    /// including when the returned future is dropped before it resolves.
    pub async fn lease(
        &self,
        key: &str,
        opts: &ConnectOptions,
    ) -> Result<SessionLease<C>, PoolError> {
        let (epoch, connect) = self.claim(key, opts);
        let claim = SessionClaim::new(self.clone(), key, epoch);
        let session = connect.await?;
        Ok(SessionLease::new(session, claim))
    }

    /// Gives back one claim on `key`. Extra releases are ignored.
    ///
    /// Never suspends, but may schedule the eviction timer, so it has to run
    /// inside a Tokio runtime.
    pub fn release(&self, key: &str) {
        self.release_matching(key, None);
    }

    /// Closes every pooled session right away, whatever its reference count.
    /// Connects still in flight close their session when they land.
    ///
    /// A `WatchRegistry` layered on this pool must be shut down first, or its
    /// live watches keep pointing at closed sessions. `Pools::shutdown` does
    /// both in that order.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.inner.entries.lock().drain().collect();
        if drained.is_empty() {
            return;
        }

        info!("shutting down connection pool: closing {} sessions", drained.len());

        let closes = drained.into_iter().map(|(key, mut entry)| async move {
            entry.claims.disarm();
            if let Some(session) = entry.handle.take() {
                self.inner.close_quietly(&key, &session).await;
            }
        });
        join_all(closes).await;
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    pub fn ref_count(&self, key: &str) -> Option<usize> {
        self.inner
            .entries
            .lock()
            .get(key)
            .map(|entry| entry.claims.ref_count())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One row per pooled key, sorted by key.
    pub fn snapshot(&self) -> Vec<EntryStats> {
        let mut rows: Vec<EntryStats> = {
            let entries = self.inner.entries.lock();
            entries
                .iter()
                .map(|(key, entry)| EntryStats {
                    key: key.clone(),
                    state: entry.state(),
                    ref_count: entry.claims.ref_count(),
                    listeners: 0,
                })
                .collect()
        };
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::from_rows(
            "connections",
            &self.snapshot(),
            self.inner.counters.snapshot(),
        )
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Crate -------------------------------------------------

impl<C: Connector> ConnectionPool<C> {
    /// Takes one claim on `key` and hands back the entry's epoch and shared
    /// connect. Runs entirely under the map lock, so the first caller for a
    /// key inserts the entry before anyone else can look for it.
    pub(crate) fn claim(
        &self,
        key: &str,
        opts: &ConnectOptions,
    ) -> (u64, SharedConnect<C::Session>) {
        let mut entries = self.inner.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            entry.claims.claim();
            self.inner.counters.inc_reused();
            debug!(
                "reusing session for sandbox {key} (refs={})",
                entry.claims.ref_count()
            );
            return (entry.epoch, entry.connect.clone());
        }

        let epoch = self.inner.epochs.fetch_add(1, Ordering::Relaxed);
        let connect = self.inner.start_connect(key.to_string(), opts.clone(), epoch);

        entries.insert(
            key.to_string(),
            PoolEntry {
                epoch,
                connect: connect.clone(),
                handle: None,
                claims: Claims::first(),
            },
        );

        (epoch, connect)
    }

    /// Release that only applies to the entry generation it was claimed from.
    pub(crate) fn release_claim(&self, key: &str, epoch: u64) {
        self.release_matching(key, Some(epoch));
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Private -----------------------------------------------

impl<C: Connector> ConnectionPool<C> {
    fn release_matching(&self, key: &str, epoch: Option<u64>) {
        let mut entries = self.inner.entries.lock();

        let Some(entry) = entries.get_mut(key) else {
            debug!("release for sandbox {key} with nothing pooled; ignoring");
            return;
        };

        if epoch.is_some_and(|epoch| epoch != entry.epoch) {
            debug!("release for a previous session of sandbox {key}; ignoring");
            return;
        }

        match entry.claims.release() {
            Released::StillHeld => {
                debug!(
                    "released session for sandbox {key} (refs={})",
                    entry.claims.ref_count()
                );
            }
            Released::OverReleased => {
                debug!("over-release for sandbox {key}; refs already 0");
            }
            Released::NowIdle => {
                debug!(
                    "session for sandbox {key} idle; evicting in {:?} unless reacquired",
                    self.inner.grace_period
                );
                entry
                    .claims
                    .arm(self.inner.schedule_eviction(key.to_string()));
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- PoolInner -------------------------------------------------------------

impl<C: Connector> PoolInner<C> {
    fn start_connect(
        self: &Arc<Self>,
        key: String,
        opts: ConnectOptions,
        epoch: u64,
    ) -> SharedConnect<C::Session> {
        self.counters.inc_started();

        let inner = Arc::clone(self);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let abandoned = Cleanup::new({
                let inner = Arc::clone(&inner);
                let key = task_key.clone();
                move || {
                    warn!("connect task for sandbox {key} did not finish; dropping its entry");
                    inner.forget(&key, epoch);
                }
            });
            let result = inner.connect_and_settle(task_key, opts, epoch).await;
            abandoned.disarm();
            result
        });

        async move {
            task.await.unwrap_or_else(|err| {
                Err(PoolError::Aborted {
                    key,
                    reason: err.to_string(),
                })
            })
        }
        .boxed()
        .shared()
    }

    async fn connect_and_settle(
        self: Arc<Self>,
        key: String,
        opts: ConnectOptions,
        epoch: u64,
    ) -> ConnectResult<C::Session> {
        info!("connecting to sandbox {key}");

        let session = match self.connect_remote(&key, &opts).await {
            Ok(session) => Arc::new(session),
            Err(source) => {
                // Evict now so the next acquire retries instead of replaying this.
                self.forget(&key, epoch);
                self.counters.inc_failed();
                warn!("connect to sandbox {key} failed: {source}");
                return Err(PoolError::Connect { key, source });
            }
        };

        let stored = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&key) {
                Some(entry) if entry.epoch == epoch => {
                    entry.handle = Some(Arc::clone(&session));
                    true
                }
                _ => false,
            }
        };

        if !stored {
            warn!("sandbox {key} was evicted while connecting; closing orphaned session");
            self.close_quietly(&key, &session).await;
            return Err(PoolError::Evicted { key });
        }

        debug!("connected to sandbox {key}");
        Ok(session)
    }

    async fn connect_remote(
        &self,
        key: &str,
        opts: &ConnectOptions,
    ) -> Result<C::Session, RemoteError> {
        let connect = self.connector.connect(key, opts);
        match self.connect_timeout {
            Some(limit) => timeout(limit, connect)
                .await
                .unwrap_or(Err(RemoteError::Timeout(limit))),
            None => connect.await,
        }
    }

    fn schedule_eviction(self: &Arc<Self>, key: String) -> PendingEviction {
        let inner = Arc::clone(self);
        PendingEviction::schedule(self.grace_period, move |token| async move {
            inner.evict_if_expired(&key, token).await;
        })
    }

    async fn evict_if_expired(&self, key: &str, token: u64) {
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
        match entry.handle {
            Some(session) => {
                info!("evicting idle session for sandbox {key}");
                self.close_quietly(key, &session).await;
            }
            None => {
                info!("evicting sandbox {key} before its connect settled");
            }
        }
    }

    fn forget(&self, key: &str, epoch: u64) {
        let mut entries = self.entries.lock();
        let current = entries.get(key).is_some_and(|entry| entry.epoch == epoch);
        if current {
            if let Some(mut entry) = entries.remove(key) {
                entry.claims.disarm();
            }
        }
    }

    async fn close_quietly(&self, key: &str, session: &C::Session) {
        if let Err(err) = session.close().await {
            self.counters.inc_teardown_failed();
            warn!("closing session for sandbox {key} failed: {err}");
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Trait impls -----------------------------------------------------------

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("grace_period", &self.inner.grace_period)
            .field("connect_timeout", &self.inner.connect_timeout)
            .field("entries", &self.len())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
