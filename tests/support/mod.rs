use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::time::sleep;

use sbxpool::{
    Closable, ConnectOptions, Connector, Listener, PoolConfig, Pools, RemoteError,
    SandboxSession, Subscription, WatchEvent,
    remote::{DirEntry, EntryKind, EventSink, WatchOptions},
};

// -----------------------------------------------------------------------------
// ----- FakeRemote ------------------------------------------------------------

/// In-process stand-in for the remote sandbox API. Counts every upstream call
/// and can be told to fail the next N of each.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    watches: AtomicUsize,
    stops: AtomicUsize,

    fail_connects: AtomicUsize,
    fail_watches: AtomicUsize,
    fail_closes: AtomicBool,
    fail_stops: AtomicBool,
    panic_connects: AtomicBool,
    panic_watches: AtomicBool,

    connect_delay: Mutex<Duration>,
    close_delay: Mutex<Duration>,
    stop_delay: Mutex<Duration>,
    last_api_key: Mutex<Option<String>>,
    watchers: Mutex<Vec<Watcher>>,
}

struct Watcher {
    sandbox_id: String,
    path: String,
    recursive: bool,
    sink: EventSink,
    stopped: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.state.connect_delay.lock() = delay;
        self
    }

    pub fn with_close_delay(self, delay: Duration) -> Self {
        *self.state.close_delay.lock() = delay;
        self
    }

    pub fn with_stop_delay(self, delay: Duration) -> Self {
        *self.state.stop_delay.lock() = delay;
        self
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn watches(&self) -> usize {
        self.state.watches.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.state.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_watches(&self, n: usize) {
        self.state.fail_watches.store(n, Ordering::SeqCst);
    }

    pub fn fail_closes(&self, fail: bool) {
        self.state.fail_closes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stops(&self, fail: bool) {
        self.state.fail_stops.store(fail, Ordering::SeqCst);
    }

    /// The next connect panics once its delay has passed.
    pub fn panic_next_connect(&self) {
        self.state.panic_connects.store(true, Ordering::SeqCst);
    }

    pub fn panic_next_watch(&self) {
        self.state.panic_watches.store(true, Ordering::SeqCst);
    }

    pub fn last_api_key(&self) -> Option<String> {
        self.state.last_api_key.lock().clone()
    }

    pub fn watched_recursively(&self) -> bool {
        let watchers = self.state.watchers.lock();
        !watchers.is_empty() && watchers.iter().all(|w| w.recursive)
    }

    /// Pushes `event` into every running upstream watch of (sandbox, path).
    /// Returns how many upstream watches received it.
    pub fn emit(&self, sandbox_id: &str, path: &str, event: WatchEvent) -> usize {
        let sinks: Vec<EventSink> = self
            .state
            .watchers
            .lock()
            .iter()
            .filter(|w| {
                w.sandbox_id == sandbox_id && w.path == path && !w.stopped.load(Ordering::SeqCst)
            })
            .map(|w| Arc::clone(&w.sink))
            .collect();

        for sink in &sinks {
            sink(event.clone());
        }
        sinks.len()
    }
}

async fn pause(delay: &Mutex<Duration>) {
    let delay = *delay.lock();
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Connector for FakeRemote {
    type Session = FakeSession;

    async fn connect(
        &self,
        sandbox_id: &str,
        opts: &ConnectOptions,
    ) -> Result<FakeSession, RemoteError> {
        let serial = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.last_api_key.lock() = Some(opts.api_key_exposed().to_string());

        pause(&self.state.connect_delay).await;

        if self.state.panic_connects.swap(false, Ordering::SeqCst) {
            panic!("connector crashed for {sandbox_id}");
        }
        if take_failure(&self.state.fail_connects) {
            return Err(RemoteError::remote(format!("connect {sandbox_id} refused")));
        }

        Ok(FakeSession {
            sandbox_id: sandbox_id.to_string(),
            serial,
            state: Arc::clone(&self.state),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- FakeSession -----------------------------------------------------------

pub struct FakeSession {
    pub sandbox_id: String,
    /// Which connect produced this session, starting at 1.
    pub serial: usize,
    state: Arc<FakeState>,
}

impl fmt::Debug for FakeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeSession")
            .field("sandbox_id", &self.sandbox_id)
            .field("serial", &self.serial)
            .finish()
    }
}

#[async_trait]
impl Closable for FakeSession {
    async fn close(&self) -> Result<(), RemoteError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        pause(&self.state.close_delay).await;
        if self.state.fail_closes.load(Ordering::SeqCst) {
            return Err(RemoteError::remote("close refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxSession for FakeSession {
    type Subscription = FakeSubscription;

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError> {
        Ok(vec![DirEntry {
            name: "README.md".into(),
            path: format!("{}/README.md", path.trim_end_matches('/')),
            kind: EntryKind::File,
        }])
    }

    async fn watch_dir(
        &self,
        path: &str,
        on_event: EventSink,
        opts: WatchOptions,
    ) -> Result<FakeSubscription, RemoteError> {
        self.state.watches.fetch_add(1, Ordering::SeqCst);

        if self.state.panic_watches.swap(false, Ordering::SeqCst) {
            panic!("watch crashed for {path}");
        }

        if take_failure(&self.state.fail_watches) {
            return Err(RemoteError::remote(format!("watch {path} refused")));
        }

        let stopped = Arc::new(AtomicBool::new(false));
        self.state.watchers.lock().push(Watcher {
            sandbox_id: self.sandbox_id.clone(),
            path: path.to_string(),
            recursive: opts.recursive,
            sink: on_event,
            stopped: Arc::clone(&stopped),
        });

        Ok(FakeSubscription {
            stopped,
            state: Arc::clone(&self.state),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- FakeSubscription ------------------------------------------------------

pub struct FakeSubscription {
    stopped: Arc<AtomicBool>,
    state: Arc<FakeState>,
}

impl fmt::Debug for FakeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeSubscription")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl FakeSubscription {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subscription for FakeSubscription {
    async fn stop(&self) -> Result<(), RemoteError> {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        pause(&self.state.stop_delay).await;
        if self.state.fail_stops.load(Ordering::SeqCst) {
            return Err(RemoteError::remote("stop refused"));
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

#[allow(dead_code)]
pub fn opts() -> ConnectOptions {
    ConnectOptions::new("sk-test")
}

#[allow(dead_code)]
pub fn pools(remote: &FakeRemote) -> Pools<FakeRemote> {
    Pools::new(remote.clone(), &PoolConfig::default())
}

#[allow(dead_code)]
pub fn recording_listener() -> (Listener, Arc<Mutex<Vec<WatchEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = Listener::new(move |event: &WatchEvent| sink.lock().push(event.clone()));
    (listener, seen)
}

/// Lets spawned setup and teardown tasks run to their next suspension point.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
