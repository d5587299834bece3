use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

// -----------------------------------------------------------------------------
// ----- Counters --------------------------------------------------------------

/// Lifetime counters for one registry. Relaxed ordering; these are reporting
/// numbers, nothing synchronizes on them.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    started: AtomicU64,
    reused: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
    teardown_failed: AtomicU64,
}

impl Counters {
    pub(crate) fn inc_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_teardown_failed(&self) {
        self.teardown_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            started: self.started.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            teardown_failed: self.teardown_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Upstream connects (pool) or watches (registry) started.
    pub started: u64,
    /// Acquires served by an existing entry.
    pub reused: u64,
    pub failed: u64,
    pub evicted: u64,
    pub teardown_failed: u64,
}

// -----------------------------------------------------------------------------
// ----- EntryStats ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Connect or subscribe still in flight.
    SettingUp,
    /// Resolved and held by at least one caller.
    Active,
    /// Resolved, unreferenced, waiting out the grace period.
    Idle,
}

impl EntryState {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryState::SettingUp => "setting_up",
            EntryState::Active => "active",
            EntryState::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStats {
    pub key: String,
    pub state: EntryState,
    pub ref_count: usize,
    /// Always 0 for connection pool rows.
    pub listeners: usize,
}

// -----------------------------------------------------------------------------
// ----- PoolStats -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub name: &'static str,
    pub entries: usize,
    pub setting_up: usize,
    pub active: usize,
    pub idle: usize,
    pub references: usize,
    pub listeners: usize,
    pub counters: CounterSnapshot,
}

impl PoolStats {
    pub(crate) fn from_rows(
        name: &'static str,
        rows: &[EntryStats],
        counters: CounterSnapshot,
    ) -> Self {
        let count = |state| rows.iter().filter(|r| r.state == state).count();

        Self {
            name,
            entries: rows.len(),
            setting_up: count(EntryState::SettingUp),
            active: count(EntryState::Active),
            idle: count(EntryState::Idle),
            references: rows.iter().map(|r| r.ref_count).sum(),
            listeners: rows.iter().map(|r| r.listeners).sum(),
            counters,
        }
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.name;
        writeln!(f, "{n}.entries={}", self.entries)?;
        writeln!(f, "{n}.setting_up={}", self.setting_up)?;
        writeln!(f, "{n}.active={}", self.active)?;
        writeln!(f, "{n}.idle={}", self.idle)?;
        writeln!(f, "{n}.references={}", self.references)?;
        writeln!(f, "{n}.listeners={}", self.listeners)?;
        writeln!(f, "{n}.started={}", self.counters.started)?;
        writeln!(f, "{n}.reused={}", self.counters.reused)?;
        writeln!(f, "{n}.failed={}", self.counters.failed)?;
        writeln!(f, "{n}.evicted={}", self.counters.evicted)?;
        write!(f, "{n}.teardown_failed={}", self.counters.teardown_failed)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
