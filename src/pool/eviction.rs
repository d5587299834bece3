use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{task::AbortHandle, time::sleep};

// -----------------------------------------------------------------------------
// ----- Globals ---------------------------------------------------------------

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

// -----------------------------------------------------------------------------
// ----- PendingEviction -------------------------------------------------------

/// A scheduled teardown. The token lets the fired callback prove it is still
/// the entry's current timer before it touches anything.
#[derive(Debug)]
pub(crate) struct PendingEviction {
    token: u64,
    abort: AbortHandle,
}

impl PendingEviction {
    /// Spawns a task that sleeps for `grace` and then runs `fire(token)`.
    /// Must be called from within a Tokio runtime.
    pub(crate) fn schedule<F, Fut>(grace: Duration, fire: F) -> Self
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(async move {
            sleep(grace).await;
            fire(token).await;
        });

        Self {
            token,
            abort: task.abort_handle(),
        }
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    /// Idempotent. A timer that already woke up is stopped at its next
    /// suspension point, and the token check covers the window before that.
    pub(crate) fn cancel(self) {
        self.abort.abort();
    }
}

// -----------------------------------------------------------------------------
// ----- Claims ----------------------------------------------------------------

/// Reference count plus the pending eviction timer for one registry entry.
/// Only ever touched while the owning registry's map lock is held.
#[derive(Debug)]
pub(crate) struct Claims {
    ref_count: usize,
    pending: Option<PendingEviction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    /// Other holders remain.
    StillHeld,
    /// This release dropped the count to zero; arm the grace timer.
    NowIdle,
    /// Count was already zero. Nothing changes.
    OverReleased,
}

impl Claims {
    pub(crate) fn first() -> Self {
        Self {
            ref_count: 1,
            pending: None,
        }
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count
    }

    #[cfg(test)]
    pub(crate) fn is_pending_eviction(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn claim(&mut self) {
        self.ref_count += 1;
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
    }

    pub(crate) fn release(&mut self) -> Released {
        match self.ref_count {
            0 => Released::OverReleased,
            1 => {
                self.ref_count = 0;
                Released::NowIdle
            }
            _ => {
                self.ref_count -= 1;
                Released::StillHeld
            }
        }
    }

    pub(crate) fn arm(&mut self, pending: PendingEviction) {
        if let Some(previous) = self.pending.replace(pending) {
            previous.cancel();
        }
    }

    /// True only if the count is zero and `token` is still the armed timer.
    pub(crate) fn expired(&self, token: u64) -> bool {
        self.ref_count == 0 && self.pending.as_ref().map(PendingEviction::token) == Some(token)
    }

    pub(crate) fn disarm(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
