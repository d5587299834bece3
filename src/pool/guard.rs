// -----------------------------------------------------------------------------
// ----- Cleanup ---------------------------------------------------------------

/// Runs its callback when dropped unless disarmed first. Setup tasks hold one
/// so a panic or an aborted task still cleans up after itself.
pub(crate) struct Cleanup<F: FnOnce()> {
    run: Option<F>,
}

impl<F: FnOnce()> Cleanup<F> {
    pub(crate) fn new(run: F) -> Self {
        Self { run: Some(run) }
    }

    pub(crate) fn disarm(mut self) {
        self.run = None;
    }
}

impl<F: FnOnce()> Drop for Cleanup<F> {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
