use async_trait::async_trait;

use crate::errors::RemoteError;

use super::{
    events::{DirEntry, EventSink},
    options::{ConnectOptions, WatchOptions},
};

// -----------------------------------------------------------------------------
// ----- Closable --------------------------------------------------------------

/// Teardown capability every pooled session handle provides.
#[async_trait]
pub trait Closable: Send + Sync + 'static {
    /// Best-effort teardown. The pool logs failures and moves on.
    async fn close(&self) -> Result<(), RemoteError>;
}

// -----------------------------------------------------------------------------
// ----- Connector -------------------------------------------------------------

/// Opens sessions against the remote sandbox service.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Closable;

    async fn connect(
        &self,
        sandbox_id: &str,
        opts: &ConnectOptions,
    ) -> Result<Self::Session, RemoteError>;
}

// -----------------------------------------------------------------------------
// ----- SandboxSession --------------------------------------------------------

/// Filesystem operations on a connected sandbox.
#[async_trait]
pub trait SandboxSession: Closable {
    type Subscription: Subscription;

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError>;

    /// Starts an upstream directory watch. `on_event` is invoked once per
    /// event for as long as the returned subscription is running.
    async fn watch_dir(
        &self,
        path: &str,
        on_event: EventSink,
        opts: WatchOptions,
    ) -> Result<Self::Subscription, RemoteError>;
}

// -----------------------------------------------------------------------------
// ----- Subscription ----------------------------------------------------------

#[async_trait]
pub trait Subscription: Send + Sync + 'static {
    async fn stop(&self) -> Result<(), RemoteError>;
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
