use std::sync::Arc;

// -----------------------------------------------------------------------------
// ----- WatchEvent ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

impl WatchEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchEventKind::Create => "create",
            WatchEventKind::Write => "write",
            WatchEventKind::Remove => "remove",
            WatchEventKind::Rename => "rename",
            WatchEventKind::Chmod => "chmod",
        }
    }
}

/// One filesystem change reported by an upstream watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: String,
}

impl WatchEvent {
    pub fn new(kind: WatchEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Callback handed to the upstream watch call.
pub type EventSink = Arc<dyn Fn(WatchEvent) + Send + Sync>;

// -----------------------------------------------------------------------------
// ----- DirEntry --------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
