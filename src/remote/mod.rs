// Boundary with the remote sandbox API; the pool only sees these traits.
pub mod events;
pub mod options;
pub mod session;

pub use events::{DirEntry, EntryKind, EventSink, WatchEvent, WatchEventKind};
pub use options::{ConnectOptions, WatchOptions};
pub use session::{Closable, Connector, SandboxSession, Subscription};
