//! Incremental synchronization of conversations from a remote messaging
//! client into a local append-only store.
//!
//! The engine never renders pages or decodes content itself. It walks what a
//! [`PageAccessor`] exposes, decides per record whether it is new, hands new
//! records to a [`ContentExtractor`] and persists them with a per-conversation
//! [`Watermark`](chatsync_types::Watermark) so the next run only has to look
//! at what changed.

pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod normalize;
pub mod orchestrator;
pub mod receipt;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod traversal;

pub use cancel::CancelToken;
pub use collaborators::{ContentExtractor, PageAccessor, SessionLifecycle};
pub use config::SyncConfig;
pub use error::{IdentityError, SyncError, TransportError};
pub use fingerprint::{MessageId, fingerprint};
pub use logging::{MemoryLogger, NullLogger, SyncLogger, TracingLogger};
pub use orchestrator::{RunReport, SyncEngine};
pub use session::Session;
pub use store::{StorageProbe, SyncStore, WatermarkStore};
pub use supervisor::{ReconnectPolicy, execute_with_recovery};
pub use traversal::{BackfillTraversal, Termination, TraversalOptions, TraversalOutcome};
