//! Contracts the engine consumes from the automation layer.
//!
//! Each call is synchronous and may block for as long as the remote page
//! needs. Only [`TransportError`]s cross these boundaries; content problems
//! are reported inside the returned [`Record`].

use std::time::Duration;

use chatsync_types::{ConversationEntry, Record};

use crate::error::TransportError;

/// Read access to the remote client's currently rendered view.
pub trait PageAccessor {
    /// Raw, not yet normalized record as the page exposes it.
    type View;

    /// Conversation list rows currently materialized, top to bottom.
    fn list_conversations(&mut self) -> Result<Vec<ConversationEntry>, TransportError>;

    /// Scroll the conversation list. Returns `false` when nothing new appeared.
    fn request_more_conversations(&mut self) -> Result<bool, TransportError>;

    /// Make `id` the active conversation. Invalidates the previous one.
    fn open_conversation(&mut self, id: &str) -> Result<(), TransportError>;

    /// Every record currently materialized in the active conversation,
    /// newest first. Grows as older history is requested.
    fn visible_records(&mut self) -> Result<Vec<Self::View>, TransportError>;

    /// Ask for one more page of older history, waiting at most `timeout`.
    /// Returns `true` when more records were loaded.
    fn request_older_history(&mut self, timeout: Duration) -> Result<bool, TransportError>;

    /// The view shows the start of the conversation history.
    fn reached_history_start(&mut self) -> Result<bool, TransportError>;
}

/// Lifecycle of the remote session behind a [`PageAccessor`].
pub trait SessionLifecycle {
    fn establish_session(&mut self) -> Result<(), TransportError>;

    fn teardown_session(&mut self) -> Result<(), TransportError>;

    fn reestablish_session(&mut self) -> Result<(), TransportError> {
        self.establish_session()
    }
}

/// Turns raw views into records.
///
/// `normalize` must be cheap: it yields the fields identity is built from
/// (timestamp, sender, direction, text, attachment metadata) and runs for
/// every visible record. `extract` runs only for records about to be
/// persisted and may do the expensive work (OCR, transcription, document
/// parsing). Neither may fail; problems go into `processing_error`.
pub trait ContentExtractor<V> {
    fn normalize(&self, view: &V) -> Record;

    fn extract(&self, _view: &V, record: Record) -> Record {
        record
    }
}
