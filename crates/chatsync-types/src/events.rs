use std::fmt;

use serde::{Deserialize, Serialize};

/// Progress events emitted by a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SyncEvent {
    /// Session established, run starting
    RunStarted,

    /// A conversation was skipped from the list view without being opened
    ConversationSkipped { conversation: String, label: Option<String> },

    /// Traversal of a conversation started
    ConversationOpened { conversation: String, trusted_cursor: bool },

    /// One page of history was fetched
    PageFetched { conversation: String, page: u32, visible: usize },

    /// A record was appended to the store
    RecordAppended { conversation: String, message_id: String },

    /// A record was already stored or inside the covered range
    RecordSkipped { conversation: String, message_id: String, reason: String },

    /// Record persisted with a processing error for operator review
    RecordFlagged { conversation: String, message_id: String, error: String },

    /// Transport call failed, recovering
    Reconnecting { attempt: u32, max_attempts: u32, error: String },

    /// Traversal finished and the watermark was written
    ConversationCompleted {
        conversation: String,
        appended: usize,
        reached_start: bool,
        early_stop: bool,
    },

    /// Traversal aborted and the watermark marked incomplete
    ConversationFailed { conversation: String, error: String },

    /// All conversations handled
    RunFinished { conversations: usize, appended: usize },
}

impl SyncEvent {
    /// The conversation this event is scoped to, `None` for run-level events.
    pub fn conversation(&self) -> Option<&str> {
        match self {
            Self::ConversationSkipped { conversation, .. }
            | Self::ConversationOpened { conversation, .. }
            | Self::PageFetched { conversation, .. }
            | Self::RecordAppended { conversation, .. }
            | Self::RecordSkipped { conversation, .. }
            | Self::RecordFlagged { conversation, .. }
            | Self::ConversationCompleted { conversation, .. }
            | Self::ConversationFailed { conversation, .. } => Some(conversation),
            Self::RunStarted | Self::Reconnecting { .. } | Self::RunFinished { .. } => None,
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunStarted => write!(f, "run_started"),
            Self::ConversationSkipped { label, .. } => {
                write!(f, "conversation_skipped label={}", label.as_deref().unwrap_or("-"))
            }
            Self::ConversationOpened { trusted_cursor, .. } => {
                write!(f, "conversation_opened trusted_cursor={}", trusted_cursor)
            }
            Self::PageFetched { page, visible, .. } => {
                write!(f, "page_fetched page={} visible={}", page, visible)
            }
            Self::RecordAppended { message_id, .. } => {
                write!(f, "record_appended id={}", message_id)
            }
            Self::RecordSkipped { message_id, reason, .. } => {
                write!(f, "record_skipped id={} reason={}", message_id, reason)
            }
            Self::RecordFlagged { message_id, error, .. } => {
                write!(f, "record_flagged id={} error={}", message_id, error)
            }
            Self::Reconnecting { attempt, max_attempts, error } => {
                write!(f, "reconnecting attempt={}/{} error={}", attempt, max_attempts, error)
            }
            Self::ConversationCompleted { appended, reached_start, early_stop, .. } => write!(
                f,
                "conversation_completed appended={} reached_start={} early_stop={}",
                appended, reached_start, early_stop
            ),
            Self::ConversationFailed { error, .. } => {
                write!(f, "conversation_failed error={}", error)
            }
            Self::RunFinished { conversations, appended } => {
                write!(f, "run_finished conversations={} appended={}", conversations, appended)
            }
        }
    }
}
