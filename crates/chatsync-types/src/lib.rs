//! Shared domain types for chatsync: conversations, sync cursors, records
//! and the rows handed to reporting tools.

pub mod events;
pub mod models;
pub mod report;

pub use events::SyncEvent;
pub use models::{
    Attachment, AttachmentKind, Conversation, ConversationEntry, PersistedRecord, QuotedRef,
    Record, Watermark,
};
pub use report::{ConversationStatus, ExportRow};
