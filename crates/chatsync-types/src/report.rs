use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Attachment, QuotedRef};

// -- Export --

/// One persisted record as handed to reporting tools.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRow {
    pub message_id: String,
    pub conversation_id: String,
    pub timestamp_utc: Option<DateTime<Utc>>,
    pub sender: Option<String>,
    pub is_outbound: bool,
    pub body_text: Option<String>,
    pub attachment: Option<Attachment>,
    pub quoted: Option<QuotedRef>,
    pub processing_error: Option<String>,
    pub persisted_at: DateTime<Utc>,
}

// -- Status --

/// A conversation together with its sync cursor, for status listings.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStatus {
    pub external_id: String,
    pub display_name: String,
    pub record_count: u64,
    pub last_message_timestamp: Option<DateTime<Utc>>,
    pub first_known_message_timestamp: Option<DateTime<Utc>>,
    pub reached_conversation_start: bool,
    pub is_complete: bool,
    pub had_transient_error: bool,
    pub received_receipt: bool,
}
