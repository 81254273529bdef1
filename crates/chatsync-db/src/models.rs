/// Database row types — these map directly to SQLite rows.
/// Conversion into chatsync-types models happens here so the query layer
/// only deals with columns.
use anyhow::{Context, Result};
use chatsync_types::{Conversation, ExportRow, Watermark};
use chrono::{DateTime, SecondsFormat, Utc};

pub struct ConversationRow {
    pub external_id: String,
    pub display_name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversationRow {
    pub fn into_model(self) -> Result<Conversation> {
        Ok(Conversation {
            external_id: self.external_id,
            display_name: self.display_name,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct WatermarkRow {
    pub conversation_id: String,
    pub last_message_id: Option<String>,
    pub last_message_timestamp: Option<String>,
    pub first_known_message_id: Option<String>,
    pub first_known_message_timestamp: Option<String>,
    pub reached_conversation_start: bool,
    pub is_complete: bool,
    pub had_transient_error: bool,
    pub received_receipt: bool,
    pub received_receipt_timestamp: Option<String>,
    pub updated_at: String,
}

impl WatermarkRow {
    pub fn into_model(self) -> Result<Watermark> {
        Ok(Watermark {
            last_message_id: self.last_message_id,
            last_message_timestamp: parse_opt_ts(self.last_message_timestamp.as_deref())?,
            first_known_message_id: self.first_known_message_id,
            first_known_message_timestamp: parse_opt_ts(
                self.first_known_message_timestamp.as_deref(),
            )?,
            reached_conversation_start: self.reached_conversation_start,
            is_complete: self.is_complete,
            had_transient_error: self.had_transient_error,
            received_receipt: self.received_receipt,
            received_receipt_timestamp: parse_opt_ts(self.received_receipt_timestamp.as_deref())?,
            updated_at: Some(parse_ts(&self.updated_at)?),
        })
    }
}

pub struct RecordRow {
    pub message_id: String,
    pub conversation_id: String,
    pub timestamp_utc: Option<String>,
    pub sender: Option<String>,
    pub is_outbound: bool,
    pub body_text: Option<String>,
    pub attachment: Option<String>,
    pub quoted: Option<String>,
    pub processing_error: Option<String>,
    pub persisted_at: String,
}

impl RecordRow {
    pub fn into_export(self) -> Result<ExportRow> {
        let attachment = match self.attachment.as_deref() {
            Some(json) => Some(
                serde_json::from_str(json)
                    .with_context(|| format!("bad attachment json on {}", self.message_id))?,
            ),
            None => None,
        };
        let quoted = match self.quoted.as_deref() {
            Some(json) => Some(
                serde_json::from_str(json)
                    .with_context(|| format!("bad quoted json on {}", self.message_id))?,
            ),
            None => None,
        };

        Ok(ExportRow {
            timestamp_utc: parse_opt_ts(self.timestamp_utc.as_deref())?,
            persisted_at: parse_ts(&self.persisted_at)?,
            message_id: self.message_id,
            conversation_id: self.conversation_id,
            sender: self.sender,
            is_outbound: self.is_outbound,
            body_text: self.body_text,
            attachment,
            quoted,
            processing_error: self.processing_error,
        })
    }
}

/// Timestamps are stored as RFC 3339 UTC with second precision so that
/// lexical order matches chronological order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(s).with_context(|| format!("bad timestamp {:?}", s))?;
    Ok(ts.with_timezone(&Utc))
}

fn parse_opt_ts(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}
