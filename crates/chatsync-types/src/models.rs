use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote chat thread. `external_id` (e.g. a phone number) is the only
/// stable key; `display_name` can change or collide between threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub external_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// One row of the remote conversation list as the page shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: String,
    pub display_name: String,
    /// Free-form "last activity" label: `14:32`, `Yesterday`, `Tuesday`, `05/03/2024`.
    pub last_activity_label: Option<String>,
}

/// Durable per-conversation sync cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub last_message_id: Option<String>,
    pub last_message_timestamp: Option<DateTime<Utc>>,
    pub first_known_message_id: Option<String>,
    pub first_known_message_timestamp: Option<DateTime<Utc>>,
    pub reached_conversation_start: bool,
    /// The last pass finished without an unrecoverable error.
    pub is_complete: bool,
    pub had_transient_error: bool,
    pub received_receipt: bool,
    pub received_receipt_timestamp: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Watermark {
    /// Only a trusted cursor may be used for skip decisions. Anything else
    /// has to be re-verified against the remote history.
    pub fn is_trusted(&self) -> bool {
        self.is_complete && !self.had_transient_error
    }

    /// Advance `last_message*` if `timestamp` is not older than the current one.
    pub fn advance_last(&mut self, message_id: &str, timestamp: DateTime<Utc>) {
        let newer = match self.last_message_timestamp {
            Some(current) => timestamp >= current,
            None => true,
        };
        if newer {
            self.last_message_id = Some(message_id.to_string());
            self.last_message_timestamp = Some(timestamp);
        }
    }

    /// Move `first_known_message*` further back. Never moves forward.
    pub fn extend_first(&mut self, message_id: &str, timestamp: DateTime<Utc>) {
        let older = match self.first_known_message_timestamp {
            Some(current) => timestamp < current,
            None => true,
        };
        if older {
            self.first_known_message_id = Some(message_id.to_string());
            self.first_known_message_timestamp = Some(timestamp);
        }
    }

    pub fn note_receipt(&mut self, timestamp: Option<DateTime<Utc>>) {
        self.received_receipt = true;
        if let Some(ts) = timestamp {
            if self.received_receipt_timestamp.is_none_or(|current| ts > current) {
                self.received_receipt_timestamp = Some(ts);
            }
        }
    }
}

/// Attachment payload, one variant per kind. A record without an
/// attachment carries `None` instead of a fourth variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    Image {
        size_bytes: Option<u64>,
        file_path: Option<String>,
        content: Option<String>,
        #[serde(default)]
        is_receipt: bool,
    },
    Document {
        name: Option<String>,
        size_label: Option<String>,
        file_type: Option<String>,
        content: Option<String>,
        #[serde(default)]
        is_receipt: bool,
    },
    Audio {
        duration_label: Option<String>,
        transcription: Option<String>,
    },
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Self::Image { .. } => AttachmentKind::Image,
            Self::Document { .. } => AttachmentKind::Document,
            Self::Audio { .. } => AttachmentKind::Audio,
        }
    }

    pub fn is_receipt(&self) -> bool {
        match self {
            Self::Image { is_receipt, .. } | Self::Document { is_receipt, .. } => *is_receipt,
            Self::Audio { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Document,
    Audio,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Audio => "audio",
        }
    }
}

/// Sender and text of a quoted message. Informational only, never resolved
/// to another stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedRef {
    pub sender: String,
    pub text: String,
}

/// One normalized message or attachment event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp_utc: Option<DateTime<Utc>>,
    pub sender: Option<String>,
    pub is_outbound: bool,
    pub body_text: Option<String>,
    pub attachment: Option<Attachment>,
    pub quoted: Option<QuotedRef>,
    pub processing_error: Option<String>,
}

impl Record {
    /// Body text with surrounding whitespace removed, `None` when blank.
    pub fn text(&self) -> Option<&str> {
        self.body_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Outbound when the sender is the account owner.
    pub fn derive_outbound(&mut self, account_name: &str) {
        self.is_outbound = self.sender.as_deref() == Some(account_name);
    }

    /// Append to `processing_error` instead of overwriting an earlier one.
    pub fn push_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.processing_error = Some(match self.processing_error.take() {
            Some(existing) => format!("{}; {}", existing, error),
            None => error,
        });
    }
}

/// A record as stored: append-only, unique on `message_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub message_id: String,
    pub conversation_id: String,
    pub record: Record,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, minute, 0).unwrap()
    }

    #[test]
    fn advance_last_never_regresses() {
        let mut wm = Watermark::default();
        wm.advance_last("b", at(10));
        wm.advance_last("a", at(5));
        assert_eq!(wm.last_message_id.as_deref(), Some("b"));
        assert_eq!(wm.last_message_timestamp, Some(at(10)));
    }

    #[test]
    fn extend_first_only_moves_back() {
        let mut wm = Watermark::default();
        wm.extend_first("b", at(10));
        wm.extend_first("c", at(20));
        assert_eq!(wm.first_known_message_id.as_deref(), Some("b"));
        wm.extend_first("a", at(1));
        assert_eq!(wm.first_known_message_id.as_deref(), Some("a"));
    }

    #[test]
    fn trust_requires_complete_without_error() {
        let mut wm = Watermark { is_complete: true, ..Default::default() };
        assert!(wm.is_trusted());
        wm.had_transient_error = true;
        assert!(!wm.is_trusted());
    }

    #[test]
    fn attachment_serializes_with_kind_tag() {
        let a = Attachment::Audio { duration_label: Some("0:42".into()), transcription: None };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["kind"], "audio");
        let back: Attachment = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), AttachmentKind::Audio);
    }

    #[test]
    fn push_error_accumulates() {
        let mut r = Record::default();
        r.push_error("image analysis disabled");
        r.push_error("cannot identify record");
        assert_eq!(
            r.processing_error.as_deref(),
            Some("image analysis disabled; cannot identify record")
        );
    }
}
