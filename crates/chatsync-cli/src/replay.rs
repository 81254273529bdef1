//! Scripted remote client read from a JSON file.
//!
//! Lets `chatsync sync` exercise the whole engine without a browser. The
//! file lists conversations with their history oldest first; each one is
//! served newest first, `page_size` records per "load older" request.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chatsync_engine::normalize::parse_message_header;
use chatsync_engine::receipt::is_receipt;
use chatsync_engine::{ContentExtractor, PageAccessor, SessionLifecycle, TransportError};
use chatsync_types::{Attachment, ConversationEntry, QuotedRef, Record};
use chrono_tz::Tz;
use serde::Deserialize;

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Deserialize)]
pub struct ReplayFile {
    pub conversations: Vec<ReplayConversation>,
}

#[derive(Debug, Deserialize)]
pub struct ReplayConversation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Oldest first.
    pub records: Vec<ReplayRecord>,
}

/// One rendered record: the raw header line plus whatever the page shows.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayRecord {
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub quoted: Option<QuotedRef>,
    #[serde(default)]
    pub image: Option<ReplayImage>,
    #[serde(default)]
    pub document: Option<ReplayDocument>,
    #[serde(default)]
    pub audio: Option<ReplayAudio>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayImage {
    pub size_bytes: Option<u64>,
    pub file_path: Option<String>,
    /// Text an OCR pass would have produced.
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayDocument {
    pub name: Option<String>,
    pub size_label: Option<String>,
    pub file_type: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayAudio {
    pub duration_label: Option<String>,
    pub transcription: Option<String>,
}

pub struct ReplayClient {
    conversations: Vec<ReplayConversation>,
    connected: bool,
    active: Option<usize>,
    loaded: usize,
}

impl ReplayClient {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let file: ReplayFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse replay file {}", path.display()))?;
        Ok(Self::new(file))
    }

    pub fn new(file: ReplayFile) -> Self {
        Self {
            conversations: file.conversations,
            connected: false,
            active: None,
            loaded: 0,
        }
    }

    fn require_session(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::SessionLost("replay session not established".into()))
        }
    }

    fn active(&self) -> Result<&ReplayConversation, TransportError> {
        self.active
            .map(|idx| &self.conversations[idx])
            .ok_or_else(|| TransportError::Fatal("no conversation open".into()))
    }

    fn page_size(conversation: &ReplayConversation) -> usize {
        conversation.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1)
    }
}

impl SessionLifecycle for ReplayClient {
    fn establish_session(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    fn teardown_session(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.active = None;
        self.loaded = 0;
        Ok(())
    }
}

impl PageAccessor for ReplayClient {
    type View = ReplayRecord;

    fn list_conversations(&mut self) -> Result<Vec<ConversationEntry>, TransportError> {
        self.require_session()?;
        Ok(self
            .conversations
            .iter()
            .map(|c| ConversationEntry {
                id: c.id.clone(),
                display_name: c.name.clone(),
                last_activity_label: c.label.clone(),
            })
            .collect())
    }

    fn request_more_conversations(&mut self) -> Result<bool, TransportError> {
        self.require_session()?;
        Ok(false)
    }

    fn open_conversation(&mut self, id: &str) -> Result<(), TransportError> {
        self.require_session()?;
        let idx = self
            .conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| TransportError::Fatal(format!("conversation {} not in replay", id)))?;
        let conversation = &self.conversations[idx];
        self.loaded = conversation.records.len().min(Self::page_size(conversation));
        self.active = Some(idx);
        Ok(())
    }

    fn visible_records(&mut self) -> Result<Vec<ReplayRecord>, TransportError> {
        self.require_session()?;
        let loaded = self.loaded;
        Ok(self.active()?.records.iter().rev().take(loaded).cloned().collect())
    }

    fn request_older_history(&mut self, _timeout: Duration) -> Result<bool, TransportError> {
        self.require_session()?;
        let conversation = self.active()?;
        let total = conversation.records.len();
        let next = (self.loaded + Self::page_size(conversation)).min(total);
        if next > self.loaded {
            self.loaded = next;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn reached_history_start(&mut self) -> Result<bool, TransportError> {
        self.require_session()?;
        Ok(self.loaded >= self.active()?.records.len())
    }
}

/// Builds records from replayed views. Content that a real extractor would
/// compute (OCR, transcription) is taken from the file when present.
pub struct ReplayExtractor {
    timezone: Tz,
}

impl ReplayExtractor {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }
}

impl ContentExtractor<ReplayRecord> for ReplayExtractor {
    fn normalize(&self, view: &ReplayRecord) -> Record {
        let header = view
            .header
            .as_deref()
            .and_then(|h| parse_message_header(h, self.timezone));

        let attachment = if let Some(image) = &view.image {
            Some(Attachment::Image {
                size_bytes: image.size_bytes,
                file_path: image.file_path.clone(),
                content: None,
                is_receipt: false,
            })
        } else if let Some(doc) = &view.document {
            Some(Attachment::Document {
                name: doc.name.clone(),
                size_label: doc.size_label.clone(),
                file_type: doc.file_type.clone(),
                content: None,
                is_receipt: false,
            })
        } else {
            view.audio.as_ref().map(|audio| Attachment::Audio {
                duration_label: audio.duration_label.clone(),
                transcription: None,
            })
        };

        Record {
            timestamp_utc: header.as_ref().map(|(ts, _)| *ts),
            sender: header.map(|(_, sender)| sender),
            body_text: view.text.clone(),
            attachment,
            quoted: view.quoted.clone(),
            ..Default::default()
        }
    }

    fn extract(&self, view: &ReplayRecord, mut record: Record) -> Record {
        let mut missing = None;

        match record.attachment.as_mut() {
            Some(Attachment::Image { content, is_receipt: receipt, .. }) => {
                *content = view.image.as_ref().and_then(|i| i.content.clone());
                *receipt = content.as_deref().is_some_and(is_receipt);
                if content.is_none() {
                    missing = Some("image text not available");
                }
            }
            Some(Attachment::Document { content, is_receipt: receipt, .. }) => {
                *content = view.document.as_ref().and_then(|d| d.content.clone());
                *receipt = content.as_deref().is_some_and(is_receipt);
                if content.is_none() {
                    missing = Some("document text not available");
                }
            }
            Some(Attachment::Audio { transcription, .. }) => {
                *transcription = view.audio.as_ref().and_then(|a| a.transcription.clone());
                if transcription.is_none() {
                    missing = Some("audio transcription not available");
                }
            }
            None => {}
        }

        if let Some(error) = missing {
            record.push_error(error);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use chrono_tz::America::Sao_Paulo;

    fn sample() -> ReplayFile {
        serde_json::from_str(
            r#"{
                "conversations": [{
                    "id": "5511999990000",
                    "name": "Alice",
                    "page_size": 2,
                    "records": [
                        { "header": "[09:00, 05/03/2024] Alice: ", "text": "Bom dia" },
                        { "header": "[09:01, 05/03/2024] Alice: ", "image": { "size_bytes": 1200, "content": "Comprovante PIX R$ 10,00" } },
                        { "header": "[09:02, 05/03/2024] Eu: ", "audio": { "duration_label": "0:12" } }
                    ]
                }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn pages_grow_newest_first() {
        let mut client = ReplayClient::new(sample());
        client.establish_session().unwrap();
        client.open_conversation("5511999990000").unwrap();

        assert_eq!(client.visible_records().unwrap().len(), 2);
        assert!(!client.reached_history_start().unwrap());
        assert!(client.request_older_history(Duration::ZERO).unwrap());
        assert_eq!(client.visible_records().unwrap().len(), 3);
        assert!(!client.request_older_history(Duration::ZERO).unwrap());
        assert!(client.reached_history_start().unwrap());
    }

    #[test]
    fn calls_without_session_are_recoverable() {
        let mut client = ReplayClient::new(sample());
        let err = client.list_conversations().unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn extractor_reads_header_and_content() {
        let file = sample();
        let records = &file.conversations[0].records;
        let extractor = ReplayExtractor::new(Sao_Paulo);

        let image = extractor.normalize(&records[1]);
        assert_eq!(image.timestamp_utc, Some(Utc.with_ymd_and_hms(2024, 3, 5, 12, 1, 0).unwrap()));
        assert_eq!(image.sender.as_deref(), Some("Alice"));

        let image = extractor.extract(&records[1], image);
        assert!(image.attachment.as_ref().is_some_and(|a| a.is_receipt()));
        assert!(image.processing_error.is_none());

        let audio = extractor.extract(&records[2], extractor.normalize(&records[2]));
        assert_eq!(audio.processing_error.as_deref(), Some("audio transcription not available"));
    }
}
