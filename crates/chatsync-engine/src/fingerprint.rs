//! Content-derived record identity.
//!
//! A record's id is the MD5 of `timestamp|sender|direction|content`, where
//! content is a short per-kind discriminator. Only normalized attributes go
//! in, never the record's position on the page.

use chatsync_types::{Attachment, Record};
use chrono::SecondsFormat;
use md5::{Digest, Md5};

use crate::error::IdentityError;

/// Hex-encoded 128-bit fingerprint.
pub type MessageId = String;

/// Characters of body text that take part in the identity. Longer bodies
/// share an id when their prefixes match.
pub const TEXT_PREFIX_CHARS: usize = 10;

pub fn fingerprint(record: &Record) -> Result<MessageId, IdentityError> {
    let timestamp = record
        .timestamp_utc
        .ok_or(IdentityError::MissingField("timestamp"))?;
    let sender = record
        .sender
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(IdentityError::MissingField("sender"))?;

    let key = format!(
        "{}|{}|{}|{}",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        sender,
        direction(record),
        content_discriminator(record),
    );
    Ok(digest(&key))
}

/// Identity for a record [`fingerprint`] rejects. Built from whatever
/// partial fields exist plus the conversation, in a key space that cannot
/// meet regular ids, so the record is stored once and recognized on every
/// later pass.
pub fn quarantine_fingerprint(conversation_id: &str, record: &Record) -> MessageId {
    let timestamp = record
        .timestamp_utc
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string());
    let sender = record.sender.as_deref().unwrap_or("-");

    let key = format!(
        "unidentified|{}|{}|{}|{}|{}",
        conversation_id,
        timestamp,
        sender,
        direction(record),
        content_discriminator(record),
    );
    digest(&key)
}

/// Attachment metadata wins over body text; a captioned image is
/// identified by the image.
pub fn content_discriminator(record: &Record) -> String {
    match &record.attachment {
        Some(Attachment::Image { size_bytes, .. }) => format!(
            "image_{}",
            size_bytes
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown_size".to_string())
        ),
        Some(Attachment::Audio { duration_label, .. }) => format!(
            "audio_{}",
            duration_label.as_deref().unwrap_or("unknown_duration")
        ),
        Some(Attachment::Document { name, size_label, .. }) => format!(
            "doc_{}_{}",
            name.as_deref().unwrap_or("unknown_name"),
            size_label.as_deref().unwrap_or("unknown_size")
        ),
        None => match record.text() {
            Some(text) => {
                let prefix: String = text.chars().take(TEXT_PREFIX_CHARS).collect();
                format!("text_{}", prefix)
            }
            None => "empty".to_string(),
        },
    }
}

fn direction(record: &Record) -> &'static str {
    if record.is_outbound { "out" } else { "in" }
}

fn digest(key: &str) -> MessageId {
    let mut hasher = Md5::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn text_record(text: &str) -> Record {
        Record {
            timestamp_utc: Some(Utc.with_ymd_and_hms(2024, 3, 5, 17, 32, 0).unwrap()),
            sender: Some("Alice".into()),
            body_text: Some(text.into()),
            ..Default::default()
        }
    }

    #[test]
    fn known_digest_is_stable_across_processes() {
        let id = fingerprint(&text_record("Bom dia, tudo bem?")).unwrap();
        assert_eq!(id, "7b16a6538dda56b17ae6524d6c2f000f");
        assert_eq!(id.len(), 32);
    }

    #[test]
    fn only_the_text_prefix_counts() {
        let a = fingerprint(&text_record("Bom dia, tudo bem?")).unwrap();
        let b = fingerprint(&text_record("Bom dia, tchau")).unwrap();
        assert_eq!(a, b);

        let c = fingerprint(&text_record("Boa noite")).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn direction_is_part_of_identity() {
        let inbound = text_record("oi");
        let mut outbound = inbound.clone();
        outbound.is_outbound = true;
        assert_ne!(fingerprint(&inbound).unwrap(), fingerprint(&outbound).unwrap());
    }

    #[test]
    fn blank_body_uses_empty_sentinel() {
        let record = text_record("   ");
        assert_eq!(content_discriminator(&record), "empty");
        assert_eq!(fingerprint(&record).unwrap(), "f6e219f1ad23215733ea4c1be849f446");
    }

    #[test]
    fn attachment_discriminators() {
        let mut record = text_record("legenda");
        record.attachment = Some(Attachment::Image {
            size_bytes: Some(48213),
            file_path: None,
            content: None,
            is_receipt: false,
        });
        assert_eq!(content_discriminator(&record), "image_48213");

        record.attachment = Some(Attachment::Audio {
            duration_label: Some("1:07".into()),
            transcription: Some("ignored".into()),
        });
        assert_eq!(content_discriminator(&record), "audio_1:07");

        record.attachment = Some(Attachment::Document {
            name: Some("nota.pdf".into()),
            size_label: None,
            file_type: None,
            content: None,
            is_receipt: false,
        });
        assert_eq!(content_discriminator(&record), "doc_nota.pdf_unknown_size");
    }

    #[test]
    fn enrichment_does_not_change_identity() {
        let mut record = text_record("x");
        record.attachment = Some(Attachment::Audio { duration_label: Some("0:12".into()), transcription: None });
        let before = fingerprint(&record).unwrap();

        record.attachment = Some(Attachment::Audio {
            duration_label: Some("0:12".into()),
            transcription: Some("transcribed".into()),
        });
        record.processing_error = Some("late failure".into());
        assert_eq!(before, fingerprint(&record).unwrap());
    }

    #[test]
    fn missing_fields_fail_closed() {
        let mut record = text_record("oi");
        record.sender = None;
        assert_eq!(fingerprint(&record), Err(IdentityError::MissingField("sender")));

        record.sender = Some("Alice".into());
        record.timestamp_utc = None;
        assert_eq!(fingerprint(&record), Err(IdentityError::MissingField("timestamp")));
    }

    #[test]
    fn quarantine_ids_are_scoped_per_conversation() {
        let record = Record::default();
        let a = quarantine_fingerprint("5511", &record);
        assert_eq!(a, quarantine_fingerprint("5511", &record));
        assert_ne!(a, quarantine_fingerprint("5522", &record));
    }
}
