use crate::Database;
use crate::models::{ConversationRow, RecordRow, WatermarkRow, format_ts};
use anyhow::Result;
use chatsync_types::{
    Conversation, ConversationStatus, ExportRow, PersistedRecord, Watermark,
};
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::debug;

/// Result of an append. A duplicate `message_id` is routine, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    Duplicate,
}

impl Database {
    // -- Conversations --

    /// Insert the conversation or refresh its display name. `created_at`
    /// survives every later upsert.
    pub fn upsert_conversation(&self, external_id: &str, display_name: &str) -> Result<Conversation> {
        let now = format_ts(&Utc::now());
        let row = self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO conversations (external_id, display_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(external_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    updated_at = excluded.updated_at",
                params![external_id, display_name, now],
            )?;
            query_conversation(conn, external_id)?
                .ok_or_else(|| anyhow::anyhow!("Conversation vanished after upsert: {}", external_id))
        })?;
        row.into_model()
    }

    /// Every known conversation with its cursor and record count.
    pub fn list_conversation_status(&self) -> Result<Vec<ConversationStatus>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.external_id, c.display_name,
                        (SELECT COUNT(*) FROM records r WHERE r.conversation_id = c.external_id),
                        w.last_message_timestamp, w.first_known_message_timestamp,
                        COALESCE(w.reached_conversation_start, 0), COALESCE(w.is_complete, 0),
                        COALESCE(w.had_transient_error, 0), COALESCE(w.received_receipt, 0)
                 FROM conversations c
                 LEFT JOIN watermarks w ON w.conversation_id = c.external_id
                 ORDER BY c.display_name",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, bool>(6)?,
                        row.get::<_, bool>(7)?,
                        row.get::<_, bool>(8)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, name, count, last, first, start, complete, error, receipt)| {
                    Ok(ConversationStatus {
                        external_id: id,
                        display_name: name,
                        record_count: count.max(0) as u64,
                        last_message_timestamp: last.as_deref().map(crate::models::parse_ts).transpose()?,
                        first_known_message_timestamp: first
                            .as_deref()
                            .map(crate::models::parse_ts)
                            .transpose()?,
                        reached_conversation_start: start,
                        is_complete: complete,
                        had_transient_error: error,
                        received_receipt: receipt,
                    })
                })
                .collect()
        })
    }

    // -- Records --

    /// Probe for an already persisted record. Runs on the writer so the sync
    /// run always sees its own appends.
    pub fn message_exists(&self, message_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM records WHERE message_id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn append_record(&self, entry: &PersistedRecord) -> Result<AppendOutcome> {
        let record = &entry.record;
        let attachment = record.attachment.as_ref().map(serde_json::to_string).transpose()?;
        let quoted = record.quoted.as_ref().map(serde_json::to_string).transpose()?;
        let kind = record.attachment.as_ref().map(|a| a.kind().as_str());
        let timestamp = record.timestamp_utc.as_ref().map(format_ts);
        let now = format_ts(&Utc::now());

        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO records
                    (message_id, conversation_id, timestamp_utc, sender, is_outbound, body_text,
                     attachment_kind, attachment, quoted, processing_error, persisted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    entry.message_id,
                    entry.conversation_id,
                    timestamp,
                    record.sender,
                    record.is_outbound,
                    record.body_text,
                    kind,
                    attachment,
                    quoted,
                    record.processing_error,
                    now,
                ],
            );

            match inserted {
                Ok(_) => Ok(AppendOutcome::Inserted),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation
                        && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    debug!(message_id = %entry.message_id, "Record already stored");
                    Ok(AppendOutcome::Duplicate)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn count_records(&self, conversation_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    /// All persisted records, oldest first, optionally for one conversation.
    pub fn export_records(&self, conversation_id: Option<&str>) -> Result<Vec<ExportRow>> {
        let rows = self.with_conn(|conn| query_records(conn, conversation_id))?;
        rows.into_iter().map(RecordRow::into_export).collect()
    }

    // -- Watermarks --

    pub fn get_watermark(&self, conversation_id: &str) -> Result<Option<Watermark>> {
        self.with_conn(|conn| query_watermark(conn, conversation_id))?
            .map(WatermarkRow::into_model)
            .transpose()
    }

    /// Write the whole cursor in one statement.
    pub fn put_watermark(&self, conversation_id: &str, wm: &Watermark) -> Result<()> {
        let now = format_ts(&Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO watermarks
                    (conversation_id, last_message_id, last_message_timestamp,
                     first_known_message_id, first_known_message_timestamp,
                     reached_conversation_start, is_complete, had_transient_error,
                     received_receipt, received_receipt_timestamp, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(conversation_id) DO UPDATE SET
                    last_message_id = excluded.last_message_id,
                    last_message_timestamp = excluded.last_message_timestamp,
                    first_known_message_id = excluded.first_known_message_id,
                    first_known_message_timestamp = excluded.first_known_message_timestamp,
                    reached_conversation_start = excluded.reached_conversation_start,
                    is_complete = excluded.is_complete,
                    had_transient_error = excluded.had_transient_error,
                    received_receipt = excluded.received_receipt,
                    received_receipt_timestamp = excluded.received_receipt_timestamp,
                    updated_at = excluded.updated_at",
                params![
                    conversation_id,
                    wm.last_message_id,
                    wm.last_message_timestamp.as_ref().map(format_ts),
                    wm.first_known_message_id,
                    wm.first_known_message_timestamp.as_ref().map(format_ts),
                    wm.reached_conversation_start,
                    wm.is_complete,
                    wm.had_transient_error,
                    wm.received_receipt,
                    wm.received_receipt_timestamp.as_ref().map(format_ts),
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Drop the cursor and purge every record of the conversation in one
    /// transaction. Returns the number of purged records.
    pub fn reset_conversation(&self, conversation_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let purged = tx.execute("DELETE FROM records WHERE conversation_id = ?1", [conversation_id])?;
            tx.execute("DELETE FROM watermarks WHERE conversation_id = ?1", [conversation_id])?;
            tx.commit()?;
            Ok(purged)
        })
    }
}

fn query_conversation(conn: &Connection, external_id: &str) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT external_id, display_name, created_at, updated_at
         FROM conversations WHERE external_id = ?1",
    )?;

    let row = stmt
        .query_row([external_id], |row| {
            Ok(ConversationRow {
                external_id: row.get(0)?,
                display_name: row.get(1)?,
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_watermark(conn: &Connection, conversation_id: &str) -> Result<Option<WatermarkRow>> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, last_message_id, last_message_timestamp,
                first_known_message_id, first_known_message_timestamp,
                reached_conversation_start, is_complete, had_transient_error,
                received_receipt, received_receipt_timestamp, updated_at
         FROM watermarks WHERE conversation_id = ?1",
    )?;

    let row = stmt
        .query_row([conversation_id], |row| {
            Ok(WatermarkRow {
                conversation_id: row.get(0)?,
                last_message_id: row.get(1)?,
                last_message_timestamp: row.get(2)?,
                first_known_message_id: row.get(3)?,
                first_known_message_timestamp: row.get(4)?,
                reached_conversation_start: row.get(5)?,
                is_complete: row.get(6)?,
                had_transient_error: row.get(7)?,
                received_receipt: row.get(8)?,
                received_receipt_timestamp: row.get(9)?,
                updated_at: row.get(10)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_records(conn: &Connection, conversation_id: Option<&str>) -> Result<Vec<RecordRow>> {
    let mut stmt = conn.prepare(
        "SELECT message_id, conversation_id, timestamp_utc, sender, is_outbound, body_text,
                attachment, quoted, processing_error, persisted_at
         FROM records
         WHERE ?1 IS NULL OR conversation_id = ?1
         ORDER BY timestamp_utc, id",
    )?;

    let rows = stmt
        .query_map(params![conversation_id], |row| {
            Ok(RecordRow {
                message_id: row.get(0)?,
                conversation_id: row.get(1)?,
                timestamp_utc: row.get(2)?,
                sender: row.get(3)?,
                is_outbound: row.get(4)?,
                body_text: row.get(5)?,
                attachment: row.get(6)?,
                quoted: row.get(7)?,
                processing_error: row.get(8)?,
                persisted_at: row.get(9)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_types::{Attachment, Record};
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, conversation: &str, minute: u32) -> PersistedRecord {
        PersistedRecord {
            message_id: id.to_string(),
            conversation_id: conversation.to_string(),
            record: Record {
                timestamp_utc: Some(Utc.with_ymd_and_hms(2024, 3, 5, 12, minute, 0).unwrap()),
                sender: Some("Alice".into()),
                body_text: Some(format!("message {}", minute)),
                ..Default::default()
            },
        }
    }

    #[test]
    fn duplicate_append_is_a_noop() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_conversation("5511999", "Alice").unwrap();

        let e = entry("abc", "5511999", 1);
        assert_eq!(db.append_record(&e).unwrap(), AppendOutcome::Inserted);
        assert_eq!(db.append_record(&e).unwrap(), AppendOutcome::Duplicate);
        assert_eq!(db.count_records("5511999").unwrap(), 1);
        assert!(db.message_exists("abc").unwrap());
        assert!(!db.message_exists("zzz").unwrap());
    }

    #[test]
    fn upsert_keeps_created_at_and_refreshes_name() {
        let db = Database::open_in_memory().unwrap();
        let first = db.upsert_conversation("5511999", "Alice").unwrap();
        let second = db.upsert_conversation("5511999", "Alice Work").unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.display_name, "Alice Work");
    }

    #[test]
    fn watermark_roundtrip_and_reset() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_conversation("5511999", "Alice").unwrap();
        db.append_record(&entry("a", "5511999", 1)).unwrap();
        db.append_record(&entry("b", "5511999", 2)).unwrap();

        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 12, 2, 0).unwrap();
        let wm = Watermark {
            last_message_id: Some("b".into()),
            last_message_timestamp: Some(ts),
            is_complete: true,
            ..Default::default()
        };
        db.put_watermark("5511999", &wm).unwrap();

        let loaded = db.get_watermark("5511999").unwrap().unwrap();
        assert_eq!(loaded.last_message_id.as_deref(), Some("b"));
        assert_eq!(loaded.last_message_timestamp, Some(ts));
        assert!(loaded.is_trusted());

        assert_eq!(db.reset_conversation("5511999").unwrap(), 2);
        assert!(db.get_watermark("5511999").unwrap().is_none());
        assert_eq!(db.count_records("5511999").unwrap(), 0);
    }

    #[test]
    fn export_orders_by_timestamp_and_decodes_payloads() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_conversation("1", "Alice").unwrap();
        db.upsert_conversation("2", "Bob").unwrap();

        let mut late = entry("late", "1", 9);
        late.record.attachment = Some(Attachment::Document {
            name: Some("boleto.pdf".into()),
            size_label: Some("120 kB".into()),
            file_type: Some("PDF".into()),
            content: None,
            is_receipt: false,
        });
        db.append_record(&late).unwrap();
        db.append_record(&entry("early", "1", 3)).unwrap();
        db.append_record(&entry("other", "2", 5)).unwrap();

        let rows = db.export_records(Some("1")).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, ["early", "late"]);
        assert!(matches!(rows[1].attachment, Some(Attachment::Document { .. })));

        assert_eq!(db.export_records(None).unwrap().len(), 3);
    }

    #[test]
    fn readers_see_writer_commits_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("sync.db")).unwrap();
        db.upsert_conversation("1", "Alice").unwrap();
        db.append_record(&entry("x", "1", 1)).unwrap();

        assert_eq!(db.count_records("1").unwrap(), 1);
        let status = db.list_conversation_status().unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].record_count, 1);
        assert!(!status[0].is_complete);
    }
}
