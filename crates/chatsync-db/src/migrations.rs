use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                external_id     TEXT PRIMARY KEY,
                display_name    TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE watermarks (
                conversation_id                 TEXT PRIMARY KEY
                                                REFERENCES conversations(external_id),
                last_message_id                 TEXT,
                last_message_timestamp          TEXT,
                first_known_message_id          TEXT,
                first_known_message_timestamp   TEXT,
                reached_conversation_start      INTEGER NOT NULL DEFAULT 0,
                is_complete                     INTEGER NOT NULL DEFAULT 0,
                had_transient_error             INTEGER NOT NULL DEFAULT 0,
                updated_at                      TEXT NOT NULL
            );

            CREATE TABLE records (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id          TEXT NOT NULL UNIQUE,
                conversation_id     TEXT NOT NULL REFERENCES conversations(external_id),
                timestamp_utc       TEXT,
                sender              TEXT,
                is_outbound         INTEGER NOT NULL,
                body_text           TEXT,
                attachment_kind     TEXT,
                attachment          TEXT,
                quoted              TEXT,
                processing_error    TEXT,
                persisted_at        TEXT NOT NULL
            );

            CREATE INDEX idx_records_conversation
                ON records(conversation_id, timestamp_utc);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (receipt tracking)");
        conn.execute_batch(
            "
            ALTER TABLE watermarks ADD COLUMN received_receipt INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE watermarks ADD COLUMN received_receipt_timestamp TEXT;

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    Ok(())
}
