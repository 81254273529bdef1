use anyhow::Result;
use chatsync_db::{AppendOutcome, Database};
use chatsync_types::{Conversation, PersistedRecord, Watermark};

/// "Is this fingerprint already persisted?"
pub trait StorageProbe {
    fn exists(&self, message_id: &str) -> Result<bool>;
}

/// Per-conversation sync cursors. `put` and `reset` are the only mutators
/// and each is atomic for concurrent readers.
pub trait WatermarkStore {
    fn get(&self, conversation_id: &str) -> Result<Option<Watermark>>;

    fn put(&self, conversation_id: &str, watermark: &Watermark) -> Result<()>;

    /// Forget the cursor and purge every persisted record of the
    /// conversation. Only for explicit full re-extraction.
    fn reset(&self, conversation_id: &str) -> Result<()>;
}

/// Everything a sync run needs from durable storage.
pub trait SyncStore: StorageProbe + WatermarkStore {
    fn append(&self, entry: &PersistedRecord) -> Result<AppendOutcome>;

    fn upsert_conversation(&self, external_id: &str, display_name: &str) -> Result<Conversation>;
}

impl StorageProbe for Database {
    fn exists(&self, message_id: &str) -> Result<bool> {
        self.message_exists(message_id)
    }
}

impl WatermarkStore for Database {
    fn get(&self, conversation_id: &str) -> Result<Option<Watermark>> {
        self.get_watermark(conversation_id)
    }

    fn put(&self, conversation_id: &str, watermark: &Watermark) -> Result<()> {
        self.put_watermark(conversation_id, watermark)
    }

    fn reset(&self, conversation_id: &str) -> Result<()> {
        let purged = self.reset_conversation(conversation_id)?;
        tracing::info!(conversation = conversation_id, purged, "History reset");
        Ok(())
    }
}

impl SyncStore for Database {
    fn append(&self, entry: &PersistedRecord) -> Result<AppendOutcome> {
        self.append_record(entry)
    }

    fn upsert_conversation(&self, external_id: &str, display_name: &str) -> Result<Conversation> {
        Database::upsert_conversation(self, external_id, display_name)
    }
}
