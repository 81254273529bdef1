/// Sync event logging.
///
/// The engine reports progress as [`SyncEvent`]s through a [`SyncLogger`],
/// so callers can route them to `tracing`, collect them in tests, or drop them.
use std::sync::Mutex;

use chatsync_types::SyncEvent;

pub trait SyncLogger: Send + Sync {
    fn log(&self, event: SyncEvent);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl SyncLogger for TracingLogger {
    fn log(&self, event: SyncEvent) {
        let conversation = event.conversation().unwrap_or("-").to_string();
        // Info for lifecycle events, debug for per-record and per-page spam
        match &event {
            SyncEvent::PageFetched { .. }
            | SyncEvent::RecordAppended { .. }
            | SyncEvent::RecordSkipped { .. } => {
                tracing::debug!(conversation = %conversation, "{}", event);
            }
            SyncEvent::RecordFlagged { .. }
            | SyncEvent::Reconnecting { .. }
            | SyncEvent::ConversationFailed { .. } => {
                tracing::warn!(conversation = %conversation, "{}", event);
            }
            _ => {
                tracing::info!(conversation = %conversation, "{}", event);
            }
        }
    }
}

/// No-op logger that discards all events.
pub struct NullLogger;

impl SyncLogger for NullLogger {
    fn log(&self, _event: SyncEvent) {}
}

/// Keeps every event in memory, in order.
#[derive(Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<SyncEvent>>,
}

impl MemoryLogger {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl SyncLogger for MemoryLogger {
    fn log(&self, event: SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
