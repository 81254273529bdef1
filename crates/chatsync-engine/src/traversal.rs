//! Backfill traversal of one conversation.
//!
//! ```text
//! FetchPage ─► Scan ─► ExtendPagination ─► FetchPage ...
//!     │          │            │
//!     └──────────┴────────────┴─► Terminate
//! ```
//!
//! The page accessor materializes history lazily, newest first. Every fetch
//! is reversed to oldest-first and scanned; new records are persisted one
//! at a time so an interruption loses at most the record in flight.

use std::time::Duration;

use chatsync_db::AppendOutcome;
use chatsync_types::{Conversation, PersistedRecord, Record, SyncEvent, Watermark};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::collaborators::{ContentExtractor, PageAccessor, SessionLifecycle};
use crate::dedup::{Decision, Deduplicator, SkipReason};
use crate::error::SyncError;
use crate::logging::SyncLogger;
use crate::session::Session;
use crate::store::SyncStore;

/// Knobs for one traversal, taken from [`crate::config::SyncConfig`].
#[derive(Debug, Clone, Default)]
pub struct TraversalOptions {
    pub history_timeout: Duration,
    pub max_history_pages: Option<u32>,
    pub account_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The very first fetch returned nothing.
    EmptyHistory,
    /// Newest visible record is not newer than a trusted cursor.
    FastPath,
    /// No more history loads.
    HistoryExhausted,
    /// `max_history_pages` reached.
    PageLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FetchPage,
    Scan,
    ExtendPagination,
    Terminate(Termination),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalOutcome {
    pub termination: Termination,
    pub pages: u32,
    pub appended: usize,
    pub skipped: usize,
    pub flagged: usize,
    pub watermark: Watermark,
}

/// Newest and oldest identified record seen in this pass.
#[derive(Default)]
struct PassBounds {
    newest: Option<(String, DateTime<Utc>)>,
    oldest: Option<(String, DateTime<Utc>)>,
}

impl PassBounds {
    fn observe(&mut self, message_id: &str, timestamp: Option<DateTime<Utc>>) {
        let Some(ts) = timestamp else { return };
        if self.newest.as_ref().is_none_or(|(_, n)| ts >= *n) {
            self.newest = Some((message_id.to_string(), ts));
        }
        if self.oldest.as_ref().is_none_or(|(_, o)| ts < *o) {
            self.oldest = Some((message_id.to_string(), ts));
        }
    }
}

pub struct BackfillTraversal<'a, D, X, S: ?Sized> {
    session: &'a mut Session<D>,
    extractor: &'a X,
    store: &'a S,
    options: &'a TraversalOptions,
    logger: &'a dyn SyncLogger,
    cancel: &'a CancelToken,
}

impl<'a, D, X, S> BackfillTraversal<'a, D, X, S>
where
    D: PageAccessor + SessionLifecycle,
    X: ContentExtractor<D::View>,
    S: SyncStore + ?Sized,
{
    pub fn new(
        session: &'a mut Session<D>,
        extractor: &'a X,
        store: &'a S,
        options: &'a TraversalOptions,
        logger: &'a dyn SyncLogger,
        cancel: &'a CancelToken,
    ) -> Self {
        Self { session, extractor, store, options, logger, cancel }
    }

    /// Traverse the already opened conversation. `prior` is the watermark
    /// as stored before this pass.
    pub fn run(&mut self, conversation: &Conversation, prior: &Watermark) -> Result<TraversalOutcome, SyncError> {
        let conversation_id = conversation.external_id.as_str();
        let mut dedup = Deduplicator::new(conversation_id, prior);
        let mut working = prior.clone();
        let mut bounds = PassBounds::default();
        let mut outcome = TraversalOutcome {
            termination: Termination::EmptyHistory,
            pages: 0,
            appended: 0,
            skipped: 0,
            flagged: 0,
            watermark: Watermark::default(),
        };

        let mut views: Vec<D::View> = Vec::new();
        let mut previous_count: Option<usize> = None;
        let mut reached_start = false;
        let mut state = State::FetchPage;

        loop {
            state = match state {
                State::FetchPage => {
                    if self.cancel.is_cancelled() {
                        return Err(SyncError::Cancelled);
                    }

                    views = self.session.visible_records()?;
                    outcome.pages += 1;
                    self.logger.log(SyncEvent::PageFetched {
                        conversation: conversation_id.to_string(),
                        page: outcome.pages,
                        visible: views.len(),
                    });

                    match previous_count {
                        None if views.is_empty() => State::Terminate(Termination::EmptyHistory),
                        Some(count) if count == views.len() => {
                            reached_start = self.session.reached_history_start()?;
                            State::Terminate(Termination::HistoryExhausted)
                        }
                        _ => State::Scan,
                    }
                }

                State::Scan => {
                    let records: Vec<Record> = views.iter().map(|v| self.normalize(v)).collect();
                    let newest = records.iter().filter_map(|r| r.timestamp_utc).max();

                    if dedup.page_is_known(newest) {
                        debug!(conversation = conversation_id, "Nothing newer than the cursor, stopping early");
                        State::Terminate(Termination::FastPath)
                    } else {
                        for (view, record) in views.iter().zip(records).rev() {
                            self.scan_record(
                                conversation_id,
                                view,
                                record,
                                &mut dedup,
                                &mut working,
                                &mut bounds,
                                &mut outcome,
                            )?;
                        }
                        previous_count = Some(views.len());
                        State::ExtendPagination
                    }
                }

                State::ExtendPagination => {
                    if self
                        .options
                        .max_history_pages
                        .is_some_and(|max| outcome.pages >= max)
                    {
                        State::Terminate(Termination::PageLimit)
                    } else if self.session.request_older_history(self.options.history_timeout)? {
                        State::FetchPage
                    } else {
                        reached_start = self.session.reached_history_start()?;
                        State::Terminate(Termination::HistoryExhausted)
                    }
                }

                State::Terminate(termination) => {
                    outcome.termination = termination;
                    self.finish(conversation_id, &mut working, &bounds, termination, reached_start)?;
                    outcome.watermark = working;

                    info!(
                        conversation = conversation_id,
                        pages = outcome.pages,
                        appended = outcome.appended,
                        skipped = outcome.skipped,
                        ?termination,
                        "Traversal finished"
                    );
                    self.logger.log(SyncEvent::ConversationCompleted {
                        conversation: conversation_id.to_string(),
                        appended: outcome.appended,
                        reached_start: outcome.watermark.reached_conversation_start,
                        early_stop: termination == Termination::FastPath,
                    });
                    return Ok(outcome);
                }
            };
        }
    }

    fn normalize(&self, view: &D::View) -> Record {
        let mut record = self.extractor.normalize(view);
        if let Some(account) = self.options.account_name.as_deref() {
            record.derive_outbound(account);
        }
        record
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_record(
        &self,
        conversation_id: &str,
        view: &D::View,
        record: Record,
        dedup: &mut Deduplicator,
        working: &mut Watermark,
        bounds: &mut PassBounds,
        outcome: &mut TraversalOutcome,
    ) -> Result<(), SyncError> {
        let timestamp = record.timestamp_utc;

        let (message_id, identity_error) = match dedup.should_process(&record, self.store)? {
            // Rescanned because the view grew; already handled this pass.
            Decision::Skip { reason: SkipReason::SeenThisPass, .. } => return Ok(()),
            Decision::Skip { message_id, reason } => {
                bounds.observe(&message_id, timestamp);
                outcome.skipped += 1;
                self.logger.log(SyncEvent::RecordSkipped {
                    conversation: conversation_id.to_string(),
                    message_id,
                    reason: reason.as_str().to_string(),
                });
                return Ok(());
            }
            Decision::Process { message_id, identity_error } => (message_id, identity_error),
        };

        let mut record = self.extractor.extract(view, record);
        if let Some(err) = identity_error {
            record.push_error(err.to_string());
        }

        let entry = PersistedRecord {
            message_id: message_id.clone(),
            conversation_id: conversation_id.to_string(),
            record,
        };

        match self.store.append(&entry)? {
            AppendOutcome::Inserted => {
                outcome.appended += 1;
                self.logger.log(SyncEvent::RecordAppended {
                    conversation: conversation_id.to_string(),
                    message_id: message_id.clone(),
                });
            }
            AppendOutcome::Duplicate => {
                outcome.skipped += 1;
                bounds.observe(&message_id, timestamp);
                return Ok(());
            }
        }

        if let Some(error) = entry.record.processing_error.as_deref() {
            outcome.flagged += 1;
            self.logger.log(SyncEvent::RecordFlagged {
                conversation: conversation_id.to_string(),
                message_id: message_id.clone(),
                error: error.to_string(),
            });
        }

        bounds.observe(&message_id, timestamp);
        if let Some(ts) = timestamp {
            working.advance_last(&message_id, ts);
            working.extend_first(&message_id, ts);
        }
        if entry.record.attachment.as_ref().is_some_and(|a| a.is_receipt()) {
            working.note_receipt(timestamp);
        }
        working.is_complete = false;
        self.store.put(conversation_id, working)?;

        Ok(())
    }

    fn finish(
        &self,
        conversation_id: &str,
        working: &mut Watermark,
        bounds: &PassBounds,
        termination: Termination,
        reached_start: bool,
    ) -> Result<(), SyncError> {
        if let Some((id, ts)) = &bounds.newest {
            working.advance_last(id, *ts);
        }
        if let Some((id, ts)) = &bounds.oldest {
            working.extend_first(id, *ts);
        }
        if termination == Termination::HistoryExhausted && reached_start {
            working.reached_conversation_start = true;
        }
        working.is_complete = true;
        working.had_transient_error = false;
        self.store.put(conversation_id, working)?;
        Ok(())
    }
}
