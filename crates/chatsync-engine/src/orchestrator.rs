use std::collections::HashSet;
use std::sync::Arc;

use chatsync_types::{Conversation, ConversationEntry, SyncEvent, Watermark};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::collaborators::{ContentExtractor, PageAccessor, SessionLifecycle};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::logging::SyncLogger;
use crate::normalize::latest_activity_instant;
use crate::session::Session;
use crate::store::SyncStore;
use crate::traversal::{BackfillTraversal, TraversalOptions, TraversalOutcome};

/// Totals for one [`SyncEngine::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub conversations_seen: usize,
    pub synced: usize,
    /// Skipped from the list view without opening.
    pub skipped: usize,
    pub failed: usize,
    pub appended: usize,
    pub skipped_records: usize,
    pub flagged: usize,
    pub cancelled: bool,
}

/// Drives one run over every conversation the remote client lists.
pub struct SyncEngine<D, X, S: ?Sized> {
    session: Session<D>,
    extractor: X,
    store: Arc<S>,
    config: SyncConfig,
    logger: Arc<dyn SyncLogger>,
    cancel: CancelToken,
}

impl<D, X, S> SyncEngine<D, X, S>
where
    D: PageAccessor + SessionLifecycle,
    X: ContentExtractor<D::View>,
    S: SyncStore + ?Sized,
{
    pub fn new(driver: D, extractor: X, store: Arc<S>, config: SyncConfig, logger: Arc<dyn SyncLogger>) -> Self {
        let session = Session::new(driver, config.reconnect, logger.clone());
        Self {
            session,
            extractor,
            store,
            config,
            logger,
            cancel: CancelToken::new(),
        }
    }

    /// Handle for stopping the run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn session(&self) -> &Session<D> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<D> {
        &mut self.session
    }

    pub fn extractor(&self) -> &X {
        &self.extractor
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Sync every listed conversation once.
    ///
    /// Failing to establish the session, or any storage failure, ends the
    /// run with an error. Transport failures inside one conversation only
    /// mark that conversation's watermark and the run moves on.
    pub fn run(&mut self) -> Result<RunReport, SyncError> {
        self.session.establish()?;
        self.logger.log(SyncEvent::RunStarted);

        let mut report = RunReport::default();
        let result = self.sync_all(&mut report);
        self.session.teardown();
        result?;

        info!(
            conversations = report.conversations_seen,
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            appended = report.appended,
            cancelled = report.cancelled,
            "Sync run finished"
        );
        self.logger.log(SyncEvent::RunFinished {
            conversations: report.conversations_seen,
            appended: report.appended,
        });
        Ok(report)
    }

    fn sync_all(&mut self, report: &mut RunReport) -> Result<(), SyncError> {
        let mut handled: HashSet<String> = HashSet::new();

        loop {
            let entries = self.session.list_conversations()?;
            let mut unseen = 0;

            for entry in entries {
                if !handled.insert(entry.id.clone()) {
                    continue;
                }
                unseen += 1;

                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(());
                }
                report.conversations_seen += 1;

                match self.sync_conversation(&entry, report) {
                    Ok(()) => {}
                    Err(SyncError::Cancelled) => {
                        report.cancelled = true;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }

            if unseen == 0 {
                return Ok(());
            }
            if !self.session.request_more_conversations()? {
                debug!("Conversation list did not grow");
            }
        }
    }

    fn sync_conversation(&mut self, entry: &ConversationEntry, report: &mut RunReport) -> Result<(), SyncError> {
        let conversation = self.store.upsert_conversation(&entry.id, &entry.display_name)?;
        let id = conversation.external_id.clone();

        let prior = match self.store.get(&id)? {
            Some(watermark) => watermark,
            None => {
                let watermark = Watermark::default();
                self.store.put(&id, &watermark)?;
                watermark
            }
        };

        if self.unchanged_since(entry, &prior) {
            debug!(conversation = %id, label = ?entry.last_activity_label, "No activity since last pass");
            report.skipped += 1;
            self.logger.log(SyncEvent::ConversationSkipped {
                conversation: id,
                label: entry.last_activity_label.clone(),
            });
            return Ok(());
        }

        self.logger.log(SyncEvent::ConversationOpened {
            conversation: id.clone(),
            trusted_cursor: prior.is_trusted(),
        });

        match self.traverse(&conversation, &prior) {
            Ok(outcome) => {
                report.synced += 1;
                report.appended += outcome.appended;
                report.skipped_records += outcome.skipped;
                report.flagged += outcome.flagged;
                Ok(())
            }
            Err(e) if e.is_conversation_scoped() => {
                warn!(conversation = %id, error = %e, "Conversation sync failed");
                self.mark_failed(&id, &e)?;
                report.failed += 1;
                self.logger.log(SyncEvent::ConversationFailed {
                    conversation: id,
                    error: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn traverse(&mut self, conversation: &Conversation, prior: &Watermark) -> Result<TraversalOutcome, SyncError> {
        self.session.open_conversation(&conversation.external_id)?;

        let options = TraversalOptions {
            history_timeout: self.config.history_timeout,
            max_history_pages: self.config.max_history_pages,
            account_name: self.config.account_name.clone(),
        };
        BackfillTraversal::new(
            &mut self.session,
            &self.extractor,
            self.store.as_ref(),
            &options,
            self.logger.as_ref(),
            &self.cancel,
        )
        .run(conversation, prior)
    }

    /// List-view skip: only with a trusted cursor, and only when the label
    /// cannot denote anything later than the last stored record.
    fn unchanged_since(&self, entry: &ConversationEntry, prior: &Watermark) -> bool {
        if !prior.is_trusted() {
            return false;
        }
        let (Some(label), Some(last)) = (entry.last_activity_label.as_deref(), prior.last_message_timestamp) else {
            return false;
        };
        latest_activity_instant(label, Utc::now(), self.config.timezone).is_some_and(|latest| latest <= last)
    }

    /// Leave the stored cursor untrusted so the next run re-verifies.
    fn mark_failed(&self, conversation_id: &str, error: &SyncError) -> Result<(), SyncError> {
        let mut watermark = self.store.get(conversation_id)?.unwrap_or_default();
        watermark.is_complete = false;
        if matches!(error, SyncError::RetriesExhausted { .. }) {
            watermark.had_transient_error = true;
        }
        self.store.put(conversation_id, &watermark)?;
        Ok(())
    }
}
