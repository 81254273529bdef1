use std::sync::Arc;
use std::time::Duration;

use chatsync_types::ConversationEntry;
use tracing::{debug, info, warn};

use crate::collaborators::{PageAccessor, SessionLifecycle};
use crate::error::{SyncError, TransportError};
use crate::logging::SyncLogger;
use crate::supervisor::{ReconnectPolicy, execute_with_recovery};

/// The live remote session for one run.
///
/// Owns the driver and remembers which conversation is open and how many
/// pages of older history it has loaded, so a reconnect can put the view
/// back where it was before the failed step is retried. Every page call
/// goes through [`execute_with_recovery`].
pub struct Session<D> {
    driver: D,
    policy: ReconnectPolicy,
    view: ViewPosition,
    logger: Arc<dyn SyncLogger>,
}

/// What a reconnect has to rebuild.
#[derive(Debug, Clone, Default)]
struct ViewPosition {
    conversation: Option<String>,
    /// `request_older_history` calls that loaded something since the open.
    loaded_pages: u32,
    history_timeout: Duration,
}

impl<D> Session<D>
where
    D: PageAccessor + SessionLifecycle,
{
    pub fn new(driver: D, policy: ReconnectPolicy, logger: Arc<dyn SyncLogger>) -> Self {
        Self {
            driver,
            policy,
            view: ViewPosition::default(),
            logger,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Bring the session up. Not being able to do so ends the run.
    pub fn establish(&mut self) -> Result<(), SyncError> {
        let delay = self.policy.delay;
        let result = execute_with_recovery(
            &self.policy,
            &mut self.driver,
            |d| d.establish_session(),
            |d| {
                if let Err(e) = d.teardown_session() {
                    debug!(error = %e, "Teardown before retrying establish failed");
                }
                pause(delay);
                Ok(())
            },
            self.logger.as_ref(),
        );

        match result {
            Ok(()) => {
                info!("Session established");
                Ok(())
            }
            Err(SyncError::RetriesExhausted { last, .. }) | Err(SyncError::Transport(last)) => {
                Err(SyncError::SessionUnavailable(last))
            }
            Err(e) => Err(e),
        }
    }

    pub fn teardown(&mut self) {
        if let Err(e) = self.driver.teardown_session() {
            warn!(error = %e, "Session teardown failed");
        }
        self.view = ViewPosition::default();
    }

    pub fn list_conversations(&mut self) -> Result<Vec<ConversationEntry>, SyncError> {
        self.supervised(|d| d.list_conversations())
    }

    pub fn request_more_conversations(&mut self) -> Result<bool, SyncError> {
        self.supervised(|d| d.request_more_conversations())
    }

    pub fn open_conversation(&mut self, id: &str) -> Result<(), SyncError> {
        self.view = ViewPosition {
            conversation: Some(id.to_string()),
            loaded_pages: 0,
            history_timeout: Duration::ZERO,
        };
        self.supervised(|d| d.open_conversation(id))
    }

    pub fn visible_records(&mut self) -> Result<Vec<D::View>, SyncError> {
        self.supervised(|d| d.visible_records())
    }

    pub fn request_older_history(&mut self, timeout: Duration) -> Result<bool, SyncError> {
        self.view.history_timeout = timeout;
        let loaded = self.supervised(|d| d.request_older_history(timeout))?;
        if loaded {
            self.view.loaded_pages += 1;
        }
        Ok(loaded)
    }

    pub fn reached_history_start(&mut self) -> Result<bool, SyncError> {
        self.supervised(|d| d.reached_history_start())
    }

    fn supervised<T>(
        &mut self,
        op: impl FnMut(&mut D) -> Result<T, TransportError>,
    ) -> Result<T, SyncError> {
        let delay = self.policy.delay;
        let view = &self.view;
        execute_with_recovery(
            &self.policy,
            &mut self.driver,
            op,
            |d| reconnect(d, view, delay),
            self.logger.as_ref(),
        )
    }
}

/// Teardown, wait, re-establish, then reopen the conversation that was
/// active when the call failed and load its older history back to the
/// depth it had. A reopened conversation shows only its newest page.
fn reconnect<D>(driver: &mut D, view: &ViewPosition, delay: Duration) -> Result<(), TransportError>
where
    D: PageAccessor + SessionLifecycle,
{
    if let Err(e) = driver.teardown_session() {
        debug!(error = %e, "Teardown before reconnect failed");
    }
    pause(delay);
    driver.reestablish_session()?;

    let Some(id) = view.conversation.as_deref() else {
        info!("Reconnected");
        return Ok(());
    };
    driver.open_conversation(id)?;
    for restored in 0..view.loaded_pages {
        if !driver.request_older_history(view.history_timeout)? {
            return Err(TransportError::Unresponsive(format!(
                "history depth not restored ({} of {} pages)",
                restored, view.loaded_pages
            )));
        }
    }
    info!(conversation = id, pages = view.loaded_pages, "Reconnected");
    Ok(())
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogger;

    #[derive(Default)]
    struct Stubborn {
        establish_failures: u32,
        teardowns: u32,
    }

    impl SessionLifecycle for Stubborn {
        fn establish_session(&mut self) -> Result<(), TransportError> {
            if self.establish_failures > 0 {
                self.establish_failures -= 1;
                return Err(TransportError::SessionLost("driver not ready".into()));
            }
            Ok(())
        }

        fn teardown_session(&mut self) -> Result<(), TransportError> {
            self.teardowns += 1;
            Err(TransportError::Unresponsive("nothing to close".into()))
        }
    }

    impl PageAccessor for Stubborn {
        type View = ();

        fn list_conversations(&mut self) -> Result<Vec<ConversationEntry>, TransportError> {
            Ok(Vec::new())
        }

        fn request_more_conversations(&mut self) -> Result<bool, TransportError> {
            Ok(false)
        }

        fn open_conversation(&mut self, _id: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn visible_records(&mut self) -> Result<Vec<()>, TransportError> {
            Ok(Vec::new())
        }

        fn request_older_history(&mut self, _timeout: Duration) -> Result<bool, TransportError> {
            Ok(false)
        }

        fn reached_history_start(&mut self) -> Result<bool, TransportError> {
            Ok(true)
        }
    }

    #[test]
    fn establish_retries_past_a_failing_teardown() {
        let driver = Stubborn { establish_failures: 1, ..Default::default() };
        let mut session = Session::new(driver, ReconnectPolicy::immediate(3), Arc::new(NullLogger));

        session.establish().unwrap();
        assert_eq!(session.driver().teardowns, 1);
    }

    #[test]
    fn reconnect_fails_when_history_cannot_be_loaded_back() {
        let view = ViewPosition {
            conversation: Some("5511".into()),
            loaded_pages: 2,
            history_timeout: Duration::ZERO,
        };
        let err = reconnect(&mut Stubborn::default(), &view, Duration::ZERO).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("0 of 2 pages"));
    }
}
