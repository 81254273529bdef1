use thiserror::Error;

/// Failure talking to the remote page through the session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The session/driver went away (crashed browser, invalid session id).
    #[error("session lost: {0}")]
    SessionLost(String),

    /// The page stopped answering or an element went stale.
    #[error("page unresponsive: {0}")]
    Unresponsive(String),

    /// Anything a reconnect cannot fix.
    #[error("transport failure: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SessionLost(_) | Self::Unresponsive(_))
    }
}

/// The record lacks a field its identity is built from.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("cannot identify record: missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cannot establish session: {0}")]
    SessionUnavailable(TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Errors that end the current conversation but not the run.
    pub fn is_conversation_scoped(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } | Self::Transport(_) => true,
            Self::SessionUnavailable(_) | Self::Storage(_) | Self::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_session_and_page_failures_are_recoverable() {
        assert!(TransportError::SessionLost("gone".into()).is_recoverable());
        assert!(TransportError::Unresponsive("stale".into()).is_recoverable());
        assert!(!TransportError::Fatal("bad selector".into()).is_recoverable());
    }

    #[test]
    fn storage_errors_abort_the_run() {
        let err = SyncError::from(anyhow::anyhow!("disk full"));
        assert!(!err.is_conversation_scoped());
        let err = SyncError::RetriesExhausted {
            attempts: 3,
            last: TransportError::SessionLost("x".into()),
        };
        assert!(err.is_conversation_scoped());
    }
}
