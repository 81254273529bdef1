use std::time::Duration;

use chatsync_types::SyncEvent;
use tracing::warn;

use crate::error::{SyncError, TransportError};
use crate::logging::SyncLogger;

/// Bounded retry for transport calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// Pause between tearing the session down and bringing it back.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl ReconnectPolicy {
    /// Same attempt budget without any waiting. Used by tests and replays.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` against `ctx`, calling `recover` after every recoverable
/// failure and retrying the same step. Every call of `op` and every failed
/// `recover` uses one of `policy.max_attempts` attempts.
///
/// A non-recoverable error from `op` is returned at once. A non-recoverable
/// error from `recover` means no session can be brought back and surfaces
/// as [`SyncError::SessionUnavailable`]. A recoverable one means the step
/// cannot be retried yet, so `recover` runs again before `op` does.
pub fn execute_with_recovery<C, T, Op, Rec>(
    policy: &ReconnectPolicy,
    ctx: &mut C,
    mut op: Op,
    mut recover: Rec,
    logger: &dyn SyncLogger,
) -> Result<T, SyncError>
where
    C: ?Sized,
    Op: FnMut(&mut C) -> Result<T, TransportError>,
    Rec: FnMut(&mut C) -> Result<(), TransportError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    let mut err = match op(ctx) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    loop {
        if !err.is_recoverable() {
            return Err(SyncError::Transport(err));
        }
        if attempt >= max_attempts {
            warn!(attempt, max_attempts, error = %err, "Max retries reached");
            return Err(SyncError::RetriesExhausted { attempts: attempt, last: err });
        }

        warn!(attempt, max_attempts, error = %err, "Transport error, reconnecting");
        logger.log(SyncEvent::Reconnecting {
            attempt,
            max_attempts,
            error: err.to_string(),
        });
        attempt += 1;

        err = match recover(ctx) {
            Ok(()) => match op(ctx) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            },
            Err(recover_err) if !recover_err.is_recoverable() => {
                return Err(SyncError::SessionUnavailable(recover_err));
            }
            Err(recover_err) => {
                warn!(attempt, error = %recover_err, "Reconnect did not restore the view");
                recover_err
            }
        };
    }
}
