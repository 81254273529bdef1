use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;

use crate::supervisor::ReconnectPolicy;

/// Runtime configuration, read from `CHATSYNC_*` environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    pub reconnect: ReconnectPolicy,
    /// Upper bound for one "load older history" request.
    pub history_timeout: Duration,
    /// Stop paging back after this many pages. `None` pages until the start.
    pub max_history_pages: Option<u32>,
    /// Zone the remote client renders its local times in.
    pub timezone: Tz,
    /// Display name of the account owner; records from it are outbound.
    pub account_name: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("chatsync.db"),
            reconnect: ReconnectPolicy::default(),
            history_timeout: Duration::from_secs(10),
            max_history_pages: None,
            timezone: chrono_tz::America::Sao_Paulo,
            account_name: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let db_path = std::env::var("CHATSYNC_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let max_attempts = env_parse("CHATSYNC_MAX_ATTEMPTS")?.unwrap_or(defaults.reconnect.max_attempts);
        if max_attempts == 0 {
            return Err(anyhow!("CHATSYNC_MAX_ATTEMPTS must be at least 1"));
        }
        let retry_delay = env_parse::<u64>("CHATSYNC_RETRY_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect.delay);
        let history_timeout = env_parse::<u64>("CHATSYNC_HISTORY_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.history_timeout);
        let max_history_pages = env_parse("CHATSYNC_MAX_HISTORY_PAGES")?;

        let timezone = match std::env::var("CHATSYNC_TIMEZONE") {
            Ok(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow!("CHATSYNC_TIMEZONE {:?}: {}", name, e))?,
            Err(_) => defaults.timezone,
        };

        let account_name = std::env::var("CHATSYNC_ACCOUNT_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            db_path,
            reconnect: ReconnectPolicy { max_attempts, delay: retry_delay },
            history_timeout,
            max_history_pages,
            timezone,
            account_name,
        })
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {}={:?}", key, raw)),
        Err(_) => Ok(None),
    }
}
