use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the odds access layer.
///
/// `Clone` so a single coalesced fetch result can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AccessError {
    /// Transient failure from the underlying odds source.
    #[error("fetch failed for {game_key}: {reason}")]
    FetchFailed { game_key: String, reason: String },

    /// Every retry attempt failed; `last` is the final attempt's error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<AccessError>,
    },

    /// The circuit breaker rejected the call without running it.
    #[error("circuit open, next trial in {}ms", retry_in.as_millis())]
    CircuitOpen { retry_in: Duration },

    /// A live-update subscriber returned an error or panicked.
    #[error("subscriber callback failed for {game_key}: {reason}")]
    SubscriberCallback { game_key: String, reason: String },
}

impl AccessError {
    pub fn fetch_failed(game_key: &str, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            game_key: game_key.to_string(),
            reason: reason.into(),
        }
    }

    /// Only transient source failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailed { .. })
    }

    /// The innermost error, looking through `RetryExhausted`.
    pub fn root_cause(&self) -> &AccessError {
        match self {
            Self::RetryExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}
