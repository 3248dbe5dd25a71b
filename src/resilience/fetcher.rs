use super::circuit_breaker::CircuitBreaker;
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use crate::config::Config;
use crate::error::AccessError;
use crate::feed::types::OddsQuote;
use crate::feed::OddsSource;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Result of one key in a batch fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub game_key: String,
    pub status: FetchStatus,
}

#[derive(Debug, Clone)]
pub enum FetchStatus {
    Fetched(Arc<OddsQuote>),
    Failed(AccessError),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, FetchStatus::Fetched(_))
    }

    pub fn quote(&self) -> Option<&Arc<OddsQuote>> {
        match &self.status {
            FetchStatus::Fetched(q) => Some(q),
            FetchStatus::Failed(_) => None,
        }
    }

    /// Failure reason, if the fetch failed.
    pub fn error(&self) -> Option<&AccessError> {
        match &self.status {
            FetchStatus::Fetched(_) => None,
            FetchStatus::Failed(e) => Some(e),
        }
    }
}

/// Rate limiting, retry and circuit breaking around one odds source.
///
/// Order is breaker → retry → (rate limit, raw fetch): a whole retry loop
/// counts as one success or failure toward the breaker.
pub struct ResilientFetcher {
    source: Arc<dyn OddsSource>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResilientFetcher {
    pub fn new(
        source: Arc<dyn OddsSource>,
        limiter: RateLimiter,
        retry: RetryPolicy,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            source,
            limiter,
            retry,
            breaker,
        }
    }

    pub fn from_config(source: Arc<dyn OddsSource>, config: &Config) -> Self {
        Self::new(
            source,
            RateLimiter::new(config.rate_limit.requests_per_second),
            RetryPolicy::from_config(&config.retry),
            CircuitBreaker::from_config(&config.circuit_breaker),
        )
    }

    /// Defaults for one source: 10 req/s, 2 attempts from 500ms, 3 failures / 30s.
    pub fn with_defaults(source: Arc<dyn OddsSource>) -> Self {
        Self::new(
            source,
            RateLimiter::new(10.0),
            RetryPolicy::new(2, Duration::from_millis(500)),
            CircuitBreaker::new(3, Duration::from_secs(30)),
        )
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn fetch_game_odds(&self, game_key: &str) -> Result<OddsQuote, AccessError> {
        self.breaker
            .call(|| {
                self.retry.execute(|| async move {
                    self.limiter.acquire().await;
                    self.source.fetch_odds(game_key).await
                })
            })
            .await
    }

    /// Fetch every key concurrently; one key's failure never affects the others.
    /// Outcomes come back in input order.
    pub async fn fetch_many(&self, game_keys: &[String]) -> Vec<FetchOutcome> {
        let started = Instant::now();
        let outcomes = join_all(game_keys.iter().map(|key| async move {
            let status = match self.fetch_game_odds(key).await {
                Ok(quote) => FetchStatus::Fetched(Arc::new(quote)),
                Err(e) => FetchStatus::Failed(e),
            };
            FetchOutcome {
                game_key: key.clone(),
                status,
            }
        }))
        .await;

        let fetched = outcomes.iter().filter(|o| o.is_success()).count();
        tracing::info!(
            source = self.source.name(),
            requested = game_keys.len(),
            fetched,
            failed = game_keys.len() - fetched,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch fetch complete"
        );
        outcomes
    }
}
