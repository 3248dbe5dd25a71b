pub mod circuit_breaker;
pub mod fetcher;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use fetcher::{FetchOutcome, FetchStatus, ResilientFetcher};
pub use rate_limiter::RateLimiter;
pub use retry::{retry_with_backoff, RetryPolicy};
