//! Resilient access to live sports odds: rate limiting, retry with backoff,
//! circuit breaking, live update streams and a caching data manager that
//! detects value bets.

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod manager;
pub mod resilience;
pub mod stream;

pub use config::Config;
pub use error::AccessError;
pub use feed::types::{BetSide, OddsQuote};
pub use feed::{LiveSource, OddsSource, QuoteGenerator};
pub use manager::{DataManager, Subscription, ValueScan};
pub use stream::{LiveOddsStream, OddsListener, OddsUpdates};
