pub mod fastest;
pub mod simulated;
pub mod types;

use crate::error::AccessError;
use async_trait::async_trait;
use types::OddsQuote;

/// The raw "fetch odds for game" call supplied by the environment.
/// Shared across concurrent fetches, so implementations take `&self`.
#[async_trait]
pub trait OddsSource: Send + Sync {
    async fn fetch_odds(&self, game_key: &str) -> Result<OddsQuote, AccessError>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "odds-source"
    }
}

/// Produces successive live quotes for one game.
pub trait QuoteGenerator: Send {
    fn next_quote(&mut self) -> OddsQuote;
}

/// Opens a live quote generator per game key.
pub trait LiveSource: Send + Sync {
    fn open(&self, game_key: &str) -> Box<dyn QuoteGenerator>;
}
