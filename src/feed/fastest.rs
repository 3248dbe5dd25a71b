//! Race several odds sources for the same game and keep the first success.

use super::types::OddsQuote;
use super::OddsSource;
use crate::error::AccessError;
use async_trait::async_trait;
use futures_util::future::{select_ok, BoxFuture};
use futures_util::FutureExt;
use std::sync::Arc;

pub struct FastestSource {
    sources: Vec<Arc<dyn OddsSource>>,
}

impl FastestSource {
    pub fn new(sources: Vec<Arc<dyn OddsSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl OddsSource for FastestSource {
    async fn fetch_odds(&self, game_key: &str) -> Result<OddsQuote, AccessError> {
        if self.sources.is_empty() {
            return Err(AccessError::fetch_failed(game_key, "no sources configured"));
        }

        let races: Vec<BoxFuture<'_, Result<(OddsQuote, &str), AccessError>>> = self
            .sources
            .iter()
            .map(|source| {
                async move {
                    let quote = source.fetch_odds(game_key).await?;
                    Ok((quote, source.name()))
                }
                .boxed()
            })
            .collect();

        match select_ok(races).await {
            Ok(((quote, winner), _still_running)) => {
                tracing::debug!(game = game_key, source = winner, "fastest source answered");
                Ok(quote)
            }
            // select_ok surfaces the last error once every source has failed
            Err(e) => Err(AccessError::fetch_failed(
                game_key,
                format!("all {} sources failed, last: {}", self.sources.len(), e),
            )),
        }
    }

    fn name(&self) -> &str {
        "fastest"
    }
}
