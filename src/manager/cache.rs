use crate::feed::types::OddsQuote;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Longest expiry an entry is given. Larger ages are treated as "never expires".
const MAX_ENTRY_AGE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// One cached quote. Replaced wholesale on every write.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub quote: Arc<OddsQuote>,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(quote: Arc<OddsQuote>, stored_at: Instant, max_age: Duration) -> Self {
        Self {
            quote,
            stored_at,
            expires_at: stored_at
                .checked_add(max_age.min(MAX_ENTRY_AGE))
                .unwrap_or(stored_at),
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct OddsCache {
    entries: HashMap<String, CacheEntry>,
}

impl OddsCache {
    /// Entry younger than `max_age`, if any.
    pub fn fresh(&self, game_key: &str, now: Instant, max_age: Duration) -> Option<Arc<OddsQuote>> {
        self.entries
            .get(game_key)
            .filter(|e| e.age(now) < max_age)
            .map(|e| e.quote.clone())
    }

    /// Entry still inside its own expiry.
    pub fn live(&self, game_key: &str, now: Instant) -> Option<Arc<OddsQuote>> {
        self.entries
            .get(game_key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.quote.clone())
    }

    pub fn entry(&self, game_key: &str) -> Option<&CacheEntry> {
        self.entries.get(game_key)
    }

    pub fn insert(&mut self, game_key: &str, quote: Arc<OddsQuote>, now: Instant, max_age: Duration) {
        self.entries
            .insert(game_key.to_string(), CacheEntry::new(quote, now, max_age));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
