//! Caching and subscription layer over the resilient fetcher and live streams.
//!
//! Reads go cache → in-flight fetch → [`ResilientFetcher`]. Concurrent misses for
//! a key share one spawned fetch, so a caller that gives up does not cancel it
//! for the others. Live updates overwrite the cache and fan out to the key's
//! subscribers on the stream task, in registration order.

pub mod cache;

use crate::config::Config;
use crate::engine::value::{self, ProbabilityModel, SpreadModel, ValueBet};
use crate::error::AccessError;
use crate::feed::types::OddsQuote;
use crate::feed::{LiveSource, OddsSource};
use crate::resilience::{FetchOutcome, ResilientFetcher};
use crate::stream::LiveOddsStream;
use cache::OddsCache;
use futures_util::future::{join_all, BoxFuture, Shared};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

type FetchResult = Result<Arc<OddsQuote>, AccessError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Live-update callback. Errors and panics are logged, never propagated.
pub type SubscriberFn = dyn Fn(&OddsQuote) -> anyhow::Result<()> + Send + Sync;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct InFlight {
    id: u64,
    fetch: SharedFetch,
    abort: AbortHandle,
}

/// Clears the key's in-flight slot when the fetch task ends, including by
/// panic or abort.
struct FetchSlot<'a> {
    inner: &'a Inner,
    game_key: &'a str,
    id: u64,
}

impl Drop for FetchSlot<'_> {
    fn drop(&mut self) {
        self.inner.finish_fetch(self.game_key, self.id);
    }
}

enum Lookup {
    Cached(Arc<OddsQuote>),
    Pending(SharedFetch),
}

struct LiveGame {
    stream: LiveOddsStream,
    subscribers: Vec<(u64, Arc<SubscriberFn>)>,
}

/// Result of a value-bet scan: opportunities sorted by descending edge, plus
/// the keys that could not be fetched.
#[derive(Debug, Default)]
pub struct ValueScan {
    pub opportunities: Vec<ValueBet>,
    pub failures: Vec<(String, AccessError)>,
}

struct Inner {
    config: Config,
    fetcher: ResilientFetcher,
    live_source: Arc<dyn LiveSource>,
    model: SpreadModel,
    cache: Mutex<OddsCache>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    games: Mutex<HashMap<String, LiveGame>>,
    next_id: AtomicU64,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn store(&self, game_key: &str, quote: Arc<OddsQuote>, max_age: Duration) {
        lock(&self.cache).insert(game_key, quote, Instant::now(), max_age);
    }

    /// Join the key's in-flight fetch or start one. The cache is re-checked
    /// under the in-flight lock so a fetch that just landed is not repeated.
    fn begin_fetch(self: &Arc<Self>, game_key: &str, max_age: Duration) -> Lookup {
        let mut in_flight = lock(&self.in_flight);
        if let Some(quote) = lock(&self.cache).fresh(game_key, Instant::now(), max_age) {
            return Lookup::Cached(quote);
        }
        if let Some(pending) = in_flight.get(game_key) {
            tracing::debug!(game = game_key, "joining in-flight fetch");
            return Lookup::Pending(pending.fetch.clone());
        }

        let id = self.next_id();
        let inner = self.clone();
        let key = game_key.to_string();
        let task = tokio::spawn(async move {
            let _in_flight = FetchSlot {
                inner: &inner,
                game_key: &key,
                id,
            };
            let result = inner.fetcher.fetch_game_odds(&key).await.map(Arc::new);
            if let Ok(quote) = &result {
                inner.store(&key, quote.clone(), max_age);
            }
            result
        });
        let abort = task.abort_handle();
        let key = game_key.to_string();
        let fetch = async move {
            task.await.unwrap_or_else(|e| {
                Err(AccessError::fetch_failed(&key, format!("fetch task ended: {}", e)))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(
            game_key.to_string(),
            InFlight {
                id,
                fetch: fetch.clone(),
                abort,
            },
        );
        Lookup::Pending(fetch)
    }

    fn finish_fetch(&self, game_key: &str, id: u64) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(game_key).is_some_and(|p| p.id == id) {
            in_flight.remove(game_key);
        }
    }

    fn fallback(&self, game_key: &str, error: AccessError) -> FetchResult {
        if self.config.cache.serve_stale_on_error {
            if let Some(entry) = lock(&self.cache).entry(game_key) {
                tracing::warn!(
                    game = game_key,
                    age_ms = entry.age(Instant::now()).as_millis() as u64,
                    error = %error,
                    "fetch failed, serving stale odds"
                );
                return Ok(entry.quote.clone());
            }
        }
        Err(error)
    }

    fn open_game(self: &Arc<Self>, game_key: &str) -> LiveGame {
        let stream = LiveOddsStream::new(
            game_key,
            self.config.stream.period(),
            self.live_source.open(game_key),
        );
        let manager = Arc::downgrade(self);
        let key = game_key.to_string();
        stream.add_listener(move |quote: &Arc<OddsQuote>| {
            if let Some(inner) = manager.upgrade() {
                inner.on_live_update(&key, quote);
            }
        });
        LiveGame {
            stream,
            subscribers: Vec::new(),
        }
    }

    fn on_live_update(&self, game_key: &str, quote: &Arc<OddsQuote>) {
        self.store(game_key, quote.clone(), self.config.cache.max_age());

        let subscribers: Vec<Arc<SubscriberFn>> = lock(&self.games)
            .get(game_key)
            .map(|g| g.subscribers.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in subscribers {
            let reason = match panic::catch_unwind(AssertUnwindSafe(|| callback(quote.as_ref()))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            let err = AccessError::SubscriberCallback {
                game_key: game_key.to_string(),
                reason,
            };
            tracing::warn!(error = %err, "live update not delivered");
        }
    }

    fn unsubscribe(&self, game_key: &str, id: u64) {
        let mut games = lock(&self.games);
        let Some(game) = games.get_mut(game_key) else {
            return;
        };
        let before = game.subscribers.len();
        game.subscribers.retain(|(sid, _)| *sid != id);
        if before != game.subscribers.len() && game.subscribers.is_empty() {
            game.stream.stop();
            tracing::info!(game = game_key, "last subscriber left, live stream stopped");
        }
    }

    fn shutdown(&self) -> usize {
        let games: Vec<LiveGame> = lock(&self.games).drain().map(|(_, g)| g).collect();
        let stopped = games.iter().filter(|g| g.stream.stop()).count();
        let pending: Vec<InFlight> = lock(&self.in_flight).drain().map(|(_, p)| p).collect();
        for fetch in pending {
            fetch.abort.abort();
        }
        lock(&self.cache).clear();
        stopped
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to one live-update subscription. Unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    manager: Weak<Inner>,
    game_key: String,
    id: u64,
}

impl Subscription {
    pub fn game_key(&self) -> &str {
        &self.game_key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.manager.upgrade() {
            inner.unsubscribe(&self.game_key, self.id);
        }
    }
}

/// Owns the cache, in-flight table and per-game live streams.
///
/// Dropping the manager stops every live stream it started.
pub struct DataManager {
    inner: Arc<Inner>,
}

impl DataManager {
    pub fn new(config: Config, source: Arc<dyn OddsSource>, live_source: Arc<dyn LiveSource>) -> Self {
        let fetcher = ResilientFetcher::from_config(source, &config);
        Self::with_fetcher(config, fetcher, live_source)
    }

    pub fn with_fetcher(
        config: Config,
        fetcher: ResilientFetcher,
        live_source: Arc<dyn LiveSource>,
    ) -> Self {
        let model = SpreadModel::from_config(&config.value_bets);
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                live_source,
                model,
                cache: Mutex::new(OddsCache::default()),
                in_flight: Mutex::new(HashMap::new()),
                games: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn fetcher(&self) -> &ResilientFetcher {
        &self.inner.fetcher
    }

    /// Quote for `game_key` no older than `max_age`, fetching if needed.
    ///
    /// Concurrent callers that miss share one fetch; its result is stored with
    /// the `max_age` of the caller that started it.
    pub async fn get_game_data(&self, game_key: &str, max_age: Duration) -> FetchResult {
        if let Some(quote) = lock(&self.inner.cache).fresh(game_key, Instant::now(), max_age) {
            tracing::debug!(game = game_key, "cache hit");
            return Ok(quote);
        }
        let fetch = match self.inner.begin_fetch(game_key, max_age) {
            Lookup::Cached(quote) => return Ok(quote),
            Lookup::Pending(fetch) => fetch,
        };
        match fetch.await {
            Ok(quote) => Ok(quote),
            Err(e) => self.inner.fallback(game_key, e),
        }
    }

    /// [`get_game_data`](Self::get_game_data) with the configured cache age.
    pub async fn game_data(&self, game_key: &str) -> FetchResult {
        self.get_game_data(game_key, self.inner.config.cache.max_age()).await
    }

    /// Cached quote that has not passed its own expiry. Never fetches.
    pub fn cached(&self, game_key: &str) -> Option<Arc<OddsQuote>> {
        lock(&self.inner.cache).live(game_key, Instant::now())
    }

    pub fn cache_len(&self) -> usize {
        lock(&self.inner.cache).len()
    }

    /// Fetch every key concurrently through the fetcher, caching successes.
    pub async fn fetch_many(&self, game_keys: &[String]) -> Vec<FetchOutcome> {
        let outcomes = self.inner.fetcher.fetch_many(game_keys).await;
        let max_age = self.inner.config.cache.max_age();
        for outcome in &outcomes {
            if let Some(quote) = outcome.quote() {
                self.inner.store(&outcome.game_key, quote.clone(), max_age);
            }
        }
        outcomes
    }

    /// Register `callback` for live updates on `game_key`. The key's stream
    /// starts with its first subscriber and stops when the last one leaves.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_to_game<F>(&self, game_key: &str, callback: F) -> Subscription
    where
        F: Fn(&OddsQuote) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        let inner = &self.inner;
        let mut games = lock(&inner.games);
        let game = games
            .entry(game_key.to_string())
            .or_insert_with(|| inner.open_game(game_key));
        game.subscribers.push((id, Arc::new(callback)));
        if game.stream.start() {
            tracing::info!(
                game = game_key,
                period_ms = inner.config.stream.period_ms,
                "live stream started"
            );
        }
        Subscription {
            manager: Arc::downgrade(&self.inner),
            game_key: game_key.to_string(),
            id,
        }
    }

    pub fn subscriber_count(&self, game_key: &str) -> usize {
        lock(&self.inner.games)
            .get(game_key)
            .map_or(0, |g| g.subscribers.len())
    }

    pub fn is_streaming(&self, game_key: &str) -> bool {
        lock(&self.inner.games)
            .get(game_key)
            .is_some_and(|g| g.stream.is_running())
    }

    /// Scan `game_keys` with the configured spread model.
    pub async fn detect_value_bets(&self, game_keys: &[String], min_edge: f64) -> ValueScan {
        self.detect_value_bets_with(game_keys, min_edge, &self.inner.model)
            .await
    }

    /// Scan `game_keys` with a caller-supplied model. Keys that cannot be
    /// fetched are reported in [`ValueScan::failures`].
    pub async fn detect_value_bets_with(
        &self,
        game_keys: &[String],
        min_edge: f64,
        model: &dyn ProbabilityModel,
    ) -> ValueScan {
        let max_age = self.inner.config.cache.max_age();
        let results = join_all(
            game_keys
                .iter()
                .map(|key| async move { (key, self.get_game_data(key, max_age).await) }),
        )
        .await;

        let mut scan = ValueScan::default();
        for (key, result) in results {
            match result {
                Ok(quote) => scan
                    .opportunities
                    .extend(value::scan_quote(&quote, model, min_edge)),
                Err(e) => scan.failures.push((key.clone(), e)),
            }
        }
        value::rank(&mut scan.opportunities);
        tracing::info!(
            games = game_keys.len(),
            opportunities = scan.opportunities.len(),
            failures = scan.failures.len(),
            min_edge,
            "value bet scan complete"
        );
        scan
    }

    /// Stop every live stream and clear the cache, in-flight fetches and
    /// subscriber table. Outstanding [`Subscription`]s become no-ops.
    pub fn shutdown(&self) {
        let stopped = self.inner.shutdown();
        tracing::info!(streams_stopped = stopped, "data manager shut down");
    }
}

impl Drop for DataManager {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}
