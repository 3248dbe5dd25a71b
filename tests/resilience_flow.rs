// Integration tests for the rate limit / retry / circuit breaker chain

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use live_odds::feed::types::{Moneyline, Spread, Total};
    use live_odds::feed::fastest::FastestSource;
    use live_odds::resilience::{CircuitBreaker, CircuitState, RateLimiter, ResilientFetcher, RetryPolicy};
    use live_odds::{AccessError, OddsQuote, OddsSource};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    fn quote(game_key: &str) -> OddsQuote {
        OddsQuote::new(
            game_key,
            Moneyline { home: -150, away: 130 },
            Spread { line: -3.5, home: -110, away: -110 },
            Total { points: 215.5, over: -105, under: -115 },
        )
    }

    /// Records call instants; fails while `down` is set.
    #[derive(Default)]
    struct Scripted {
        calls: Mutex<Vec<Instant>>,
        down: AtomicBool,
    }

    impl Scripted {
        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl OddsSource for Scripted {
        async fn fetch_odds(&self, game_key: &str) -> Result<OddsQuote, AccessError> {
            self.calls.lock().unwrap().push(Instant::now());
            if self.down.load(Ordering::SeqCst) {
                return Err(AccessError::fetch_failed(game_key, "503"));
            }
            Ok(quote(game_key))
        }
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_burst_of_fetches() {
        let source = Arc::new(Scripted::default());
        let fetcher = ResilientFetcher::new(
            source.clone(),
            RateLimiter::new(20.0),
            RetryPolicy::new(1, Duration::ZERO),
            CircuitBreaker::new(10, Duration::from_secs(30)),
        );
        let keys: Vec<String> = (0..4).map(|i| format!("Game {}", i)).collect();
        let outcomes = fetcher.fetch_many(&keys).await;
        assert!(outcomes.iter().all(|o| o.is_success()));

        let mut calls = source.calls.lock().unwrap().clone();
        calls.sort();
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(49), "gap {:?}", pair[1] - pair[0]);
        }
    }

    #[tokio::test]
    async fn test_breaker_trips_then_recovers_through_fetcher() {
        let source = Arc::new(Scripted::default());
        source.down.store(true, Ordering::SeqCst);
        let fetcher = ResilientFetcher::new(
            source.clone(),
            RateLimiter::new(1000.0),
            RetryPolicy::new(1, Duration::ZERO),
            CircuitBreaker::new(3, Duration::from_millis(60)),
        );

        for _ in 0..3 {
            let _ = fetcher.fetch_game_odds("Lakers vs Warriors").await;
        }
        assert_eq!(fetcher.breaker().state(), CircuitState::Open);
        assert_eq!(source.call_count(), 3);

        let err = fetcher.fetch_game_odds("Lakers vs Warriors").await.unwrap_err();
        assert!(matches!(err, AccessError::CircuitOpen { .. }));
        assert_eq!(source.call_count(), 3, "open circuit must not reach the source");

        source.down.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(70)).await;
        fetcher.fetch_game_odds("Lakers vs Warriors").await.unwrap();

        let snapshot = fetcher.breaker().snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.total_trips, 1);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens_circuit() {
        let source = Arc::new(Scripted::default());
        source.down.store(true, Ordering::SeqCst);
        let fetcher = ResilientFetcher::new(
            source.clone(),
            RateLimiter::new(1000.0),
            RetryPolicy::new(1, Duration::ZERO),
            CircuitBreaker::new(1, Duration::from_millis(40)),
        );

        let _ = fetcher.fetch_game_odds("Celtics vs Heat").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let trial = fetcher.fetch_game_odds("Celtics vs Heat").await.unwrap_err();
        assert!(matches!(trial.root_cause(), AccessError::FetchFailed { .. }));
        assert_eq!(fetcher.breaker().state(), CircuitState::Open);

        let rejected = fetcher.fetch_game_odds("Celtics vs Heat").await.unwrap_err();
        match rejected {
            AccessError::CircuitOpen { retry_in } => assert!(retry_in > Duration::from_millis(20)),
            other => panic!("expected CircuitOpen, got {other}"),
        }
    }

    /// Sleeps, then answers or fails.
    struct Delayed {
        name: &'static str,
        delay: Duration,
        fail: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OddsSource for Delayed {
        async fn fetch_odds(&self, game_key: &str) -> Result<OddsQuote, AccessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(AccessError::fetch_failed(game_key, self.name));
            }
            let mut q = quote(game_key);
            q.moneyline.home = if self.name == "fast" { -120 } else { -200 };
            Ok(q)
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn delayed(name: &'static str, delay_ms: u64, fail: bool) -> Arc<Delayed> {
        Arc::new(Delayed {
            name,
            delay: Duration::from_millis(delay_ms),
            fail,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_fastest_source_behind_fetcher() {
        let fast = delayed("fast", 5, false);
        let slow = delayed("slow", 80, false);
        let broken = delayed("broken", 1, true);
        let racer = FastestSource::new(vec![slow.clone(), broken.clone(), fast.clone()]);
        let fetcher = ResilientFetcher::with_defaults(Arc::new(racer));

        let started = Instant::now();
        let q = fetcher.fetch_game_odds("Bulls vs Knicks").await.unwrap();
        assert_eq!(q.moneyline.home, -120);
        assert!(started.elapsed() < Duration::from_millis(70));
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    }
}
