use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Lowest rate accepted; anything below is clamped so the interval stays finite.
const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

/// Enforces a minimum spacing between granted requests.
///
/// All callers share one "last granted" timestamp. A caller that has to wait
/// sleeps for its remaining delta and re-checks on wake, so concurrent callers
/// are granted one interval apart without a fixed queue.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_granted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let rps = if requests_per_second.is_finite() {
            requests_per_second.max(MIN_REQUESTS_PER_SECOND)
        } else {
            MIN_REQUESTS_PER_SECOND
        };
        Self::with_interval(Duration::from_secs_f64(1.0 / rps))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_granted: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until a request may be sent, then record the grant.
    pub async fn acquire(&self) {
        loop {
            match self.try_grant(Instant::now()) {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Grants immediately (returns `None`) or reports how long to wait.
    fn try_grant(&self, now: Instant) -> Option<Duration> {
        let mut last = self
            .last_granted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(prev) = *last {
            let next_allowed = prev + self.interval;
            if now < next_allowed {
                return Some(next_allowed - now);
            }
        }
        *last = Some(now);
        None
    }
}
