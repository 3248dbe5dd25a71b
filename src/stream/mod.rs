//! Live odds updates for one game.
//!
//! A [`LiveOddsStream`] ticks on a fixed period while started and pushes each
//! generated quote to its listeners. [`LiveOddsStream::updates`] exposes the same
//! source as a pull-based `Stream`.

pub mod updates;

use crate::feed::types::OddsQuote;
use crate::feed::QuoteGenerator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub use updates::OddsUpdates;

/// Receives pushed updates. Closures `Fn(&Arc<OddsQuote>)` implement this.
pub trait OddsListener: Send + Sync {
    fn on_update(&self, quote: &Arc<OddsQuote>);

    /// Called once when the stream is stopped.
    fn on_stop(&self) {}
}

impl<F> OddsListener for F
where
    F: Fn(&Arc<OddsQuote>) + Send + Sync,
{
    fn on_update(&self, quote: &Arc<OddsQuote>) {
        self(quote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Run {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Run {
    fn halt(self) {
        self.active.store(false, Ordering::Release);
        self.task.abort();
    }
}

#[derive(Default)]
struct State {
    listeners: Vec<(ListenerId, Arc<dyn OddsListener>)>,
    next_id: u64,
    run: Option<Run>,
}

struct Shared {
    game_key: String,
    period: Duration,
    generator: Mutex<Box<dyn QuoteGenerator>>,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> Vec<Arc<dyn OddsListener>> {
        self.state().listeners.iter().map(|(_, l)| l.clone()).collect()
    }

    /// Generate one quote and deliver it, bailing out as soon as the run is stopped.
    fn dispatch(&self, active: &AtomicBool) {
        let quote = {
            let mut generator = self
                .generator
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::new(generator.next_quote())
        };
        let listeners = self.listeners();
        tracing::trace!(game = %self.game_key, listeners = listeners.len(), "live tick");
        for listener in listeners {
            if !active.load(Ordering::Acquire) {
                return;
            }
            listener.on_update(&quote);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let run = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .run
            .take();
        if let Some(run) = run {
            run.halt();
        }
    }
}

/// Cheap to clone; clones share listeners and the running timer.
#[derive(Clone)]
pub struct LiveOddsStream {
    shared: Arc<Shared>,
}

impl LiveOddsStream {
    pub fn new(game_key: &str, period: Duration, generator: Box<dyn QuoteGenerator>) -> Self {
        Self {
            shared: Arc::new(Shared {
                game_key: game_key.to_string(),
                period,
                generator: Mutex::new(generator),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn game_key(&self) -> &str {
        &self.shared.game_key
    }

    pub fn period(&self) -> Duration {
        self.shared.period
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().run.is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.shared.state().listeners.len()
    }

    pub fn add_listener<L: OddsListener + 'static>(&self, listener: L) -> ListenerId {
        let mut state = self.shared.state();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Takes effect from the next tick. Returns false if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.shared.state();
        let before = state.listeners.len();
        state.listeners.retain(|(lid, _)| *lid != id);
        state.listeners.len() != before
    }

    /// Start ticking. Returns false if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = self.shared.state();
        if state.run.is_some() {
            return false;
        }
        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_loop(
            Arc::downgrade(&self.shared),
            active.clone(),
            self.shared.period,
        ));
        state.run = Some(Run { active, task });
        tracing::debug!(game = %self.shared.game_key, period_ms = self.shared.period.as_millis() as u64, "live stream started");
        true
    }

    /// Stop ticking and notify listeners. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let Some(run) = self.shared.state().run.take() else {
            return false;
        };
        run.halt();
        for listener in self.shared.listeners() {
            listener.on_stop();
        }
        tracing::debug!(game = %self.shared.game_key, "live stream stopped");
        true
    }

    /// Pull-based view of this stream. The source starts on the first poll.
    pub fn updates(&self) -> OddsUpdates {
        OddsUpdates::new(self.clone())
    }
}

async fn run_loop(shared: Weak<Shared>, active: Arc<AtomicBool>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !active.load(Ordering::Acquire) {
            break;
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.dispatch(&active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::{Moneyline, Spread, Total};
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        n: i32,
    }

    impl QuoteGenerator for Counter {
        fn next_quote(&mut self) -> OddsQuote {
            self.n += 1;
            OddsQuote::new(
                "Lakers vs Warriors",
                Moneyline { home: -100 - self.n, away: 100 + self.n },
                Spread { line: -3.5, home: -110, away: -110 },
                Total { points: 215.5, over: -110, under: -110 },
            )
        }
    }

    fn stream(period_ms: u64) -> LiveOddsStream {
        LiveOddsStream::new(
            "Lakers vs Warriors",
            Duration::from_millis(period_ms),
            Box::new(Counter { n: 0 }),
        )
    }

    fn counting_listener(count: &Arc<AtomicUsize>) -> impl OddsListener {
        let count = count.clone();
        move |_: &Arc<OddsQuote>| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_updates_arrive_on_period() {
        let s = stream(20);
        let count = Arc::new(AtomicUsize::new(0));
        s.add_listener(counting_listener(&count));

        assert!(s.start());
        assert!(!s.start(), "second start is a no-op");
        tokio::time::sleep(Duration::from_millis(110)).await;
        s.stop();

        let n = count.load(Ordering::SeqCst);
        assert!((3..=6).contains(&n), "got {} updates", n);
    }

    #[tokio::test]
    async fn test_no_updates_after_stop() {
        let s = stream(10);
        let count = Arc::new(AtomicUsize::new(0));
        s.add_listener(counting_listener(&count));
        s.start();
        tokio::time::sleep(Duration::from_millis(35)).await;

        assert!(s.stop());
        assert!(!s.is_running());
        let at_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_stop);
    }

    #[tokio::test]
    async fn test_removed_listener_is_skipped() {
        let s = stream(10);
        let kept = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));
        s.add_listener(counting_listener(&kept));
        let id = s.add_listener(counting_listener(&removed));

        assert!(s.remove_listener(id));
        assert!(!s.remove_listener(id));
        s.start();
        tokio::time::sleep(Duration::from_millis(45)).await;
        s.stop();

        assert!(kept.load(Ordering::SeqCst) > 0);
        assert_eq!(removed.load(Ordering::SeqCst), 0);
        assert_eq!(s.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_can_stop_stream_from_callback() {
        let s = stream(10);
        let count = Arc::new(AtomicUsize::new(0));
        let handle = s.clone();
        let seen = count.clone();
        s.add_listener(move |_: &Arc<OddsQuote>| {
            if seen.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                handle.stop();
            }
        });
        s.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!s.is_running());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let s = stream(10);
        let count = Arc::new(AtomicUsize::new(0));
        s.add_listener(counting_listener(&count));

        s.start();
        tokio::time::sleep(Duration::from_millis(25)).await;
        s.stop();
        let first_run = count.load(Ordering::SeqCst);

        assert!(s.start());
        tokio::time::sleep(Duration::from_millis(25)).await;
        s.stop();
        assert!(count.load(Ordering::SeqCst) > first_run);
    }
}
