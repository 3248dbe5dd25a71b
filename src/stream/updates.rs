use super::{ListenerId, LiveOddsStream, OddsListener};
use crate::feed::types::OddsQuote;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Listener end of the channel. Dropping the sender on stop ends the sequence
/// once the receiver has drained what was already sent.
struct Forward(Mutex<Option<mpsc::UnboundedSender<Arc<OddsQuote>>>>);

impl OddsListener for Forward {
    fn on_update(&self, quote: &Arc<OddsQuote>) {
        let tx = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(quote.clone());
        }
    }

    fn on_stop(&self) {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    }
}

/// Pull-based sequence of live quotes.
///
/// Nothing is registered until the first poll, which attaches a listener and
/// starts the source. Updates that arrive between polls are buffered in order.
/// When the source stops, buffered quotes are drained and the sequence ends.
/// Dropping the sequence detaches it, and stops the source if this sequence was
/// the one that started it.
pub struct OddsUpdates {
    stream: LiveOddsStream,
    rx: Option<mpsc::UnboundedReceiver<Arc<OddsQuote>>>,
    listener: Option<ListenerId>,
    owns_run: bool,
}

impl OddsUpdates {
    pub(super) fn new(stream: LiveOddsStream) -> Self {
        Self {
            stream,
            rx: None,
            listener: None,
            owns_run: false,
        }
    }

    pub fn game_key(&self) -> &str {
        self.stream.game_key()
    }
}

impl Stream for OddsUpdates {
    type Item = Arc<OddsQuote>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.rx.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            this.listener = Some(this.stream.add_listener(Forward(Mutex::new(Some(tx)))));
            this.owns_run = this.stream.start();
            this.rx = Some(rx);
        }
        match this.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for OddsUpdates {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.stream.remove_listener(id);
        }
        if self.owns_run {
            self.stream.stop();
        }
    }
}
