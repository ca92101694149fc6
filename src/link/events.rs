//! Typed publish/subscribe channels.
//!
//! Each event kind (lines, log records, connect, disconnect, ...) gets its own
//! [`EventChannel`]. Every subscriber receives every event published after it
//! subscribed, exactly once and in publish order. Subscribers are unbounded so
//! a slow consumer never causes another consumer to miss a line.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Receiving end of an [`EventChannel`] subscription.
///
/// Dropping it unsubscribes; the channel prunes it on the next publish.
pub type Subscription<T> = mpsc::UnboundedReceiver<T>;

#[derive(Debug)]
struct ChannelState<T> {
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    closed: bool,
}

/// A multi-subscriber event channel.
#[derive(Debug)]
pub struct EventChannel<T> {
    state: Mutex<ChannelState<T>>,
}

impl<T: Clone> EventChannel<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Start receiving events published from now on.
    ///
    /// Subscribing to a closed channel yields a subscription that is already
    /// at its end.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if !state.closed {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Deliver `value` to every live subscriber, returning how many got it.
    pub fn publish(&self, value: T) -> usize {
        let mut state = self.state.lock();
        state
            .subscribers
            .retain(|tx| tx.send(value.clone()).is_ok());
        state.subscribers.len()
    }

    /// Number of subscribers that were alive at the last publish.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    /// End every subscription. Later publishes are dropped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T: Clone> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}
