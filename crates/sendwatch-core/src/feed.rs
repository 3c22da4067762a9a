//! Commit feed connecting a store to its dispatchers.
//!
//! The store owns a [`ChangeFeed`] and publishes one [`ChangeEvent`] per
//! committed transaction. Publishing is `Send + Sync` so commits may happen on
//! any thread; each dispatcher holds a [`FeedSubscription`] and drains it on
//! its own context, which is how events are marshalled onto that context.

use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::event::ChangeEvent;

/// Default number of unconsumed events buffered per subscription.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Publisher side of a store's commit notifications.
pub struct ChangeFeed<K: Eq + Hash> {
    tx: broadcast::Sender<Arc<ChangeEvent<K>>>,
}

impl<K: Eq + Hash> ChangeFeed<K> {
    /// Create a feed buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a committed transaction.
    ///
    /// Empty events are not published. Returns the number of subscribers
    /// the event was queued for.
    pub fn publish(&self, event: ChangeEvent<K>) -> usize {
        if event.is_empty() {
            return 0;
        }

        match self.tx.send(Arc::new(event)) {
            Ok(receivers) => receivers,
            // No subscribers attached
            Err(_) => 0,
        }
    }

    /// Attach a new subscriber. It only sees events published after this call.
    pub fn subscribe(&self) -> FeedSubscription<K> {
        FeedSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<K: Eq + Hash> Default for ChangeFeed<K> {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl<K: Eq + Hash> Clone for ChangeFeed<K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Outcome of reading from a [`FeedSubscription`].
#[derive(Debug)]
pub enum FeedRecv<K: Eq + Hash> {
    /// The next committed transaction.
    Event(Arc<ChangeEvent<K>>),
    /// The subscriber fell behind and this many events were dropped.
    Lagged(u64),
    /// Nothing queued right now.
    Empty,
    /// Every publisher is gone; no further events will arrive.
    Closed,
}

/// Receiver side of a [`ChangeFeed`].
pub struct FeedSubscription<K: Eq + Hash> {
    rx: broadcast::Receiver<Arc<ChangeEvent<K>>>,
}

impl<K: Eq + Hash> FeedSubscription<K> {
    /// Read the next queued event without waiting.
    pub fn try_next(&mut self) -> FeedRecv<K> {
        match self.rx.try_recv() {
            Ok(event) => FeedRecv::Event(event),
            Err(TryRecvError::Empty) => FeedRecv::Empty,
            Err(TryRecvError::Lagged(skipped)) => FeedRecv::Lagged(skipped),
            Err(TryRecvError::Closed) => FeedRecv::Closed,
        }
    }

    /// Wait for the next event. Never returns [`FeedRecv::Empty`].
    pub async fn next(&mut self) -> FeedRecv<K> {
        match self.rx.recv().await {
            Ok(event) => FeedRecv::Event(event),
            Err(RecvError::Lagged(skipped)) => FeedRecv::Lagged(skipped),
            Err(RecvError::Closed) => FeedRecv::Closed,
        }
    }
}
