//! Fan-out of messages to a dynamic set of subscribers.
//!
//! Publishing never waits on a subscriber: a subscriber whose queue is full
//! misses the message, and one that has gone away is removed.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type Subscribers<T> = Mutex<HashMap<u64, mpsc::Sender<T>>>;

/// Delivers published messages to every current subscriber.
#[derive(Debug)]
pub struct NotificationCenter<T> {
    subscribers: Arc<Subscribers<T>>,
    next_id: AtomicU64,
}

impl<T> Default for NotificationCenter<T> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T: Clone> NotificationCenter<T> {
    /// Creates a center with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber holding up to `capacity` undelivered messages.
    ///
    /// The subscription is removed when the returned handle is dropped.
    pub fn subscribe(&self, capacity: usize) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, tx);
        debug!(id, "subscriber added");

        Subscription {
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Offers `message` to every subscriber and returns how many took it.
    pub fn notify(&self, message: &T) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;

        subscribers.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                trace!(id, "subscriber busy, message dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        delivered
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Receiving handle returned by [`NotificationCenter::subscribe`].
#[derive(Debug)]
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    subscribers: Arc<Subscribers<T>>,
}

impl<T> Subscription<T> {
    /// Waits for the next message.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.subscribers.lock().remove(&self.id);
        debug!(id = self.id, "subscriber removed");
    }
}

/// Publishes the current UTC time as RFC 3339 on `center` every `interval`
/// until `shutdown_token` is cancelled.
pub fn spawn_heartbeat(
    center: Arc<NotificationCenter<String>>,
    interval: Duration,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                    let delivered = center.notify(&now);
                    trace!(delivered, "heartbeat published");
                }
                () = shutdown_token.cancelled() => break,
            }
        }
    })
}
