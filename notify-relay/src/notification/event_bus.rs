//! In-process publish/subscribe fan-out for live UI updates.
//!
//! Each subscriber owns a bounded buffer. [`EventBus::emit`] never waits: when a
//! subscriber's buffer is full the event is dropped for that subscriber only, so a slow
//! or stalled observer can never slow the producers or starve other observers.
//!
//! The bus is constructed explicitly and shared (usually behind an `Arc`) for the
//! lifetime of the process; nothing here is global.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::events::NotificationEvent;

/// Default capacity of one subscriber buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Default limit on concurrently registered subscribers.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 100;

type Registry = RwLock<HashMap<u64, mpsc::Sender<NotificationEvent>>>;

/// Bounded, non-blocking event fan-out.
pub struct EventBus {
    subscribers: Arc<Registry>,
    next_id: AtomicU64,
    buffer_capacity: usize,
    max_subscribers: usize,
    dropped: AtomicU64,
}

impl EventBus {
    /// Create a bus with the default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_SUBSCRIBERS)
    }

    /// Create a bus with custom per-subscriber capacity and subscriber limit.
    pub fn with_limits(buffer_capacity: usize, max_subscribers: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            buffer_capacity: buffer_capacity.max(1),
            max_subscribers,
            dropped: AtomicU64::new(0),
        }
    }

    /// Deliver a copy of `event` to every live subscriber without blocking.
    ///
    /// Returns the number of subscribers that accepted the event.
    pub fn emit(&self, event: NotificationEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            subscriber = id,
                            event_type = %event.event_type,
                            "Subscriber buffer full, dropping event"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
                warn!(subscriber = id, "Removed closed event subscriber");
            }
        }

        delivered
    }

    /// Register a new observer.
    ///
    /// The returned stream yields every event emitted after registration, indefinitely,
    /// and deregisters itself when dropped. Once the subscriber limit is reached the
    /// stream is empty from the start.
    pub fn subscribe(&self) -> EventStream {
        let mut subscribers = self.subscribers.write();
        if subscribers.len() >= self.max_subscribers {
            warn!(
                limit = self.max_subscribers,
                "Event subscriber limit reached, rejecting subscription"
            );
            return EventStream::rejected();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.buffer_capacity);
        subscribers.insert(id, tx);
        debug!(subscriber = id, "Event subscriber registered");

        EventStream {
            id,
            rx: Some(rx),
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Total events dropped because a subscriber buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Infinite stream of events for one observer.
pub struct EventStream {
    id: u64,
    rx: Option<mpsc::Receiver<NotificationEvent>>,
    registry: Weak<Registry>,
}

impl EventStream {
    fn rejected() -> Self {
        Self {
            id: 0,
            rx: None,
            registry: Weak::new(),
        }
    }

    /// Whether this stream was registered with the bus.
    pub fn is_registered(&self) -> bool {
        self.rx.is_some()
    }

    /// Wait for the next event. `None` once the stream is exhausted.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Stream for EventStream {
    type Item = NotificationEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if self.rx.is_none() {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.write().remove(&self.id);
            debug!(subscriber = self.id, "Event subscriber deregistered");
        }
    }
}
