//! Ordered expectation table for request/response correlation.
//!
//! A message codec registers an *expectation* for every outstanding
//! request: a predicate over incoming messages, an absolute deadline, a
//! success handler and an error handler. Incoming parsed messages are
//! offered to expectations in insertion order; the first whose predicate
//! accepts consumes the message and is removed. A housekeeping tick
//! expires entries past their deadline with [`PlcError::Timeout`];
//! cancelling a handle removes the entry and fires its error handler
//! with [`PlcError::Cancelled`].
//!
//! Races between delivery and cancellation resolve in favor of the
//! earlier observed event: an entry is removed from the table under the
//! lock before its handler runs, so exactly one of the two handlers
//! fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::PlcError;

type Predicate<M> = Box<dyn Fn(&M) -> bool + Send>;
type MessageHandler<M> = Box<dyn FnOnce(M) + Send>;
type ErrorHandler = Box<dyn FnOnce(PlcError) + Send>;

struct Entry<M> {
    id: u64,
    deadline: Instant,
    accepts: Predicate<M>,
    on_message: MessageHandler<M>,
    on_error: ErrorHandler,
}

/// The ordered expectation table owned by one message codec.
pub struct ExpectationManager<M> {
    entries: Arc<Mutex<Vec<Entry<M>>>>,
    next_id: AtomicU64,
}

impl<M> Default for ExpectationManager<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ExpectationManager<M> {
    /// Creates an empty table with the expectation counter at 1.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers an expectation and returns its cancellation handle.
    pub fn register(
        &self,
        accepts: impl Fn(&M) -> bool + Send + 'static,
        on_message: impl FnOnce(M) + Send + 'static,
        on_error: impl FnOnce(PlcError) + Send + 'static,
        ttl: Duration,
    ) -> ExpectationHandle<M> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(id, ?ttl, "registering expectation");
        self.entries.lock().push(Entry {
            id,
            deadline: Instant::now() + ttl,
            accepts: Box::new(accepts),
            on_message: Box::new(on_message),
            on_error: Box::new(on_error),
        });
        ExpectationHandle {
            id,
            entries: Arc::clone(&self.entries),
        }
    }

    /// Offers a message to the table in insertion order.
    ///
    /// Returns `None` when an expectation consumed the message, or the
    /// message back when nothing matched (the caller routes it to the
    /// default handler).
    pub fn offer(&self, message: M) -> Option<M> {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.iter().position(|e| (e.accepts)(&message)) {
                Some(index) => entries.remove(index),
                None => return Some(message),
            }
        };
        trace!(id = entry.id, "expectation matched");
        (entry.on_message)(message);
        None
    }

    /// Expires every entry whose deadline has passed.
    pub fn tick(&self, now: Instant) {
        let expired: Vec<Entry<M>> = {
            let mut entries = self.entries.lock();
            let mut expired = Vec::new();
            let mut index = 0;
            while index < entries.len() {
                if entries[index].deadline <= now {
                    expired.push(entries.remove(index));
                } else {
                    index += 1;
                }
            }
            expired
        };
        for entry in expired {
            debug!(id = entry.id, "expectation timed out");
            (entry.on_error)(PlcError::Timeout);
        }
    }

    /// Fails every pending entry with the given error cause.
    pub fn fail_all(&self, cause: impl Fn() -> PlcError) {
        let drained: Vec<Entry<M>> = self.entries.lock().drain(..).collect();
        for entry in drained {
            (entry.on_error)(cause());
        }
    }

    /// Number of pending expectations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when no expectation is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Handle to a registered expectation; cancelling removes the entry and
/// fires its error handler with [`PlcError::Cancelled`].
pub struct ExpectationHandle<M> {
    id: u64,
    entries: Arc<Mutex<Vec<Entry<M>>>>,
}

impl<M> ExpectationHandle<M> {
    /// The expectation's monotonic id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancels the expectation.
    ///
    /// Returns `false` if it was already consumed, expired or cancelled
    /// (delivery wins over cancellation).
    pub fn cancel(self) -> bool {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.iter().position(|e| e.id == self.id) {
                Some(index) => entries.remove(index),
                None => return false,
            }
        };
        (entry.on_error)(PlcError::Cancelled);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_offer_matches_in_insertion_order() {
        let manager: ExpectationManager<u8> = ExpectationManager::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        for tag in [1u8, 2, 3] {
            let hits = Arc::clone(&hits);
            // All three accept everything; insertion order must win.
            manager.register(
                move |_| true,
                move |m| hits.lock().push((tag, m)),
                |_| {},
                Duration::from_secs(10),
            );
        }
        assert!(manager.offer(0xAB).is_none());
        assert_eq!(manager.len(), 2);
        assert_eq!(*hits.lock(), vec![(1, 0xAB)]);
    }

    #[test]
    fn test_unmatched_message_returned() {
        let manager: ExpectationManager<u8> = ExpectationManager::new();
        manager.register(
            |m| *m == 1,
            |_| {},
            |_| {},
            Duration::from_secs(10),
        );
        assert_eq!(manager.offer(2), Some(2));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_tick_expires_past_deadline_only() {
        let manager: ExpectationManager<u8> = ExpectationManager::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let e1 = Arc::clone(&errors);
        manager.register(
            |_| true,
            |_| {},
            move |e| {
                assert!(matches!(e, PlcError::Timeout));
                e1.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(0),
        );
        manager.register(|_| true, |_| {}, |_| {}, Duration::from_secs(60));

        manager.tick(Instant::now() + Duration::from_millis(1));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_cancel_fires_cancelled_once() {
        let manager: ExpectationManager<u8> = ExpectationManager::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&cancelled);
        let handle = manager.register(
            |_| true,
            |_| {},
            move |e| {
                assert!(matches!(e, PlcError::Cancelled));
                c.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_secs(10),
        );
        assert!(handle.cancel());
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_delivery_wins_over_cancellation() {
        let manager: ExpectationManager<u8> = ExpectationManager::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&delivered);
        let handle = manager.register(
            |_| true,
            move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            },
            |_| panic!("error handler must not run after delivery"),
            Duration::from_secs(10),
        );
        assert!(manager.offer(7).is_none());
        assert!(!handle.cancel());
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fail_all_drains_table() {
        let manager: ExpectationManager<u8> = ExpectationManager::new();
        let errors = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let errors = Arc::clone(&errors);
            manager.register(
                |_| true,
                |_| {},
                move |e| {
                    assert!(matches!(e, PlcError::TransportClosed));
                    errors.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_secs(10),
            );
        }
        manager.fail_all(|| PlcError::TransportClosed);
        assert_eq!(errors.load(Ordering::SeqCst), 3);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let manager: ExpectationManager<u8> = ExpectationManager::new();
        let a = manager.register(|_| true, |_| {}, |_| {}, Duration::from_secs(1));
        let b = manager.register(|_| true, |_| {}, |_| {}, Duration::from_secs(1));
        assert!(b.id() > a.id());
    }
}
