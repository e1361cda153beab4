//! Bounded scheduler for outstanding protocol transactions.
//!
//! Every connection owns a [`RequestTransactionManager`] with a
//! configurable parallelism bound `P >= 1`. Submissions join a FIFO
//! queue; a dispatcher fiber starts them in submission order whenever a
//! slot is free, so at all times at most `P` transactions are in flight.
//! Completion releases the slot. A submission can be cancelled before it
//! starts; cancelling an already running transaction is a no-op from the
//! scheduler's view (the work itself is expected to observe
//! cancellation).
//!
//! # Example
//!
//! ```
//! use plclink::spi::RequestTransactionManager;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = RequestTransactionManager::new(1);
//! let handle = manager.submit(async {
//!     // exchange one request/response pair
//! });
//! # let _ = handle;
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, trace};

type Work = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Submission {
    id: u64,
    cancelled: Arc<AtomicBool>,
    work: Work,
}

/// Bounded FIFO scheduler of protocol transactions for one connection.
#[derive(Clone)]
pub struct RequestTransactionManager {
    queue: mpsc::UnboundedSender<Submission>,
    in_flight: Arc<AtomicUsize>,
    next_id: Arc<AtomicUsize>,
}

impl RequestTransactionManager {
    /// Creates a manager that runs at most `parallelism` transactions
    /// concurrently. A bound of 0 is treated as 1.
    pub fn new(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        let (tx, mut rx) = mpsc::unbounded_channel::<Submission>();
        let slots = Arc::new(Semaphore::new(parallelism));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&in_flight);
        tokio::spawn(async move {
            // One dispatcher: acquiring the slot before popping the next
            // submission preserves begin order within the bound.
            while let Some(submission) = rx.recv().await {
                let permit = match Arc::clone(&slots).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                if submission.cancelled.load(Ordering::SeqCst) {
                    trace!(id = submission.id, "skipping cancelled transaction");
                    continue;
                }
                trace!(id = submission.id, "starting transaction");
                counter.fetch_add(1, Ordering::SeqCst);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    submission.work.await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                });
            }
            debug!("transaction dispatcher stopped");
        });

        Self {
            queue: tx,
            in_flight,
            next_id: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Appends a transaction to the queue and returns its handle.
    ///
    /// Transactions begin in submission order; they may complete in any
    /// order.
    pub fn submit(&self, work: impl Future<Output = ()> + Send + 'static) -> TransactionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as u64;
        let cancelled = Arc::new(AtomicBool::new(false));
        let submission = Submission {
            id,
            cancelled: Arc::clone(&cancelled),
            work: Box::pin(work),
        };
        // The dispatcher only stops when all senders are gone, so this
        // send cannot fail while the manager is alive.
        let _ = self.queue.send(submission);
        TransactionHandle { id, cancelled }
    }

    /// Number of transactions currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Handle to a submitted transaction.
pub struct TransactionHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl TransactionHandle {
    /// The transaction's id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancels the transaction if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
