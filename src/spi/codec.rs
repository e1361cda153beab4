//! The per-protocol message codec contract and its reader fiber.
//!
//! A [`Codec`] sits between a transport instance and a protocol's typed
//! message model: `send` serializes and writes one message, `receive`
//! attempts to frame and parse one message without consuming partial
//! packets. [`start_worker`] spawns the connection's reader fiber, which
//! drives `receive` in a loop, offers every parsed message to the
//! expectation table in insertion order, hands unmatched messages to the
//! default handler, expires deadlines, and on a fatal transport error
//! fails all pending expectations with
//! [`PlcError::TransportClosed`](crate::PlcError::TransportClosed).
//!
//! Parser-level errors (protocol violations, unknown discriminators) do
//! not poison the connection: the framer consumed a complete
//! length-prefixed packet before failing, so the worker logs the error,
//! discards the packet and continues with the next one.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{trace, warn};

use crate::error::{PlcError, Result};
use crate::spi::expectations::ExpectationManager;

/// How long the reader fiber sleeps when no full message is on the wire.
pub const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A per-protocol framer over one transport instance.
#[async_trait]
pub trait Codec: Send + Sync + 'static {
    /// The protocol's top-level message type.
    type Message: Send + fmt::Debug + 'static;

    /// Serializes a message and writes it to the transport.
    async fn send(&self, message: Self::Message) -> Result<()>;

    /// Attempts to frame one message from the transport.
    ///
    /// Returns `Ok(None)` when no complete packet is buffered yet; in
    /// that case no bytes have been consumed.
    async fn receive(&self) -> Result<Option<Self::Message>>;

    /// The codec's expectation table.
    fn expectations(&self) -> &ExpectationManager<Self::Message>;

    /// Called for messages no expectation accepted, so mis-specified
    /// protocols stay visible during bring-up.
    fn handle_unmatched(&self, message: Self::Message) {
        warn!(?message, "no expectation matched incoming message");
    }
}

/// Handle to a running reader fiber.
pub struct CodecWorker {
    shutdown: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl CodecWorker {
    /// Asks the fiber to stop after its current iteration.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Aborts the fiber immediately.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for CodecWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawns the reader fiber for a codec.
pub fn start_worker<C: Codec>(codec: Arc<C>) -> CodecWorker {
    let shutdown = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&shutdown);
    let task = tokio::spawn(async move {
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            codec.expectations().tick(Instant::now());
            match codec.receive().await {
                Ok(Some(message)) => {
                    trace!("frame received");
                    if let Some(unmatched) = codec.expectations().offer(message) {
                        codec.handle_unmatched(unmatched);
                    }
                }
                Ok(None) => sleep(RECEIVE_POLL_INTERVAL).await,
                Err(e) if e.is_fatal() => {
                    warn!(error = %e, "transport failed, failing pending expectations");
                    codec.expectations().fail_all(|| PlcError::TransportClosed);
                    break;
                }
                Err(e) => {
                    // The frame was already consumed; drop it and move on.
                    warn!(error = %e, "discarding undecodable message");
                }
            }
        }
    });
    CodecWorker { shutdown, task }
}

/// Sends one request and awaits the single matching response.
///
/// The expectation is registered before the request goes out so a fast
/// responder cannot race the table. Exactly one result is delivered:
/// the matched message, or the expectation's failure cause
/// (`Timeout` / `Cancelled` / `TransportClosed`).
pub async fn send_request<C: Codec>(
    codec: &C,
    message: C::Message,
    accepts: impl Fn(&C::Message) -> bool + Send + 'static,
    ttl: Duration,
) -> Result<C::Message> {
    let (tx, rx) = oneshot::channel::<Result<C::Message>>();
    let slot = Arc::new(parking_lot::Mutex::new(Some(tx)));
    let on_message = {
        let slot = Arc::clone(&slot);
        move |m: C::Message| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(Ok(m));
            }
        }
    };
    let on_error = move |e: PlcError| {
        if let Some(tx) = slot.lock().take() {
            let _ = tx.send(Err(e));
        }
    };
    codec
        .expectations()
        .register(accepts, on_message, on_error, ttl);
    codec.send(message).await?;
    rx.await.map_err(|_| PlcError::Cancelled)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// A codec whose wire is a queue of already-parsed frames.
    struct ScriptedCodec {
        incoming: Mutex<VecDeque<Result<Option<u16>>>>,
        sent: Mutex<Vec<u16>>,
        unmatched: Mutex<Vec<u16>>,
        expectations: ExpectationManager<u16>,
    }

    impl ScriptedCodec {
        fn new() -> Self {
            Self {
                incoming: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                unmatched: Mutex::new(Vec::new()),
                expectations: ExpectationManager::new(),
            }
        }

        fn push_frame(&self, frame: u16) {
            self.incoming.lock().push_back(Ok(Some(frame)));
        }
    }

    #[async_trait]
    impl Codec for ScriptedCodec {
        type Message = u16;

        async fn send(&self, message: u16) -> Result<()> {
            self.sent.lock().push(message);
            Ok(())
        }

        async fn receive(&self) -> Result<Option<u16>> {
            match self.incoming.lock().pop_front() {
                Some(result) => result,
                None => Ok(None),
            }
        }

        fn expectations(&self) -> &ExpectationManager<u16> {
            &self.expectations
        }

        fn handle_unmatched(&self, message: u16) {
            self.unmatched.lock().push(message);
        }
    }

    #[tokio::test]
    async fn test_send_request_round_trip() {
        let codec = Arc::new(ScriptedCodec::new());
        let _worker = start_worker(Arc::clone(&codec));

        let responder = Arc::clone(&codec);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            responder.push_frame(0x1234);
        });

        let response = send_request(
            codec.as_ref(),
            0x0001,
            |m| *m == 0x1234,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(response, 0x1234);
        assert_eq!(*codec.sent.lock(), vec![0x0001]);
        assert!(codec.expectations().is_empty());
    }

    #[tokio::test]
    async fn test_expectation_timeout_via_worker() {
        let codec = Arc::new(ScriptedCodec::new());
        let _worker = start_worker(Arc::clone(&codec));

        let started = Instant::now();
        let err = send_request(
            codec.as_ref(),
            0x0001,
            |_| false,
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PlcError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(codec.expectations().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_goes_to_default_handler() {
        let codec = Arc::new(ScriptedCodec::new());
        let _worker = start_worker(Arc::clone(&codec));

        codec.push_frame(0xBEEF);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(*codec.unmatched.lock(), vec![0xBEEF]);
    }

    #[tokio::test]
    async fn test_fatal_error_fails_pending_expectations() {
        let codec = Arc::new(ScriptedCodec::new());
        let _worker = start_worker(Arc::clone(&codec));

        let pending = tokio::spawn({
            let codec = Arc::clone(&codec);
            async move {
                send_request(codec.as_ref(), 1, |_| false, Duration::from_secs(10)).await
            }
        });
        sleep(Duration::from_millis(20)).await;
        codec
            .incoming
            .lock()
            .push_back(Err(PlcError::TransportClosed));

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, PlcError::TransportClosed));
    }

    #[tokio::test]
    async fn test_parser_error_does_not_poison_connection() {
        let codec = Arc::new(ScriptedCodec::new());
        let _worker = start_worker(Arc::clone(&codec));

        codec
            .incoming
            .lock()
            .push_back(Err(PlcError::protocol_violation("const mismatch")));
        let responder = Arc::clone(&codec);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            responder.push_frame(0x5555);
        });

        let response =
            send_request(codec.as_ref(), 1, |m| *m == 0x5555, Duration::from_secs(1))
                .await
                .unwrap();
        assert_eq!(response, 0x5555);
    }
}
