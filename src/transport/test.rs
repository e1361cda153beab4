//! In-memory transport for protocol tests.
//!
//! The instance never touches the network: a test feeds incoming bytes
//! with [`TestTransportInstance::feed`] and inspects outgoing bytes with
//! [`TestTransportInstance::take_written`]. The factory keeps a handle
//! to the most recently created instance so tests driving the full
//! connection pipeline (`s7:test://...`) can reach the wire from
//! outside.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::time::{sleep, timeout};
use url::Url;

use crate::error::{PlcError, Result};
use crate::transport::{Options, Transport, TransportInstance};

/// How long a blocking `read` waits for fed bytes before timing out.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// In-memory transport factory (code `test`).
#[derive(Debug, Default)]
pub struct TestTransport {
    last: Mutex<Option<Arc<TestTransportInstance>>>,
}

impl TestTransport {
    /// Creates the factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recently created instance, if any.
    pub fn last_instance(&self) -> Option<Arc<TestTransportInstance>> {
        self.last.lock().clone()
    }
}

impl Transport for TestTransport {
    fn transport_code(&self) -> &str {
        "test"
    }

    fn transport_name(&self) -> &str {
        "Test"
    }

    fn create_instance(
        &self,
        _url: &Url,
        _options: &Options,
    ) -> Result<Arc<dyn TransportInstance>> {
        let instance = Arc::new(TestTransportInstance::new());
        *self.last.lock() = Some(Arc::clone(&instance));
        Ok(instance)
    }
}

/// An in-memory carrier with externally scripted input.
#[derive(Debug, Default)]
pub struct TestTransportInstance {
    connected: AtomicBool,
    closed: AtomicBool,
    incoming: Mutex<BytesMut>,
    written: Mutex<Vec<u8>>,
}

impl TestTransportInstance {
    /// Creates a disconnected instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes to the incoming side of the wire.
    pub fn feed(&self, data: &[u8]) {
        self.incoming.lock().extend_from_slice(data);
    }

    /// Takes everything written to the transport so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut *self.written.lock())
    }

    /// Simulates the remote side closing the carrier.
    pub fn break_connection(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlcError::TransportClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl TransportInstance for TestTransportInstance {
    async fn connect(&self) -> Result<()> {
        self.check_open()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn num_readable_bytes(&self) -> Result<usize> {
        Ok(self.incoming.lock().len())
    }

    async fn peek_readable_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let incoming = self.incoming.lock();
        if incoming.len() < n {
            return Err(PlcError::Truncated {
                needed: n * 8,
                available: incoming.len() * 8,
            });
        }
        Ok(incoming[..n].to_vec())
    }

    async fn read(&self, n: usize) -> Result<Vec<u8>> {
        let deadline = async {
            loop {
                {
                    let mut incoming = self.incoming.lock();
                    if incoming.len() >= n {
                        return Ok(incoming.split_to(n).to_vec());
                    }
                }
                self.check_open()?;
                sleep(Duration::from_millis(1)).await;
            }
        };
        timeout(DEFAULT_READ_TIMEOUT, deadline)
            .await
            .map_err(|_| PlcError::Timeout)?
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        self.written.lock().extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_peek_read() {
        let instance = TestTransportInstance::new();
        instance.connect().await.unwrap();

        instance.feed(&[1, 2, 3]);
        assert_eq!(instance.num_readable_bytes().await.unwrap(), 3);
        assert_eq!(instance.peek_readable_bytes(2).await.unwrap(), vec![1, 2]);
        assert_eq!(instance.num_readable_bytes().await.unwrap(), 3);
        assert_eq!(instance.read(3).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_read_waits_for_late_feed() {
        let instance = Arc::new(TestTransportInstance::new());
        instance.connect().await.unwrap();

        let feeder = Arc::clone(&instance);
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            feeder.feed(&[0x42]);
        });
        assert_eq!(instance.read(1).await.unwrap(), vec![0x42]);
    }

    #[tokio::test]
    async fn test_broken_connection_fails_reads_and_writes() {
        let instance = TestTransportInstance::new();
        instance.connect().await.unwrap();
        instance.break_connection();
        assert!(matches!(
            instance.read(1).await,
            Err(PlcError::TransportClosed)
        ));
        assert!(matches!(
            instance.write(&[0]).await,
            Err(PlcError::TransportClosed)
        ));
        assert!(!instance.is_connected());
    }

    #[tokio::test]
    async fn test_factory_exposes_last_instance() {
        let factory = TestTransport::new();
        assert!(factory.last_instance().is_none());
        let url = Url::parse("test://device").unwrap();
        let _instance = factory.create_instance(&url, &Options::new()).unwrap();
        assert!(factory.last_instance().is_some());
    }
}
