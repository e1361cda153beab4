//! TCP transport.
//!
//! The workhorse carrier for TCP-based field busses (S7 over ISO-on-TCP,
//! Modbus TCP, ADS). The instance keeps an internal read buffer so that
//! codecs can count and peek readable bytes without consuming them from
//! the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};
use url::Url;

use crate::error::{PlcError, Result};
use crate::transport::{option_parse, Options, Transport, TransportInstance};

/// Default timeout for opening the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout for a blocking `read` call.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// TCP transport factory (code `tcp`).
#[derive(Debug, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Creates the factory.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TcpTransport {
    fn transport_code(&self) -> &str {
        "tcp"
    }

    fn transport_name(&self) -> &str {
        "TCP"
    }

    fn create_instance(
        &self,
        url: &Url,
        options: &Options,
    ) -> Result<Arc<dyn TransportInstance>> {
        let host = url
            .host_str()
            .ok_or_else(|| PlcError::invalid_url(url.as_str(), "missing host"))?;
        // The explicit port wins; otherwise the driver-injected default.
        let port = match url.port() {
            Some(port) => port,
            None => option_parse::<u16>(options, "defaultTcpPort")?.ok_or_else(|| {
                PlcError::invalid_option("defaultTcpPort", "no port in url and no default")
            })?,
        };
        let connect_timeout = option_parse::<u64>(options, "connectTimeoutMs")?
            .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_millis);
        debug!(host, port, "creating tcp transport instance");
        Ok(Arc::new(TcpTransportInstance {
            addr: format!("{}:{}", host, port),
            connect_timeout,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connected: AtomicBool::new(false),
            inner: Mutex::new(TcpState {
                stream: None,
                buffer: BytesMut::new(),
                eof: false,
            }),
        }))
    }
}

struct TcpState {
    stream: Option<TcpStream>,
    buffer: BytesMut,
    eof: bool,
}

/// A connected (or connectable) TCP carrier.
pub struct TcpTransportInstance {
    addr: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    connected: AtomicBool,
    inner: Mutex<TcpState>,
}

impl TcpTransportInstance {
    /// Drains whatever the socket has ready into the local buffer
    /// without blocking.
    fn fill_buffer(&self, state: &mut TcpState) -> Result<()> {
        let TcpState {
            stream,
            buffer,
            eof,
        } = state;
        let stream = match stream.as_mut() {
            Some(stream) => stream,
            None => return Err(PlcError::TransportClosed),
        };
        loop {
            match stream.try_read_buf(buffer) {
                Ok(0) => {
                    *eof = true;
                    self.connected.store(false, Ordering::SeqCst);
                    return Ok(());
                }
                Ok(n) => trace!(bytes = n, "buffered from socket"),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(PlcError::Io(e)),
            }
        }
    }
}

#[async_trait]
impl TransportInstance for TcpTransportInstance {
    async fn connect(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| PlcError::Timeout)??;
        stream.set_nodelay(true)?;
        state.stream = Some(stream);
        state.eof = false;
        self.connected.store(true, Ordering::SeqCst);
        debug!(addr = %self.addr, "tcp transport connected");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        if let Some(mut stream) = state.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn num_readable_bytes(&self) -> Result<usize> {
        let mut state = self.inner.lock().await;
        if state.stream.is_some() {
            self.fill_buffer(&mut state)?;
        }
        Ok(state.buffer.len())
    }

    async fn peek_readable_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let mut state = self.inner.lock().await;
        if state.stream.is_some() {
            self.fill_buffer(&mut state)?;
        }
        if state.buffer.len() < n {
            return Err(PlcError::Truncated {
                needed: n * 8,
                available: state.buffer.len() * 8,
            });
        }
        Ok(state.buffer[..n].to_vec())
    }

    async fn read(&self, n: usize) -> Result<Vec<u8>> {
        let mut state = self.inner.lock().await;
        while state.buffer.len() < n {
            if state.eof {
                return Err(PlcError::TransportClosed);
            }
            let TcpState { stream, buffer, .. } = &mut *state;
            let stream = stream.as_mut().ok_or(PlcError::TransportClosed)?;
            let read = timeout(self.read_timeout, stream.read_buf(buffer))
                .await
                .map_err(|_| PlcError::Timeout)??;
            if read == 0 {
                state.eof = true;
                self.connected.store(false, Ordering::SeqCst);
                return Err(PlcError::TransportClosed);
            }
        }
        Ok(state.buffer.split_to(n).to_vec())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let mut state = self.inner.lock().await;
        let stream = state.stream.as_mut().ok_or(PlcError::TransportClosed)?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for TcpTransportInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransportInstance")
            .field("addr", &self.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
