//! UDP transport.
//!
//! Datagram carrier used by KNXnet/IP and FINS-style field busses. The
//! socket binds an ephemeral local port and is connected to the remote
//! address, so incoming datagrams from other peers are filtered by the
//! OS. Received datagrams are appended to the local read buffer in
//! arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::error::{PlcError, Result};
use crate::transport::{option_parse, Options, Transport, TransportInstance};

/// Default timeout for a blocking `read` call.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum datagram size buffered per receive.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// UDP transport factory (code `udp`).
#[derive(Debug, Default)]
pub struct UdpTransport;

impl UdpTransport {
    /// Creates the factory.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for UdpTransport {
    fn transport_code(&self) -> &str {
        "udp"
    }

    fn transport_name(&self) -> &str {
        "UDP"
    }

    fn create_instance(
        &self,
        url: &Url,
        options: &Options,
    ) -> Result<Arc<dyn TransportInstance>> {
        let host = url
            .host_str()
            .ok_or_else(|| PlcError::invalid_url(url.as_str(), "missing host"))?;
        let port = match url.port() {
            Some(port) => port,
            None => option_parse::<u16>(options, "defaultUdpPort")?.ok_or_else(|| {
                PlcError::invalid_option("defaultUdpPort", "no port in url and no default")
            })?,
        };
        debug!(host, port, "creating udp transport instance");
        Ok(Arc::new(UdpTransportInstance {
            addr: format!("{}:{}", host, port),
            read_timeout: DEFAULT_READ_TIMEOUT,
            connected: AtomicBool::new(false),
            inner: Mutex::new(UdpState {
                socket: None,
                buffer: BytesMut::new(),
            }),
        }))
    }
}

struct UdpState {
    socket: Option<UdpSocket>,
    buffer: BytesMut,
}

/// A connected UDP carrier.
pub struct UdpTransportInstance {
    addr: String,
    read_timeout: Duration,
    connected: AtomicBool,
    inner: Mutex<UdpState>,
}

impl UdpTransportInstance {
    /// Drains ready datagrams into the local buffer without blocking.
    fn fill_buffer(&self, state: &mut UdpState) -> Result<()> {
        let UdpState { socket, buffer } = state;
        let socket = match socket.as_ref() {
            Some(socket) => socket,
            None => return Err(PlcError::TransportClosed),
        };
        let mut datagram = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.try_recv(&mut datagram) {
                Ok(n) => buffer.extend_from_slice(&datagram[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(PlcError::Io(e)),
            }
        }
    }
}

#[async_trait]
impl TransportInstance for UdpTransportInstance {
    async fn connect(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.addr).await?;
        state.socket = Some(socket);
        self.connected.store(true, Ordering::SeqCst);
        debug!(addr = %self.addr, "udp transport connected");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.socket = None;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn num_readable_bytes(&self) -> Result<usize> {
        let mut state = self.inner.lock().await;
        if state.socket.is_some() {
            self.fill_buffer(&mut state)?;
        }
        Ok(state.buffer.len())
    }

    async fn peek_readable_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let mut state = self.inner.lock().await;
        if state.socket.is_some() {
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
            let UdpState { socket, buffer } = &mut *state;
            let socket = socket.as_ref().ok_or(PlcError::TransportClosed)?;
            let mut datagram = [0u8; MAX_DATAGRAM_SIZE];
            let received = timeout(self.read_timeout, socket.recv(&mut datagram))
                .await
                .map_err(|_| PlcError::Timeout)??;
            buffer.extend_from_slice(&datagram[..received]);
        }
        Ok(state.buffer.split_to(n).to_vec())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let state = self.inner.lock().await;
        let socket = state.socket.as_ref().ok_or(PlcError::TransportClosed)?;
        socket.send(data).await?;
        Ok(())
    }
}

impl std::fmt::Debug for UdpTransportInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransportInstance")
            .field("addr", &self.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
