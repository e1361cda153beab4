//! Transport abstraction over byte-stream carriers.
//!
//! A [`Transport`] is a factory keyed by a short transport code (`tcp`,
//! `udp`, `test`). Given a transport URL and an option map it produces a
//! [`TransportInstance`]: a live carrier owned by exactly one connection,
//! exposing the narrow byte API the message codecs frame against (count
//! readable, peek, read-N, write).
//!
//! # Design
//!
//! - **Protocol agnostic** - instances move bytes; they know nothing
//!   about the protocol framed on top
//! - **Non-destructive framing support** - `peek_readable_bytes` never
//!   advances, so a codec can wait for a full packet without consuming
//!   partial ones
//! - **Forgiving options** - unknown options are ignored without error so
//!   cross-driver options can travel through the same query string;
//!   drivers inject defaults (e.g. `defaultTcpPort`) before instance
//!   creation
//!
//! # Example
//!
//! ```no_run
//! use plclink::transport::{Options, TcpTransport, Transport, TransportInstance};
//! use url::Url;
//!
//! # async fn demo() -> plclink::Result<()> {
//! let transport = TcpTransport::new();
//! let url = Url::parse("tcp://10.0.0.1:102").unwrap();
//! let instance = transport.create_instance(&url, &Options::new())?;
//! instance.connect().await?;
//! instance.write(&[0x03, 0x00, 0x00, 0x04]).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::{PlcError, Result};

pub mod tcp;
pub mod test;
pub mod udp;

pub use tcp::TcpTransport;
pub use test::{TestTransport, TestTransportInstance};
pub use udp::UdpTransport;

/// Multi-valued option map parsed from a connection URL query string.
///
/// Both the transport and the driver read their configuration from the
/// same map; each ignores the options it does not understand.
pub type Options = HashMap<String, Vec<String>>;

/// Returns the first value of `name`, if the option is present.
pub fn option_first<'a>(options: &'a Options, name: &str) -> Option<&'a str> {
    options
        .get(name)
        .and_then(|values| values.first())
        .map(String::as_str)
}

/// Parses the first value of `name` as `T`.
///
/// Returns `Ok(None)` when the option is absent and
/// [`PlcError::InvalidOption`] when a value is present but unparsable.
pub fn option_parse<T>(options: &Options, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match option_first(options, name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| PlcError::invalid_option(name, e.to_string())),
    }
}

/// Factory for transport instances, keyed by transport code.
pub trait Transport: Send + Sync {
    /// Short key the registry and connection strings use, e.g. `tcp`.
    fn transport_code(&self) -> &str;

    /// Human-readable transport label.
    fn transport_name(&self) -> &str;

    /// Builds a disconnected instance for the given transport URL.
    ///
    /// Options the transport does not understand are ignored.
    fn create_instance(
        &self,
        url: &Url,
        options: &Options,
    ) -> Result<Arc<dyn TransportInstance>>;
}

/// A live byte-stream carrier owned by one connection.
#[async_trait]
pub trait TransportInstance: Send + Sync + fmt::Debug {
    /// Opens the carrier.
    async fn connect(&self) -> Result<()>;

    /// Closes the carrier. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Returns `true` while the carrier is open.
    fn is_connected(&self) -> bool;

    /// Returns the number of bytes buffered locally, without blocking.
    async fn num_readable_bytes(&self) -> Result<usize>;

    /// Returns the next `n` buffered bytes without consuming them.
    ///
    /// Fails with [`PlcError::Truncated`] if fewer than `n` bytes are
    /// present.
    async fn peek_readable_bytes(&self, n: usize) -> Result<Vec<u8>>;

    /// Reads exactly `n` bytes, blocking up to the instance's read
    /// timeout. Fails with [`PlcError::TransportClosed`] if the carrier
    /// closes mid-read.
    async fn read(&self, n: usize) -> Result<Vec<u8>>;

    /// Writes all of `data` to the carrier.
    async fn write(&self, data: &[u8]) -> Result<()>;
}
