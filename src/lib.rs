//! # plclink
//!
//! A vendor-neutral client library for industrial PLC protocols.
//!
//! You hand the [`DriverManager`] a connection URL of the form
//! `<driver>:<transport>://<host>[?opt=val...]` (or `<driver>://<host>`
//! to use the driver's default transport) and get back an asynchronous
//! connection handle. The driver layer understands the protocol
//! (Siemens S7, KNX, ...); the transport layer understands the carrier
//! (TCP, UDP).
//!
//! ## Features
//!
//! - **Uniform entry point** - one registry resolves any connection
//!   string to a driver, a transport and a connection
//! - **Bit-precise codec engine** - protocol messages are trees of
//!   typed fields over bit-level cursors, with discriminated unions
//!   dispatched by exhaustive match
//! - **Single-shot asynchrony** - every I/O-performing call delivers
//!   exactly one result through a future-like handle
//! - **No panics** - all errors are returned as [`Result<T, PlcError>`]
//! - **Bounded concurrency** - a per-connection transaction manager
//!   caps outstanding protocol exchanges
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use plclink::{DriverManager, PlcConnection, S7Driver};
//! use plclink::transport::TcpTransport;
//!
//! #[tokio::main]
//! async fn main() -> plclink::Result<()> {
//!     // Assembly root: register drivers and transports once at startup.
//!     let manager = DriverManager::new();
//!     manager.register_driver(Arc::new(S7Driver::new()));
//!     manager.register_transport(Arc::new(TcpTransport::new()));
//!
//!     // Connect to an S7-300 in rack 0, slot 1.
//!     let connection = manager
//!         .get_connection("s7://10.0.0.1?rack=0&slot=1")
//!         .wait()
//!         .await?;
//!
//!     connection.ping().await?;
//!     connection.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection Strings
//!
//! ```text
//! s7://10.0.0.1                        driver s7, its default transport (tcp), port 102
//! s7:tcp://10.0.0.1:102?rack=0&slot=1  everything explicit
//! ```
//!
//! The query string is a multi-valued option map; the transport and the
//! driver each pick out the options they understand and ignore the
//! rest, so cross-driver options travel through one string.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, PlcError>`]. Setup errors
//! (`InvalidUrl`, `NotFound`, `NoTransport`) surface on the connect
//! handle; parser errors discard the offending packet and keep the
//! connection; `TransportClosed` is fatal and fails every pending
//! request.
//!
//! ```no_run
//! use plclink::{DriverManager, PlcConnection, PlcError};
//!
//! # async fn demo(manager: DriverManager) {
//! match manager.get_connection("xyz://host").wait().await {
//!     Ok(connection) => println!("connected: {}", connection.protocol_code()),
//!     Err(PlcError::NotFound { kind, name }) => {
//!         eprintln!("no {} registered for '{}'", kind, name);
//!     }
//!     Err(e) => eprintln!("connect failed: {}", e),
//! }
//! # }
//! ```
//!
//! ## Writing a Driver
//!
//! A driver implements [`PlcDriver`]: advertise a protocol code, a
//! human name and a default transport, validate field address strings,
//! and build the chain transport instance → message codec → connection
//! in [`PlcDriver::get_connection`]. The [`spi`] module carries the
//! shared machinery - the expectation table for request/response
//! correlation, the codec worker loop, and the bounded transaction
//! scheduler - so a driver only contributes its wire model and framing.
//!
//! ## Logging
//!
//! The library logs through [`tracing`]; it never installs a
//! subscriber. Verbosity is controlled entirely by the host
//! application.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod buffer;
pub mod codec;
mod error;
pub mod knx;
mod manager;
pub mod s7;
pub mod spi;
pub mod text;
pub mod transport;

// Public re-exports
pub use buffer::{ByteOrder, ReadBuffer, WriteBuffer};
pub use codec::Message;
pub use error::{PlcError, Result};
pub use manager::{
    ConnectFuture, ConnectResult, DiscoveryCallback, DiscoveryEvent, DriverManager,
    PlcConnection, PlcDriver, TransportMap,
};
pub use s7::S7Driver;
