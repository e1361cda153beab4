//! Driver registry and connection establishment pipeline.
//!
//! The [`DriverManager`] is the main entry point of the library: a
//! process-wide registry of protocol drivers (keyed by protocol code)
//! and transports (keyed by transport code). [`DriverManager::get_connection`]
//! parses a connection string, resolves the driver and transport, and
//! delegates to the driver's factory, which returns exactly one result
//! asynchronously through a [`ConnectFuture`].
//!
//! # Connection Strings
//!
//! ```text
//! s7://10.0.0.1                      driver with its default transport
//! s7:tcp://10.0.0.1:102?rack=0&slot=1  driver with explicit transport
//! ```
//!
//! In the second (opaque) form the part after `driver:` is re-parsed as
//! a URL of its own; its scheme names the transport. The query string
//! parameterizes both the transport and the driver.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use plclink::{DriverManager, PlcConnection, S7Driver};
//! use plclink::transport::TcpTransport;
//!
//! # async fn demo() -> plclink::Result<()> {
//! let manager = DriverManager::new();
//! manager.register_driver(Arc::new(S7Driver::new()));
//! manager.register_transport(Arc::new(TcpTransport::new()));
//!
//! let connection = manager
//!     .get_connection("s7://10.0.0.1?rack=0&slot=1")
//!     .wait()
//!     .await?;
//! connection.ping().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{PlcError, Result};
use crate::transport::{Options, Transport};

/// Registered transports, keyed by transport code.
pub type TransportMap = HashMap<String, Arc<dyn Transport>>;

/// The single result of a connection attempt.
pub type ConnectResult = Result<Arc<dyn PlcConnection>>;

/// A live connection to one PLC.
///
/// The request/response builder surface lives in the individual drivers;
/// this trait carries the lifecycle operations every protocol shares.
#[async_trait]
pub trait PlcConnection: Send + Sync {
    /// Protocol code of the owning driver, e.g. `s7`.
    fn protocol_code(&self) -> &str;

    /// Returns `true` while the connection is established.
    fn is_connected(&self) -> bool;

    /// Exchanges a protocol-level no-op with the device.
    async fn ping(&self) -> Result<()>;

    /// Closes the connection and releases the transport.
    async fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn PlcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcConnection")
            .field("protocol_code", &self.protocol_code())
            .field("is_connected", &self.is_connected())
            .finish()
    }
}

/// A device found during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    /// Protocol code of the discovering driver.
    pub protocol_code: String,
    /// Transport the device was found on.
    pub transport_code: String,
    /// Host (and port) the device answered from.
    pub transport_url: String,
    /// Device name, if the protocol advertises one.
    pub name: Option<String>,
}

/// Callback invoked once per discovered device.
pub type DiscoveryCallback = Arc<dyn Fn(DiscoveryEvent) + Send + Sync>;

/// A protocol driver: the factory tying transport, message codec, field
/// handler and connection together.
pub trait PlcDriver: Send + Sync {
    /// Short key used in connection strings, e.g. `s7`.
    fn protocol_code(&self) -> &str;

    /// Human-readable protocol label.
    fn protocol_name(&self) -> &str;

    /// Transport code applied when the connection string names none.
    fn default_transport(&self) -> &str;

    /// Syntactically validates a PLC field address string.
    fn check_query(&self, query: &str) -> Result<()>;

    /// Builds a transport instance, message codec and connection for the
    /// given transport URL, then starts connecting.
    ///
    /// Every failure along that chain produces a single result on the
    /// returned future and no further work is done.
    fn get_connection(
        &self,
        transport_url: &Url,
        transports: &TransportMap,
        options: &Options,
    ) -> ConnectFuture;

    /// Whether [`PlcDriver::discover`] is implemented.
    fn supports_discovery(&self) -> bool {
        false
    }

    /// Runs discovery, invoking the callback once per found device.
    fn discover(&self, _callback: DiscoveryCallback) -> Result<()> {
        Err(PlcError::protocol_violation(
            "driver does not support discovery",
        ))
    }
}

/// Asynchronous handle to exactly one connection result.
///
/// Replaces the channel-plus-fiber pattern with a future-like type that
/// resolves once. [`ConnectFuture::cancel`] aborts a still-running
/// connect chain and releases any transport resources it allocated.
pub struct ConnectFuture {
    rx: oneshot::Receiver<ConnectResult>,
    task: Option<JoinHandle<()>>,
}

impl ConnectFuture {
    /// A future that is already resolved (used for setup errors).
    pub fn ready(result: ConnectResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx, task: None }
    }

    /// Spawns a connect chain and resolves with its outcome.
    pub fn spawn<F>(chain: F) -> Self
    where
        F: Future<Output = ConnectResult> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = tx.send(chain.await);
        });
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Awaits the single connect result.
    pub async fn wait(self) -> ConnectResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(PlcError::Cancelled),
        }
    }

    /// Aborts the connect chain. Dropping the chain mid-flight closes
    /// any transport it had already opened.
    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Process-wide registry of drivers and transports.
///
/// Registration happens at startup from the assembly root; reads may be
/// concurrent afterwards. Re-registering a taken key is a no-op with a
/// warning.
#[derive(Default)]
pub struct DriverManager {
    drivers: RwLock<HashMap<String, Arc<dyn PlcDriver>>>,
    transports: RwLock<TransportMap>,
}

impl DriverManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        trace!("creating driver manager");
        Self::default()
    }

    /// Registers a driver under its protocol code.
    pub fn register_driver(&self, driver: Arc<dyn PlcDriver>) {
        let code = driver.protocol_code().to_string();
        let mut drivers = self.drivers.write();
        if drivers.contains_key(&code) {
            warn!(protocol = %driver.protocol_name(), "driver already registered");
            return;
        }
        info!(protocol = %driver.protocol_name(), code = %code, "driver registered");
        drivers.insert(code, driver);
    }

    /// Registers a transport under its transport code.
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        let code = transport.transport_code().to_string();
        let mut transports = self.transports.write();
        if transports.contains_key(&code) {
            warn!(transport = %transport.transport_name(), "transport already registered");
            return;
        }
        info!(transport = %transport.transport_name(), code = %code, "transport registered");
        transports.insert(code, transport);
    }

    /// Lists the codes of all registered drivers.
    pub fn list_driver_names(&self) -> Vec<String> {
        self.drivers.read().keys().cloned().collect()
    }

    /// Lists the codes of all registered transports.
    pub fn list_transport_names(&self) -> Vec<String> {
        self.transports.read().keys().cloned().collect()
    }

    /// Looks up a driver by protocol code.
    pub fn get_driver(&self, code: &str) -> Result<Arc<dyn PlcDriver>> {
        self.drivers
            .read()
            .get(code)
            .cloned()
            .ok_or_else(|| PlcError::not_found("driver", code))
    }

    /// Looks up a transport by transport code.
    pub fn get_transport(&self, code: &str) -> Result<Arc<dyn Transport>> {
        self.transports
            .read()
            .get(code)
            .cloned()
            .ok_or_else(|| PlcError::not_found("transport", code))
    }

    /// Resolves a connection string and starts connecting.
    ///
    /// Resolution order: parse the URL, look up the driver by scheme,
    /// determine the transport (explicit opaque form or the driver's
    /// default), assemble the transport URL, delegate to the driver.
    pub fn get_connection(&self, connection_string: &str) -> ConnectFuture {
        debug!(connection_string, "getting connection");
        let url = match Url::parse(connection_string) {
            Ok(url) => url,
            Err(e) => {
                return ConnectFuture::ready(Err(PlcError::invalid_url(connection_string, e)))
            }
        };

        // The options configure both the transport and the driver.
        let mut options = Options::new();
        for (key, value) in url.query_pairs() {
            options
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        let driver = match self.get_driver(url.scheme()) {
            Ok(driver) => driver,
            Err(e) => return ConnectFuture::ready(Err(e)),
        };

        // With an explicit transport the URL content is opaque; re-parse
        // it to split the transport code from the host information.
        let (transport_code, transport_host) = if url.cannot_be_a_base() {
            let inner = match Url::parse(url.path()) {
                Ok(inner) => inner,
                Err(e) => {
                    return ConnectFuture::ready(Err(PlcError::invalid_url(url.path(), e)))
                }
            };
            (inner.scheme().to_string(), host_with_port(&inner))
        } else {
            (driver.default_transport().to_string(), host_with_port(&url))
        };
        if transport_code.is_empty() {
            return ConnectFuture::ready(Err(PlcError::NoTransport));
        }

        let transport_url =
            match Url::parse(&format!("{}://{}", transport_code, transport_host)) {
                Ok(url) => url,
                Err(e) => {
                    return ConnectFuture::ready(Err(PlcError::invalid_url(
                        format!("{}://{}", transport_code, transport_host),
                        e,
                    )))
                }
            };
        debug!(transport_url = %transport_url, "assembled transport url");

        let transports = self.transports.read();
        driver.get_connection(&transport_url, &transports, &options)
    }

    /// Runs discovery on every driver that supports it.
    ///
    /// Stops at the first error and returns it wrapped with the failing
    /// driver's name.
    pub fn discover(&self, callback: DiscoveryCallback) -> Result<()> {
        let drivers: Vec<Arc<dyn PlcDriver>> = self.drivers.read().values().cloned().collect();
        for driver in drivers {
            if !driver.supports_discovery() {
                continue;
            }
            debug!(protocol = %driver.protocol_name(), "running discovery");
            driver
                .discover(Arc::clone(&callback))
                .map_err(|e| PlcError::Discovery {
                    driver: driver.protocol_name().to_string(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }
}

fn host_with_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}
