//! Siemens S7 driver.
//!
//! The reference protocol of the library: ISO-on-TCP (TPKT + COTP)
//! framing with the S7 job protocol on top. The driver ties the pieces
//! together the way every driver does - transport lookup, default
//! option injection, transport instance, configuration, message codec,
//! connection - and hands back a single-shot connect result.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use plclink::{DriverManager, S7Driver};
//! use plclink::transport::TcpTransport;
//!
//! # async fn demo() -> plclink::Result<()> {
//! let manager = DriverManager::new();
//! manager.register_driver(Arc::new(S7Driver::new()));
//! manager.register_transport(Arc::new(TcpTransport::new()));
//! let connection = manager
//!     .get_connection("s7:tcp://10.0.0.1:102?rack=0&slot=1")
//!     .wait()
//!     .await?;
//! # let _ = connection;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod field;
pub mod messages;

pub use codec::S7Codec;
pub use config::S7Configuration;
pub use connection::{S7Connection, S7DriverContext};
pub use field::{S7Area, S7Field, S7FieldHandler};

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::error::{PlcError, Result};
use crate::manager::{ConnectFuture, PlcDriver, TransportMap};
use crate::spi::transaction::RequestTransactionManager;
use crate::transport::Options;

/// The default TCP port of ISO-on-TCP devices.
pub const DEFAULT_S7_PORT: u16 = 102;

/// Driver for Siemens S7 PLCs.
#[derive(Debug, Default)]
pub struct S7Driver {
    field_handler: S7FieldHandler,
}

impl S7Driver {
    /// Creates the driver.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlcDriver for S7Driver {
    fn protocol_code(&self) -> &str {
        "s7"
    }

    fn protocol_name(&self) -> &str {
        "Siemens S7 (Basic)"
    }

    fn default_transport(&self) -> &str {
        "tcp"
    }

    fn check_query(&self, query: &str) -> Result<()> {
        self.field_handler.parse(query).map(|_| ())
    }

    fn get_connection(
        &self,
        transport_url: &Url,
        transports: &TransportMap,
        options: &Options,
    ) -> ConnectFuture {
        let transport = match transports.get(transport_url.scheme()) {
            Some(transport) => Arc::clone(transport),
            None => {
                return ConnectFuture::ready(Err(PlcError::not_found(
                    "transport",
                    transport_url.scheme(),
                )))
            }
        };
        // Default port for devices addressed without one.
        let mut options = options.clone();
        options.insert(
            "defaultTcpPort".to_string(),
            vec![DEFAULT_S7_PORT.to_string()],
        );
        let instance = match transport.create_instance(transport_url, &options) {
            Ok(instance) => instance,
            Err(e) => return ConnectFuture::ready(Err(e)),
        };
        let configuration = match S7Configuration::from_options(&options) {
            Ok(configuration) => configuration,
            Err(e) => return ConnectFuture::ready(Err(e)),
        };
        debug!(?configuration, transport_url = %transport_url, "creating s7 connection");
        let codec = Arc::new(S7Codec::new(instance));
        let tm = RequestTransactionManager::new(usize::from(configuration.max_amq_caller.max(1)));
        S7Connection::new(codec, configuration, tm).connect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReadBuffer;
    use crate::codec::Message;
    use crate::manager::DriverManager;
    use crate::s7::messages::{
        CotpPacket, CotpPacketKind, CotpParameter, CotpProtocolClass, CotpTpduSize, S7Message,
        S7MessageKind, S7Parameter, TpktPacket,
    };
    use crate::transport::{TcpTransport, TestTransport, TestTransportInstance, Transport};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Plays the device side of the handshake: answers connection
    /// requests with a confirm and every S7 job with a success response
    /// echoing the setup parameter.
    async fn run_responder(instance: Arc<TestTransportInstance>) {
        loop {
            let written = instance.take_written();
            if !written.is_empty() {
                let mut rb = ReadBuffer::new(&written);
                while rb.remaining_bits() > 0 {
                    let packet = match TpktPacket::parse(&mut rb) {
                        Ok(packet) => packet,
                        Err(_) => break,
                    };
                    let response = match &packet.payload.kind {
                        CotpPacketKind::ConnectionRequest {
                            source_reference, ..
                        } => TpktPacket::new(CotpPacket {
                            kind: CotpPacketKind::ConnectionResponse {
                                destination_reference: *source_reference,
                                source_reference: 0x0001,
                                protocol_class: CotpProtocolClass::Class0,
                            },
                            parameters: vec![CotpParameter::TpduSize {
                                size: CotpTpduSize::Size512,
                            }],
                            message: None,
                        }),
                        CotpPacketKind::Data { .. } => {
                            let message = match &packet.payload.message {
                                Some(message) => message,
                                None => continue,
                            };
                            TpktPacket::new(CotpPacket::data(S7Message {
                                tpdu_reference: message.tpdu_reference,
                                kind: S7MessageKind::ResponseData {
                                    error_class: 0,
                                    error_code: 0,
                                },
                                parameter: Some(S7Parameter::SetupCommunication {
                                    max_amq_caller: 4,
                                    max_amq_callee: 4,
                                    pdu_length: 480,
                                }),
                                payload: Vec::new(),
                            }))
                        }
                        _ => continue,
                    };
                    instance.feed(&response.to_bytes().unwrap());
                }
            }
            sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test]
    async fn test_full_connect_chain_over_test_transport() {
        let manager = DriverManager::new();
        let test_transport = Arc::new(TestTransport::new());
        manager.register_driver(Arc::new(S7Driver::new()));
        manager.register_transport(Arc::clone(&test_transport) as Arc<dyn Transport>);

        let pending = manager.get_connection("s7:test://plc1?rack=0&slot=1");
        let instance = test_transport.last_instance().unwrap();
        tokio::spawn(run_responder(Arc::clone(&instance)));

        let connection = pending.wait().await.unwrap();
        assert!(connection.is_connected());
        assert_eq!(connection.protocol_code(), "s7");

        // The ping runs through the transaction manager and the
        // expectation table like any other job.
        connection.ping().await.unwrap();

        connection.close().await.unwrap();
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_connect_times_out_without_device() {
        let manager = DriverManager::new();
        let test_transport = Arc::new(TestTransport::new());
        manager.register_driver(Arc::new(S7Driver::new()));
        manager.register_transport(Arc::clone(&test_transport) as Arc<dyn Transport>);

        let err = manager
            .get_connection("s7:test://plc2?requestTimeoutMs=50")
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, PlcError::Timeout));
    }

    #[tokio::test]
    async fn test_missing_transport_fails_fast() {
        let driver = S7Driver::new();
        let url = Url::parse("tcp://10.0.0.1:102").unwrap();
        let err = driver
            .get_connection(&url, &TransportMap::new(), &Options::new())
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlcError::NotFound {
                kind: "transport",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_default_port_is_injected() {
        let driver = S7Driver::new();
        let mut transports = TransportMap::new();
        transports.insert(
            "tcp".to_string(),
            Arc::new(TcpTransport::new()) as Arc<dyn Transport>,
        );
        // No port in the URL: the driver injects 102 and instance
        // creation succeeds; the connect itself then fails because
        // nothing listens there.
        let url = Url::parse("tcp://127.0.0.1").unwrap();
        let err = driver
            .get_connection(&url, &transports, &Options::new())
            .wait()
            .await
            .unwrap_err();
        assert!(
            matches!(err, PlcError::Io(_) | PlcError::Timeout),
            "expected a connect failure, got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_bad_option_fails_before_connecting() {
        let manager = DriverManager::new();
        manager.register_driver(Arc::new(S7Driver::new()));
        manager.register_transport(Arc::new(TestTransport::new()));
        let err = manager
            .get_connection("s7:test://plc3?rack=12")
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, PlcError::InvalidOption { .. }));
    }

    #[test]
    fn test_check_query_validates_addresses() {
        let driver = S7Driver::new();
        assert!(driver.check_query("%DB1.DBW4").is_ok());
        assert!(driver.check_query("%IX0.3").is_ok());
        assert!(driver.check_query("%DB1.FOO").is_err());
        assert!(driver.check_query("not-an-address").is_err());
    }

    #[test]
    fn test_driver_identity() {
        let driver = S7Driver::new();
        assert_eq!(driver.protocol_code(), "s7");
        assert_eq!(driver.protocol_name(), "Siemens S7 (Basic)");
        assert_eq!(driver.default_transport(), "tcp");
        assert!(!driver.supports_discovery());
    }
}
