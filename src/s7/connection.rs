//! S7 connection lifecycle.
//!
//! Connecting runs two exchanges over the freshly opened transport: the
//! COTP connection request/confirm (negotiating TPDU size and TSAPs)
//! followed by the S7 setup-communication job (negotiating PDU length
//! and job queue depths). The values the device answers with are kept
//! in the driver context and govern the rest of the session.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::{PlcError, Result};
use crate::manager::{ConnectFuture, PlcConnection};
use crate::s7::codec::S7Codec;
use crate::s7::config::S7Configuration;
use crate::s7::messages::{
    CotpPacket, CotpPacketKind, CotpParameter, CotpProtocolClass, CotpTpduSize, S7Message,
    S7MessageKind, S7Parameter, TpktPacket,
};
use crate::spi::codec::{send_request, start_worker, CodecWorker};
use crate::spi::transaction::RequestTransactionManager;

/// Session values negotiated with the device during connect.
#[derive(Debug, Clone)]
pub struct S7DriverContext {
    /// Accepted parallel jobs, caller side.
    pub max_amq_caller: u16,
    /// Accepted parallel jobs, callee side.
    pub max_amq_callee: u16,
    /// Negotiated PDU length in bytes.
    pub pdu_length: u16,
    /// Negotiated COTP TPDU size.
    pub tpdu_size: CotpTpduSize,
}

/// A live connection to one S7 CPU.
pub struct S7Connection {
    codec: Arc<S7Codec>,
    configuration: S7Configuration,
    context: Mutex<S7DriverContext>,
    tm: RequestTransactionManager,
    worker: Mutex<Option<CodecWorker>>,
    tpdu_counter: AtomicU16,
    connected: AtomicBool,
}

impl S7Connection {
    /// Builds a not-yet-connected connection.
    pub(crate) fn new(
        codec: Arc<S7Codec>,
        configuration: S7Configuration,
        tm: RequestTransactionManager,
    ) -> Arc<Self> {
        let context = S7DriverContext {
            max_amq_caller: configuration.max_amq_caller,
            max_amq_callee: configuration.max_amq_callee,
            pdu_length: configuration.pdu_length,
            tpdu_size: configuration.tpdu_size,
        };
        Arc::new(Self {
            codec,
            configuration,
            context: Mutex::new(context),
            tm,
            worker: Mutex::new(None),
            tpdu_counter: AtomicU16::new(1),
            connected: AtomicBool::new(false),
        })
    }

    /// Starts the connect chain and returns its single-shot result.
    pub(crate) fn connect(self: Arc<Self>) -> ConnectFuture {
        ConnectFuture::spawn(async move {
            self.codec.transport().connect().await?;
            *self.worker.lock() = Some(start_worker(Arc::clone(&self.codec)));
            self.cotp_handshake().await?;
            self.setup_communication().await?;
            self.connected.store(true, Ordering::SeqCst);
            info!(context = ?self.negotiated(), "s7 connection established");
            Ok(self as Arc<dyn PlcConnection>)
        })
    }

    /// The session values currently in effect.
    pub fn negotiated(&self) -> S7DriverContext {
        self.context.lock().clone()
    }

    fn next_tpdu_reference(&self) -> u16 {
        self.tpdu_counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn cotp_handshake(&self) -> Result<()> {
        let request = TpktPacket::new(CotpPacket {
            kind: CotpPacketKind::ConnectionRequest {
                destination_reference: 0x0000,
                source_reference: 0x000F,
                protocol_class: CotpProtocolClass::Class0,
            },
            parameters: vec![
                CotpParameter::TpduSize {
                    size: self.configuration.tpdu_size,
                },
                CotpParameter::CallingTsap {
                    tsap_id: self.configuration.local_tsap,
                },
                CotpParameter::CalledTsap {
                    tsap_id: self.configuration.remote_tsap(),
                },
            ],
            message: None,
        });
        let response = send_request(
            self.codec.as_ref(),
            request,
            |packet| {
                matches!(
                    packet.payload.kind,
                    CotpPacketKind::ConnectionResponse { .. } | CotpPacketKind::TpduError { .. }
                )
            },
            self.configuration.request_timeout,
        )
        .await?;
        match &response.payload.kind {
            CotpPacketKind::ConnectionResponse { .. } => {
                for parameter in &response.payload.parameters {
                    if let CotpParameter::TpduSize { size } = parameter {
                        debug!(?size, "device answered tpdu size");
                        self.context.lock().tpdu_size = *size;
                    }
                }
                Ok(())
            }
            CotpPacketKind::TpduError { reject_cause, .. } => {
                Err(PlcError::protocol_violation(format!(
                    "cotp connection rejected, cause 0x{:02X}",
                    reject_cause
                )))
            }
            _ => Err(PlcError::protocol_violation("unexpected cotp response")),
        }
    }

    async fn setup_communication(&self) -> Result<()> {
        let reference = self.next_tpdu_reference();
        let request = TpktPacket::new(CotpPacket::data(S7Message::setup_communication(
            reference,
            self.configuration.max_amq_caller,
            self.configuration.max_amq_callee,
            self.configuration.pdu_length,
        )));
        let response = send_request(
            self.codec.as_ref(),
            request,
            move |packet| {
                packet
                    .payload
                    .message
                    .as_ref()
                    .is_some_and(|message| message.tpdu_reference == reference)
            },
            self.configuration.request_timeout,
        )
        .await?;
        let message = response
            .payload
            .message
            .as_ref()
            .ok_or_else(|| PlcError::protocol_violation("setup response carries no message"))?;
        if let S7MessageKind::Response {
            error_class,
            error_code,
        }
        | S7MessageKind::ResponseData {
            error_class,
            error_code,
        } = message.kind
        {
            if error_class != 0 || error_code != 0 {
                return Err(PlcError::protocol_violation(format!(
                    "setup communication failed, class 0x{:02X} code 0x{:02X}",
                    error_class, error_code
                )));
            }
        }
        if let Some(S7Parameter::SetupCommunication {
            max_amq_caller,
            max_amq_callee,
            pdu_length,
        }) = &message.parameter
        {
            let mut context = self.context.lock();
            context.max_amq_caller = *max_amq_caller;
            context.max_amq_callee = *max_amq_callee;
            context.pdu_length = *pdu_length;
        }
        Ok(())
    }
}

#[async_trait]
impl PlcConnection for S7Connection {
    fn protocol_code(&self) -> &str {
        "s7"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(PlcError::TransportClosed);
        }
        // A fresh setup-communication exchange doubles as the
        // protocol-level no-op; it runs through the transaction manager
        // like any other job.
        let codec = Arc::clone(&self.codec);
        let reference = self.next_tpdu_reference();
        let context = self.negotiated();
        let request_timeout = self.configuration.request_timeout;
        let (tx, rx) = oneshot::channel();
        self.tm.submit(async move {
            let request = TpktPacket::new(CotpPacket::data(S7Message::setup_communication(
                reference,
                context.max_amq_caller,
                context.max_amq_callee,
                context.pdu_length,
            )));
            let result = send_request(
                codec.as_ref(),
                request,
                move |packet| {
                    packet
                        .payload
                        .message
                        .as_ref()
                        .is_some_and(|message| message.tpdu_reference == reference)
                },
                request_timeout,
            )
            .await
            .map(|_| ());
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| PlcError::Cancelled)?
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().take() {
            worker.shutdown();
        }
        self.codec.transport().close().await
    }
}

impl std::fmt::Debug for S7Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S7Connection")
            .field("connected", &self.is_connected())
            .field("context", &self.negotiated())
            .finish()
    }
}
