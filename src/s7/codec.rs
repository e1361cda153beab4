//! S7 message codec: TPKT framing over a transport instance.
//!
//! Framing algorithm: wait for the 4-byte TPKT header, peek it, take
//! the total packet length from bytes 2-3 (big-endian, including the
//! header itself), and only consume bytes once the full packet is
//! buffered. Partial packets are left untouched on the transport.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, trace};

use crate::buffer::ReadBuffer;
use crate::codec::Message;
use crate::error::{PlcError, Result};
use crate::s7::messages::{TpktPacket, TPKT_HEADER_SIZE};
use crate::spi::codec::Codec;
use crate::spi::expectations::ExpectationManager;
use crate::transport::TransportInstance;

/// Frames [`TpktPacket`]s on a transport instance.
pub struct S7Codec {
    transport: Arc<dyn TransportInstance>,
    expectations: ExpectationManager<TpktPacket>,
}

impl S7Codec {
    /// Creates a codec over the given transport instance.
    pub fn new(transport: Arc<dyn TransportInstance>) -> Self {
        Self {
            transport,
            expectations: ExpectationManager::new(),
        }
    }

    /// The transport instance this codec frames against.
    pub fn transport(&self) -> &Arc<dyn TransportInstance> {
        &self.transport
    }
}

#[async_trait]
impl Codec for S7Codec {
    type Message = TpktPacket;

    async fn send(&self, message: TpktPacket) -> Result<()> {
        trace!("sending tpkt packet");
        let bytes = message.to_bytes()?;
        self.transport.write(&bytes).await
    }

    async fn receive(&self) -> Result<Option<TpktPacket>> {
        let readable = self.transport.num_readable_bytes().await?;
        if readable < TPKT_HEADER_SIZE {
            return Ok(None);
        }
        let header = self.transport.peek_readable_bytes(TPKT_HEADER_SIZE).await?;
        // Total length including the header, big-endian at bytes 2-3.
        let packet_length = usize::from(u16::from_be_bytes([header[2], header[3]]));
        if packet_length < TPKT_HEADER_SIZE {
            // A length shorter than the header destroys frame alignment;
            // there is no way to find the next packet boundary.
            error!(packet_length, "tpkt length field below header size, closing transport");
            self.transport.close().await?;
            return Err(PlcError::TransportClosed);
        }
        if readable < packet_length {
            trace!(readable, packet_length, "waiting for full packet");
            return Ok(None);
        }
        let data = self.transport.read(packet_length).await?;
        let mut rb = ReadBuffer::new(&data);
        // A parse failure here only discards this packet; the length
        // prefix already moved the cursor past it.
        let packet = TpktPacket::parse(&mut rb)?;
        Ok(Some(packet))
    }

    fn expectations(&self) -> &ExpectationManager<TpktPacket> {
        &self.expectations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s7::messages::{CotpPacket, CotpPacketKind, CotpParameter, CotpTpduSize};
    use crate::transport::TestTransportInstance;

    const CONNECTION_REQUEST: [u8; 22] = [
        0x03, 0x00, 0x00, 0x16, 0x11, 0xE0, 0x00, 0x00, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A,
        0xC1, 0x02, 0x01, 0x02, 0xC2, 0x02, 0x01, 0x00,
    ];

    fn codec() -> (S7Codec, Arc<TestTransportInstance>) {
        let transport = Arc::new(TestTransportInstance::new());
        let codec = S7Codec::new(Arc::clone(&transport) as Arc<dyn TransportInstance>);
        (codec, transport)
    }

    #[tokio::test]
    async fn test_partial_packet_left_on_the_wire() {
        let (codec, transport) = codec();
        transport.connect().await.unwrap();

        // Three bytes of a 22-byte packet: not even a full header.
        transport.feed(&CONNECTION_REQUEST[..3]);
        assert!(codec.receive().await.unwrap().is_none());
        assert_eq!(transport.num_readable_bytes().await.unwrap(), 3);

        // Header complete, body still missing: still no message.
        transport.feed(&CONNECTION_REQUEST[3..8]);
        assert!(codec.receive().await.unwrap().is_none());
        assert_eq!(transport.num_readable_bytes().await.unwrap(), 8);

        // The rest arrives: one message, buffer fully drained.
        transport.feed(&CONNECTION_REQUEST[8..]);
        let packet = codec.receive().await.unwrap().unwrap();
        assert!(matches!(
            packet.payload.kind,
            CotpPacketKind::ConnectionRequest { .. }
        ));
        assert_eq!(transport.num_readable_bytes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_back_to_back_packets_frame_individually() {
        let (codec, transport) = codec();
        transport.connect().await.unwrap();

        let mut wire = CONNECTION_REQUEST.to_vec();
        wire.extend_from_slice(&CONNECTION_REQUEST);
        transport.feed(&wire);

        assert!(codec.receive().await.unwrap().is_some());
        assert_eq!(transport.num_readable_bytes().await.unwrap(), 22);
        assert!(codec.receive().await.unwrap().is_some());
        assert!(codec.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_writes_serialized_packet() {
        let (codec, transport) = codec();
        transport.connect().await.unwrap();

        let packet = TpktPacket::new(CotpPacket {
            kind: CotpPacketKind::ConnectionRequest {
                destination_reference: 0x0000,
                source_reference: 0x0001,
                protocol_class: crate::s7::messages::CotpProtocolClass::Class0,
            },
            parameters: vec![
                CotpParameter::TpduSize {
                    size: CotpTpduSize::Size1024,
                },
                CotpParameter::CallingTsap { tsap_id: 0x0102 },
                CotpParameter::CalledTsap { tsap_id: 0x0100 },
            ],
            message: None,
        });
        codec.send(packet).await.unwrap();
        assert_eq!(transport.take_written(), CONNECTION_REQUEST.to_vec());
    }

    #[tokio::test]
    async fn test_undecodable_packet_is_consumed() {
        let (codec, transport) = codec();
        transport.connect().await.unwrap();

        // Valid TPKT framing around an unknown COTP variant.
        transport.feed(&[0x03, 0x00, 0x00, 0x07, 0x02, 0x55, 0x00]);
        let err = codec.receive().await.unwrap_err();
        assert!(matches!(err, PlcError::UnknownDiscriminator { .. }));
        // The bad frame is gone; the codec can continue with the next.
        assert_eq!(transport.num_readable_bytes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unframeable_length_closes_transport() {
        let (codec, transport) = codec();
        transport.connect().await.unwrap();

        transport.feed(&[0x03, 0x00, 0x00, 0x02, 0xFF, 0xFF]);
        let err = codec.receive().await.unwrap_err();
        assert!(matches!(err, PlcError::TransportClosed));
        assert!(!transport.is_connected());
    }
}
