//! S7 / ISO-on-TCP wire model.
//!
//! Three stacked layers, each a tree of typed fields:
//!
//! | Layer | Structure |
//! |-------|-----------|
//! | TPKT | 1-byte protocol id (`0x03`), 1 reserved byte, 2-byte total length including the header |
//! | COTP | 1-byte length indicator, 1-byte TPDU code selecting the variant, variant fields, parameters |
//! | S7 | 1-byte protocol id (`0x32`), message type, TPDU reference, parameter/payload lengths, parameter |
//!
//! COTP packets and parameters, and S7 messages and parameters, are
//! discriminated unions: the discriminator byte selects the variant, an
//! unknown value fails with
//! [`PlcError::UnknownDiscriminator`](crate::PlcError::UnknownDiscriminator)
//! and leaves the cursor where the parse began.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::codec::{
    parse_discriminated, read_const_field, read_count_array, read_field, read_implicit_field,
    read_length_array, read_optional_field, read_reserved_field, unknown_discriminator,
    write_array, write_field, write_reserved_field, Message,
};
use crate::error::{PlcError, Result};
use crate::text::{box_box, box_bytes, box_value, align_boxes, AsciiBox, DebugBox, DEFAULT_WIDTH};

/// TPKT protocol id, first byte of every packet.
pub const TPKT_PROTOCOL_ID: u8 = 0x03;

/// S7 protocol id, first byte of every S7 message.
pub const S7_PROTOCOL_ID: u8 = 0x32;

/// Size of the TPKT header in bytes.
pub const TPKT_HEADER_SIZE: usize = 4;

/// The outermost packet: a TPKT header framing one COTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpktPacket {
    /// The framed COTP packet.
    pub payload: CotpPacket,
}

impl TpktPacket {
    /// Wraps a COTP packet.
    pub fn new(payload: CotpPacket) -> Self {
        Self { payload }
    }

    /// Parses a complete TPKT packet.
    pub fn parse(rb: &mut ReadBuffer<'_>) -> Result<Self> {
        read_const_field("protocolId", rb, TPKT_PROTOCOL_ID, |rb| rb.read_u8(8))?;
        read_reserved_field("reserved", rb, 8, 0x00)?;
        // Total length including the 4-byte TPKT header itself.
        let len = read_implicit_field("len", rb, |rb| rb.read_u16(16))? as usize;
        let cotp_len = len.checked_sub(TPKT_HEADER_SIZE).ok_or_else(|| {
            PlcError::protocol_violation(format!("tpkt length {} shorter than its header", len))
        })?;
        let payload = read_field("payload", rb, |rb| CotpPacket::parse(rb, cotp_len))?;
        Ok(Self { payload })
    }
}

impl Message for TpktPacket {
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        write_field("protocolId", wb, |wb| wb.write_u8(8, TPKT_PROTOCOL_ID))?;
        write_reserved_field("reserved", wb, 8, 0x00)?;
        let len = self.length_in_bytes() as u16;
        write_field("len", wb, |wb| wb.write_u16(16, len))?;
        write_field("payload", wb, |wb| self.payload.serialize(wb))
    }

    fn length_in_bits(&self) -> usize {
        8 + 8 + 16 + self.payload.length_in_bits()
    }
}

impl DebugBox for TpktPacket {
    fn debug_box(&self) -> AsciiBox {
        box_box("TpktPacket", &self.payload.debug_box())
    }
}

impl std::fmt::Display for TpktPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.debug_box())
    }
}

/// ISO 8073 transport protocol class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CotpProtocolClass {
    /// Class 0 (the one S7 uses).
    Class0,
    /// Class 1.
    Class1,
    /// Class 2.
    Class2,
    /// Class 3.
    Class3,
    /// Class 4.
    Class4,
}

impl CotpProtocolClass {
    /// Wire value of the class octet.
    pub fn value(self) -> u8 {
        match self {
            Self::Class0 => 0x00,
            Self::Class1 => 0x10,
            Self::Class2 => 0x20,
            Self::Class3 => 0x30,
            Self::Class4 => 0x40,
        }
    }

    /// Decodes the class octet.
    pub fn from_value(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Class0),
            0x10 => Ok(Self::Class1),
            0x20 => Ok(Self::Class2),
            0x30 => Ok(Self::Class3),
            0x40 => Ok(Self::Class4),
            other => Err(PlcError::protocol_violation(format!(
                "unsupported cotp protocol class 0x{:02X}",
                other
            ))),
        }
    }
}

/// Negotiable COTP TPDU size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CotpTpduSize {
    /// 128 bytes.
    Size128,
    /// 256 bytes.
    Size256,
    /// 512 bytes.
    Size512,
    /// 1024 bytes.
    Size1024,
    /// 2048 bytes.
    Size2048,
    /// 4096 bytes.
    Size4096,
    /// 8192 bytes.
    Size8192,
}

impl CotpTpduSize {
    /// Wire value of the size octet.
    pub fn value(self) -> u8 {
        match self {
            Self::Size128 => 0x07,
            Self::Size256 => 0x08,
            Self::Size512 => 0x09,
            Self::Size1024 => 0x0A,
            Self::Size2048 => 0x0B,
            Self::Size4096 => 0x0C,
            Self::Size8192 => 0x0D,
        }
    }

    /// Negotiated TPDU size in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::Size128 => 128,
            Self::Size256 => 256,
            Self::Size512 => 512,
            Self::Size1024 => 1024,
            Self::Size2048 => 2048,
            Self::Size4096 => 4096,
            Self::Size8192 => 8192,
        }
    }

    /// Decodes the size octet.
    pub fn from_value(value: u8) -> Result<Self> {
        match value {
            0x07 => Ok(Self::Size128),
            0x08 => Ok(Self::Size256),
            0x09 => Ok(Self::Size512),
            0x0A => Ok(Self::Size1024),
            0x0B => Ok(Self::Size2048),
            0x0C => Ok(Self::Size4096),
            0x0D => Ok(Self::Size8192),
            other => Err(PlcError::protocol_violation(format!(
                "unsupported cotp tpdu size 0x{:02X}",
                other
            ))),
        }
    }
}

/// A COTP header parameter.
///
/// On the wire: 1-byte parameter type (the discriminator), 1-byte
/// parameter length (implicit, body size), variable body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CotpParameter {
    /// `0xC0` - negotiated TPDU size.
    TpduSize {
        /// The proposed or accepted size.
        size: CotpTpduSize,
    },
    /// `0xC1` - calling transport service access point.
    CallingTsap {
        /// TSAP identifier.
        tsap_id: u16,
    },
    /// `0xC2` - called transport service access point.
    CalledTsap {
        /// TSAP identifier.
        tsap_id: u16,
    },
    /// `0xC3` - checksum.
    Checksum {
        /// Checksum octet.
        crc: u8,
    },
    /// `0xE0` - additional information on disconnect.
    DisconnectAdditionalInformation {
        /// Free-form bytes.
        data: Vec<u8>,
    },
}

impl CotpParameter {
    /// Wire value of the discriminating parameter type.
    pub fn parameter_type(&self) -> u8 {
        match self {
            Self::TpduSize { .. } => 0xC0,
            Self::CallingTsap { .. } => 0xC1,
            Self::CalledTsap { .. } => 0xC2,
            Self::Checksum { .. } => 0xC3,
            Self::DisconnectAdditionalInformation { .. } => 0xE0,
        }
    }

    /// Parses one parameter.
    pub fn parse(rb: &mut ReadBuffer<'_>) -> Result<Self> {
        parse_discriminated(rb, |rb| {
            let parameter_type = read_field("parameterType", rb, |rb| rb.read_u8(8))?;
            let parameter_length =
                read_implicit_field("parameterLength", rb, |rb| rb.read_u8(8))?;
            match parameter_type {
                0xC0 => {
                    let size = read_field("tpduSize", rb, |rb| {
                        CotpTpduSize::from_value(rb.read_u8(8)?)
                    })?;
                    Ok(Self::TpduSize { size })
                }
                0xC1 => {
                    let tsap_id = read_field("tsapId", rb, |rb| rb.read_u16(16))?;
                    Ok(Self::CallingTsap { tsap_id })
                }
                0xC2 => {
                    let tsap_id = read_field("tsapId", rb, |rb| rb.read_u16(16))?;
                    Ok(Self::CalledTsap { tsap_id })
                }
                0xC3 => {
                    let crc = read_field("crc", rb, |rb| rb.read_u8(8))?;
                    Ok(Self::Checksum { crc })
                }
                0xE0 => {
                    let data = read_count_array("data", rb, parameter_length as usize, |rb| {
                        rb.read_u8(8)
                    })?;
                    Ok(Self::DisconnectAdditionalInformation { data })
                }
                other => Err(unknown_discriminator("CotpParameter", u64::from(other))),
            }
        })
    }
}

impl Message for CotpParameter {
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        write_field("parameterType", wb, |wb| {
            wb.write_u8(8, self.parameter_type())
        })?;
        // Body size, excluding type and length octets.
        let parameter_length = (self.length_in_bytes() - 2) as u8;
        write_field("parameterLength", wb, |wb| {
            wb.write_u8(8, parameter_length)
        })?;
        match self {
            Self::TpduSize { size } => {
                write_field("tpduSize", wb, |wb| wb.write_u8(8, size.value()))
            }
            Self::CallingTsap { tsap_id } | Self::CalledTsap { tsap_id } => {
                write_field("tsapId", wb, |wb| wb.write_u16(16, *tsap_id))
            }
            Self::Checksum { crc } => write_field("crc", wb, |wb| wb.write_u8(8, *crc)),
            Self::DisconnectAdditionalInformation { data } => {
                write_array("data", wb, data, |wb, b| wb.write_u8(8, *b))
            }
        }
    }

    fn length_in_bits(&self) -> usize {
        let body = match self {
            Self::TpduSize { .. } => 8,
            Self::CallingTsap { .. } | Self::CalledTsap { .. } => 16,
            Self::Checksum { .. } => 8,
            Self::DisconnectAdditionalInformation { data } => data.len() * 8,
        };
        8 + 8 + body
    }
}

/// The variant-specific part of a COTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CotpPacketKind {
    /// `0xF0` - data TPDU.
    Data {
        /// End-of-transmission marker.
        eot: bool,
        /// 7-bit TPDU reference.
        tpdu_ref: u8,
    },
    /// `0xE0` - connection request.
    ConnectionRequest {
        /// Reference of the destination endpoint.
        destination_reference: u16,
        /// Reference of the source endpoint.
        source_reference: u16,
        /// Proposed protocol class.
        protocol_class: CotpProtocolClass,
    },
    /// `0xD0` - connection confirm.
    ConnectionResponse {
        /// Reference of the destination endpoint.
        destination_reference: u16,
        /// Reference of the source endpoint.
        source_reference: u16,
        /// Accepted protocol class.
        protocol_class: CotpProtocolClass,
    },
    /// `0x80` - disconnect request.
    DisconnectRequest {
        /// Reference of the destination endpoint.
        destination_reference: u16,
        /// Reference of the source endpoint.
        source_reference: u16,
        /// Protocol class of the torn-down association.
        protocol_class: CotpProtocolClass,
    },
    /// `0xC0` - disconnect confirm.
    DisconnectResponse {
        /// Reference of the destination endpoint.
        destination_reference: u16,
        /// Reference of the source endpoint.
        source_reference: u16,
    },
    /// `0x70` - error TPDU.
    TpduError {
        /// Reference of the destination endpoint.
        destination_reference: u16,
        /// Reject cause octet.
        reject_cause: u8,
    },
}

impl CotpPacketKind {
    /// Wire value of the discriminating TPDU code.
    pub fn tpdu_code(&self) -> u8 {
        match self {
            Self::Data { .. } => 0xF0,
            Self::ConnectionRequest { .. } => 0xE0,
            Self::ConnectionResponse { .. } => 0xD0,
            Self::DisconnectRequest { .. } => 0x80,
            Self::DisconnectResponse { .. } => 0xC0,
            Self::TpduError { .. } => 0x70,
        }
    }

    fn length_in_bits(&self) -> usize {
        match self {
            Self::Data { .. } => 8,
            Self::ConnectionRequest { .. }
            | Self::ConnectionResponse { .. }
            | Self::DisconnectRequest { .. } => 40,
            Self::DisconnectResponse { .. } => 32,
            Self::TpduError { .. } => 24,
        }
    }
}

/// A COTP packet: variant header, parameters, optional S7 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CotpPacket {
    /// The discriminated variant and its fields.
    pub kind: CotpPacketKind,
    /// Header parameters, e.g. TSAPs and TPDU size during connection
    /// setup.
    pub parameters: Vec<CotpParameter>,
    /// The S7 message carried by a data TPDU, if any.
    pub message: Option<S7Message>,
}

impl CotpPacket {
    /// A data packet carrying one S7 message.
    pub fn data(message: S7Message) -> Self {
        Self {
            kind: CotpPacketKind::Data {
                eot: true,
                tpdu_ref: 0,
            },
            parameters: Vec::new(),
            message: Some(message),
        }
    }

    /// Parses a COTP packet occupying exactly `cotp_len` bytes.
    pub fn parse(rb: &mut ReadBuffer<'_>, cotp_len: usize) -> Result<Self> {
        parse_discriminated(rb, |rb| {
            let start = rb.pos();
            // Bytes in the COTP header following this length indicator.
            let header_length =
                read_implicit_field("headerLength", rb, |rb| rb.read_u8(8))? as usize;
            let tpdu_code = read_field("tpduCode", rb, |rb| rb.read_u8(8))?;
            let kind = match tpdu_code {
                0xF0 => {
                    let eot = read_field("eot", rb, |rb| rb.read_bit())?;
                    let tpdu_ref = read_field("tpduRef", rb, |rb| rb.read_u8(7))?;
                    CotpPacketKind::Data { eot, tpdu_ref }
                }
                0xE0 | 0xD0 | 0x80 => {
                    let destination_reference =
                        read_field("destinationReference", rb, |rb| rb.read_u16(16))?;
                    let source_reference =
                        read_field("sourceReference", rb, |rb| rb.read_u16(16))?;
                    let protocol_class = read_field("protocolClass", rb, |rb| {
                        CotpProtocolClass::from_value(rb.read_u8(8)?)
                    })?;
                    match tpdu_code {
                        0xE0 => CotpPacketKind::ConnectionRequest {
                            destination_reference,
                            source_reference,
                            protocol_class,
                        },
                        0xD0 => CotpPacketKind::ConnectionResponse {
                            destination_reference,
                            source_reference,
                            protocol_class,
                        },
                        _ => CotpPacketKind::DisconnectRequest {
                            destination_reference,
                            source_reference,
                            protocol_class,
                        },
                    }
                }
                0xC0 => {
                    let destination_reference =
                        read_field("destinationReference", rb, |rb| rb.read_u16(16))?;
                    let source_reference =
                        read_field("sourceReference", rb, |rb| rb.read_u16(16))?;
                    CotpPacketKind::DisconnectResponse {
                        destination_reference,
                        source_reference,
                    }
                }
                0x70 => {
                    let destination_reference =
                        read_field("destinationReference", rb, |rb| rb.read_u16(16))?;
                    let reject_cause = read_field("rejectCause", rb, |rb| rb.read_u8(8))?;
                    CotpPacketKind::TpduError {
                        destination_reference,
                        reject_cause,
                    }
                }
                other => return Err(unknown_discriminator("CotpPacket", u64::from(other))),
            };

            // Parameters fill the rest of the declared header.
            let header_end = start + (header_length + 1) * 8;
            let parameter_bits = header_end.checked_sub(rb.pos()).ok_or_else(|| {
                PlcError::protocol_violation(format!(
                    "cotp header length {} too small for its fixed part",
                    header_length
                ))
            })?;
            let parameters =
                read_length_array("parameters", rb, parameter_bits, CotpParameter::parse)?;

            // Whatever remains of the packet is the S7 payload.
            let packet_end = start + cotp_len * 8;
            let message =
                read_optional_field("payload", rb, rb.pos() < packet_end, S7Message::parse)?;
            Ok(Self {
                kind,
                parameters,
                message,
            })
        })
    }
}

impl Message for CotpPacket {
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let message_bytes = self
            .message
            .as_ref()
            .map_or(0, |message| message.length_in_bytes());
        // Header bytes following the length indicator octet.
        let header_length = u8::try_from(self.length_in_bytes() - message_bytes - 1)
            .map_err(|_| PlcError::protocol_violation("cotp header exceeds 255 bytes"))?;
        write_field("headerLength", wb, |wb| wb.write_u8(8, header_length))?;
        write_field("tpduCode", wb, |wb| wb.write_u8(8, self.kind.tpdu_code()))?;
        match &self.kind {
            CotpPacketKind::Data { eot, tpdu_ref } => {
                write_field("eot", wb, |wb| wb.write_bit(*eot))?;
                write_field("tpduRef", wb, |wb| wb.write_u8(7, *tpdu_ref))?;
            }
            CotpPacketKind::ConnectionRequest {
                destination_reference,
                source_reference,
                protocol_class,
            }
            | CotpPacketKind::ConnectionResponse {
                destination_reference,
                source_reference,
                protocol_class,
            }
            | CotpPacketKind::DisconnectRequest {
                destination_reference,
                source_reference,
                protocol_class,
            } => {
                write_field("destinationReference", wb, |wb| {
                    wb.write_u16(16, *destination_reference)
                })?;
                write_field("sourceReference", wb, |wb| {
                    wb.write_u16(16, *source_reference)
                })?;
                write_field("protocolClass", wb, |wb| {
                    wb.write_u8(8, protocol_class.value())
                })?;
            }
            CotpPacketKind::DisconnectResponse {
                destination_reference,
                source_reference,
            } => {
                write_field("destinationReference", wb, |wb| {
                    wb.write_u16(16, *destination_reference)
                })?;
                write_field("sourceReference", wb, |wb| {
                    wb.write_u16(16, *source_reference)
                })?;
            }
            CotpPacketKind::TpduError {
                destination_reference,
                reject_cause,
            } => {
                write_field("destinationReference", wb, |wb| {
                    wb.write_u16(16, *destination_reference)
                })?;
                write_field("rejectCause", wb, |wb| wb.write_u8(8, *reject_cause))?;
            }
        }
        for parameter in &self.parameters {
            write_field("parameters", wb, |wb| parameter.serialize(wb))?;
        }
        if let Some(message) = &self.message {
            write_field("payload", wb, |wb| message.serialize(wb))?;
        }
        Ok(())
    }

    fn length_in_bits(&self) -> usize {
        8 + 8
            + self.kind.length_in_bits()
            + self
                .parameters
                .iter()
                .map(Message::length_in_bits)
                .sum::<usize>()
            + self
                .message
                .as_ref()
                .map_or(0, |message| message.length_in_bits())
    }
}

impl DebugBox for CotpPacket {
    fn debug_box(&self) -> AsciiBox {
        let mut boxes = vec![box_value("tpduCode", format!("0x{:02X}", self.kind.tpdu_code()))];
        boxes.push(box_value("parameters", self.parameters.len()));
        if let Some(message) = &self.message {
            boxes.push(message.debug_box());
        }
        box_box("CotpPacket", &align_boxes(&boxes, DEFAULT_WIDTH))
    }
}

/// The variant-specific part of an S7 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7MessageKind {
    /// `0x01` - job request.
    Request,
    /// `0x02` - acknowledgement without data.
    Response {
        /// Error class, `0x00` on success.
        error_class: u8,
        /// Error code within the class.
        error_code: u8,
    },
    /// `0x03` - acknowledgement with data.
    ResponseData {
        /// Error class, `0x00` on success.
        error_class: u8,
        /// Error code within the class.
        error_code: u8,
    },
    /// `0x07` - user data exchange.
    UserData,
}

impl S7MessageKind {
    /// Wire value of the discriminating message type.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Request => 0x01,
            Self::Response { .. } => 0x02,
            Self::ResponseData { .. } => 0x03,
            Self::UserData => 0x07,
        }
    }

    fn length_in_bits(&self) -> usize {
        match self {
            Self::Request | Self::UserData => 0,
            Self::Response { .. } | Self::ResponseData { .. } => 16,
        }
    }
}

/// An S7 protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Message {
    /// Reference correlating responses with requests.
    pub tpdu_reference: u16,
    /// The discriminated variant and its fields.
    pub kind: S7MessageKind,
    /// The single parameter, absent when the parameter length is zero.
    pub parameter: Option<S7Parameter>,
    /// Raw payload bytes following the parameter (opaque here; the
    /// request builders interpret them).
    pub payload: Vec<u8>,
}

impl S7Message {
    /// A setup-communication job request.
    pub fn setup_communication(
        tpdu_reference: u16,
        max_amq_caller: u16,
        max_amq_callee: u16,
        pdu_length: u16,
    ) -> Self {
        Self {
            tpdu_reference,
            kind: S7MessageKind::Request,
            parameter: Some(S7Parameter::SetupCommunication {
                max_amq_caller,
                max_amq_callee,
                pdu_length,
            }),
            payload: Vec::new(),
        }
    }

    /// Parses one S7 message.
    pub fn parse(rb: &mut ReadBuffer<'_>) -> Result<Self> {
        parse_discriminated(rb, |rb| {
            read_const_field("protocolId", rb, S7_PROTOCOL_ID, |rb| rb.read_u8(8))?;
            let message_type = read_field("messageType", rb, |rb| rb.read_u8(8))?;
            read_reserved_field("reserved", rb, 16, 0x0000)?;
            let tpdu_reference = read_field("tpduReference", rb, |rb| rb.read_u16(16))?;
            let parameter_length =
                read_implicit_field("parameterLength", rb, |rb| rb.read_u16(16))? as usize;
            let payload_length =
                read_implicit_field("payloadLength", rb, |rb| rb.read_u16(16))? as usize;
            let kind = match message_type {
                0x01 => S7MessageKind::Request,
                0x02 | 0x03 => {
                    let error_class = read_field("errorClass", rb, |rb| rb.read_u8(8))?;
                    let error_code = read_field("errorCode", rb, |rb| rb.read_u8(8))?;
                    if message_type == 0x02 {
                        S7MessageKind::Response {
                            error_class,
                            error_code,
                        }
                    } else {
                        S7MessageKind::ResponseData {
                            error_class,
                            error_code,
                        }
                    }
                }
                0x07 => S7MessageKind::UserData,
                other => return Err(unknown_discriminator("S7Message", u64::from(other))),
            };
            let parameter =
                read_optional_field("parameter", rb, parameter_length > 0, S7Parameter::parse)?;
            let payload = read_field("payload", rb, |rb| rb.read_bytes(payload_length))?.to_vec();
            Ok(Self {
                tpdu_reference,
                kind,
                parameter,
                payload,
            })
        })
    }
}

impl Message for S7Message {
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        write_field("protocolId", wb, |wb| wb.write_u8(8, S7_PROTOCOL_ID))?;
        write_field("messageType", wb, |wb| {
            wb.write_u8(8, self.kind.message_type())
        })?;
        write_reserved_field("reserved", wb, 16, 0x0000)?;
        write_field("tpduReference", wb, |wb| {
            wb.write_u16(16, self.tpdu_reference)
        })?;
        let parameter_length = self
            .parameter
            .as_ref()
            .map_or(0, |parameter| parameter.length_in_bytes());
        write_field("parameterLength", wb, |wb| {
            wb.write_u16(16, parameter_length as u16)
        })?;
        write_field("payloadLength", wb, |wb| {
            wb.write_u16(16, self.payload.len() as u16)
        })?;
        match &self.kind {
            S7MessageKind::Request | S7MessageKind::UserData => {}
            S7MessageKind::Response {
                error_class,
                error_code,
            }
            | S7MessageKind::ResponseData {
                error_class,
                error_code,
            } => {
                write_field("errorClass", wb, |wb| wb.write_u8(8, *error_class))?;
                write_field("errorCode", wb, |wb| wb.write_u8(8, *error_code))?;
            }
        }
        if let Some(parameter) = &self.parameter {
            write_field("parameter", wb, |wb| parameter.serialize(wb))?;
        }
        write_field("payload", wb, |wb| wb.write_bytes(&self.payload))
    }

    fn length_in_bits(&self) -> usize {
        8 + 8 + 16 + 16 + 16 + 16
            + self.kind.length_in_bits()
            + self
                .parameter
                .as_ref()
                .map_or(0, |parameter| parameter.length_in_bits())
            + self.payload.len() * 8
    }
}

impl DebugBox for S7Message {
    fn debug_box(&self) -> AsciiBox {
        let mut boxes = vec![
            box_value("messageType", format!("0x{:02X}", self.kind.message_type())),
            box_value("tpduReference", self.tpdu_reference),
        ];
        if !self.payload.is_empty() {
            boxes.push(box_bytes("payload", &self.payload));
        }
        box_box("S7Message", &align_boxes(&boxes, DEFAULT_WIDTH))
    }
}

/// An S7 message parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7Parameter {
    /// `0xF0` - PDU size and queue depth negotiation.
    SetupCommunication {
        /// Maximum parallel jobs the caller accepts.
        max_amq_caller: u16,
        /// Maximum parallel jobs the callee accepts.
        max_amq_callee: u16,
        /// Negotiated PDU length in bytes.
        pdu_length: u16,
    },
}

impl S7Parameter {
    /// Wire value of the discriminating parameter type.
    pub fn parameter_type(&self) -> u8 {
        match self {
            Self::SetupCommunication { .. } => 0xF0,
        }
    }

    /// Parses one parameter.
    pub fn parse(rb: &mut ReadBuffer<'_>) -> Result<Self> {
        parse_discriminated(rb, |rb| {
            let parameter_type = read_field("parameterType", rb, |rb| rb.read_u8(8))?;
            match parameter_type {
                0xF0 => {
                    read_reserved_field("reserved", rb, 8, 0x00)?;
                    let max_amq_caller = read_field("maxAmqCaller", rb, |rb| rb.read_u16(16))?;
                    let max_amq_callee = read_field("maxAmqCallee", rb, |rb| rb.read_u16(16))?;
                    let pdu_length = read_field("pduLength", rb, |rb| rb.read_u16(16))?;
                    Ok(Self::SetupCommunication {
                        max_amq_caller,
                        max_amq_callee,
                        pdu_length,
                    })
                }
                other => Err(unknown_discriminator("S7Parameter", u64::from(other))),
            }
        })
    }
}

impl Message for S7Parameter {
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        write_field("parameterType", wb, |wb| {
            wb.write_u8(8, self.parameter_type())
        })?;
        match self {
            Self::SetupCommunication {
                max_amq_caller,
                max_amq_callee,
                pdu_length,
            } => {
                write_reserved_field("reserved", wb, 8, 0x00)?;
                write_field("maxAmqCaller", wb, |wb| wb.write_u16(16, *max_amq_caller))?;
                write_field("maxAmqCallee", wb, |wb| wb.write_u16(16, *max_amq_callee))?;
                write_field("pduLength", wb, |wb| wb.write_u16(16, *pdu_length))
            }
        }
    }

    fn length_in_bits(&self) -> usize {
        match self {
            Self::SetupCommunication { .. } => 8 + 8 + 16 + 16 + 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The classic 22-byte ISO connection request: CR TPDU with TPDU
    /// size, calling TSAP and called TSAP parameters.
    const CONNECTION_REQUEST: [u8; 22] = [
        0x03, 0x00, 0x00, 0x16, // TPKT, len 22
        0x11, 0xE0, // LI 17, CR
        0x00, 0x00, 0x00, 0x01, 0x00, // dst 0, src 1, class 0
        0xC0, 0x01, 0x0A, // tpdu size 1024
        0xC1, 0x02, 0x01, 0x02, // calling tsap 0x0102
        0xC2, 0x02, 0x01, 0x00, // called tsap 0x0100
    ];

    /// Setup-communication job request negotiating a 240-byte PDU.
    const SETUP_COMMUNICATION: [u8; 25] = [
        0x03, 0x00, 0x00, 0x19, // TPKT, len 25
        0x02, 0xF0, 0x80, // LI 2, DT, eot
        0x32, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, // S7 header
        0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0xF0, // setup parameter
    ];

    fn connection_request() -> TpktPacket {
        TpktPacket::new(CotpPacket {
            kind: CotpPacketKind::ConnectionRequest {
                destination_reference: 0x0000,
                source_reference: 0x0001,
                protocol_class: CotpProtocolClass::Class0,
            },
            parameters: vec![
                CotpParameter::TpduSize {
                    size: CotpTpduSize::Size1024,
                },
                CotpParameter::CallingTsap { tsap_id: 0x0102 },
                CotpParameter::CalledTsap { tsap_id: 0x0100 },
            ],
            message: None,
        })
    }

    #[test]
    fn test_connection_request_serializes_to_golden_bytes() {
        assert_eq!(connection_request().to_bytes().unwrap(), CONNECTION_REQUEST);
    }

    #[test]
    fn test_connection_request_parses_from_golden_bytes() {
        let mut rb = ReadBuffer::new(&CONNECTION_REQUEST);
        let packet = TpktPacket::parse(&mut rb).unwrap();
        assert_eq!(packet, connection_request());
        assert_eq!(rb.remaining_bits(), 0);
    }

    #[test]
    fn test_setup_communication_golden_round_trip() {
        let packet = TpktPacket::new(CotpPacket::data(S7Message::setup_communication(
            0, 1, 1, 240,
        )));
        assert_eq!(packet.to_bytes().unwrap(), SETUP_COMMUNICATION);

        let mut rb = ReadBuffer::new(&SETUP_COMMUNICATION);
        let parsed = TpktPacket::parse(&mut rb).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_length_in_bits_matches_serialized_size() {
        let packets = [
            connection_request(),
            TpktPacket::new(CotpPacket::data(S7Message::setup_communication(
                7, 1, 1, 480,
            ))),
            TpktPacket::new(CotpPacket {
                kind: CotpPacketKind::TpduError {
                    destination_reference: 3,
                    reject_cause: 0x02,
                },
                parameters: vec![],
                message: None,
            }),
        ];
        for packet in packets {
            let bytes = packet.to_bytes().unwrap();
            assert_eq!(bytes.len() * 8, packet.length_in_bits());
        }
    }

    #[test]
    fn test_parse_serialize_identity_on_response() {
        let packet = TpktPacket::new(CotpPacket::data(S7Message {
            tpdu_reference: 42,
            kind: S7MessageKind::ResponseData {
                error_class: 0,
                error_code: 0,
            },
            parameter: Some(S7Parameter::SetupCommunication {
                max_amq_caller: 1,
                max_amq_callee: 1,
                pdu_length: 960,
            }),
            payload: vec![0xDE, 0xAD],
        }));
        let bytes = packet.to_bytes().unwrap();
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(TpktPacket::parse(&mut rb).unwrap(), packet);
    }

    #[test]
    fn test_unknown_tpdu_code_leaves_cursor_unchanged() {
        // LI 2, unknown code 0x55.
        let bytes = [0x02, 0x55, 0x00];
        let mut rb = ReadBuffer::new(&bytes);
        let err = CotpPacket::parse(&mut rb, 3).unwrap_err();
        assert!(matches!(
            err,
            PlcError::UnknownDiscriminator {
                message_type: "CotpPacket",
                value: 0x55,
            }
        ));
        assert_eq!(rb.pos(), 0);
    }

    #[test]
    fn test_unknown_cotp_parameter_rejected() {
        let bytes = [0x99, 0x01, 0x00];
        let mut rb = ReadBuffer::new(&bytes);
        let err = CotpParameter::parse(&mut rb).unwrap_err();
        assert!(matches!(
            err,
            PlcError::UnknownDiscriminator {
                message_type: "CotpParameter",
                ..
            }
        ));
        assert_eq!(rb.pos(), 0);
    }

    #[test]
    fn test_disconnect_additional_information_uses_declared_length() {
        let bytes = [0xE0, 0x03, 0xAA, 0xBB, 0xCC];
        let mut rb = ReadBuffer::new(&bytes);
        let parameter = CotpParameter::parse(&mut rb).unwrap();
        assert_eq!(
            parameter,
            CotpParameter::DisconnectAdditionalInformation {
                data: vec![0xAA, 0xBB, 0xCC]
            }
        );
    }

    #[test]
    fn test_truncated_tpkt_header_fails() {
        let bytes = [0x03, 0x00];
        let mut rb = ReadBuffer::new(&bytes);
        assert!(matches!(
            TpktPacket::parse(&mut rb),
            Err(PlcError::Field { .. })
        ));
    }

    #[test]
    fn test_bad_protocol_id_is_a_violation() {
        let bytes = [0x04, 0x00, 0x00, 0x07, 0x02, 0xF0, 0x80];
        let mut rb = ReadBuffer::new(&bytes);
        assert!(matches!(
            TpktPacket::parse(&mut rb),
            Err(PlcError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_tpdu_size_round_trips_all_values() {
        for size in [
            CotpTpduSize::Size128,
            CotpTpduSize::Size256,
            CotpTpduSize::Size512,
            CotpTpduSize::Size1024,
            CotpTpduSize::Size2048,
            CotpTpduSize::Size4096,
            CotpTpduSize::Size8192,
        ] {
            assert_eq!(CotpTpduSize::from_value(size.value()).unwrap(), size);
        }
        assert!(CotpTpduSize::from_value(0x42).is_err());
    }

    #[test]
    fn test_debug_box_carries_type_tags() {
        let rendered = connection_request().to_string();
        assert!(rendered.contains("TpktPacket"));
        assert!(rendered.contains("CotpPacket"));
    }
}
