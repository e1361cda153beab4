//! KNX APDU data model.
//!
//! Layout of an APDU, bit by bit:
//!
//! ```text
//! +---------+----------+---------+------------------------------------+
//! | control | numbered | counter | service-specific part              |
//! | 1 bit   | 1 bit    | 4 bits  | control: 2-bit code                |
//! |         |          |         | data: 4-bit APCI (+ 6-bit ext APCI)|
//! +---------+----------+---------+------------------------------------+
//! ```
//!
//! The `data_length` parameter threaded through the parse procedures is
//! the octet count following the first APCI octet, as carried by the
//! surrounding cEMI frame; length-driven arrays derive their item count
//! from it.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::codec::{
    parse_discriminated, read_field, read_implicit_field, read_reserved_field,
    unknown_discriminator, write_array, write_field, write_reserved_field, Message,
};
use crate::error::{PlcError, Result};
use crate::text::{align_boxes, box_box, box_value, AsciiBox, DebugBox, DEFAULT_WIDTH};

/// A KNX application protocol data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    /// Set on numbered (connection-oriented) frames.
    pub numbered: bool,
    /// 4-bit sequence counter of numbered frames.
    pub counter: u8,
    /// The control/data split selected by the 1-bit discriminator.
    pub service: ApduService,
}

/// The service carried by an APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApduService {
    /// Control field set: a connection-control APDU.
    Control(ApduControl),
    /// Control field clear: a data APDU.
    Data(ApduData),
}

impl Apdu {
    /// Wire value of the 1-bit control discriminator.
    pub fn control(&self) -> u8 {
        match self.service {
            ApduService::Control(_) => 1,
            ApduService::Data(_) => 0,
        }
    }

    /// Octet count following the first APCI octet, as the surrounding
    /// cEMI frame would carry it.
    pub fn data_length(&self) -> u8 {
        (self.length_in_bytes() - 1) as u8
    }

    /// Parses an APDU. `data_length` comes from the surrounding frame.
    pub fn parse(rb: &mut ReadBuffer<'_>, data_length: u8) -> Result<Self> {
        parse_discriminated(rb, |rb| {
            let control = read_field("control", rb, |rb| rb.read_bit())?;
            let numbered = read_field("numbered", rb, |rb| rb.read_bit())?;
            let counter = read_field("counter", rb, |rb| rb.read_u8(4))?;
            let service = if control {
                ApduService::Control(read_field("controlApdu", rb, ApduControl::parse)?)
            } else {
                ApduService::Data(read_field("dataApdu", rb, |rb| {
                    ApduData::parse(rb, data_length)
                })?)
            };
            Ok(Self {
                numbered,
                counter,
                service,
            })
        })
    }
}

impl Message for Apdu {
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        write_field("control", wb, |wb| wb.write_bit(self.control() == 1))?;
        write_field("numbered", wb, |wb| wb.write_bit(self.numbered))?;
        write_field("counter", wb, |wb| wb.write_u8(4, self.counter))?;
        match &self.service {
            ApduService::Control(control) => {
                write_field("controlApdu", wb, |wb| control.serialize(wb))
            }
            ApduService::Data(data) => write_field("dataApdu", wb, |wb| data.serialize(wb)),
        }
    }

    fn length_in_bits(&self) -> usize {
        1 + 1 + 4
            + match &self.service {
                ApduService::Control(control) => control.length_in_bits(),
                ApduService::Data(data) => data.length_in_bits(),
            }
    }
}

impl DebugBox for Apdu {
    fn debug_box(&self) -> AsciiBox {
        let service = match &self.service {
            ApduService::Control(control) => box_value("control", format!("{:?}", control)),
            ApduService::Data(data) => {
                box_value("apciType", format!("0x{:X}", data.apci_type()))
            }
        };
        let boxes = [
            box_value("numbered", self.numbered),
            box_value("counter", self.counter),
            service,
        ];
        box_box("Apdu", &align_boxes(&boxes, DEFAULT_WIDTH))
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.debug_box())
    }
}

/// Connection-control APDUs (2-bit code, no body).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApduControl {
    /// `0x0` - open a device connection.
    Connect,
    /// `0x1` - close a device connection.
    Disconnect,
    /// `0x2` - acknowledge a numbered frame.
    Ack,
    /// `0x3` - negative acknowledge.
    Nack,
}

impl ApduControl {
    /// Wire value of the 2-bit control code.
    pub fn control_type(self) -> u8 {
        match self {
            Self::Connect => 0x0,
            Self::Disconnect => 0x1,
            Self::Ack => 0x2,
            Self::Nack => 0x3,
        }
    }

    /// Parses a control APDU. The 2-bit code covers all four values, so
    /// this cannot meet an unknown discriminator.
    pub fn parse(rb: &mut ReadBuffer<'_>) -> Result<Self> {
        let control_type = read_field("controlType", rb, |rb| rb.read_u8(2))?;
        Ok(match control_type {
            0x0 => Self::Connect,
            0x1 => Self::Disconnect,
            0x2 => Self::Ack,
            _ => Self::Nack,
        })
    }
}

impl Message for ApduControl {
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        write_field("controlType", wb, |wb| wb.write_u8(2, self.control_type()))
    }

    fn length_in_bits(&self) -> usize {
        2
    }
}

/// Data APDUs, selected by the 4-bit APCI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApduData {
    /// `0x0` - read a group object value.
    GroupValueRead,
    /// `0x1` - response to a group value read.
    GroupValueResponse {
        /// Small values (up to 6 bits) travel inside the APCI octet.
        data_first_byte: i8,
        /// Remaining octets for larger values.
        data: Vec<u8>,
    },
    /// `0x2` - write a group object value.
    GroupValueWrite {
        /// Small values (up to 6 bits) travel inside the APCI octet.
        data_first_byte: i8,
        /// Remaining octets for larger values.
        data: Vec<u8>,
    },
    /// `0x3` - assign an individual address.
    IndividualAddressWrite,
    /// `0x4` - ask devices in programming mode for their address.
    IndividualAddressRead,
    /// `0x5` - response to an individual address read.
    IndividualAddressResponse,
    /// `0x6` - read an analog/digital converter channel.
    AdcRead {
        /// Converter channel.
        channel: u8,
        /// Number of consecutive reads to average.
        read_count: u8,
    },
    /// `0x7` - response to an ADC read.
    AdcResponse {
        /// Converter channel.
        channel: u8,
        /// Number of consecutive reads averaged.
        read_count: u8,
        /// The converted value.
        value: u16,
    },
    /// `0x8` - read device memory.
    MemoryRead {
        /// Number of octets to read (up to 63).
        num_bytes: u8,
        /// Start address.
        address: u16,
    },
    /// `0x9` - response to a memory read.
    MemoryResponse {
        /// Start address.
        address: u16,
        /// The octets read; the on-wire count is implicit.
        data: Vec<u8>,
    },
    /// `0xA` - write device memory.
    MemoryWrite {
        /// Start address.
        address: u16,
        /// The octets to write; the on-wire count is implicit.
        data: Vec<u8>,
    },
    /// `0xB` - manufacturer-specific user message.
    UserMessage,
    /// `0xC` - read a device descriptor.
    DeviceDescriptorRead {
        /// Descriptor type (0 = mask version).
        descriptor_type: u8,
    },
    /// `0xD` - response to a device descriptor read.
    DeviceDescriptorResponse {
        /// Descriptor type.
        descriptor_type: u8,
        /// Descriptor octets.
        data: Vec<u8>,
    },
    /// `0xE` - restart the device.
    Restart,
    /// `0xF` - escape to the 6-bit extended APCI table.
    Other(ApduDataExt),
}

impl ApduData {
    /// Wire value of the 4-bit APCI.
    pub fn apci_type(&self) -> u8 {
        match self {
            Self::GroupValueRead => 0x0,
            Self::GroupValueResponse { .. } => 0x1,
            Self::GroupValueWrite { .. } => 0x2,
            Self::IndividualAddressWrite => 0x3,
            Self::IndividualAddressRead => 0x4,
            Self::IndividualAddressResponse => 0x5,
            Self::AdcRead { .. } => 0x6,
            Self::AdcResponse { .. } => 0x7,
            Self::MemoryRead { .. } => 0x8,
            Self::MemoryResponse { .. } => 0x9,
            Self::MemoryWrite { .. } => 0xA,
            Self::UserMessage => 0xB,
            Self::DeviceDescriptorRead { .. } => 0xC,
            Self::DeviceDescriptorResponse { .. } => 0xD,
            Self::Restart => 0xE,
            Self::Other(_) => 0xF,
        }
    }

    /// Parses a data APDU. `data_length` is the octet count following
    /// the first APCI octet.
    pub fn parse(rb: &mut ReadBuffer<'_>, data_length: u8) -> Result<Self> {
        // Group values up to 6 bits ride in the APCI octet itself, so a
        // one-octet frame carries no trailing array items.
        let trailing = usize::from(data_length.saturating_sub(1));
        let apci_type = read_field("apciType", rb, |rb| rb.read_u8(4))?;
        match apci_type {
            0x0 => {
                read_reserved_field("reserved", rb, 6, 0x00)?;
                Ok(Self::GroupValueRead)
            }
            0x1 | 0x2 => {
                let data_first_byte = read_field("dataFirstByte", rb, |rb| rb.read_i8(6))?;
                let mut data = Vec::with_capacity(trailing);
                for _ in 0..trailing {
                    data.push(read_field("data", rb, |rb| rb.read_u8(8))?);
                }
                Ok(if apci_type == 0x1 {
                    Self::GroupValueResponse {
                        data_first_byte,
                        data,
                    }
                } else {
                    Self::GroupValueWrite {
                        data_first_byte,
                        data,
                    }
                })
            }
            0x3 => {
                read_reserved_field("reserved", rb, 6, 0x00)?;
                Ok(Self::IndividualAddressWrite)
            }
            0x4 => {
                read_reserved_field("reserved", rb, 6, 0x00)?;
                Ok(Self::IndividualAddressRead)
            }
            0x5 => {
                read_reserved_field("reserved", rb, 6, 0x00)?;
                Ok(Self::IndividualAddressResponse)
            }
            0x6 => {
                let channel = read_field("channel", rb, |rb| rb.read_u8(6))?;
                let read_count = read_field("readCount", rb, |rb| rb.read_u8(8))?;
                Ok(Self::AdcRead {
                    channel,
                    read_count,
                })
            }
            0x7 => {
                let channel = read_field("channel", rb, |rb| rb.read_u8(6))?;
                let read_count = read_field("readCount", rb, |rb| rb.read_u8(8))?;
                let value = read_field("value", rb, |rb| rb.read_u16(16))?;
                Ok(Self::AdcResponse {
                    channel,
                    read_count,
                    value,
                })
            }
            0x8 => {
                let num_bytes = read_field("numBytes", rb, |rb| rb.read_u8(6))?;
                let address = read_field("address", rb, |rb| rb.read_u16(16))?;
                Ok(Self::MemoryRead { num_bytes, address })
            }
            0x9 | 0xA => {
                let num_bytes =
                    read_implicit_field("numBytes", rb, |rb| rb.read_u8(6))? as usize;
                let address = read_field("address", rb, |rb| rb.read_u16(16))?;
                let mut data = Vec::with_capacity(num_bytes);
                for _ in 0..num_bytes {
                    data.push(read_field("data", rb, |rb| rb.read_u8(8))?);
                }
                Ok(if apci_type == 0x9 {
                    Self::MemoryResponse { address, data }
                } else {
                    Self::MemoryWrite { address, data }
                })
            }
            0xB => {
                read_reserved_field("reserved", rb, 6, 0x00)?;
                Ok(Self::UserMessage)
            }
            0xC => {
                let descriptor_type = read_field("descriptorType", rb, |rb| rb.read_u8(6))?;
                Ok(Self::DeviceDescriptorRead { descriptor_type })
            }
            0xD => {
                let descriptor_type = read_field("descriptorType", rb, |rb| rb.read_u8(6))?;
                let mut data = Vec::with_capacity(trailing);
                for _ in 0..trailing {
                    data.push(read_field("data", rb, |rb| rb.read_u8(8))?);
                }
                Ok(Self::DeviceDescriptorResponse {
                    descriptor_type,
                    data,
                })
            }
            0xE => {
                read_reserved_field("reserved", rb, 6, 0x00)?;
                Ok(Self::Restart)
            }
            _ => Ok(Self::Other(read_field("extendedApdu", rb, |rb| {
                ApduDataExt::parse(rb, data_length)
            })?)),
        }
    }
}

impl Message for ApduData {
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        write_field("apciType", wb, |wb| wb.write_u8(4, self.apci_type()))?;
        match self {
            Self::GroupValueRead
            | Self::IndividualAddressWrite
            | Self::IndividualAddressRead
            | Self::IndividualAddressResponse
            | Self::UserMessage
            | Self::Restart => write_reserved_field("reserved", wb, 6, 0x00),
            Self::GroupValueResponse {
                data_first_byte,
                data,
            }
            | Self::GroupValueWrite {
                data_first_byte,
                data,
            } => {
                write_field("dataFirstByte", wb, |wb| wb.write_i8(6, *data_first_byte))?;
                write_array("data", wb, data, |wb, b| wb.write_u8(8, *b))
            }
            Self::AdcRead {
                channel,
                read_count,
            } => {
                write_field("channel", wb, |wb| wb.write_u8(6, *channel))?;
                write_field("readCount", wb, |wb| wb.write_u8(8, *read_count))
            }
            Self::AdcResponse {
                channel,
                read_count,
                value,
            } => {
                write_field("channel", wb, |wb| wb.write_u8(6, *channel))?;
                write_field("readCount", wb, |wb| wb.write_u8(8, *read_count))?;
                write_field("value", wb, |wb| wb.write_u16(16, *value))
            }
            Self::MemoryRead { num_bytes, address } => {
                write_field("numBytes", wb, |wb| wb.write_u8(6, *num_bytes))?;
                write_field("address", wb, |wb| wb.write_u16(16, *address))
            }
            Self::MemoryResponse { address, data } | Self::MemoryWrite { address, data } => {
                write_field("numBytes", wb, |wb| wb.write_u8(6, data.len() as u8))?;
                write_field("address", wb, |wb| wb.write_u16(16, *address))?;
                write_array("data", wb, data, |wb, b| wb.write_u8(8, *b))
            }
            Self::DeviceDescriptorRead { descriptor_type } => {
                write_field("descriptorType", wb, |wb| wb.write_u8(6, *descriptor_type))
            }
            Self::DeviceDescriptorResponse {
                descriptor_type,
                data,
            } => {
                write_field("descriptorType", wb, |wb| wb.write_u8(6, *descriptor_type))?;
                write_array("data", wb, data, |wb, b| wb.write_u8(8, *b))
            }
            Self::Other(extended) => write_field("extendedApdu", wb, |wb| extended.serialize(wb)),
        }
    }

    fn length_in_bits(&self) -> usize {
        4 + match self {
            Self::GroupValueRead
            | Self::IndividualAddressWrite
            | Self::IndividualAddressRead
            | Self::IndividualAddressResponse
            | Self::UserMessage
            | Self::Restart => 6,
            Self::GroupValueResponse { data, .. } | Self::GroupValueWrite { data, .. } => {
                6 + data.len() * 8
            }
            Self::AdcRead { .. } => 6 + 8,
            Self::AdcResponse { .. } => 6 + 8 + 16,
            Self::MemoryRead { .. } => 6 + 16,
            Self::MemoryResponse { data, .. } | Self::MemoryWrite { data, .. } => {
                6 + 16 + data.len() * 8
            }
            Self::DeviceDescriptorRead { .. } => 6,
            Self::DeviceDescriptorResponse { data, .. } => 6 + data.len() * 8,
            Self::Other(extended) => extended.length_in_bits(),
        }
    }
}

/// Extended APCI table, selected by a 6-bit discriminator.
///
/// The value set mirrors the generated protocol table exactly; any
/// other 6-bit value fails with
/// [`PlcError::UnknownDiscriminator`](crate::PlcError::UnknownDiscriminator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApduDataExt {
    /// `0x00`
    OpenRoutingTableRequest,
    /// `0x01`
    ReadRoutingTableRequest,
    /// `0x02`
    ReadRoutingTableResponse,
    /// `0x03`
    WriteRoutingTableRequest,
    /// `0x08`
    ReadRouterMemoryRequest,
    /// `0x09`
    ReadRouterMemoryResponse,
    /// `0x0A`
    WriteRouterMemoryRequest,
    /// `0x0D`
    ReadRouterStatusRequest,
    /// `0x0E`
    ReadRouterStatusResponse,
    /// `0x0F`
    WriteRouterStatusRequest,
    /// `0x10`
    MemoryBitWrite,
    /// `0x11` - authorize with an access key.
    AuthorizeRequest {
        /// Requested access level.
        level: u8,
        /// 4-octet access key.
        data: [u8; 4],
    },
    /// `0x12` - granted access level.
    AuthorizeResponse {
        /// Granted access level.
        level: u8,
    },
    /// `0x13`
    KeyWrite,
    /// `0x14`
    KeyResponse,
    /// `0x15` - read an interface object property.
    PropertyValueRead {
        /// Interface object index.
        object_index: u8,
        /// Property id.
        property_id: u8,
        /// Number of elements (4 bits).
        count: u8,
        /// Start index (12 bits).
        index: u16,
    },
    /// `0x16` - response to a property read.
    PropertyValueResponse {
        /// Interface object index.
        object_index: u8,
        /// Property id.
        property_id: u8,
        /// Number of elements (4 bits).
        count: u8,
        /// Start index (12 bits).
        index: u16,
        /// Property data; the count derives from the frame length.
        data: Vec<u8>,
    },
    /// `0x17` - write an interface object property.
    PropertyValueWrite {
        /// Interface object index.
        object_index: u8,
        /// Property id.
        property_id: u8,
        /// Number of elements (4 bits).
        count: u8,
        /// Start index (12 bits).
        index: u16,
        /// Property data; the count derives from the frame length.
        data: Vec<u8>,
    },
    /// `0x18` - read a property description.
    PropertyDescriptionRead {
        /// Interface object index.
        object_index: u8,
        /// Property id.
        property_id: u8,
        /// Property index.
        index: u8,
    },
    /// `0x19` - response to a property description read.
    PropertyDescriptionResponse {
        /// Interface object index.
        object_index: u8,
        /// Property id.
        property_id: u8,
        /// Property index.
        index: u8,
        /// Whether the property accepts writes.
        write_enabled: bool,
        /// Maximum number of elements (12 bits).
        max_nr_of_elements: u16,
        /// Access level octet.
        access: u8,
    },
    /// `0x1A`
    NetworkParameterRead,
    /// `0x1B`
    NetworkParameterResponse,
    /// `0x1C`
    IndividualAddressSerialNumberRead,
    /// `0x1D`
    IndividualAddressSerialNumberResponse,
    /// `0x1E`
    IndividualAddressSerialNumberWrite,
    /// `0x20`
    DomainAddressWrite,
    /// `0x21`
    DomainAddressRead,
    /// `0x22`
    DomainAddressResponse,
    /// `0x23`
    DomainAddressSelectiveRead,
    /// `0x24`
    NetworkParameterWrite,
    /// `0x25`
    LinkRead,
    /// `0x26`
    LinkResponse,
    /// `0x27`
    LinkWrite,
    /// `0x28`
    GroupPropertyValueRead,
    /// `0x29`
    GroupPropertyValueResponse,
    /// `0x2A`
    GroupPropertyValueWrite,
    /// `0x2B`
    GroupPropertyValueInfoReport,
    /// `0x2C`
    DomainAddressSerialNumberRead,
    /// `0x2D`
    DomainAddressSerialNumberResponse,
    /// `0x2E`
    DomainAddressSerialNumberWrite,
    /// `0x30`
    FileStreamInfoReport,
}

impl ApduDataExt {
    /// Wire value of the 6-bit extended APCI.
    pub fn ext_apci_type(&self) -> u8 {
        match self {
            Self::OpenRoutingTableRequest => 0x00,
            Self::ReadRoutingTableRequest => 0x01,
            Self::ReadRoutingTableResponse => 0x02,
            Self::WriteRoutingTableRequest => 0x03,
            Self::ReadRouterMemoryRequest => 0x08,
            Self::ReadRouterMemoryResponse => 0x09,
            Self::WriteRouterMemoryRequest => 0x0A,
            Self::ReadRouterStatusRequest => 0x0D,
            Self::ReadRouterStatusResponse => 0x0E,
            Self::WriteRouterStatusRequest => 0x0F,
            Self::MemoryBitWrite => 0x10,
            Self::AuthorizeRequest { .. } => 0x11,
            Self::AuthorizeResponse { .. } => 0x12,
            Self::KeyWrite => 0x13,
            Self::KeyResponse => 0x14,
            Self::PropertyValueRead { .. } => 0x15,
            Self::PropertyValueResponse { .. } => 0x16,
            Self::PropertyValueWrite { .. } => 0x17,
            Self::PropertyDescriptionRead { .. } => 0x18,
            Self::PropertyDescriptionResponse { .. } => 0x19,
            Self::NetworkParameterRead => 0x1A,
            Self::NetworkParameterResponse => 0x1B,
            Self::IndividualAddressSerialNumberRead => 0x1C,
            Self::IndividualAddressSerialNumberResponse => 0x1D,
            Self::IndividualAddressSerialNumberWrite => 0x1E,
            Self::DomainAddressWrite => 0x20,
            Self::DomainAddressRead => 0x21,
            Self::DomainAddressResponse => 0x22,
            Self::DomainAddressSelectiveRead => 0x23,
            Self::NetworkParameterWrite => 0x24,
            Self::LinkRead => 0x25,
            Self::LinkResponse => 0x26,
            Self::LinkWrite => 0x27,
            Self::GroupPropertyValueRead => 0x28,
            Self::GroupPropertyValueResponse => 0x29,
            Self::GroupPropertyValueWrite => 0x2A,
            Self::GroupPropertyValueInfoReport => 0x2B,
            Self::DomainAddressSerialNumberRead => 0x2C,
            Self::DomainAddressSerialNumberResponse => 0x2D,
            Self::DomainAddressSerialNumberWrite => 0x2E,
            Self::FileStreamInfoReport => 0x30,
        }
    }

    /// Parses an extended APCI APDU. `length` is the frame's data
    /// length; property value responses derive their data count from it.
    pub fn parse(rb: &mut ReadBuffer<'_>, length: u8) -> Result<Self> {
        parse_discriminated(rb, |rb| {
            let ext_apci_type = read_field("extApciType", rb, |rb| rb.read_u8(6))?;
            match ext_apci_type {
                0x00 => Ok(Self::OpenRoutingTableRequest),
                0x01 => Ok(Self::ReadRoutingTableRequest),
                0x02 => Ok(Self::ReadRoutingTableResponse),
                0x03 => Ok(Self::WriteRoutingTableRequest),
                0x08 => Ok(Self::ReadRouterMemoryRequest),
                0x09 => Ok(Self::ReadRouterMemoryResponse),
                0x0A => Ok(Self::WriteRouterMemoryRequest),
                0x0D => Ok(Self::ReadRouterStatusRequest),
                0x0E => Ok(Self::ReadRouterStatusResponse),
                0x0F => Ok(Self::WriteRouterStatusRequest),
                0x10 => Ok(Self::MemoryBitWrite),
                0x11 => {
                    let level = read_field("level", rb, |rb| rb.read_u8(8))?;
                    let mut data = [0u8; 4];
                    for byte in &mut data {
                        *byte = read_field("data", rb, |rb| rb.read_u8(8))?;
                    }
                    Ok(Self::AuthorizeRequest { level, data })
                }
                0x12 => {
                    let level = read_field("level", rb, |rb| rb.read_u8(8))?;
                    Ok(Self::AuthorizeResponse { level })
                }
                0x13 => Ok(Self::KeyWrite),
                0x14 => Ok(Self::KeyResponse),
                0x15 => {
                    let (object_index, property_id, count, index) = parse_property_header(rb)?;
                    Ok(Self::PropertyValueRead {
                        object_index,
                        property_id,
                        count,
                        index,
                    })
                }
                0x16 | 0x17 => {
                    let (object_index, property_id, count, index) = parse_property_header(rb)?;
                    let trailing = usize::from(length).checked_sub(5).ok_or_else(|| {
                        PlcError::protocol_violation(format!(
                            "property value frame length {} below its fixed part",
                            length
                        ))
                    })?;
                    let mut data = Vec::with_capacity(trailing);
                    for _ in 0..trailing {
                        data.push(read_field("data", rb, |rb| rb.read_u8(8))?);
                    }
                    Ok(if ext_apci_type == 0x16 {
                        Self::PropertyValueResponse {
                            object_index,
                            property_id,
                            count,
                            index,
                            data,
                        }
                    } else {
                        Self::PropertyValueWrite {
                            object_index,
                            property_id,
                            count,
                            index,
                            data,
                        }
                    })
                }
                0x18 => {
                    let object_index = read_field("objectIndex", rb, |rb| rb.read_u8(8))?;
                    let property_id = read_field("propertyId", rb, |rb| rb.read_u8(8))?;
                    let index = read_field("index", rb, |rb| rb.read_u8(8))?;
                    Ok(Self::PropertyDescriptionRead {
                        object_index,
                        property_id,
                        index,
                    })
                }
                0x19 => {
                    let object_index = read_field("objectIndex", rb, |rb| rb.read_u8(8))?;
                    let property_id = read_field("propertyId", rb, |rb| rb.read_u8(8))?;
                    let index = read_field("index", rb, |rb| rb.read_u8(8))?;
                    let write_enabled = read_field("writeEnabled", rb, |rb| rb.read_bit())?;
                    read_reserved_field("reserved", rb, 3, 0x0)?;
                    let max_nr_of_elements =
                        read_field("maxNrOfElements", rb, |rb| rb.read_u16(12))?;
                    let access = read_field("access", rb, |rb| rb.read_u8(8))?;
                    Ok(Self::PropertyDescriptionResponse {
                        object_index,
                        property_id,
                        index,
                        write_enabled,
                        max_nr_of_elements,
                        access,
                    })
                }
                0x1A => Ok(Self::NetworkParameterRead),
                0x1B => Ok(Self::NetworkParameterResponse),
                0x1C => Ok(Self::IndividualAddressSerialNumberRead),
                0x1D => Ok(Self::IndividualAddressSerialNumberResponse),
                0x1E => Ok(Self::IndividualAddressSerialNumberWrite),
                0x20 => Ok(Self::DomainAddressWrite),
                0x21 => Ok(Self::DomainAddressRead),
                0x22 => Ok(Self::DomainAddressResponse),
                0x23 => Ok(Self::DomainAddressSelectiveRead),
                0x24 => Ok(Self::NetworkParameterWrite),
                0x25 => Ok(Self::LinkRead),
                0x26 => Ok(Self::LinkResponse),
                0x27 => Ok(Self::LinkWrite),
                0x28 => Ok(Self::GroupPropertyValueRead),
                0x29 => Ok(Self::GroupPropertyValueResponse),
                0x2A => Ok(Self::GroupPropertyValueWrite),
                0x2B => Ok(Self::GroupPropertyValueInfoReport),
                0x2C => Ok(Self::DomainAddressSerialNumberRead),
                0x2D => Ok(Self::DomainAddressSerialNumberResponse),
                0x2E => Ok(Self::DomainAddressSerialNumberWrite),
                0x30 => Ok(Self::FileStreamInfoReport),
                other => Err(unknown_discriminator("ApduDataExt", u64::from(other))),
            }
        })
    }
}

fn parse_property_header(rb: &mut ReadBuffer<'_>) -> Result<(u8, u8, u8, u16)> {
    let object_index = read_field("objectIndex", rb, |rb| rb.read_u8(8))?;
    let property_id = read_field("propertyId", rb, |rb| rb.read_u8(8))?;
    let count = read_field("count", rb, |rb| rb.read_u8(4))?;
    let index = read_field("index", rb, |rb| rb.read_u16(12))?;
    Ok((object_index, property_id, count, index))
}

fn write_property_header(
    wb: &mut WriteBuffer,
    object_index: u8,
    property_id: u8,
    count: u8,
    index: u16,
) -> Result<()> {
    write_field("objectIndex", wb, |wb| wb.write_u8(8, object_index))?;
    write_field("propertyId", wb, |wb| wb.write_u8(8, property_id))?;
    write_field("count", wb, |wb| wb.write_u8(4, count))?;
    write_field("index", wb, |wb| wb.write_u16(12, index))
}

impl Message for ApduDataExt {
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        write_field("extApciType", wb, |wb| {
            wb.write_u8(6, self.ext_apci_type())
        })?;
        match self {
            Self::AuthorizeRequest { level, data } => {
                write_field("level", wb, |wb| wb.write_u8(8, *level))?;
                write_array("data", wb, data, |wb, b| wb.write_u8(8, *b))
            }
            Self::AuthorizeResponse { level } => {
                write_field("level", wb, |wb| wb.write_u8(8, *level))
            }
            Self::PropertyValueRead {
                object_index,
                property_id,
                count,
                index,
            } => write_property_header(wb, *object_index, *property_id, *count, *index),
            Self::PropertyValueResponse {
                object_index,
                property_id,
                count,
                index,
                data,
            }
            | Self::PropertyValueWrite {
                object_index,
                property_id,
                count,
                index,
                data,
            } => {
                write_property_header(wb, *object_index, *property_id, *count, *index)?;
                write_array("data", wb, data, |wb, b| wb.write_u8(8, *b))
            }
            Self::PropertyDescriptionRead {
                object_index,
                property_id,
                index,
            } => {
                write_field("objectIndex", wb, |wb| wb.write_u8(8, *object_index))?;
                write_field("propertyId", wb, |wb| wb.write_u8(8, *property_id))?;
                write_field("index", wb, |wb| wb.write_u8(8, *index))
            }
            Self::PropertyDescriptionResponse {
                object_index,
                property_id,
                index,
                write_enabled,
                max_nr_of_elements,
                access,
            } => {
                write_field("objectIndex", wb, |wb| wb.write_u8(8, *object_index))?;
                write_field("propertyId", wb, |wb| wb.write_u8(8, *property_id))?;
                write_field("index", wb, |wb| wb.write_u8(8, *index))?;
                write_field("writeEnabled", wb, |wb| wb.write_bit(*write_enabled))?;
                write_reserved_field("reserved", wb, 3, 0x0)?;
                write_field("maxNrOfElements", wb, |wb| {
                    wb.write_u16(12, *max_nr_of_elements)
                })?;
                write_field("access", wb, |wb| wb.write_u8(8, *access))
            }
            // All remaining variants carry no body.
            _ => Ok(()),
        }
    }

    fn length_in_bits(&self) -> usize {
        6 + match self {
            Self::AuthorizeRequest { .. } => 8 + 32,
            Self::AuthorizeResponse { .. } => 8,
            Self::PropertyValueRead { .. } => 32,
            Self::PropertyValueResponse { data, .. }
            | Self::PropertyValueWrite { data, .. } => 32 + data.len() * 8,
            Self::PropertyDescriptionRead { .. } => 24,
            Self::PropertyDescriptionResponse { .. } => 24 + 1 + 3 + 12 + 8,
            _ => 0,
        }
    }
}
