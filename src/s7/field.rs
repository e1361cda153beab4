//! S7 field address parsing.
//!
//! The field handler turns PLC address strings into structured queries
//! without issuing any I/O. The accepted grammar is the common STEP 7
//! notation, with an optional leading `%` and an optional data type
//! suffix:
//!
//! ```text
//! %DB1.DBW4        word at byte 4 of data block 1
//! DB10.DBX2.5      bit 5 of byte 2 of data block 10
//! %MW100           marker word at byte 100
//! %IX0.3           input bit 3 of byte 0
//! %QB7:BYTE        output byte 7, explicit type
//! ```

use crate::error::{PlcError, Result};

/// Addressable memory area of an S7 CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7Area {
    /// A numbered data block.
    DataBlock(u16),
    /// Process input image (`I` / `E`).
    Input,
    /// Process output image (`Q` / `A`).
    Output,
    /// Bit memory (`M`).
    Marker,
    /// Timers (`T`).
    Timer,
    /// Counters (`C` / `Z`).
    Counter,
}

/// Access width encoded in the address (the letter after the area).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7AccessSize {
    /// `X` - single bit.
    Bit,
    /// `B` - one byte.
    Byte,
    /// `W` - one word (2 bytes).
    Word,
    /// `D` - one double word (4 bytes).
    DoubleWord,
}

impl S7AccessSize {
    fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'X' => Some(Self::Bit),
            'B' => Some(Self::Byte),
            'W' => Some(Self::Word),
            'D' => Some(Self::DoubleWord),
            _ => None,
        }
    }
}

/// Optional explicit data type suffix (`:INT`, `:REAL`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7DataType {
    /// 1-bit boolean.
    Bool,
    /// Unsigned 8-bit.
    Byte,
    /// Unsigned 16-bit.
    Word,
    /// Unsigned 32-bit.
    DWord,
    /// Signed 16-bit.
    Int,
    /// Signed 32-bit.
    DInt,
    /// IEEE-754 single.
    Real,
}

impl S7DataType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "BOOL" => Some(Self::Bool),
            "BYTE" => Some(Self::Byte),
            "WORD" => Some(Self::Word),
            "DWORD" => Some(Self::DWord),
            "INT" => Some(Self::Int),
            "DINT" => Some(Self::DInt),
            "REAL" => Some(Self::Real),
            _ => None,
        }
    }
}

/// A parsed S7 field address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7Field {
    /// The addressed memory area.
    pub area: S7Area,
    /// Access width.
    pub size: S7AccessSize,
    /// Byte offset within the area.
    pub byte_offset: u16,
    /// Bit offset within the byte, only meaningful for bit access.
    pub bit_offset: u8,
    /// Explicit data type, when the address carried a suffix.
    pub data_type: Option<S7DataType>,
}

/// Parses S7 field address strings.
#[derive(Debug, Default)]
pub struct S7FieldHandler;

impl S7FieldHandler {
    /// Creates the handler.
    pub fn new() -> Self {
        Self
    }

    /// Parses an address string into a structured field.
    pub fn parse(&self, query: &str) -> Result<S7Field> {
        let bad = |reason: &str| PlcError::invalid_address(query, reason);

        let trimmed = query.strip_prefix('%').unwrap_or(query);
        if trimmed.is_empty() {
            return Err(bad("empty address"));
        }

        // Split off an optional data type suffix.
        let (body, data_type) = match trimmed.split_once(':') {
            Some((body, type_name)) => {
                let data_type = S7DataType::from_name(type_name)
                    .ok_or_else(|| bad("unknown data type suffix"))?;
                (body, Some(data_type))
            }
            None => (trimmed, None),
        };

        if let Some(rest) = body.strip_prefix("DB") {
            return self.parse_data_block(query, rest, data_type);
        }

        let mut chars = body.chars();
        let area_letter = chars.next().ok_or_else(|| bad("empty address"))?;
        let area = match area_letter {
            'I' | 'E' => S7Area::Input,
            'Q' | 'A' => S7Area::Output,
            'M' => S7Area::Marker,
            'T' => S7Area::Timer,
            'C' | 'Z' => S7Area::Counter,
            _ => return Err(bad("unknown memory area")),
        };

        let rest = chars.as_str();
        if matches!(area, S7Area::Timer | S7Area::Counter) {
            // Timers and counters are addressed by plain number.
            let number = parse_number(query, rest)?;
            return Ok(S7Field {
                area,
                size: S7AccessSize::Word,
                byte_offset: number,
                bit_offset: 0,
                data_type,
            });
        }

        let mut rest_chars = rest.chars();
        let size_letter = rest_chars.next().ok_or_else(|| bad("missing access size"))?;
        let size = S7AccessSize::from_letter(size_letter)
            .ok_or_else(|| bad("unknown access size, expected X, B, W or D"))?;
        let (byte_offset, bit_offset) =
            self.parse_offsets(query, rest_chars.as_str(), size)?;
        Ok(S7Field {
            area,
            size,
            byte_offset,
            bit_offset,
            data_type,
        })
    }

    fn parse_data_block(
        &self,
        query: &str,
        rest: &str,
        data_type: Option<S7DataType>,
    ) -> Result<S7Field> {
        let bad = |reason: &str| PlcError::invalid_address(query, reason);
        let (db_number, rest) = rest
            .split_once('.')
            .ok_or_else(|| bad("data block address needs a '.' separator"))?;
        let db_number = parse_number(query, db_number)?;
        let rest = rest
            .strip_prefix("DB")
            .ok_or_else(|| bad("expected 'DB' after the data block number"))?;
        let mut chars = rest.chars();
        let size_letter = chars.next().ok_or_else(|| bad("missing access size"))?;
        let size = S7AccessSize::from_letter(size_letter)
            .ok_or_else(|| bad("unknown access size, expected X, B, W or D"))?;
        let (byte_offset, bit_offset) = self.parse_offsets(query, chars.as_str(), size)?;
        Ok(S7Field {
            area: S7Area::DataBlock(db_number),
            size,
            byte_offset,
            bit_offset,
            data_type,
        })
    }

    fn parse_offsets(
        &self,
        query: &str,
        rest: &str,
        size: S7AccessSize,
    ) -> Result<(u16, u8)> {
        let bad = |reason: &str| PlcError::invalid_address(query, reason);
        match rest.split_once('.') {
            Some((byte_part, bit_part)) => {
                if size != S7AccessSize::Bit {
                    return Err(bad("bit offset is only valid for X access"));
                }
                let byte_offset = parse_number(query, byte_part)?;
                let bit_offset = parse_number(query, bit_part)?;
                if bit_offset > 7 {
                    return Err(bad("bit offset must be 0-7"));
                }
                Ok((byte_offset, bit_offset as u8))
            }
            None => {
                if size == S7AccessSize::Bit {
                    return Err(bad("X access needs a bit offset"));
                }
                Ok((parse_number(query, rest)?, 0))
            }
        }
    }
}

fn parse_number(query: &str, digits: &str) -> Result<u16> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PlcError::invalid_address(query, "expected a decimal number"));
    }
    digits
        .parse::<u16>()
        .map_err(|_| PlcError::invalid_address(query, "number out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> Result<S7Field> {
        S7FieldHandler::new().parse(query)
    }

    #[test]
    fn test_data_block_word() {
        let field = parse("DB1.DBW4").unwrap();
        assert_eq!(field.area, S7Area::DataBlock(1));
        assert_eq!(field.size, S7AccessSize::Word);
        assert_eq!(field.byte_offset, 4);
        assert_eq!(field.bit_offset, 0);
        assert_eq!(field.data_type, None);
    }

    #[test]
    fn test_data_block_bit_with_percent() {
        let field = parse("%DB10.DBX2.5").unwrap();
        assert_eq!(field.area, S7Area::DataBlock(10));
        assert_eq!(field.size, S7AccessSize::Bit);
        assert_eq!(field.byte_offset, 2);
        assert_eq!(field.bit_offset, 5);
    }

    #[test]
    fn test_marker_word() {
        let field = parse("%MW100").unwrap();
        assert_eq!(field.area, S7Area::Marker);
        assert_eq!(field.size, S7AccessSize::Word);
        assert_eq!(field.byte_offset, 100);
    }

    #[test]
    fn test_input_bit() {
        let field = parse("%IX0.3").unwrap();
        assert_eq!(field.area, S7Area::Input);
        assert_eq!(field.size, S7AccessSize::Bit);
        assert_eq!(field.bit_offset, 3);
    }

    #[test]
    fn test_german_aliases() {
        assert_eq!(parse("%EX0.0").unwrap().area, S7Area::Input);
        assert_eq!(parse("%AB7").unwrap().area, S7Area::Output);
        assert_eq!(parse("%Z5").unwrap().area, S7Area::Counter);
    }

    #[test]
    fn test_timer_and_counter_numbers() {
        let timer = parse("%T17").unwrap();
        assert_eq!(timer.area, S7Area::Timer);
        assert_eq!(timer.byte_offset, 17);
        let counter = parse("%C3").unwrap();
        assert_eq!(counter.area, S7Area::Counter);
    }

    #[test]
    fn test_type_suffix() {
        let field = parse("%DB1.DBW4:INT").unwrap();
        assert_eq!(field.data_type, Some(S7DataType::Int));
        let field = parse("%QB7:BYTE").unwrap();
        assert_eq!(field.area, S7Area::Output);
        assert_eq!(field.data_type, Some(S7DataType::Byte));
    }

    #[test]
    fn test_rejects_malformed_addresses() {
        for query in [
            "",
            "%",
            "DB1",
            "DB1.W4",
            "DB1.DBQ4",
            "%MX100",
            "%MW1.5",
            "%IX0.9",
            "%G4",
            "%DB1.DBW4:FLOAT",
            "%MWabc",
        ] {
            let err = parse(query).unwrap_err();
            assert!(
                matches!(err, PlcError::InvalidAddress { .. }),
                "query {:?} produced {:?}",
                query,
                err
            );
        }
    }
}
