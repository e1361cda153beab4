//! Evaluation primitives for declarative message layouts.
//!
//! A protocol message is a tree of typed fields; each message type
//! provides a parse procedure, a serialize procedure and a
//! length-in-bits procedure built from the helpers in this module. The
//! helpers implement the per-kind field semantics (const, reserved,
//! implicit, optional, arrays, padding, checksum, manual) on top of the
//! [`ReadBuffer`]/[`WriteBuffer`] cursors, and attach the failing field's
//! name to every error so that a parse failure reads like
//! `error in field 'tpduCode': ...`.
//!
//! Messages that participate in a discriminated union parse through
//! [`parse_discriminated`], which restores the read cursor when no
//! variant matches the discriminator value.
//!
//! Two field kinds need no helper. *Virtual* fields never touch the
//! wire; they are derived accessors on the message type (a
//! discriminator accessor, a computed data length). *Manual* fields are
//! opaque to the engine; the message supplies its own read and write
//! closures through [`read_field`]/[`write_field`], typically over raw
//! bytes.
//!
//! Writes are transactional at field granularity: [`write_field`]
//! rolls the write cursor back to the start of the failed field, so a
//! partially written field never leaks into the output.

use std::fmt;

use tracing::warn;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{PlcError, Result};

/// A serializable protocol message.
///
/// Parsing is provided as an inherent associated function on each
/// message type because parse signatures differ (some variants receive
/// length or rest arguments from their parent).
pub trait Message: fmt::Debug + Send {
    /// Writes the message to a bit-level write cursor.
    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()>;

    /// Returns the exact serialized size in bits.
    fn length_in_bits(&self) -> usize;

    /// Returns the serialized size in whole bytes.
    fn length_in_bytes(&self) -> usize {
        (self.length_in_bits() + 7) / 8
    }

    /// Serializes the message into a fresh byte vector.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut wb = WriteBuffer::new();
        self.serialize(&mut wb)?;
        Ok(wb.into_bytes())
    }
}

/// Reads one field, attaching `name` to any error.
pub fn read_field<'a, T>(
    name: &'static str,
    rb: &mut ReadBuffer<'a>,
    f: impl FnOnce(&mut ReadBuffer<'a>) -> Result<T>,
) -> Result<T> {
    f(rb).map_err(|e| e.in_field(name))
}

/// Writes one field, attaching `name` to any error and rolling the
/// cursor back to the start of the field on failure.
pub fn write_field(
    name: &'static str,
    wb: &mut WriteBuffer,
    f: impl FnOnce(&mut WriteBuffer) -> Result<()>,
) -> Result<()> {
    let start = wb.pos();
    f(wb).map_err(|e| {
        wb.rollback(start);
        e.in_field(name)
    })
}

/// Reads a constant field and verifies it against the declared value.
///
/// A mismatch is a [`PlcError::ProtocolViolation`].
pub fn read_const_field<'a, T>(
    name: &'static str,
    rb: &mut ReadBuffer<'a>,
    expected: T,
    f: impl FnOnce(&mut ReadBuffer<'a>) -> Result<T>,
) -> Result<T>
where
    T: PartialEq + fmt::Debug,
{
    let actual = read_field(name, rb, f)?;
    if actual != expected {
        return Err(PlcError::protocol_violation(format!(
            "const field '{}': expected {:?}, got {:?}",
            name, expected, actual
        )));
    }
    Ok(actual)
}

/// Reads a reserved field of `bits` width and logs a warning if the
/// value deviates from the expected reserved value.
pub fn read_reserved_field(
    name: &'static str,
    rb: &mut ReadBuffer<'_>,
    bits: u32,
    expected: u64,
) -> Result<()> {
    let actual = read_field(name, rb, |rb| rb.read_u64(bits))?;
    if actual != expected {
        warn!(
            field = name,
            expected, actual, "reserved field carries unexpected value"
        );
    }
    Ok(())
}

/// Writes the expected value of a reserved field.
pub fn write_reserved_field(
    name: &'static str,
    wb: &mut WriteBuffer,
    bits: u32,
    expected: u64,
) -> Result<()> {
    write_field(name, wb, |wb| wb.write_u64(bits, expected))
}

/// Reads an implicit field and returns its value.
///
/// The value is not stored on the message; on serialization it is
/// recomputed from sibling state and written with [`write_field`].
pub fn read_implicit_field<'a, T>(
    name: &'static str,
    rb: &mut ReadBuffer<'a>,
    f: impl FnOnce(&mut ReadBuffer<'a>) -> Result<T>,
) -> Result<T> {
    read_field(name, rb, f)
}

/// Reads an optional field if `present` holds.
pub fn read_optional_field<'a, T>(
    name: &'static str,
    rb: &mut ReadBuffer<'a>,
    present: bool,
    f: impl FnOnce(&mut ReadBuffer<'a>) -> Result<T>,
) -> Result<Option<T>> {
    if !present {
        return Ok(None);
    }
    read_field(name, rb, f).map(Some)
}

/// Reads exactly `count` array items.
pub fn read_count_array<'a, T>(
    name: &'static str,
    rb: &mut ReadBuffer<'a>,
    count: usize,
    mut item: impl FnMut(&mut ReadBuffer<'a>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(item(rb).map_err(|e| e.in_field(name))?);
    }
    Ok(items)
}

/// Reads array items until exactly `length_bits` have been consumed.
///
/// An item that overshoots the declared length is a
/// [`PlcError::ProtocolViolation`].
pub fn read_length_array<'a, T>(
    name: &'static str,
    rb: &mut ReadBuffer<'a>,
    length_bits: usize,
    mut item: impl FnMut(&mut ReadBuffer<'a>) -> Result<T>,
) -> Result<Vec<T>> {
    let end = rb.pos() + length_bits;
    let mut items = Vec::new();
    while rb.pos() < end {
        items.push(item(rb).map_err(|e| e.in_field(name))?);
    }
    if rb.pos() != end {
        return Err(PlcError::protocol_violation(format!(
            "array field '{}' overran its declared length by {} bit(s)",
            name,
            rb.pos() - end
        )));
    }
    Ok(items)
}

/// Reads array items until `terminated` holds on the last-read item.
pub fn read_terminated_array<'a, T>(
    name: &'static str,
    rb: &mut ReadBuffer<'a>,
    mut item: impl FnMut(&mut ReadBuffer<'a>) -> Result<T>,
    terminated: impl Fn(&T) -> bool,
) -> Result<Vec<T>> {
    let mut items = Vec::new();
    loop {
        let next = item(rb).map_err(|e| e.in_field(name))?;
        let done = terminated(&next);
        items.push(next);
        if done {
            return Ok(items);
        }
    }
}

/// Writes all items of an array field.
pub fn write_array<T>(
    name: &'static str,
    wb: &mut WriteBuffer,
    items: &[T],
    mut item: impl FnMut(&mut WriteBuffer, &T) -> Result<()>,
) -> Result<()> {
    write_field(name, wb, |wb| {
        for it in items {
            item(wb, it)?;
        }
        Ok(())
    })
}

/// Reads and discards `count` padding bytes, warning when a byte
/// deviates from the expected fill value.
pub fn read_padding_field(
    name: &'static str,
    rb: &mut ReadBuffer<'_>,
    count: usize,
    expected: u8,
) -> Result<()> {
    let bytes = read_field(name, rb, |rb| rb.read_bytes(count))?;
    if bytes.iter().any(|&b| b != expected) {
        warn!(field = name, expected, "padding bytes carry unexpected values");
    }
    Ok(())
}

/// Writes `count` padding bytes of the expected fill value.
pub fn write_padding_field(
    name: &'static str,
    wb: &mut WriteBuffer,
    count: usize,
    expected: u8,
) -> Result<()> {
    write_field(name, wb, |wb| wb.write_bytes(&vec![expected; count]))
}

/// Verifies a declared checksum against the recomputed value.
pub fn check_checksum(name: &'static str, declared: u64, computed: u64) -> Result<()> {
    if declared != computed {
        return Err(PlcError::protocol_violation(format!(
            "checksum field '{}': declared 0x{:X}, computed 0x{:X}",
            name, declared, computed
        )));
    }
    Ok(())
}

/// Parses a discriminated union, restoring the read cursor when the
/// discriminator matches no variant.
///
/// The closure reads the discriminator field(s) and dispatches to the
/// matching variant's parse procedure; it reports an unmatched value via
/// [`unknown_discriminator`].
pub fn parse_discriminated<'a, T>(
    rb: &mut ReadBuffer<'a>,
    f: impl FnOnce(&mut ReadBuffer<'a>) -> Result<T>,
) -> Result<T> {
    let start = rb.pos();
    match f(rb) {
        Err(e @ PlcError::UnknownDiscriminator { .. }) => {
            rb.reset(start);
            Err(e)
        }
        other => other,
    }
}

/// Builds the error for a discriminator value with no matching variant.
pub fn unknown_discriminator(message_type: &'static str, value: u64) -> PlcError {
    PlcError::UnknownDiscriminator {
        message_type,
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_field_match_and_mismatch() {
        let data = [0x03, 0x04];
        let mut rb = ReadBuffer::new(&data);
        assert_eq!(
            read_const_field("protocolId", &mut rb, 0x03u8, |rb| rb.read_u8(8)).unwrap(),
            0x03
        );
        let err = read_const_field("protocolId", &mut rb, 0x03u8, |rb| rb.read_u8(8)).unwrap_err();
        assert!(matches!(err, PlcError::ProtocolViolation { .. }));
        assert!(err.to_string().contains("protocolId"));
    }

    #[test]
    fn test_field_error_carries_name() {
        let mut rb = ReadBuffer::new(&[]);
        let err = read_field("tpduCode", &mut rb, |rb| rb.read_u8(8)).unwrap_err();
        assert!(err.to_string().starts_with("error in field 'tpduCode'"));
    }

    #[test]
    fn test_write_field_rolls_back_on_failure() {
        let mut wb = WriteBuffer::new();
        wb.write_u8(8, 0xAA).unwrap();
        let before = wb.pos();
        let err = write_field("count", &mut wb, |wb| {
            wb.write_u8(8, 0x55)?;
            wb.write_u8(4, 0xFF) // overflow
        })
        .unwrap_err();
        assert!(matches!(err, PlcError::Field { .. }));
        assert_eq!(wb.pos(), before);
        assert_eq!(wb.bytes(), &[0xAA]);
    }

    #[test]
    fn test_count_array_zero_items() {
        let data = [0xFF];
        let mut rb = ReadBuffer::new(&data);
        let items = read_count_array("data", &mut rb, 0, |rb| rb.read_u8(8)).unwrap();
        assert!(items.is_empty());
        assert_eq!(rb.pos(), 0);
    }

    #[test]
    fn test_length_array_consumes_exact_bits() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut rb = ReadBuffer::new(&data);
        let items = read_length_array("parameters", &mut rb, 24, |rb| rb.read_u8(8)).unwrap();
        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(rb.pos(), 24);
    }

    #[test]
    fn test_length_array_overrun_rejected() {
        let data = [0x01, 0x02, 0x03];
        let mut rb = ReadBuffer::new(&data);
        // A declared length of 12 bits cannot be met by 8-bit items.
        let err = read_length_array("parameters", &mut rb, 12, |rb| rb.read_u8(8)).unwrap_err();
        assert!(matches!(err, PlcError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_terminated_array_stops_on_predicate() {
        let data = [0x10, 0x20, 0x80, 0x30];
        let mut rb = ReadBuffer::new(&data);
        let items =
            read_terminated_array("samples", &mut rb, |rb| rb.read_u8(8), |b| b & 0x80 != 0)
                .unwrap();
        assert_eq!(items, vec![0x10, 0x20, 0x80]);
        assert_eq!(rb.pos(), 24);
    }

    #[test]
    fn test_optional_field_absent() {
        let data = [0xAB];
        let mut rb = ReadBuffer::new(&data);
        let value = read_optional_field("payload", &mut rb, false, |rb| rb.read_u8(8)).unwrap();
        assert!(value.is_none());
        assert_eq!(rb.pos(), 0);
    }

    #[test]
    fn test_padding_round_trip() {
        let mut wb = WriteBuffer::new();
        write_padding_field("pad", &mut wb, 3, 0x00).unwrap();
        assert_eq!(wb.bytes(), &[0, 0, 0]);
        let bytes = wb.into_bytes();
        let mut rb = ReadBuffer::new(&bytes);
        read_padding_field("pad", &mut rb, 3, 0x00).unwrap();
        assert_eq!(rb.remaining_bits(), 0);
    }

    #[test]
    fn test_checksum_mismatch() {
        assert!(check_checksum("crc", 0x12, 0x12).is_ok());
        let err = check_checksum("crc", 0x12, 0x34).unwrap_err();
        assert!(matches!(err, PlcError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_unknown_discriminator_restores_cursor() {
        let data = [0x7F, 0x01];
        let mut rb = ReadBuffer::new(&data);
        let err = parse_discriminated(&mut rb, |rb| {
            let code = read_field("code", rb, |rb| rb.read_u8(8))?;
            Err::<(), _>(unknown_discriminator("TestUnion", u64::from(code)))
        })
        .unwrap_err();
        assert!(matches!(err, PlcError::UnknownDiscriminator { value: 0x7F, .. }));
        assert_eq!(rb.pos(), 0);
    }

    #[test]
    fn test_other_errors_do_not_reset_cursor() {
        let data = [0x01, 0x02];
        let mut rb = ReadBuffer::new(&data);
        let _ = parse_discriminated(&mut rb, |rb| {
            rb.read_u8(8)?;
            Err::<(), _>(PlcError::protocol_violation("bad body"))
        });
        assert_eq!(rb.pos(), 8);
    }
}
