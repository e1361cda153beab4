//! Error types shared by every layer of the library.
//!
//! This module defines the [`PlcError`] enum and the [`Result`] type alias
//! used throughout the library for error handling.
//!
//! # Error Categories
//!
//! Errors are categorized into several types:
//!
//! - **Setup errors** - URL parsing, registry lookups and transport
//!   selection; surfaced synchronously on the connect channel
//! - **Buffer errors** - bit-cursor problems while reading or writing a
//!   frame; callers normally propagate these
//! - **Parser errors** - protocol violations and unknown discriminators;
//!   the offending message is discarded, the connection stays open
//! - **Lifecycle errors** - expectation timeouts and cancellations
//! - **Transport errors** - I/O failures and closed carriers; fatal for
//!   the owning connection
//!
//! # Example
//!
//! ```
//! use plclink::PlcError;
//!
//! let err = PlcError::not_found("driver", "xyz");
//! assert_eq!(err.to_string(), "no driver registered for 'xyz'");
//! ```

use std::io;
use thiserror::Error;

/// Result type alias used across the library.
pub type Result<T> = std::result::Result<T, PlcError>;

/// Errors that can occur while resolving, framing, parsing or driving a
/// PLC connection.
#[derive(Debug, Error)]
pub enum PlcError {
    /// The connection string could not be parsed as a URL.
    #[error("invalid connection url '{url}': {reason}")]
    InvalidUrl {
        /// The offending connection string.
        url: String,
        /// Description of the parse failure.
        reason: String,
    },

    /// Neither the connection string nor the driver named a transport.
    #[error("no transport specified and no default defined by driver")]
    NoTransport,

    /// A registry lookup failed.
    #[error("no {kind} registered for '{name}'")]
    NotFound {
        /// What was looked up (`"driver"` or `"transport"`).
        kind: &'static str,
        /// The key that missed.
        name: String,
    },

    /// A driver option carried an unusable value.
    #[error("invalid option '{option}': {reason}")]
    InvalidOption {
        /// Name of the offending option.
        option: String,
        /// Description of why the value is unusable.
        reason: String,
    },

    /// A PLC field address string failed syntactic validation.
    #[error("invalid field address '{address}': {reason}")]
    InvalidAddress {
        /// The offending address string.
        address: String,
        /// Description of the problem.
        reason: String,
    },

    /// The buffer was exhausted mid-field.
    #[error("buffer truncated: needed {needed} more bit(s), {available} available")]
    Truncated {
        /// Bits the operation still needed.
        needed: usize,
        /// Bits left in the buffer.
        available: usize,
    },

    /// A byte-aligned operation was issued on a non-aligned cursor.
    #[error("cursor not byte aligned at bit {pos}")]
    Alignment {
        /// Bit position of the cursor when the operation was issued.
        pos: usize,
    },

    /// A value does not fit the declared field width.
    #[error("value {value} does not fit in {bits} bit(s)")]
    Overflow {
        /// The value that overflowed (sign-extended into `u64` for signed
        /// fields).
        value: u64,
        /// Declared width in bits.
        bits: u32,
    },

    /// A constant or checksum field did not match, or an assertion failed.
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// Description of the violation.
        reason: String,
    },

    /// A discriminator value matched no variant of the union.
    #[error("unknown discriminator 0x{value:02X} for {message_type}")]
    UnknownDiscriminator {
        /// The discriminated message type being parsed.
        message_type: &'static str,
        /// The unmatched discriminator value.
        value: u64,
    },

    /// Context wrapper naming the field a nested error occurred in.
    #[error("error in field '{field}': {source}")]
    Field {
        /// Name of the field being read or written.
        field: &'static str,
        /// The underlying error.
        source: Box<PlcError>,
    },

    /// An expectation's deadline passed before a matching message arrived.
    #[error("request timed out")]
    Timeout,

    /// A pending operation was cancelled by its owner.
    #[error("request cancelled")]
    Cancelled,

    /// The transport closed underneath the connection.
    #[error("transport closed")]
    TransportClosed,

    /// Discovery failed in a specific driver.
    #[error("error running discovery on driver '{driver}': {source}")]
    Discovery {
        /// Protocol name of the failing driver.
        driver: String,
        /// The underlying error.
        source: Box<PlcError>,
    },

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PlcError {
    /// Creates a new `InvalidUrl` error.
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a new `NotFound` error for a registry lookup.
    ///
    /// # Example
    ///
    /// ```
    /// use plclink::PlcError;
    ///
    /// let err = PlcError::not_found("transport", "serial");
    /// ```
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates a new `InvalidOption` error.
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidAddress` error.
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `ProtocolViolation` error.
    ///
    /// # Example
    ///
    /// ```
    /// use plclink::PlcError;
    ///
    /// let err = PlcError::protocol_violation("magic byte mismatch");
    /// ```
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Wraps an error with the name of the field it occurred in.
    pub fn in_field(self, field: &'static str) -> Self {
        Self::Field {
            field,
            source: Box::new(self),
        }
    }

    /// Returns `true` if the owning connection cannot recover from this
    /// error and must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportClosed | Self::Io(_))
    }
}
