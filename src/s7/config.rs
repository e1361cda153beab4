//! S7 driver configuration parsed from connection-string options.
//!
//! The query string of an S7 connection URL carries the addressing of
//! the CPU inside the chassis (`rack`, `slot`) plus the negotiation
//! parameters for the setup-communication handshake. Everything has a
//! default matching a single-CPU S7-300 station, so `s7://10.0.0.1`
//! works out of the box.

use std::time::Duration;

use crate::error::{PlcError, Result};
use crate::s7::messages::CotpTpduSize;
use crate::transport::{option_parse, Options};

/// Default timeout for one request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Parsed S7 connection configuration.
#[derive(Debug, Clone)]
pub struct S7Configuration {
    /// Rack the CPU sits in (0-7).
    pub rack: u8,
    /// Slot of the CPU inside the rack (0-31).
    pub slot: u8,
    /// Calling TSAP announced to the device.
    pub local_tsap: u16,
    /// Maximum parallel jobs proposed for the caller side.
    pub max_amq_caller: u16,
    /// Maximum parallel jobs proposed for the callee side.
    pub max_amq_callee: u16,
    /// PDU length proposed during setup communication.
    pub pdu_length: u16,
    /// COTP TPDU size proposed during connection setup.
    pub tpdu_size: CotpTpduSize,
    /// Timeout for one request/response exchange.
    pub request_timeout: Duration,
}

impl Default for S7Configuration {
    fn default() -> Self {
        Self {
            rack: 0,
            slot: 1,
            local_tsap: 0x0100,
            max_amq_caller: 8,
            max_amq_callee: 8,
            pdu_length: 1024,
            tpdu_size: CotpTpduSize::Size1024,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl S7Configuration {
    /// Parses the configuration from connection-string options.
    ///
    /// Unknown options are ignored; known options with unusable values
    /// fail with [`PlcError::InvalidOption`].
    pub fn from_options(options: &Options) -> Result<Self> {
        let mut configuration = Self::default();
        if let Some(rack) = option_parse::<u8>(options, "rack")? {
            if rack > 7 {
                return Err(PlcError::invalid_option("rack", "must be 0-7"));
            }
            configuration.rack = rack;
        }
        if let Some(slot) = option_parse::<u8>(options, "slot")? {
            if slot > 31 {
                return Err(PlcError::invalid_option("slot", "must be 0-31"));
            }
            configuration.slot = slot;
        }
        if let Some(local_tsap) = option_parse::<u16>(options, "localTsap")? {
            configuration.local_tsap = local_tsap;
        }
        if let Some(max_amq_caller) = option_parse::<u16>(options, "maxAmqCaller")? {
            configuration.max_amq_caller = max_amq_caller;
        }
        if let Some(max_amq_callee) = option_parse::<u16>(options, "maxAmqCallee")? {
            configuration.max_amq_callee = max_amq_callee;
        }
        if let Some(pdu_length) = option_parse::<u16>(options, "pduLength")? {
            configuration.pdu_length = pdu_length;
        }
        if let Some(timeout_ms) = option_parse::<u64>(options, "requestTimeoutMs")? {
            configuration.request_timeout = Duration::from_millis(timeout_ms);
        }
        Ok(configuration)
    }

    /// Called TSAP derived from rack and slot: connection type PG in the
    /// high byte, `rack * 0x20 + slot` in the low byte.
    pub fn remote_tsap(&self) -> u16 {
        0x0100 | (u16::from(self.rack) << 5) | u16::from(self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> Options {
        let mut map = Options::new();
        for (k, v) in pairs {
            map.insert((*k).to_string(), vec![(*v).to_string()]);
        }
        map
    }

    #[test]
    fn test_defaults_without_options() {
        let configuration = S7Configuration::from_options(&Options::new()).unwrap();
        assert_eq!(configuration.rack, 0);
        assert_eq!(configuration.slot, 1);
        assert_eq!(configuration.pdu_length, 1024);
        assert_eq!(configuration.remote_tsap(), 0x0101);
    }

    #[test]
    fn test_rack_and_slot_from_options() {
        let configuration =
            S7Configuration::from_options(&options(&[("rack", "2"), ("slot", "3")])).unwrap();
        assert_eq!(configuration.rack, 2);
        assert_eq!(configuration.slot, 3);
        assert_eq!(configuration.remote_tsap(), 0x0100 | (2 << 5) | 3);
    }

    #[test]
    fn test_rack_out_of_range_rejected() {
        let err = S7Configuration::from_options(&options(&[("rack", "8")])).unwrap_err();
        assert!(matches!(err, PlcError::InvalidOption { .. }));
    }

    #[test]
    fn test_unparsable_option_rejected() {
        let err = S7Configuration::from_options(&options(&[("slot", "three")])).unwrap_err();
        assert!(matches!(err, PlcError::InvalidOption { .. }));
    }

    #[test]
    fn test_unknown_options_ignored() {
        let configuration =
            S7Configuration::from_options(&options(&[("defaultTcpPort", "102")])).unwrap();
        assert_eq!(configuration.rack, 0);
    }
}
