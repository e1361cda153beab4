//! KNX application-layer message model.
//!
//! The APDU tables of the KNX application layer, expressed as tagged
//! sums over the codec engine: a 1-bit control discriminator at the
//! top, 2-bit control codes, the 4-bit APCI data table and the 6-bit
//! extended APCI table behind `ApduDataOther`. These are the densest
//! discriminated unions in the library and double as the codec engine's
//! workout: reserved fields, implicit counts, fixed- and length-driven
//! arrays, and sub-byte integers all appear here.

pub mod apdu;

pub use apdu::{Apdu, ApduControl, ApduData, ApduDataExt, ApduService};
