//! Example: Inspecting wire frames without a device
//!
//! Run with: cargo run --example inspect_frames
//!
//! This example demonstrates:
//! - Building protocol messages by hand
//! - Serializing them through the bit-level codec engine
//! - The ASCII-box debug rendering

use plclink::knx::{Apdu, ApduData, ApduDataExt, ApduService};
use plclink::s7::messages::{CotpPacket, S7Message, TpktPacket};
use plclink::{Message, ReadBuffer};

fn main() -> plclink::Result<()> {
    // An S7 setup-communication request, as it would go out on the wire.
    let setup = TpktPacket::new(CotpPacket::data(S7Message::setup_communication(
        1, 8, 8, 1024,
    )));
    let bytes = setup.to_bytes()?;
    println!("setup communication ({} bytes):", bytes.len());
    for chunk in bytes.chunks(16) {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("  {}", hex.join(" "));
    }
    println!("{}\n", setup);

    // Parse it back: the codec engine consumes exactly the bits it wrote.
    let mut rb = ReadBuffer::new(&bytes);
    let parsed = TpktPacket::parse(&mut rb)?;
    assert_eq!(parsed, setup);
    println!("round trip ok, {} bits consumed\n", rb.pos());

    // A KNX authorize request through the extended APCI table.
    let apdu = Apdu {
        numbered: true,
        counter: 0,
        service: ApduService::Data(ApduData::Other(ApduDataExt::AuthorizeRequest {
            level: 0,
            data: [0x12, 0x34, 0x56, 0x78],
        })),
    };
    println!("knx authorize request: {:02x?}", apdu.to_bytes()?);
    println!("{}", apdu);
    Ok(())
}
