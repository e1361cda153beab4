//! Example: Connecting to an S7 PLC
//!
//! Run with: cargo run --example simple_connect
//!
//! This example demonstrates:
//! - Registering drivers and transports at startup
//! - Resolving a connection string through the driver manager
//! - Pinging and closing the connection

use std::sync::Arc;

use plclink::transport::TcpTransport;
use plclink::{DriverManager, S7Driver};

#[tokio::main]
async fn main() -> plclink::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plclink=debug".into()),
        )
        .init();

    // =========================================================================
    // Assembly root: register everything once
    // =========================================================================

    let manager = DriverManager::new();
    manager.register_driver(Arc::new(S7Driver::new()));
    manager.register_transport(Arc::new(TcpTransport::new()));

    println!("drivers:    {:?}", manager.list_driver_names());
    println!("transports: {:?}", manager.list_transport_names());

    // =========================================================================
    // Validate a field address without touching the network
    // =========================================================================

    let driver = manager.get_driver("s7")?;
    driver.check_query("%DB1.DBW4")?;
    println!("address %DB1.DBW4 is well-formed");

    // =========================================================================
    // Connect (adjust the host to your device)
    // =========================================================================

    let connection = manager
        .get_connection("s7://192.168.0.10?rack=0&slot=1")
        .wait()
        .await?;

    println!("connected: {}", connection.protocol_code());

    connection.ping().await?;
    println!("device answered the ping");

    connection.close().await?;
    Ok(())
}
