//! Node command - run a sensor node on UDP.

use anyhow::{Context, Result};
use lightmon_node::{LogStore, LoggingIndicator, ServerRuntime, UdpTransport};
use std::path::Path;

use crate::config::Config;

/// Run the node command.
pub async fn run(config: &Config, data_dir: &Path) -> Result<()> {
    let address = config.address();
    let transport = UdpTransport::bind(address, config.node.bind, config.peers()?)
        .await
        .context("Failed to bind UDP socket")?;
    let local = transport.local_socket()?;

    let sensor = config.sensor()?;
    let store = LogStore::in_dir(data_dir);

    let runtime = ServerRuntime::new(
        transport,
        sensor,
        LoggingIndicator,
        config.server_settings(),
    )
    .publish_to(config.publish())
    .with_store(store.clone())
    .await
    .context("Failed to load result log")?;

    println!("Sensor node ready!");
    println!();
    println!("  Address:    {}", address);
    println!("  Listening:  {}", local);
    println!("  Publish to: {}", config.publish());
    println!("  Result log: {}", store.path().display());
    println!("  Threshold:  {}", runtime.server().threshold());
    println!();
    println!("Press Ctrl+C to stop.");

    let server = runtime
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
            }
        })
        .await?;

    println!();
    println!(
        "Stopped with {} logged result(s).",
        server.log().written_count()
    );

    Ok(())
}
