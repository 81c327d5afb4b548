//! Write a starting config file.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::SAMPLE_CONFIG;

/// Run the init command.
pub async fn run(path: &Path, address: Option<u16>, force: bool) -> Result<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) && !force {
        anyhow::bail!(
            "Config already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(address) = address {
        if address == 0 || address == u16::MAX {
            anyhow::bail!("Address {address} is reserved");
        }
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create config directory")?;
    }

    tokio::fs::write(path, render(address))
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Config written to {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Add peer sockets under [peers]");
    println!("  2. Sensor devices: lightmon node");
    println!("  3. Coordinator:    lightmon coordinator");

    Ok(())
}

/// Sample config with `address` substituted.
fn render(address: Option<u16>) -> String {
    match address {
        Some(address) => {
            SAMPLE_CONFIG.replacen("address = 1\n", &format!("address = {address}\n"), 1)
        }
        None => SAMPLE_CONFIG.to_string(),
    }
}
