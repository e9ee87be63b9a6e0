//! Status Command Handler
//!
//! Handles the `status` subcommand for querying the tape drive.

use crate::error::Result;
use crate::tape::{MtTape, TapeDevice};
use tracing::info;

pub async fn execute(device: String) -> Result<()> {
    info!("Checking device status: {}", device);

    let status = tokio::task::spawn_blocking(move || MtTape::new(&device).status())
        .await
        .map_err(|e| anyhow::anyhow!("status task failed: {}", e))??;

    println!("📼 Tape status (exit code {}):", status.code);
    for line in status.report.lines() {
        println!("  {}", line);
    }

    Ok(())
}
