//! Verify Command Handler
//!
//! Handles the `verify` subcommand: re-digests every file listed in
//! `checksums.sha512` and reports differences.

use crate::checksum;
use crate::error::{Result, TapeImgrError};
use std::path::PathBuf;
use tracing::info;

pub async fn execute(dir: PathBuf) -> Result<()> {
    info!("Verifying checksums in {}", dir.display());

    let report = tokio::task::spawn_blocking(move || checksum::verify_manifest(&dir))
        .await
        .map_err(|e| TapeImgrError::Generic(anyhow::anyhow!("verify task failed: {}", e)))??;

    for name in &report.verified {
        println!("  ✅ {}", name);
    }
    for name in &report.mismatched {
        println!("  ❌ {} (checksum mismatch)", name);
    }
    for name in &report.missing {
        println!("  ❌ {} (missing)", name);
    }

    if report.passed() {
        println!("\n✅ All {} file(s) verified", report.verified.len());
        Ok(())
    } else {
        Err(TapeImgrError::Generic(anyhow::anyhow!(
            "{} mismatched, {} missing",
            report.mismatched.len(),
            report.missing.len()
        )))
    }
}
